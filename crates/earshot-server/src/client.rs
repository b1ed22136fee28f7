//! Connection registry and per-connection WebSocket pump.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::DashMap;
use earshot_core::protocol::ServerMessage;
use earshot_core::{PlayerId, PlayerPosition, Vec3, WorldId};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::handlers::{self, ConnCtx};
use crate::server::RelayState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// One registered voice client. The send queue is the only path to its
/// transport; dropping the entry closes the queue and with it, eventually,
/// the connection's writer.
pub struct ConnectedClient {
    pub username: String,
    pub radius: f64,
    /// Best-known coordinates: seeded from the position store at join,
    /// refined by self-reports, re-synced from the store each tick.
    pub position: Option<Vec3>,
    pub world: Option<WorldId>,
    tx: mpsc::Sender<String>,
    epoch: u64,
}

/// Positional state cloned out of the registry, so no shard guard is held
/// while computing proximity or delivering frames.
#[derive(Clone, Debug)]
pub struct ClientSnapshot {
    pub username: String,
    pub radius: f64,
    pub position: Option<Vec3>,
    pub world: Option<WorldId>,
}

/// Registry of all connected voice clients, keyed by player id.
///
/// A later join for the same player replaces the earlier entry; the epoch
/// returned by [`register`](Self::register) lets the replaced connection's
/// teardown recognize it no longer owns the entry.
#[derive(Default)]
pub struct ClientRegistry {
    clients: DashMap<PlayerId, ConnectedClient>,
    next_epoch: AtomicU64,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client, replacing any existing entry for the same player.
    /// Returns the registration epoch to pass back to [`unregister`](Self::unregister).
    pub fn register(
        &self,
        id: PlayerId,
        username: String,
        radius: f64,
        tx: mpsc::Sender<String>,
        seed: Option<&PlayerPosition>,
    ) -> u64 {
        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
        self.clients.insert(
            id,
            ConnectedClient {
                username,
                radius,
                position: seed.map(|p| p.pos),
                world: seed.map(|p| p.world.clone()),
                tx,
                epoch,
            },
        );
        epoch
    }

    /// Remove a client, but only if the entry still belongs to the given
    /// registration. Returns whether an entry was removed — a `false` here
    /// means the player re-joined and the entry is not ours to reap.
    pub fn unregister(&self, id: &PlayerId, epoch: u64) -> bool {
        self.clients.remove_if(id, |_, c| c.epoch == epoch).is_some()
    }

    /// Shallow merge of a client self-report: only supplied fields change.
    pub fn update_position(&self, id: &PlayerId, position: Option<Vec3>, world: Option<WorldId>) {
        if let Some(mut client) = self.clients.get_mut(id) {
            if let Some(pos) = position {
                client.position = Some(pos);
            }
            if let Some(w) = world {
                client.world = Some(w);
            }
        }
    }

    /// Overwrite the fields the position store authoritatively owns
    /// (coordinates and world), preserving everything client-set.
    pub fn sync_from_store(&self, id: &PlayerId, authoritative: &PlayerPosition) {
        if let Some(mut client) = self.clients.get_mut(id) {
            client.position = Some(authoritative.pos);
            client.world = Some(authoritative.world.clone());
        }
    }

    pub fn snapshot(&self, id: &PlayerId) -> Option<ClientSnapshot> {
        self.clients.get(id).map(|c| ClientSnapshot {
            username: c.username.clone(),
            radius: c.radius,
            position: c.position,
            world: c.world.clone(),
        })
    }

    pub fn is_connected(&self, id: &PlayerId) -> bool {
        self.clients.contains_key(id)
    }

    pub fn player_ids(&self) -> Vec<PlayerId> {
        self.clients.iter().map(|e| e.key().clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.clients.len()
    }

    /// Fire-and-forget delivery. A missing client, a full queue, or a closed
    /// queue all drop the frame — the next broadcast tick supersedes it.
    pub fn send_message(&self, id: &PlayerId, msg: &ServerMessage) -> bool {
        let Some(tx) = self.clients.get(id).map(|c| c.tx.clone()) else {
            return false;
        };
        let Ok(json) = serde_json::to_string(msg) else {
            return false;
        };
        match tx.try_send(json) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(player = %id, "Send queue full, dropping frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Best-effort fan-out to every client except `except`.
    pub fn broadcast_except(&self, except: &PlayerId, msg: &ServerMessage) {
        let Ok(json) = serde_json::to_string(msg) else {
            return;
        };
        for entry in self.clients.iter() {
            if entry.key() != except {
                let _ = entry.value().tx.try_send(json.clone());
            }
        }
    }
}

/// Drive one WebSocket connection: spawn the writer pump, dispatch inbound
/// frames, and on any exit (clean close, transport error) run lifecycle
/// cleanup — epoch-gated unregister plus a best-effort `left` fan-out.
pub async fn handle_ws_connection(socket: WebSocket, state: RelayState) {
    let (ws_tx, mut ws_rx) = socket.split();
    let (tx, rx) = mpsc::channel::<String>(state.config.max_send_queue);
    let writer = tokio::spawn(write_pump(ws_tx, rx));

    let mut conn = ConnCtx::new(tx);
    while let Some(Ok(msg)) = ws_rx.next().await {
        match msg {
            WsMessage::Text(text) => handlers::handle_frame(&state, &mut conn, text.as_str()),
            WsMessage::Close(_) => break,
            // axum answers pings itself; transport pongs carry no state here
            _ => {}
        }
    }

    if let Some((player_id, epoch)) = conn.take_joined() {
        if state.registry.unregister(&player_id, epoch) {
            tracing::info!(player = %player_id, "Client disconnected");
            state.registry.broadcast_except(
                &player_id,
                &ServerMessage::Left {
                    player_id: player_id.clone(),
                },
            );
        }
    }

    // Dropping the last sender lets the writer drain and exit.
    drop(conn);
    let _ = writer.await;
}

/// Forward queued frames to the socket, interleaved with keepalive pings.
async fn write_pump(mut ws_tx: SplitSink<WebSocket, WsMessage>, mut rx: mpsc::Receiver<String>) {
    let mut ping = tokio::time::interval(HEARTBEAT_INTERVAL);
    ping.tick().await; // consume first immediate tick

    loop {
        tokio::select! {
            msg = rx.recv() => {
                match msg {
                    Some(text) => {
                        if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = ping.tick() => {
                if ws_tx.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }
}
