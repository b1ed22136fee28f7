//! Inbound frame dispatch: join/leave lifecycle, self-reports, speaking
//! fan-out, and the WebRTC signaling relay.

use earshot_core::errors::ProtocolError;
use earshot_core::protocol::{ClientMessage, JoinDebug, ServerMessage, DEFAULT_USERNAME};
use earshot_core::{PlayerId, Vec3};
use tokio::sync::mpsc;

use crate::broadcast;
use crate::server::RelayState;

/// Per-connection state. Replies before `join` go straight to the
/// connection's own send queue; after `join` the registry routes as well.
pub struct ConnCtx {
    tx: mpsc::Sender<String>,
    joined: Option<(PlayerId, u64)>,
}

impl ConnCtx {
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self { tx, joined: None }
    }

    pub fn take_joined(&mut self) -> Option<(PlayerId, u64)> {
        self.joined.take()
    }

    /// Fire-and-forget reply to this connection.
    fn reply(&self, msg: &ServerMessage) {
        if let Ok(json) = serde_json::to_string(msg) {
            let _ = self.tx.try_send(json);
        }
    }

    fn reply_error(&self, err: &ProtocolError) {
        tracing::debug!(kind = err.error_kind(), "Rejected client frame");
        self.reply(&ServerMessage::Error {
            message: err.to_string(),
        });
    }
}

/// Dispatch one raw text frame. Malformed or out-of-order frames produce an
/// `error` reply and leave the connection open.
pub fn handle_frame(state: &RelayState, conn: &mut ConnCtx, raw: &str) {
    let msg = match serde_json::from_str::<ClientMessage>(raw) {
        Ok(msg) => msg,
        Err(e) => {
            conn.reply_error(&ProtocolError::Malformed(e.to_string()));
            return;
        }
    };

    match msg {
        ClientMessage::Join {
            player_id,
            username,
            radius,
        } => handle_join(state, conn, player_id, username, radius),

        ClientMessage::Position { position, world } => {
            let Some(id) = require_joined(conn, "position") else {
                return;
            };
            let pos = position.as_ref().map(|p| Vec3::new(p.x, p.y, p.z));
            let world = position.and_then(|p| p.world_id).or(world);
            state.registry.update_position(&id, pos, world);
        }

        ClientMessage::Speaking { speaking } => {
            let Some(id) = require_joined(conn, "speaking") else {
                return;
            };
            state.registry.broadcast_except(
                &id,
                &ServerMessage::Speaking {
                    player_id: id.clone(),
                    speaking,
                },
            );
        }

        ClientMessage::WebrtcOffer { to, sdp } => {
            let Some(from) = require_joined(conn, "webrtc-offer") else {
                return;
            };
            relay_offer(state, &from, &to, sdp);
        }

        ClientMessage::WebrtcAnswer { to, sdp } => {
            let Some(from) = require_joined(conn, "webrtc-answer") else {
                return;
            };
            state
                .registry
                .send_message(&to, &ServerMessage::WebrtcAnswer { from, sdp });
        }

        ClientMessage::WebrtcIce { to, candidate } => {
            let Some(from) = require_joined(conn, "webrtc-ice") else {
                return;
            };
            state
                .registry
                .send_message(&to, &ServerMessage::WebrtcIce { from, candidate });
        }

        ClientMessage::Pong => {}
    }
}

fn handle_join(
    state: &RelayState,
    conn: &mut ConnCtx,
    player_id: PlayerId,
    username: Option<String>,
    radius: Option<f64>,
) {
    let radius = state.config.sanitize_radius(radius);
    let seed = state.store.get(&player_id);
    let username = username
        .or_else(|| seed.as_ref().map(|p| p.username.clone()))
        .unwrap_or_else(|| DEFAULT_USERNAME.to_owned());

    let has_position = seed.is_some();
    let debug = JoinDebug {
        has_position,
        total_players: state.store.len(),
    };

    // Acknowledge before registering: once registered, the broadcast timer
    // may enqueue frames, and the ack must stay first on the wire.
    conn.reply(&ServerMessage::Joined {
        player_id: player_id.clone(),
        debug,
    });

    let epoch = state.registry.register(
        player_id.clone(),
        username,
        radius,
        conn.tx.clone(),
        seed.as_ref(),
    );
    conn.joined = Some((player_id.clone(), epoch));
    tracing::info!(player = %player_id, radius, has_position, "Client joined");

    // One out-of-band push so the client hears the world before the next tick.
    broadcast::push_nearby(state, &player_id);
}

/// Forward an offer envelope, annotated with the pairing volume so the
/// receiver can size the media session before the next proximity tick.
fn relay_offer(state: &RelayState, from: &PlayerId, to: &PlayerId, sdp: serde_json::Value) {
    if !state.registry.is_connected(to) {
        // Target may be mid-reconnect; the initiator's peer-connection layer
        // owns timeout and retry.
        tracing::debug!(from = %from, to = %to, "Dropping offer for unknown target");
        return;
    }

    let volume = state.engine.pair_volume(
        resolve_coords(state, from),
        resolve_coords(state, to),
        state.config.offer_fallback_distance,
    );
    state.registry.send_message(
        to,
        &ServerMessage::WebrtcOffer {
            from: from.clone(),
            sdp,
            volume,
        },
    );
}

/// A party's coordinates for offer-volume purposes: latest snapshot first,
/// registry cache second.
fn resolve_coords(state: &RelayState, id: &PlayerId) -> Option<Vec3> {
    let fallback = state
        .registry
        .snapshot(id)
        .and_then(|s| s.position.map(|pos| (pos, s.world.unwrap_or_default())));
    state.engine.resolve(id, fallback).map(|(pos, _)| pos)
}

/// The player id this connection joined as, or an `error` reply naming the
/// offending message type.
fn require_joined(conn: &ConnCtx, what: &'static str) -> Option<PlayerId> {
    match &conn.joined {
        Some((id, _)) => Some(id.clone()),
        None => {
            conn.reply_error(&ProtocolError::NotJoined(what));
            None
        }
    }
}
