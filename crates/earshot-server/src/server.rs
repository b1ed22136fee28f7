use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use earshot_core::protocol::{IngestPlayer, IngestRequest};
use earshot_core::volume::DEFAULT_ATTENUATION;
use earshot_engine::{PositionStore, ProximityEngine};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::broadcast;
use crate::client::{self, ClientRegistry};

/// Server configuration. Everything a deployment can turn; the listening
/// port and broadcast cadence are the only knobs surfaced on the CLI.
pub struct ServerConfig {
    pub port: u16,
    /// Cadence of the nearby broadcast.
    pub broadcast_interval: Duration,
    /// Radius used when a join does not request one.
    pub default_radius: f64,
    /// Upper bound on a client-requested radius.
    pub max_radius: f64,
    /// Decay constant of the distance-to-volume curve.
    pub attenuation: f64,
    /// Distance assumed when annotating an offer and either party has no
    /// known position.
    pub offer_fallback_distance: f64,
    /// Per-client send queue depth; a full queue drops frames.
    pub max_send_queue: usize,
    /// Root for the static client bundle, if served from this process.
    pub public_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 25566,
            broadcast_interval: Duration::from_millis(100),
            default_radius: 32.0,
            max_radius: 128.0,
            attenuation: DEFAULT_ATTENUATION,
            offer_fallback_distance: 32.0,
            max_send_queue: 256,
            public_dir: Some(PathBuf::from("public")),
        }
    }
}

impl ServerConfig {
    /// Clamp a client-requested radius into a usable range; anything
    /// non-finite or non-positive falls back to the default.
    pub fn sanitize_radius(&self, requested: Option<f64>) -> f64 {
        match requested {
            Some(r) if r.is_finite() && r > 0.0 => r.min(self.max_radius),
            _ => self.default_radius,
        }
    }
}

/// Shared state handed to every handler and background task. The stores are
/// injected rather than ambient, so tests assemble one of these with no
/// listener at all.
#[derive(Clone)]
pub struct RelayState {
    pub config: Arc<ServerConfig>,
    pub store: Arc<PositionStore>,
    pub registry: Arc<ClientRegistry>,
    pub engine: Arc<ProximityEngine>,
}

impl RelayState {
    pub fn new(config: ServerConfig) -> Self {
        let store = Arc::new(PositionStore::new());
        let engine = Arc::new(ProximityEngine::new(Arc::clone(&store), config.attenuation));
        Self {
            config: Arc::new(config),
            store,
            registry: Arc::new(ClientRegistry::new()),
            engine,
        }
    }
}

/// Build the axum router with all routes.
pub fn build_router(state: RelayState) -> Router {
    let public_dir = state.config.public_dir.clone();
    let mut router = Router::new()
        .route("/positions", post(ingest_handler))
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .with_state(state);

    if let Some(dir) = public_dir {
        router = router.fallback_service(ServeDir::new(dir));
    }

    router.layer(CorsLayer::permissive())
}

/// Bind, spawn the broadcast timer and the accept loop, and return a handle
/// that keeps both alive.
pub async fn start(config: ServerConfig) -> Result<ServerHandle, std::io::Error> {
    let state = RelayState::new(config);

    let broadcast_handle = broadcast::start(state.clone());

    let addr = format!("0.0.0.0:{}", state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "earshot relay listening");

    let router = build_router(state);
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        _server: server_handle,
        _broadcast: broadcast_handle,
    })
}

/// Handle returned by `start()` — dropping it tears the background tasks down.
pub struct ServerHandle {
    pub port: u16,
    _server: tokio::task::JoinHandle<()>,
    _broadcast: tokio::task::JoinHandle<()>,
}

/// `POST /positions`: one full snapshot from the game-server plugin.
///
/// The body is parsed before the store is touched, so a malformed payload
/// rejects wholesale and readers keep the previous snapshot.
async fn ingest_handler(
    State(state): State<RelayState>,
    body: Bytes,
) -> (StatusCode, Json<serde_json::Value>) {
    let request: IngestRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(e) => {
            tracing::debug!(error = %e, "Rejected ingest payload");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": e.to_string() })),
            );
        }
    };

    let count = state
        .store
        .replace_all(request.players.into_iter().map(IngestPlayer::into_entry));
    tracing::trace!(count, "Ingested position snapshot");

    (StatusCode::OK, Json(json!({ "ok": true, "count": count })))
}

/// Health check with the counters an operator actually asks about.
async fn health_handler(State(state): State<RelayState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "players": state.store.len(),
        "clients": state.registry.count(),
    }))
}

/// WebSocket upgrade for voice clients.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<RelayState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: RelayState) {
    client::handle_ws_connection(socket, state).await;
}
