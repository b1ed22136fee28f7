//! HTTP + WebSocket front of the proximity-voice relay: bulk position
//! ingest, per-tick nearby broadcast, and WebRTC signaling between clients.

pub mod broadcast;
pub mod client;
pub mod handlers;
pub mod server;

pub use client::ClientRegistry;
pub use server::{start, RelayState, ServerConfig, ServerHandle};
