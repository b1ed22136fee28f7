//! Wire protocol: the ingest payload posted by the game-server plugin and
//! the JSON frames exchanged with voice clients over WebSocket.
//!
//! Frames are internally tagged on `type`. WebRTC sdp/candidate payloads are
//! opaque — the relay routes them and never looks inside.

use serde::{Deserialize, Serialize};

use crate::ids::{PlayerId, WorldId};
use crate::position::{PlayerPosition, Vec3};

/// Fallback display name when the plugin reports none.
pub const DEFAULT_USERNAME: &str = "Player";

/// Body of `POST /positions`: one full snapshot of every online player.
#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub players: Vec<IngestPlayer>,
}

/// One player record inside an ingest snapshot.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestPlayer {
    pub player_id: PlayerId,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(default)]
    pub world_id: Option<WorldId>,
    #[serde(default)]
    pub username: Option<String>,
}

impl IngestPlayer {
    /// Normalize into the stored form, filling in the sentinel world and
    /// default username.
    pub fn into_entry(self) -> (PlayerId, PlayerPosition) {
        (
            self.player_id,
            PlayerPosition {
                pos: Vec3::new(self.x, self.y, self.z),
                world: self.world_id.unwrap_or_default(),
                username: self.username.unwrap_or_else(|| DEFAULT_USERNAME.to_owned()),
            },
        )
    }
}

/// Client-pushed self-report of the player's own position.
#[derive(Clone, Debug, Deserialize)]
pub struct SelfPosition {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(default, rename = "worldId")]
    pub world_id: Option<WorldId>,
}

/// One audible peer in a `nearby` push. Computed fresh each tick or relay
/// event, never stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NearbyEntry {
    pub id: PlayerId,
    pub username: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub volume: f64,
}

/// Frames a voice client sends to the relay.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "join", rename_all = "camelCase")]
    Join {
        player_id: PlayerId,
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        radius: Option<f64>,
    },

    #[serde(rename = "position")]
    Position {
        #[serde(default)]
        position: Option<SelfPosition>,
        #[serde(default)]
        world: Option<WorldId>,
    },

    #[serde(rename = "speaking")]
    Speaking { speaking: bool },

    #[serde(rename = "webrtc-offer")]
    WebrtcOffer { to: PlayerId, sdp: serde_json::Value },

    #[serde(rename = "webrtc-answer")]
    WebrtcAnswer { to: PlayerId, sdp: serde_json::Value },

    #[serde(rename = "webrtc-ice")]
    WebrtcIce {
        to: PlayerId,
        candidate: serde_json::Value,
    },

    /// Application-level heartbeat reply; accepted and ignored.
    #[serde(rename = "pong")]
    Pong,
}

/// Frames the relay sends to voice clients.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "joined", rename_all = "camelCase")]
    Joined { player_id: PlayerId, debug: JoinDebug },

    #[serde(rename = "nearby")]
    Nearby { players: Vec<NearbyEntry> },

    #[serde(rename = "speaking", rename_all = "camelCase")]
    Speaking { player_id: PlayerId, speaking: bool },

    /// Volume is attached exactly here, so the receiver can size the media
    /// session before the next proximity tick arrives.
    #[serde(rename = "webrtc-offer")]
    WebrtcOffer {
        from: PlayerId,
        sdp: serde_json::Value,
        volume: f64,
    },

    #[serde(rename = "webrtc-answer")]
    WebrtcAnswer {
        from: PlayerId,
        sdp: serde_json::Value,
    },

    #[serde(rename = "webrtc-ice")]
    WebrtcIce {
        from: PlayerId,
        candidate: serde_json::Value,
    },

    #[serde(rename = "left", rename_all = "camelCase")]
    Left { player_id: PlayerId },

    #[serde(rename = "error")]
    Error { message: String },
}

/// Diagnostic counters attached to the `joined` acknowledgment so the plugin
/// operator can tell whether position reports are arriving.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinDebug {
    pub has_position: bool,
    pub total_players: usize,
}
