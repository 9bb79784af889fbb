//! # Shared Protocol Library
//!
//! This crate contains the wire protocol and the normative constants shared by
//! the world server, its test client, and the integration tests.
//!
//! ## Wire format
//!
//! Every message on the socket is a JSON envelope `{"type": T, "payload": P}`.
//! The payload is kept as raw JSON inside the envelope and decoded per type,
//! so unknown packet types can be skipped without touching their contents.
//!
//! ### Packet types
//! - `WELCOME` (server to client): the authenticated user's id.
//! - `STATE_SNAPSHOT` (server to client): full interest-filtered player list.
//! - `STATE_DELTA` (server to client): changed and removed players since the
//!   client's last update.
//! - `MOVE_INTENT` (client to server): a target position in world units.
//!
//! ## Units
//!
//! All positions are signed integers in fixed-point world units. One tile is
//! [`TILE_SIZE`] pixels and [`POSITION_SCALE`] world units per pixel, so a
//! tile spans [`TILE_WORLD`] world units per side. Keeping motion arithmetic
//! in integers avoids floating-point drift across ticks.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// World units per display pixel.
pub const POSITION_SCALE: i64 = 100;

/// Pixels per tile side.
pub const TILE_SIZE: i64 = 32;

/// World units per tile side.
pub const TILE_WORLD: i64 = TILE_SIZE * POSITION_SCALE;

/// Player movement speed in pixels per second.
pub const SPEED_PX_PER_SEC: i64 = 140;

/// Player movement speed in world units per second.
pub const SPEED_WORLD: i64 = SPEED_PX_PER_SEC * POSITION_SCALE;

/// Tiles per chunk side. Chunks exist only for interest filtering.
pub const CHUNK_SIZE_TILES: i64 = 8;

/// Interest radius in chunks, measured as Chebyshev distance.
pub const CHUNK_RADIUS: i64 = 1;

/// Capacity of each client's outbound packet queue. Enqueueing never blocks;
/// packets are dropped when the queue is full.
pub const OUTBOUND_BUFFER: usize = 16;

/// Deadline for a single socket write.
pub const WRITE_DEADLINE: Duration = Duration::from_secs(5);

pub const PACKET_WELCOME: &str = "WELCOME";
pub const PACKET_STATE_SNAPSHOT: &str = "STATE_SNAPSHOT";
pub const PACKET_STATE_DELTA: &str = "STATE_DELTA";
pub const PACKET_MOVE_INTENT: &str = "MOVE_INTENT";

/// Tagged envelope carried on the socket. The payload stays as raw JSON until
/// a handler that knows the type decodes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Packet {
    #[serde(rename = "type")]
    pub packet_type: String,
    pub payload: Box<RawValue>,
}

impl Packet {
    /// Builds an envelope around an encoded payload.
    pub fn new<T: Serialize>(packet_type: &str, payload: &T) -> Result<Packet, serde_json::Error> {
        let payload = serde_json::value::to_raw_value(payload)?;
        Ok(Packet {
            packet_type: packet_type.to_string(),
            payload,
        })
    }

    /// Decodes the payload as the given type.
    pub fn decode_payload<'a, T: Deserialize<'a>>(&'a self) -> Result<T, serde_json::Error> {
        serde_json::from_str(self.payload.get())
    }
}

/// Positional state of one player as seen on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerState {
    pub id: String,
    pub x: i64,
    pub y: i64,
}

/// First packet on a fresh session, carrying the authenticated user id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Welcome {
    pub id: String,
}

/// Full interest-filtered state, sent once when a session is admitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub tick: i64,
    pub players: Vec<PlayerState>,
}

/// Per-tick difference against what the client last saw.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDelta {
    pub tick: i64,
    pub players: Vec<PlayerState>,
    pub removed: Vec<String>,
}

/// Client request to walk toward a position, in world units.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MoveIntent {
    pub x: i64,
    pub y: i64,
}
