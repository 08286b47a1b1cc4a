//! Wireless control bridge: radio callbacks feed an inbox, the main loop drains it.

pub mod chunks;
pub mod command;
pub mod control;
pub mod inbox;
pub mod status;

pub use chunks::{ChunkAccumulator, ChunkProgress};
pub use command::{Command, UrlChunk, MAX_URL_CHUNKS};
pub use control::{BridgeAction, ControlBridge, StatusChannel};
pub use inbox::{Frame, Inbox, LinkFlags, RadioCallbacks};
pub use status::{StatusKind, StatusReport};

/// GATT service exposing the command and status characteristics.
pub const SERVICE_UUID: &str = "99db6ea6-27e4-434d-aafd-795cf95feb06";
/// Write characteristic carrying command JSON.
pub const COMMAND_CHAR_UUID: &str = "1ac886a6-5fff-41ea-9b11-25a7dcb93a7e";
/// Read + notify characteristic carrying status JSON.
pub const STATUS_CHAR_UUID: &str = "5f5979f3-f1a6-4ce7-8360-e249c2e9333d";

/// Parse a canonical UUID string into the big-endian byte order it is written in.
pub fn uuid_bytes(uuid: &str) -> Option<[u8; 16]> {
    let hex: Vec<u8> = uuid.bytes().filter(|b| *b != b'-').collect();
    if hex.len() != 32 {
        return None;
    }
    let mut out = [0u8; 16];
    for (i, pair) in hex.chunks(2).enumerate() {
        let text = core::str::from_utf8(pair).ok()?;
        out[i] = u8::from_str_radix(text, 16).ok()?;
    }
    Some(out)
}
