//! Wire protocol: message kinds, commands, and error taxonomy.
//!
//! Every message is a little-endian envelope of `magic | type | payload_len
//! | sequence` followed by `payload_len` bytes. The codec submodule holds
//! the byte-level encoders and decoders.

pub mod codec;

use std::io;

use thiserror::Error;

pub use codec::{
    decode_colony, decode_command, decode_header, decode_world_state, encode_ack, encode_colony,
    encode_command, encode_error, encode_frame, encode_header, encode_world_state, read_frame,
    write_frame, ColonyRecord, FrameHeader, WorldStateFrame,
};

/// Frame magic. A frame whose magic differs is dropped without resync.
pub const MAGIC: u32 = 0x0000_BACF;
/// Fixed envelope size in bytes.
pub const HEADER_LEN: usize = 14;
/// Frames advertising more payload than this are rejected.
pub const MAX_PAYLOAD_LEN: u32 = 1024 * 1024;
/// Serialized size of one colony record.
pub const COLONY_RECORD_LEN: usize = 76;
/// Active colonies are capped at this many per world-state frame.
pub const MAX_COLONIES_PER_FRAME: usize = 256;
/// Fixed byte width of a colony name on the wire (NUL-padded UTF-8).
pub const NAME_LEN: usize = 32;

/// Message kind carried in the envelope's `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Connect,
    Disconnect,
    WorldState,
    /// Reserved for incremental updates; never sent today.
    WorldDelta,
    ColonyInfo,
    Command,
    Ack,
    Error,
}

impl MessageKind {
    /// Wire value of this kind.
    pub fn as_u16(self) -> u16 {
        match self {
            MessageKind::Connect => 0,
            MessageKind::Disconnect => 1,
            MessageKind::WorldState => 2,
            MessageKind::WorldDelta => 3,
            MessageKind::ColonyInfo => 4,
            MessageKind::Command => 5,
            MessageKind::Ack => 6,
            MessageKind::Error => 7,
        }
    }

    /// Parse a wire value.
    pub fn from_u16(value: u16) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(MessageKind::Connect),
            1 => Ok(MessageKind::Disconnect),
            2 => Ok(MessageKind::WorldState),
            3 => Ok(MessageKind::WorldDelta),
            4 => Ok(MessageKind::ColonyInfo),
            5 => Ok(MessageKind::Command),
            6 => Ok(MessageKind::Ack),
            7 => Ok(MessageKind::Error),
            other => Err(ProtocolError::UnknownKind(other)),
        }
    }
}

/// Client command carried in a `Command` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Pause,
    Resume,
    SpeedUp,
    SlowDown,
    Reset,
    SelectColony { colony_id: u32 },
    SpawnColony { x: u32, y: u32, name: String },
}

impl Command {
    /// Wire code of this command.
    pub fn code(&self) -> u8 {
        match self {
            Command::Pause => 0,
            Command::Resume => 1,
            Command::SpeedUp => 2,
            Command::SlowDown => 3,
            Command::Reset => 4,
            Command::SelectColony { .. } => 5,
            Command::SpawnColony { .. } => 6,
        }
    }
}

/// Everything that can go wrong while framing or decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("bad magic 0x{0:08x}")]
    BadMagic(u32),
    #[error("payload length {0} exceeds the 1 MiB limit")]
    PayloadTooLarge(u32),
    #[error("truncated frame: needed {needed} bytes, had {have}")]
    Truncated { needed: usize, have: usize },
    #[error("unknown message kind {0}")]
    UnknownKind(u16),
    #[error("unknown command code {0}")]
    UnknownCommand(u8),
    #[error("name is not valid UTF-8")]
    BadName,
    #[error(transparent)]
    Io(#[from] io::Error),
}
