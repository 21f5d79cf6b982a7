//! Byte-level encoders and decoders for the wire protocol.
//!
//! Everything is little-endian. Encoders append to a `Vec<u8>` through
//! `WriteBytesExt`, mirroring the `ReadBytesExt` decode path; decoders take
//! a byte slice, validate lengths up front, and never panic on malformed
//! input.

use std::io::{Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::protocol::{
    Command, MessageKind, ProtocolError, COLONY_RECORD_LEN, HEADER_LEN, MAGIC,
    MAX_COLONIES_PER_FRAME, MAX_PAYLOAD_LEN, NAME_LEN,
};

/// Decoded frame envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub kind: MessageKind,
    pub payload_len: u32,
    pub sequence: u32,
}

/// One colony as shipped to clients.
///
/// Centroid and radius are derived from the grid at snapshot time; they are
/// value copies, never references into the world.
#[derive(Debug, Clone, PartialEq)]
pub struct ColonyRecord {
    pub id: u32,
    pub name: String,
    pub x: f32,
    pub y: f32,
    pub radius: f32,
    pub population: u32,
    pub max_population: u32,
    pub growth_rate: f32,
    pub color: [u8; 3],
    pub alive: bool,
    pub shape_seed: u32,
    pub wobble_phase: f32,
    pub shape_evolution: f32,
}

/// Payload of a `WorldState` frame.
#[derive(Debug, Clone, PartialEq)]
pub struct WorldStateFrame {
    pub width: u32,
    pub height: u32,
    pub tick: u32,
    pub paused: bool,
    pub speed_multiplier: f32,
    pub colonies: Vec<ColonyRecord>,
}

/// Append a frame envelope to `buf`.
pub fn encode_header(
    buf: &mut Vec<u8>,
    kind: MessageKind,
    payload_len: u32,
    sequence: u32,
) -> Result<(), ProtocolError> {
    buf.write_u32::<LittleEndian>(MAGIC)?;
    buf.write_u16::<LittleEndian>(kind.as_u16())?;
    buf.write_u32::<LittleEndian>(payload_len)?;
    buf.write_u32::<LittleEndian>(sequence)?;
    Ok(())
}

/// Decode and validate a frame envelope.
pub fn decode_header(bytes: &[u8]) -> Result<FrameHeader, ProtocolError> {
    if bytes.len() < HEADER_LEN {
        return Err(ProtocolError::Truncated {
            needed: HEADER_LEN,
            have: bytes.len(),
        });
    }
    let mut cursor = Cursor::new(bytes);
    let magic = cursor.read_u32::<LittleEndian>()?;
    if magic != MAGIC {
        return Err(ProtocolError::BadMagic(magic));
    }
    let kind = MessageKind::from_u16(cursor.read_u16::<LittleEndian>()?)?;
    let payload_len = cursor.read_u32::<LittleEndian>()?;
    if payload_len > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::PayloadTooLarge(payload_len));
    }
    let sequence = cursor.read_u32::<LittleEndian>()?;
    Ok(FrameHeader {
        kind,
        payload_len,
        sequence,
    })
}

/// All-zero padding for fixed-width name fields.
const NAME_PADDING: [u8; NAME_LEN] = [0; NAME_LEN];

/// Append a NUL-padded fixed-width name, truncating on a char boundary.
fn encode_name(buf: &mut Vec<u8>, name: &str) -> Result<(), ProtocolError> {
    let mut end = name.len().min(NAME_LEN);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    buf.write_all(&name.as_bytes()[..end])?;
    buf.write_all(&NAME_PADDING[..NAME_LEN - end])?;
    Ok(())
}

/// Decode a NUL-padded fixed-width name.
fn decode_name(raw: &[u8]) -> Result<String, ProtocolError> {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    std::str::from_utf8(&raw[..end])
        .map(str::to_owned)
        .map_err(|_| ProtocolError::BadName)
}

/// Append one 76-byte colony record to `buf`.
pub fn encode_colony(buf: &mut Vec<u8>, record: &ColonyRecord) -> Result<(), ProtocolError> {
    buf.write_u32::<LittleEndian>(record.id)?;
    encode_name(buf, &record.name)?;
    buf.write_f32::<LittleEndian>(record.x)?;
    buf.write_f32::<LittleEndian>(record.y)?;
    buf.write_f32::<LittleEndian>(record.radius)?;
    buf.write_u32::<LittleEndian>(record.population)?;
    buf.write_u32::<LittleEndian>(record.max_population)?;
    buf.write_f32::<LittleEndian>(record.growth_rate)?;
    buf.write_u8(record.color[0])?;
    buf.write_u8(record.color[1])?;
    buf.write_u8(record.color[2])?;
    buf.write_u8(record.alive as u8)?;
    buf.write_u32::<LittleEndian>(record.shape_seed)?;
    buf.write_f32::<LittleEndian>(record.wobble_phase)?;
    buf.write_f32::<LittleEndian>(record.shape_evolution)?;
    Ok(())
}

/// Decode one 76-byte colony record.
pub fn decode_colony(bytes: &[u8]) -> Result<ColonyRecord, ProtocolError> {
    if bytes.len() < COLONY_RECORD_LEN {
        return Err(ProtocolError::Truncated {
            needed: COLONY_RECORD_LEN,
            have: bytes.len(),
        });
    }
    let mut cursor = Cursor::new(bytes);
    let id = cursor.read_u32::<LittleEndian>()?;
    let mut name_raw = [0u8; NAME_LEN];
    cursor.read_exact(&mut name_raw)?;
    let name = decode_name(&name_raw)?;
    let x = cursor.read_f32::<LittleEndian>()?;
    let y = cursor.read_f32::<LittleEndian>()?;
    let radius = cursor.read_f32::<LittleEndian>()?;
    let population = cursor.read_u32::<LittleEndian>()?;
    let max_population = cursor.read_u32::<LittleEndian>()?;
    let growth_rate = cursor.read_f32::<LittleEndian>()?;
    let mut color = [0u8; 3];
    cursor.read_exact(&mut color)?;
    let alive = cursor.read_u8()? != 0;
    let shape_seed = cursor.read_u32::<LittleEndian>()?;
    let wobble_phase = cursor.read_f32::<LittleEndian>()?;
    let shape_evolution = cursor.read_f32::<LittleEndian>()?;
    Ok(ColonyRecord {
        id,
        name,
        x,
        y,
        radius,
        population,
        max_population,
        growth_rate,
        color,
        alive,
        shape_seed,
        wobble_phase,
        shape_evolution,
    })
}

/// Encode a `WorldState` payload. Colonies beyond the per-frame cap are
/// dropped from the wire, never from the world.
pub fn encode_world_state(frame: &WorldStateFrame) -> Result<Vec<u8>, ProtocolError> {
    let count = frame.colonies.len().min(MAX_COLONIES_PER_FRAME);
    let mut buf = Vec::with_capacity(21 + count * COLONY_RECORD_LEN);
    buf.write_u32::<LittleEndian>(frame.width)?;
    buf.write_u32::<LittleEndian>(frame.height)?;
    buf.write_u32::<LittleEndian>(frame.tick)?;
    buf.write_u32::<LittleEndian>(count as u32)?;
    buf.write_u8(frame.paused as u8)?;
    buf.write_f32::<LittleEndian>(frame.speed_multiplier)?;
    for record in frame.colonies.iter().take(count) {
        encode_colony(&mut buf, record)?;
    }
    Ok(buf)
}

/// Decode a `WorldState` payload.
pub fn decode_world_state(bytes: &[u8]) -> Result<WorldStateFrame, ProtocolError> {
    const FIXED: usize = 21;
    if bytes.len() < FIXED {
        return Err(ProtocolError::Truncated {
            needed: FIXED,
            have: bytes.len(),
        });
    }
    let mut cursor = Cursor::new(bytes);
    let width = cursor.read_u32::<LittleEndian>()?;
    let height = cursor.read_u32::<LittleEndian>()?;
    let tick = cursor.read_u32::<LittleEndian>()?;
    let count = cursor.read_u32::<LittleEndian>()? as usize;
    let paused = cursor.read_u8()? != 0;
    let speed_multiplier = cursor.read_f32::<LittleEndian>()?;

    let needed = FIXED + count * COLONY_RECORD_LEN;
    if bytes.len() < needed {
        return Err(ProtocolError::Truncated {
            needed,
            have: bytes.len(),
        });
    }
    let mut colonies = Vec::with_capacity(count.min(MAX_COLONIES_PER_FRAME));
    for i in 0..count {
        let start = FIXED + i * COLONY_RECORD_LEN;
        colonies.push(decode_colony(&bytes[start..start + COLONY_RECORD_LEN])?);
    }
    Ok(WorldStateFrame {
        width,
        height,
        tick,
        paused,
        speed_multiplier,
        colonies,
    })
}

/// Encode a `Command` payload.
pub fn encode_command(command: &Command) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::with_capacity(41);
    buf.write_u8(command.code())?;
    match command {
        Command::SelectColony { colony_id } => {
            buf.write_u32::<LittleEndian>(*colony_id)?;
        }
        Command::SpawnColony { x, y, name } => {
            buf.write_u32::<LittleEndian>(*x)?;
            buf.write_u32::<LittleEndian>(*y)?;
            encode_name(&mut buf, name)?;
        }
        _ => {}
    }
    Ok(buf)
}

/// Decode a `Command` payload.
pub fn decode_command(bytes: &[u8]) -> Result<Command, ProtocolError> {
    if bytes.is_empty() {
        return Err(ProtocolError::Truncated { needed: 1, have: 0 });
    }
    let code = bytes[0];
    let body = &bytes[1..];
    match code {
        0 => Ok(Command::Pause),
        1 => Ok(Command::Resume),
        2 => Ok(Command::SpeedUp),
        3 => Ok(Command::SlowDown),
        4 => Ok(Command::Reset),
        5 => {
            if body.len() < 4 {
                return Err(ProtocolError::Truncated {
                    needed: 5,
                    have: bytes.len(),
                });
            }
            let colony_id = Cursor::new(body).read_u32::<LittleEndian>()?;
            Ok(Command::SelectColony { colony_id })
        }
        6 => {
            if body.len() < 8 + NAME_LEN {
                return Err(ProtocolError::Truncated {
                    needed: 9 + NAME_LEN,
                    have: bytes.len(),
                });
            }
            let mut cursor = Cursor::new(body);
            let x = cursor.read_u32::<LittleEndian>()?;
            let y = cursor.read_u32::<LittleEndian>()?;
            let name = decode_name(&body[8..8 + NAME_LEN])?;
            Ok(Command::SpawnColony { x, y, name })
        }
        other => Err(ProtocolError::UnknownCommand(other)),
    }
}

/// Encode an `Ack` payload: the echoed command code.
pub fn encode_ack(command_code: u8) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::with_capacity(4);
    buf.write_u32::<LittleEndian>(command_code as u32)?;
    Ok(buf)
}

/// Encode an `Error` payload: numeric code plus UTF-8 description.
pub fn encode_error(code: u32, description: &str) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::with_capacity(4 + description.len());
    buf.write_u32::<LittleEndian>(code)?;
    buf.write_all(description.as_bytes())?;
    Ok(buf)
}

/// Serialize a complete frame (envelope plus payload) into one buffer.
pub fn encode_frame(
    kind: MessageKind,
    payload: &[u8],
    sequence: u32,
) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    encode_header(&mut buf, kind, payload.len() as u32, sequence)?;
    buf.write_all(payload)?;
    Ok(buf)
}

/// Write a complete frame to `writer`.
pub fn write_frame<W: Write>(
    writer: &mut W,
    kind: MessageKind,
    payload: &[u8],
    sequence: u32,
) -> Result<(), ProtocolError> {
    let frame = encode_frame(kind, payload, sequence)?;
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

/// Read one complete frame from `reader`.
///
/// The reader is expected to be in blocking mode; short reads are retried
/// by `read_exact`.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<(FrameHeader, Vec<u8>), ProtocolError> {
    let mut header_raw = [0u8; HEADER_LEN];
    reader.read_exact(&mut header_raw)?;
    let header = decode_header(&header_raw)?;

    let mut payload = vec![0u8; header.payload_len as usize];
    reader.read_exact(&mut payload)?;
    Ok((header, payload))
}
