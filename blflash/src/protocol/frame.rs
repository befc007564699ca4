//! Request framing.
//!
//! ## Frame Format
//!
//! ```text
//! +--------+-----------------+-----+-------+
//! | Opcode |     Payload     | EOM | CRC-8 |
//! +--------+-----------------+-----+-------+
//! |   1    |    0..=256      |  1  |   1   |
//! +--------+-----------------+-----+-------+
//! ```
//!
//! The CRC-8 covers every byte before it. Image chunks use a different
//! layout, written in three segments so the device can keep up:
//!
//! ```text
//! +------+-------+   +------------+   +-----+-------+
//! | 0xB3 | len-1 |   | data (len) |   | EOM | CRC-8 |
//! +------+-------+   +------------+   +-----+-------+
//! ```
//!
//! where the CRC-8 covers opcode, `len-1` and EOM only.

use crate::error::{Error, Result};
use crate::protocol::command::Command;
use crate::protocol::crc::crc8;

/// End-of-message marker.
pub const EOM: u8 = 0xC0;

/// Largest payload a frame may carry.
pub const MAX_PAYLOAD: usize = 256;

/// Largest image chunk sent in one FlashData exchange.
pub const MAX_CHUNK: usize = 256;

/// Encode a generic frame.
pub fn encode(opcode: u8, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD {
        return Err(Error::BufferOverflow {
            len: payload.len(),
            max: MAX_PAYLOAD,
        });
    }

    let mut buf = Vec::with_capacity(payload.len() + 3);
    buf.push(opcode);
    buf.extend_from_slice(payload);
    buf.push(EOM);
    let crc = crc8(&buf);
    buf.push(crc);

    Ok(buf)
}

/// A decoded generic frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Opcode byte.
    pub opcode: u8,
    /// Payload between opcode and EOM.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a frame for a command.
    pub fn new(command: Command, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            opcode: command.opcode(),
            payload: payload.into(),
        }
    }

    /// Wire bytes of this frame.
    pub fn encode(&self) -> Result<Vec<u8>> {
        encode(self.opcode, &self.payload)
    }

    /// Parse a generic frame, checking EOM placement and the CRC-8.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 3 || bytes.len() > MAX_PAYLOAD + 3 {
            return Err(Error::InvalidFrame(format!(
                "length {} outside 3..={}",
                bytes.len(),
                MAX_PAYLOAD + 3
            )));
        }
        let (&crc, body) = bytes
            .split_last()
            .ok_or_else(|| Error::InvalidFrame("empty frame".into()))?;
        if body[body.len() - 1] != EOM {
            return Err(Error::InvalidFrame(format!(
                "expected EOM 0x{EOM:02X}, found 0x{:02X}",
                body[body.len() - 1]
            )));
        }
        let computed = crc8(body);
        if computed != crc {
            return Err(Error::InvalidFrame(format!(
                "checksum 0x{crc:02X} does not match computed 0x{computed:02X}"
            )));
        }

        Ok(Self {
            opcode: body[0],
            payload: body[1..body.len() - 1].to_vec(),
        })
    }
}

/// Request bytes ready for the wire, split into write segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    segments: Vec<Vec<u8>>,
}

impl Request {
    /// Request written in one go.
    pub fn single(bytes: Vec<u8>) -> Self {
        Self {
            segments: vec![bytes],
        }
    }

    /// Segments in write order.
    pub fn segments(&self) -> &[Vec<u8>] {
        &self.segments
    }

    /// Total number of bytes across all segments.
    pub fn len(&self) -> usize {
        self.segments.iter().map(Vec::len).sum()
    }

    /// Whether the request carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All segments joined.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.segments.concat()
    }
}

/// Build the three FlashData segments for one image chunk.
#[allow(clippy::cast_possible_truncation)] // len is 1..=256, so len - 1 fits in u8
pub fn encode_chunk(data: &[u8]) -> Result<Request> {
    if data.is_empty() || data.len() > MAX_CHUNK {
        return Err(Error::BufferOverflow {
            len: data.len(),
            max: MAX_CHUNK,
        });
    }

    let size = (data.len() - 1) as u8;
    let header = [Command::FlashData.opcode(), size];
    let crc = crc8(&[header[0], header[1], EOM]);

    Ok(Request {
        segments: vec![header.to_vec(), data.to_vec(), vec![EOM, crc]],
    })
}
