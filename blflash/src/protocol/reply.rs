//! Reply validation.
//!
//! Every reply has an exact length and ends with a CRC-8 over the bytes
//! before it. Nothing in a reply is trusted until both checks pass.

use crate::error::{Error, Result};
use crate::protocol::command::{Command, ReplyKind, Status};
use crate::protocol::crc::crc8;
use byteorder::{ByteOrder, LittleEndian};
use log::{debug, warn};
use std::fmt;

/// Board identity reported by the Handshake reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct BoardInfo {
    /// Bootloader protocol version.
    pub version: u8,
    /// Bootloader protocol revision.
    pub revision: u8,
    /// Board identifier.
    pub board_id: [u8; 4],
    /// Size of the flashable application area in bytes.
    pub flash_size: u32,
}

impl BoardInfo {
    /// Board identifier as `AA:BB:CC:DD`.
    pub fn board_id_string(&self) -> String {
        self.board_id
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect::<Vec<_>>()
            .join(":")
    }
}

impl fmt::Display for BoardInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "protocol {}.{}, board {}, flashable area {} bytes",
            self.version,
            self.revision,
            self.board_id_string(),
            self.flash_size
        )
    }
}

/// Contents of a VerifyCrc reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrcReport {
    /// Status of the device-side computation.
    pub status: Status,
    /// CRC-32 computed by the device (meaningful only when status is OK).
    pub checksum: u32,
}

/// Outcome of comparing a [`CrcReport`] with the host checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// Device and host agree.
    Matched(u32),
    /// The device could not compute its checksum; nothing was compared.
    NotPerformed(Status),
}

impl CrcReport {
    /// Compare the device checksum with the one accumulated on the host.
    pub fn check(&self, local: u32) -> Result<Verification> {
        if !self.status.is_ok() {
            warn!(
                "Device did not compute the image checksum: {}",
                self.status
            );
            return Ok(Verification::NotPerformed(self.status));
        }

        debug!(
            "Image checksum host 0x{local:08X}, device 0x{:08X}",
            self.checksum
        );
        if self.checksum != local {
            return Err(Error::ImageChecksum {
                local,
                remote: self.checksum,
            });
        }

        Ok(Verification::Matched(local))
    }
}

/// Result of one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Handshake accepted.
    Board(BoardInfo),
    /// Device reported OK.
    Status,
    /// VerifyCrc answered.
    Crc(CrcReport),
    /// Request sent to a command without a reply.
    Sent,
    /// One-shot poll found nothing; the outcome is unknown.
    Unconfirmed,
}

impl ReplyKind {
    /// Validate `buf` as a reply of this kind to `command`.
    pub fn decode(self, command: Command, buf: &[u8]) -> Result<Reply> {
        let body = checked_body(command, self.expected_len(), buf)?;
        match self {
            Self::Handshake => Ok(Reply::Board(BoardInfo {
                version: body[0],
                revision: body[1],
                board_id: [body[2], body[3], body[4], body[5]],
                flash_size: LittleEndian::read_u32(&body[6..10]),
            })),
            Self::Status => {
                let status = Status::from(body[0]);
                if status.is_ok() {
                    Ok(Reply::Status)
                } else {
                    Err(Error::DeviceStatus { command, status })
                }
            },
            Self::Crc => Ok(Reply::Crc(CrcReport {
                status: Status::from(body[0]),
                checksum: LittleEndian::read_u32(&body[1..5]),
            })),
        }
    }
}

/// Check length and trailing CRC-8, returning everything before the CRC.
fn checked_body(command: Command, expected: usize, buf: &[u8]) -> Result<&[u8]> {
    if buf.len() != expected {
        return Err(Error::MalformedMessage {
            command,
            expected,
            actual: buf.len(),
        });
    }

    let (body, crc) = buf.split_at(expected - 1);
    let computed = crc8(body);
    if computed != crc[0] {
        return Err(Error::ReplyChecksum {
            command,
            expected: computed,
            actual: crc[0],
        });
    }

    Ok(body)
}
