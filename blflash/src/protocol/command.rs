//! Bootloader command table and device status codes.

use crate::error::Error;
use std::fmt;

/// Bootloader commands.
///
/// Opcodes are fixed by the device firmware (protocol 0.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Open a session and read board identity (0x0A).
    Handshake = 0x0A,
    /// Erase one flash sector (0xB1).
    Erase = 0xB1,
    /// Announce application address and size (0xB2).
    SetFlashParams = 0xB2,
    /// Write one chunk of image data (0xB3).
    FlashData = 0xB3,
    /// Close the session (0x0E).
    EndOfSession = 0x0E,
    /// Ask the device for the CRC-32 of a flash range (0xEF).
    VerifyCrc = 0xEF,
    /// Jump to the application (0x0F).
    Boot = 0x0F,
}

impl Command {
    /// All commands in table order.
    pub const ALL: [Self; 7] = [
        Self::Handshake,
        Self::Erase,
        Self::SetFlashParams,
        Self::FlashData,
        Self::EndOfSession,
        Self::VerifyCrc,
        Self::Boot,
    ];

    /// Wire opcode.
    pub fn opcode(self) -> u8 {
        self as u8
    }

    /// Look up a command by opcode.
    pub fn from_opcode(opcode: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|cmd| cmd.opcode() == opcode)
    }

    /// Resolve the encoder and reply shape for this command.
    pub fn spec(self) -> CommandSpec {
        let (encoder, reply) = match self {
            Self::Handshake => (None, Some(ReplyKind::Handshake)),
            Self::Erase | Self::SetFlashParams | Self::EndOfSession | Self::Boot => {
                (None, Some(ReplyKind::Status))
            },
            Self::FlashData => (Some(RequestEncoder::Chunk), Some(ReplyKind::Status)),
            Self::VerifyCrc => (None, Some(ReplyKind::Crc)),
        };
        CommandSpec {
            command: self,
            encoder,
            reply,
        }
    }
}

impl TryFrom<u8> for Command {
    type Error = Error;

    fn try_from(opcode: u8) -> Result<Self, Self::Error> {
        Self::from_opcode(opcode).ok_or(Error::UnknownCommand(opcode))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Handshake => "Handshake",
            Self::Erase => "Erase",
            Self::SetFlashParams => "SetFlashParams",
            Self::FlashData => "FlashData",
            Self::EndOfSession => "EndOfSession",
            Self::VerifyCrc => "VerifyCrc",
            Self::Boot => "Boot",
        };
        f.write_str(name)
    }
}

/// Custom request encoders that replace generic framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestEncoder {
    /// Chunk header, raw data and trailer written as separate segments.
    Chunk,
}

/// Reply shapes the device can answer with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    /// 12 bytes: version, revision, board id, flashable size, EOM, CRC-8.
    Handshake,
    /// 3 bytes: status, EOM, CRC-8.
    Status,
    /// 7 bytes: status, CRC-32, EOM, CRC-8.
    Crc,
}

impl ReplyKind {
    /// Exact reply length in bytes.
    pub fn expected_len(self) -> usize {
        match self {
            Self::Handshake => 12,
            Self::Status => 3,
            Self::Crc => 7,
        }
    }
}

/// How a command is put on the wire and how its reply is read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    /// Command this entry describes.
    pub command: Command,
    /// Encoder overriding generic framing.
    pub encoder: Option<RequestEncoder>,
    /// Reply decoder; `None` means the device does not answer.
    pub reply: Option<ReplyKind>,
}

/// Status byte reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Status {
    /// Operation succeeded (0xA0).
    Ok,
    /// Flash I/O failure on the device (0x0A).
    IoError,
    /// Invalid argument (0x01).
    ArgError,
    /// Device-side checksum failure (0x02).
    CrcError,
    /// Flash read failure (0x03).
    ReadError,
    /// Status byte outside the documented set.
    Unknown(u8),
}

impl Status {
    /// Status byte for success.
    pub const OK: u8 = 0xA0;

    /// Raw status byte.
    pub fn as_byte(self) -> u8 {
        match self {
            Self::Ok => Self::OK,
            Self::IoError => 0x0A,
            Self::ArgError => 0x01,
            Self::CrcError => 0x02,
            Self::ReadError => 0x03,
            Self::Unknown(b) => b,
        }
    }

    /// Whether the device reported success.
    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

impl From<u8> for Status {
    fn from(value: u8) -> Self {
        match value {
            Self::OK => Self::Ok,
            0x0A => Self::IoError,
            0x01 => Self::ArgError,
            0x02 => Self::CrcError,
            0x03 => Self::ReadError,
            other => Self::Unknown(other),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::IoError => write!(f, "I/O error (0x0A)"),
            Self::ArgError => write!(f, "argument error (0x01)"),
            Self::CrcError => write!(f, "checksum error (0x02)"),
            Self::ReadError => write!(f, "read error (0x03)"),
            Self::Unknown(b) => write!(f, "unknown status 0x{b:02X}"),
        }
    }
}
