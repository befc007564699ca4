//! Error types for blflash.

use crate::protocol::{Command, Status};
use crate::session::SessionState;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for blflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for blflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, image file).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Request payload does not fit in a frame.
    #[error("Buffer overflow: payload of {len} bytes exceeds {max} bytes")]
    BufferOverflow {
        /// Payload length that was rejected.
        len: usize,
        /// Largest accepted payload.
        max: usize,
    },

    /// Bytes do not form a valid request frame.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Opcode not present in the command table.
    #[error("Unknown command opcode 0x{0:02X}")]
    UnknownCommand(u8),

    /// Reply length does not match the expected shape.
    #[error("Malformed {command} reply: expected {expected} bytes, got {actual}")]
    MalformedMessage {
        /// Command the reply belongs to.
        command: Command,
        /// Expected reply length.
        expected: usize,
        /// Received reply length.
        actual: usize,
    },

    /// Frame checksum of a reply does not match its contents.
    #[error("{command} reply checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    ReplyChecksum {
        /// Command the reply belongs to.
        command: Command,
        /// Checksum computed over the reply.
        expected: u8,
        /// Checksum carried by the reply.
        actual: u8,
    },

    /// Whole-image checksum reported by the device differs from the local one.
    #[error("Image checksum mismatch: host 0x{local:08X}, device 0x{remote:08X}")]
    ImageChecksum {
        /// Checksum accumulated while sending the image.
        local: u32,
        /// Checksum reported by the device.
        remote: u32,
    },

    /// Device answered with a non-OK status.
    #[error("{command} rejected by device: {status}")]
    DeviceStatus {
        /// Command the status belongs to.
        command: Command,
        /// Status reported by the device.
        status: Status,
    },

    /// Image source returned fewer bytes than requested.
    #[error("Image read came back short: expected {expected} bytes, got {actual}")]
    Data {
        /// Requested chunk size.
        expected: usize,
        /// Bytes actually read.
        actual: usize,
    },

    /// No reply within the exchange budget.
    #[error("Timeout waiting for {command} reply after {waited:?}")]
    Timeout {
        /// Command that went unanswered.
        command: Command,
        /// Time budget that was exhausted.
        waited: Duration,
    },

    /// Image rejected before transfer.
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// Image does not fit in the flashable area reported by the device.
    #[error("Image of {len} bytes exceeds the flashable area of {capacity} bytes")]
    ImageTooLarge {
        /// Image length.
        len: u64,
        /// Flashable area reported at handshake.
        capacity: u32,
    },

    /// Session operation invoked out of order.
    #[error("Cannot {operation} in session state {state}")]
    InvalidState {
        /// Operation that was attempted.
        operation: &'static str,
        /// State the session was in.
        state: SessionState,
    },

    /// Transfer stopped by the embedding application.
    #[error("Operation interrupted")]
    Interrupted,

    /// Closing exchange failed after an earlier failure.
    #[error("{cause}; closing the session also failed: {end}")]
    EndOfSession {
        /// Failure that aborted the session.
        cause: Box<Error>,
        /// Failure of the EndOfSession exchange.
        end: Box<Error>,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this is a checksum failure, either per frame or whole image.
    pub fn is_checksum_error(&self) -> bool {
        matches!(self, Self::ReplyChecksum { .. } | Self::ImageChecksum { .. })
    }

    /// Whether this failure came from the transport or an exhausted wait.
    pub fn is_transport_error(&self) -> bool {
        match self {
            Self::Io(_) | Self::Timeout { .. } => true,
            #[cfg(feature = "native")]
            Self::Serial(_) => true,
            Self::EndOfSession { cause, .. } => cause.is_transport_error(),
            _ => false,
        }
    }

    /// Device status carried by this error, if any.
    pub fn device_status(&self) -> Option<Status> {
        match self {
            Self::DeviceStatus { status, .. } => Some(*status),
            Self::EndOfSession { cause, .. } => cause.device_status(),
            _ => None,
        }
    }
}
