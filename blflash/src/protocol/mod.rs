//! Bootloader wire protocol.
//!
//! - [`crc`]: frame CRC-8 and the running image CRC-32
//! - [`command`]: opcodes, reply shapes and device status codes
//! - [`frame`]: request framing, including the segmented FlashData layout
//! - [`reply`]: reply validation and decoding

pub mod command;
pub mod crc;
pub mod frame;
pub mod reply;

pub use command::{Command, CommandSpec, ReplyKind, RequestEncoder, Status};
pub use crc::{ImageChecksum, crc8, crc32};
pub use frame::{EOM, Frame, MAX_CHUNK, MAX_PAYLOAD, Request};
pub use reply::{BoardInfo, CrcReport, Reply, Verification};
