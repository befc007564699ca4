//! Frame and image checksums.
//!
//! - Frames carry a CRC-8 (polynomial 0x07, initial value 0x00, no
//!   reflection, no final xor) over every byte that precedes it.
//! - The image is covered by a CRC-32 (ISO-HDLC, the zlib polynomial) that is
//!   folded chunk by chunk while the transfer runs.

use crc::{CRC_8_SMBUS, CRC_32_ISO_HDLC, Crc, Digest};
use std::fmt;

static CRC8: Crc<u8> = Crc::<u8>::new(&CRC_8_SMBUS);
static CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// CRC-8 of `data` as used in every frame trailer.
pub fn crc8(data: &[u8]) -> u8 {
    CRC8.checksum(data)
}

/// CRC-32 of a complete buffer.
pub fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

/// Running CRC-32 over a firmware image, updated in chunk order.
#[derive(Clone)]
pub struct ImageChecksum {
    digest: Digest<'static, u32>,
    len: u64,
}

impl ImageChecksum {
    /// Start a fresh accumulator.
    pub fn new() -> Self {
        Self {
            digest: CRC32.digest(),
            len: 0,
        }
    }

    /// Fold the next chunk into the checksum.
    pub fn update(&mut self, chunk: &[u8]) {
        self.digest.update(chunk);
        self.len += chunk.len() as u64;
    }

    /// Checksum of everything folded so far.
    pub fn value(&self) -> u32 {
        self.digest.clone().finalize()
    }

    /// Number of bytes folded so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether no bytes have been folded yet.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for ImageChecksum {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ImageChecksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageChecksum")
            .field("value", &format_args!("0x{:08X}", self.value()))
            .field("len", &self.len)
            .finish()
    }
}
