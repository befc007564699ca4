//! Firmware image sources.

use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;

use log::debug;

use crate::error::{Error, Result};

/// Image bytes must come in whole 32-bit words.
pub const IMAGE_ALIGNMENT: u64 = 4;

/// Sequential reader over a firmware image.
pub trait ImageSource {
    /// Total image length in bytes.
    fn len(&self) -> u64;

    /// Whether the image has no bytes.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fill `buf` completely from the current position.
    ///
    /// Fails with [`Error::Data`] when the source runs out first.
    fn read_exact_chunk(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Reject images the bootloader cannot take.
    fn validate(&self) -> Result<()> {
        let len = self.len();
        if len == 0 {
            return Err(Error::InvalidImage("image is empty".into()));
        }
        if len % IMAGE_ALIGNMENT != 0 {
            return Err(Error::InvalidImage(format!(
                "length {len} is not a multiple of {IMAGE_ALIGNMENT} bytes"
            )));
        }
        Ok(())
    }
}

/// Firmware image backed by a file or a buffer.
#[derive(Debug)]
pub struct FirmwareImage<R> {
    reader: R,
    len: u64,
}

impl FirmwareImage<File> {
    /// Open an image file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        debug!("Opened image {} ({len} bytes)", path.display());
        Ok(Self { reader: file, len })
    }
}

impl FirmwareImage<Cursor<Vec<u8>>> {
    /// Wrap an in-memory image.
    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Self {
        let data = data.into();
        let len = data.len() as u64;
        Self {
            reader: Cursor::new(data),
            len,
        }
    }
}

impl<R: Read> ImageSource for FirmwareImage<R> {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_exact_chunk(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {},
                Err(e) => return Err(e.into()),
            }
        }
        if filled != buf.len() {
            return Err(Error::Data {
                expected: buf.len(),
                actual: filled,
            });
        }
        Ok(())
    }
}
