//! Fakes shared by the unit tests.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::time::Duration;

use crate::error::Result;
use crate::port::{Delay, Port};
use crate::protocol::{EOM, Status, crc8};

/// Port that answers polls from a queue and records every write.
#[derive(Default)]
pub struct FakePort {
    pub polls: VecDeque<io::Result<Vec<u8>>>,
    pub writes: Vec<Vec<u8>>,
    pub poll_count: usize,
    pub closed: bool,
}

impl FakePort {
    pub fn with_polls(polls: impl IntoIterator<Item = Vec<u8>>) -> Self {
        Self {
            polls: polls.into_iter().map(Ok).collect(),
            ..Self::default()
        }
    }

    /// Opcodes of every generic frame written, ignoring chunk segments.
    pub fn opcodes(&self) -> Vec<u8> {
        self.writes
            .iter()
            .filter(|w| w.len() >= 3 && w[w.len() - 2] == EOM && w[0] != 0xB3)
            .map(|w| w[0])
            .collect()
    }
}

impl Read for FakePort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.poll_count += 1;
        match self.polls.pop_front() {
            Some(Ok(data)) => {
                buf[..data.len()].copy_from_slice(&data);
                Ok(data.len())
            },
            Some(Err(e)) => Err(e),
            None => Err(io::Error::from(io::ErrorKind::WouldBlock)),
        }
    }
}

impl Write for FakePort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writes.push(buf.to_vec());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for FakePort {
    fn name(&self) -> &str {
        "fake"
    }

    fn baud_rate(&self) -> u32 {
        115_200
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// Delay that records instead of sleeping.
#[derive(Default)]
pub struct CountingDelay {
    pub calls: Vec<Duration>,
}

impl Delay for CountingDelay {
    fn delay(&mut self, duration: Duration) {
        self.calls.push(duration);
    }
}

fn seal(mut body: Vec<u8>) -> Vec<u8> {
    body.push(crc8(&body));
    body
}

pub fn status_reply(status: Status) -> Vec<u8> {
    seal(vec![status.as_byte(), EOM])
}

pub fn ok_reply() -> Vec<u8> {
    status_reply(Status::Ok)
}

pub fn handshake_reply(version: u8, revision: u8, flash_size: u32) -> Vec<u8> {
    let mut body = vec![version, revision, 0xB1, 0x0A, 0x00, 0x01];
    body.extend_from_slice(&flash_size.to_le_bytes());
    body.push(EOM);
    seal(body)
}

pub fn crc_reply(status: Status, checksum: u32) -> Vec<u8> {
    let mut body = vec![status.as_byte()];
    body.extend_from_slice(&checksum.to_le_bytes());
    body.push(EOM);
    seal(body)
}
