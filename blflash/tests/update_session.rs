//! End-to-end update runs against an emulated bootloader.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::time::Duration;

use blflash::protocol::{EOM, crc8, crc32};
use blflash::{
    Command, Delay, Engine, EngineConfig, Error, FirmwareImage, Port, Session, SessionState,
    Status, Timeouts, UpdatePlan, Verification,
};

const FLASH_BASE: u32 = 0x0800_4000;
const FLASH_SIZE: u32 = 0x8000;

/// Bootloader emulator: parses requests as they are written and answers
/// after a configurable number of empty polls.
struct FakeDevice {
    rx: Vec<u8>,
    pending: VecDeque<(usize, Vec<u8>)>,
    flash: Vec<u8>,
    write_offset: usize,
    chunk_count: usize,
    corrupt_chunk: Option<usize>,
    reply_delay: usize,
    crc_status: Status,
    log: Vec<u8>,
    closed: bool,
}

impl FakeDevice {
    fn new() -> Self {
        Self {
            rx: Vec::new(),
            pending: VecDeque::new(),
            flash: vec![0xFF; FLASH_SIZE as usize],
            write_offset: 0,
            chunk_count: 0,
            corrupt_chunk: None,
            reply_delay: 0,
            crc_status: Status::Ok,
            log: Vec::new(),
            closed: false,
        }
    }

    fn reply(&mut self, mut body: Vec<u8>) {
        body.push(EOM);
        body.push(crc8(&body));
        self.pending.push_back((self.reply_delay, body));
    }

    fn status(&mut self, status: Status) {
        self.reply(vec![status.as_byte()]);
    }

    fn le32(bytes: &[u8]) -> u32 {
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    fn request_len(&self) -> Option<usize> {
        let opcode = *self.rx.first()?;
        match opcode {
            0xB3 => self.rx.get(1).map(|size| 2 + *size as usize + 1 + 2),
            0x0A | 0x0E => Some(3),
            0xB1 => Some(4),
            0x0F => Some(7),
            0xB2 | 0xEF => Some(11),
            _ => Some(self.rx.len()),
        }
    }

    fn process(&mut self) {
        while let Some(len) = self.request_len() {
            if self.rx.len() < len {
                return;
            }
            let request: Vec<u8> = self.rx.drain(..len).collect();
            self.handle(&request);
        }
    }

    fn handle(&mut self, request: &[u8]) {
        let opcode = request[0];
        self.log.push(opcode);
        match opcode {
            0xB3 => {
                let size = request[1] as usize + 1;
                let trailer = &request[2 + size..];
                if trailer != [EOM, crc8(&[0xB3, request[1], EOM])] {
                    self.status(Status::CrcError);
                    return;
                }
                let mut data = request[2..2 + size].to_vec();
                if self.corrupt_chunk == Some(self.chunk_count) {
                    data[0] ^= 0xFF;
                }
                self.flash[self.write_offset..self.write_offset + size].copy_from_slice(&data);
                self.write_offset += size;
                self.chunk_count += 1;
                self.status(Status::Ok);
            },
            _ => {
                let (body, crc) = request.split_at(request.len() - 1);
                if crc8(body) != crc[0] {
                    self.status(Status::CrcError);
                    return;
                }
                let payload = &body[1..body.len() - 1];
                match opcode {
                    0x0A => {
                        let mut reply = vec![0x00, 0x02, 0xB1, 0xF1, 0xA5, 0x01];
                        reply.extend_from_slice(&FLASH_SIZE.to_le_bytes());
                        self.reply(reply);
                    },
                    0xB2 => {
                        let address = Self::le32(&payload[..4]);
                        self.write_offset = (address - FLASH_BASE) as usize;
                        self.status(Status::Ok);
                    },
                    0xEF => {
                        let start = (Self::le32(&payload[..4]) - FLASH_BASE) as usize;
                        let end = (Self::le32(&payload[4..]) - FLASH_BASE) as usize;
                        let mut reply = vec![self.crc_status.as_byte()];
                        reply.extend_from_slice(&crc32(&self.flash[start..end]).to_le_bytes());
                        self.reply(reply);
                    },
                    0xB1 | 0x0F | 0x0E => self.status(Status::Ok),
                    _ => self.status(Status::ArgError),
                }
            },
        }
    }
}

impl Read for FakeDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.pending.front_mut() {
            Some((0, _)) => {
                let (_, reply) = self.pending.pop_front().unwrap_or_default();
                buf[..reply.len()].copy_from_slice(&reply);
                Ok(reply.len())
            },
            Some((wait, _)) => {
                *wait -= 1;
                Err(io::Error::from(io::ErrorKind::WouldBlock))
            },
            None => Err(io::Error::from(io::ErrorKind::WouldBlock)),
        }
    }
}

impl Write for FakeDevice {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.rx.extend_from_slice(buf);
        self.process();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for FakeDevice {
    fn name(&self) -> &str {
        "fake-device"
    }

    fn baud_rate(&self) -> u32 {
        115_200
    }

    fn close(&mut self) -> blflash::Result<()> {
        self.closed = true;
        Ok(())
    }
}

struct NoDelay;

impl Delay for NoDelay {
    fn delay(&mut self, _duration: Duration) {}
}

fn session(device: FakeDevice, config: EngineConfig) -> Session<FakeDevice, NoDelay> {
    let engine = Engine::with_delay(device, NoDelay, config).with_interrupt_checker(|| false);
    Session::new(engine)
}

fn image_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i.wrapping_mul(13) ^ (i >> 8)) as u8).collect()
}

#[test]
fn test_four_window_image_verifies_and_boots() {
    let _ = env_logger::builder().is_test(true).try_init();
    let data = image_bytes(1024);
    let mut session = session(FakeDevice::new(), EngineConfig::default());
    let mut image = FirmwareImage::from_bytes(data.clone());
    let mut last_progress = (0, 0);

    let outcome = session
        .run(&UpdatePlan::new(FLASH_BASE), &mut image, |sent, total| {
            last_progress = (sent, total);
        })
        .unwrap();

    assert_eq!(outcome.board.flash_size, FLASH_SIZE);
    assert_eq!(outcome.transfer.chunks, 4);
    assert_eq!(outcome.transfer.checksum, crc32(&data));
    assert_eq!(
        outcome.verification,
        Some(Verification::Matched(crc32(&data)))
    );
    assert!(outcome.booted);
    assert_eq!(last_progress, (1024, 1024));
    assert_eq!(session.state(), SessionState::Ended);

    let device = session.into_engine().into_port();
    assert_eq!(&device.flash[..1024], data.as_slice());
    assert_eq!(
        device.log,
        vec![0x0A, 0xB2, 0xB3, 0xB3, 0xB3, 0xB3, 0xEF, 0x0F, 0x0E]
    );
    assert!(device.closed);
}

#[test]
fn test_corrupted_third_window_fails_verification() {
    let data = image_bytes(1024);
    let mut device = FakeDevice::new();
    device.corrupt_chunk = Some(2);
    let mut session = session(device, EngineConfig::default());
    let mut image = FirmwareImage::from_bytes(data.clone());

    let err = session
        .run(&UpdatePlan::new(FLASH_BASE), &mut image, |_, _| {})
        .unwrap_err();

    assert!(err.is_checksum_error());
    let Error::ImageChecksum { local, remote } = err else {
        panic!("expected image checksum mismatch, got {err:?}");
    };
    assert_eq!(local, crc32(&data));
    assert_ne!(remote, local);

    let device = session.into_engine().into_port();
    assert_eq!(device.log.last(), Some(&0x0E));
    assert!(!device.log.contains(&0x0F));
    assert!(device.closed);
}

#[test]
fn test_misaligned_image_rejected_before_any_byte() {
    let mut session = session(FakeDevice::new(), EngineConfig::default());
    let mut image = FirmwareImage::from_bytes(image_bytes(1022));

    let err = session
        .run(&UpdatePlan::new(FLASH_BASE), &mut image, |_, _| {})
        .unwrap_err();
    assert!(matches!(err, Error::InvalidImage(_)));
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(session.into_engine().into_port().log.is_empty());
}

#[test]
fn test_reply_inside_and_outside_budget() {
    let config = EngineConfig::default()
        .with_tick(Duration::from_millis(1))
        .with_timeouts(Timeouts::default().with(Command::Handshake, Duration::from_millis(10)));

    let mut early = FakeDevice::new();
    early.reply_delay = 5;
    let mut session_early = session(early, config);
    assert!(session_early.handshake().is_ok());

    let mut late = FakeDevice::new();
    late.reply_delay = 11;
    let mut session_late = session(late, config);
    assert!(matches!(
        session_late.handshake(),
        Err(Error::Timeout {
            command: Command::Handshake,
            ..
        })
    ));
    assert_eq!(session_late.state(), SessionState::Disconnected);
}

#[test]
fn test_device_side_crc_failure_is_reported_not_fatal() {
    let data = image_bytes(512);
    let mut device = FakeDevice::new();
    device.crc_status = Status::ReadError;
    let mut session = session(device, EngineConfig::default());
    let mut image = FirmwareImage::from_bytes(data);

    let outcome = session
        .run(&UpdatePlan::new(FLASH_BASE), &mut image, |_, _| {})
        .unwrap();
    assert_eq!(
        outcome.verification,
        Some(Verification::NotPerformed(Status::ReadError))
    );
}

#[test]
fn test_image_from_file() {
    let data = image_bytes(300 * 4);
    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(file.path(), &data).unwrap();

    let mut session = session(FakeDevice::new(), EngineConfig::default());
    let mut image = FirmwareImage::from_file(file.path()).unwrap();
    let outcome = session
        .run(
            &UpdatePlan::new(FLASH_BASE).with_erase([1, 2]),
            &mut image,
            |_, _| {},
        )
        .unwrap();

    assert_eq!(outcome.transfer.chunks, 5);
    let device = session.into_engine().into_port();
    assert_eq!(&device.flash[..data.len()], data.as_slice());
    assert_eq!(&device.log[..3], &[0x0A, 0xB1, 0xB1]);
}
