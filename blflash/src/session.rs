//! Update session state machine.
//!
//! ```text
//! Disconnected -> Handshaken -> ParamsSet -> Transferred -> Verified -> Booted
//!                     |  ^
//!                     +--+ erase
//!
//! any state except Ended --end()--> Ended
//! ```
//!
//! Each transition is exactly one exchange and only happens when that
//! exchange succeeded. Calling a step from the wrong state fails with
//! [`Error::InvalidState`] before anything reaches the wire.

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, info, warn};

use crate::engine::{Engine, TransferReport};
use crate::error::{Error, Result};
use crate::image::ImageSource;
use crate::port::{Delay, Port, StdDelay};
use crate::protocol::{BoardInfo, Command, Reply, Verification};

/// Protocol version this client speaks.
pub const SUPPORTED_VERSION: (u8, u8) = (0, 2);

/// Where a session stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No exchange has succeeded yet.
    Disconnected,
    /// Handshake accepted.
    Handshaken,
    /// Address and size accepted.
    ParamsSet,
    /// Every image chunk acknowledged.
    Transferred,
    /// Device checksum compared (or reported as not performed).
    Verified,
    /// Device accepted the boot request.
    Booted,
    /// EndOfSession sent; no further exchanges.
    Ended,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Handshaken => "handshaken",
            Self::ParamsSet => "params-set",
            Self::Transferred => "transferred",
            Self::Verified => "verified",
            Self::Booted => "booted",
            Self::Ended => "ended",
        };
        f.write_str(name)
    }
}

/// What a full update run does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatePlan {
    /// Application start address.
    pub address: u32,
    /// Sectors erased right after the handshake.
    pub erase: Vec<u8>,
    /// Ask the device for the image CRC-32 after the transfer.
    pub verify: bool,
    /// Jump to the application once verified.
    pub boot: bool,
}

impl UpdatePlan {
    /// Plan that transfers, verifies and boots at `address`.
    pub fn new(address: u32) -> Self {
        Self {
            address,
            erase: Vec::new(),
            verify: true,
            boot: true,
        }
    }

    /// Erase `sectors` before writing.
    #[must_use]
    pub fn with_erase(mut self, sectors: impl Into<Vec<u8>>) -> Self {
        self.erase = sectors.into();
        self
    }

    /// Enable or disable verification.
    #[must_use]
    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// Enable or disable booting.
    #[must_use]
    pub fn with_boot(mut self, boot: bool) -> Self {
        self.boot = boot;
        self
    }
}

/// Result of a successful [`Session::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// Board identity from the handshake.
    pub board: BoardInfo,
    /// Transfer statistics.
    pub transfer: TransferReport,
    /// Verification result, if verification ran.
    pub verification: Option<Verification>,
    /// Whether the boot request was sent and accepted.
    pub booted: bool,
}

/// One bootloader session over an [`Engine`].
pub struct Session<P: Port, D: Delay = StdDelay> {
    engine: Engine<P, D>,
    state: SessionState,
    board: Option<BoardInfo>,
    params: Option<(u32, u32)>,
    transfer: Option<TransferReport>,
}

impl<P: Port, D: Delay> Session<P, D> {
    /// Start a session in [`SessionState::Disconnected`].
    pub fn new(engine: Engine<P, D>) -> Self {
        Self {
            engine,
            state: SessionState::Disconnected,
            board: None,
            params: None,
            transfer: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Board identity, once handshaken.
    pub fn board(&self) -> Option<&BoardInfo> {
        self.board.as_ref()
    }

    /// Engine driving this session.
    pub fn engine(&self) -> &Engine<P, D> {
        &self.engine
    }

    /// Consume the session and return the engine.
    pub fn into_engine(self) -> Engine<P, D> {
        self.engine
    }

    fn require(&self, operation: &'static str, allowed: SessionState) -> Result<()> {
        if self.state != allowed {
            return Err(Error::InvalidState {
                operation,
                state: self.state,
            });
        }
        Ok(())
    }

    fn unconfirmed(&self, command: Command) -> Error {
        Error::Timeout {
            command,
            waited: self.engine.config().timeouts.for_command(command),
        }
    }

    /// Require an OK status from `command`.
    fn expect_status(&mut self, command: Command, payload: &[u8]) -> Result<()> {
        match self.engine.call(command, payload)? {
            Reply::Status | Reply::Sent => Ok(()),
            _ => Err(self.unconfirmed(command)),
        }
    }

    /// Open the session and read the board identity.
    pub fn handshake(&mut self) -> Result<BoardInfo> {
        self.require("handshake", SessionState::Disconnected)?;
        info!(
            "Handshaking on {} at {} baud",
            self.engine.port().name(),
            self.engine.port().baud_rate()
        );

        let info = match self.engine.call(Command::Handshake, &[])? {
            Reply::Board(info) => info,
            _ => return Err(self.unconfirmed(Command::Handshake)),
        };

        if (info.version, info.revision) != SUPPORTED_VERSION {
            warn!(
                "Device speaks protocol {}.{}, this client supports {}.{}",
                info.version, info.revision, SUPPORTED_VERSION.0, SUPPORTED_VERSION.1
            );
        }
        info!("Connected: {info}");

        self.board = Some(info);
        self.state = SessionState::Handshaken;
        Ok(info)
    }

    /// Erase one flash sector.
    pub fn erase(&mut self, sector: u8) -> Result<()> {
        self.require("erase", SessionState::Handshaken)?;
        info!("Erasing sector {sector}");
        self.expect_status(Command::Erase, &[sector])
    }

    /// Announce the application address and image size.
    pub fn set_flash_params(&mut self, address: u32, size: u32) -> Result<()> {
        self.require("set flash parameters", SessionState::Handshaken)?;

        if let Some(board) = &self.board {
            if size > board.flash_size {
                return Err(Error::ImageTooLarge {
                    len: u64::from(size),
                    capacity: board.flash_size,
                });
            }
        }
        if address.checked_add(size).is_none() {
            return Err(Error::InvalidImage(format!(
                "{size} bytes at 0x{address:08X} run past the end of the address space"
            )));
        }

        info!("Setting application address 0x{address:08X}, size {size} bytes");
        let mut payload = [0u8; 8];
        LittleEndian::write_u32(&mut payload[..4], address);
        LittleEndian::write_u32(&mut payload[4..], size);
        self.expect_status(Command::SetFlashParams, &payload)?;

        self.params = Some((address, size));
        self.state = SessionState::ParamsSet;
        Ok(())
    }

    /// Stream the image announced by [`set_flash_params`](Self::set_flash_params).
    pub fn transfer<S, F>(&mut self, image: &mut S, progress: F) -> Result<TransferReport>
    where
        S: ImageSource + ?Sized,
        F: FnMut(u64, u64),
    {
        self.require("transfer", SessionState::ParamsSet)?;
        let (_, size) = self.params.unwrap_or_default();
        if image.len() != u64::from(size) {
            return Err(Error::InvalidImage(format!(
                "image is {} bytes but {size} bytes were announced",
                image.len()
            )));
        }

        let report = self.engine.transfer_image(image, progress)?;
        self.transfer = Some(report);
        self.state = SessionState::Transferred;
        Ok(report)
    }

    /// Compare the device CRC-32 of the written range with the host's.
    pub fn verify(&mut self) -> Result<Verification> {
        self.require("verify", SessionState::Transferred)?;
        let (start, size) = self.params.unwrap_or_default();
        let local = self.transfer.map_or(0, |t| t.checksum);
        // Overflow is rejected in set_flash_params.
        let end = start.wrapping_add(size);

        debug!("Requesting CRC-32 of 0x{start:08X}..0x{end:08X}");
        let mut payload = [0u8; 8];
        LittleEndian::write_u32(&mut payload[..4], start);
        LittleEndian::write_u32(&mut payload[4..], end);

        let report = match self.engine.call(Command::VerifyCrc, &payload)? {
            Reply::Crc(report) => report,
            _ => return Err(self.unconfirmed(Command::VerifyCrc)),
        };
        let verification = report.check(local)?;
        if let Verification::Matched(crc) = verification {
            info!("Image verified, CRC-32 0x{crc:08X}");
        }

        self.state = SessionState::Verified;
        Ok(verification)
    }

    /// Ask the device to jump to the application.
    ///
    /// The device must acknowledge with an OK status; a missing reply is a
    /// [`Error::Timeout`] even when the boot budget is zero.
    pub fn boot(&mut self, address: u32) -> Result<()> {
        self.require("boot", SessionState::Verified)?;
        info!("Booting application at 0x{address:08X}");

        let mut payload = [0u8; 4];
        LittleEndian::write_u32(&mut payload, address);
        self.expect_status(Command::Boot, &payload)?;

        self.state = SessionState::Booted;
        Ok(())
    }

    /// Close the session and the port. The session is
    /// [`SessionState::Ended`] afterwards whether or not the device
    /// acknowledged, and the port is closed either way.
    pub fn end(&mut self) -> Result<()> {
        if self.state == SessionState::Ended {
            return Err(Error::InvalidState {
                operation: "end the session",
                state: self.state,
            });
        }

        self.state = SessionState::Ended;
        let acknowledged = self.expect_status(Command::EndOfSession, &[]);
        let closed = self.engine.port_mut().close();
        acknowledged?;
        closed?;
        info!("Session ended");
        Ok(())
    }

    /// Run a whole update: handshake, optional erases, parameters, transfer,
    /// verify, boot and end of session.
    ///
    /// The image is validated before anything is sent. Once the handshake
    /// has succeeded, any failure is followed by an EndOfSession exchange;
    /// if that fails too the result is [`Error::EndOfSession`].
    pub fn run<S, F>(
        &mut self,
        plan: &UpdatePlan,
        image: &mut S,
        progress: F,
    ) -> Result<UpdateOutcome>
    where
        S: ImageSource + ?Sized,
        F: FnMut(u64, u64),
    {
        image.validate()?;
        if plan.boot && !plan.verify {
            return Err(Error::Config("booting requires verification".into()));
        }

        match self.run_steps(plan, image, progress) {
            Ok(outcome) => {
                self.end()?;
                Ok(outcome)
            },
            Err(cause) => {
                match self.state {
                    SessionState::Ended => return Err(cause),
                    SessionState::Disconnected => {
                        if let Err(e) = self.engine.port_mut().close() {
                            warn!("Closing {} failed: {e}", self.engine.port().name());
                        }
                        return Err(cause);
                    },
                    _ => {},
                }
                warn!("Update failed in state {}: {cause}", self.state);
                match self.end() {
                    Ok(()) => Err(cause),
                    Err(end) => Err(Error::EndOfSession {
                        cause: Box::new(cause),
                        end: Box::new(end),
                    }),
                }
            },
        }
    }

    fn run_steps<S, F>(
        &mut self,
        plan: &UpdatePlan,
        image: &mut S,
        progress: F,
    ) -> Result<UpdateOutcome>
    where
        S: ImageSource + ?Sized,
        F: FnMut(u64, u64),
    {
        let board = self.handshake()?;

        let size = u32::try_from(image.len()).map_err(|_| Error::ImageTooLarge {
            len: image.len(),
            capacity: board.flash_size,
        })?;

        for &sector in &plan.erase {
            self.erase(sector)?;
        }

        self.set_flash_params(plan.address, size)?;
        let transfer = self.transfer(image, progress)?;

        let verification = if plan.verify {
            Some(self.verify()?)
        } else {
            None
        };

        if plan.boot {
            self.boot(plan.address)?;
        }

        Ok(UpdateOutcome {
            board,
            transfer,
            verification,
            booted: plan.boot,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::image::FirmwareImage;
    use crate::protocol::{Status, crc32};
    use crate::test_support::{
        CountingDelay, FakePort, crc_reply, handshake_reply, ok_reply, status_reply,
    };
    use std::time::Duration;

    fn session(polls: Vec<Vec<u8>>) -> Session<FakePort, CountingDelay> {
        let engine = Engine::with_delay(
            FakePort::with_polls(polls),
            CountingDelay::default(),
            EngineConfig::default(),
        )
        .with_interrupt_checker(|| false);
        Session::new(engine)
    }

    fn full_run_replies(data: &[u8]) -> Vec<Vec<u8>> {
        let chunks = data.len().div_ceil(256);
        let mut polls = vec![handshake_reply(0, 2, 0x10000), ok_reply()];
        polls.extend(std::iter::repeat_n(ok_reply(), chunks));
        polls.push(crc_reply(Status::Ok, crc32(data)));
        polls.push(ok_reply());
        polls.push(ok_reply());
        polls
    }

    #[test]
    fn test_full_run() {
        let data = vec![0xA5u8; 1024];
        let mut session = session(full_run_replies(&data));
        let mut image = FirmwareImage::from_bytes(data.clone());

        let outcome = session
            .run(&UpdatePlan::new(0x0800_4000), &mut image, |_, _| {})
            .unwrap();

        assert_eq!(outcome.transfer.chunks, 4);
        assert_eq!(
            outcome.verification,
            Some(Verification::Matched(crc32(&data)))
        );
        assert!(outcome.booted);
        assert_eq!(session.state(), SessionState::Ended);
        assert_eq!(
            session.engine().port().opcodes(),
            vec![0x0A, 0xB2, 0xEF, 0x0F, 0x0E]
        );
        assert!(session.engine().port().closed);
    }

    #[test]
    fn test_params_and_verify_payloads() {
        let data = vec![0u8; 8];
        let mut session = session(full_run_replies(&data));
        let mut image = FirmwareImage::from_bytes(data);
        session
            .run(&UpdatePlan::new(0x0800_4000), &mut image, |_, _| {})
            .unwrap();

        let writes = &session.engine().port().writes;
        let params = writes.iter().find(|w| w[0] == 0xB2).unwrap();
        assert_eq!(&params[1..9], &[0x00, 0x40, 0x00, 0x08, 8, 0, 0, 0]);
        let verify = writes.iter().find(|w| w[0] == 0xEF).unwrap();
        assert_eq!(&verify[1..9], &[0x00, 0x40, 0x00, 0x08, 0x08, 0x40, 0x00, 0x08]);
    }

    #[test]
    fn test_wrong_state_touches_nothing() {
        let mut session = session(Vec::new());
        assert!(matches!(
            session.verify(),
            Err(Error::InvalidState {
                state: SessionState::Disconnected,
                ..
            })
        ));
        assert!(matches!(
            session.boot(0),
            Err(Error::InvalidState { .. })
        ));
        assert!(matches!(
            session.set_flash_params(0, 4),
            Err(Error::InvalidState { .. })
        ));
        assert!(session.engine().port().writes.is_empty());
    }

    #[test]
    fn test_end_only_once() {
        let mut session = session(vec![ok_reply()]);
        session.end().unwrap();
        assert!(session.engine().port().closed);
        assert!(matches!(
            session.end(),
            Err(Error::InvalidState {
                state: SessionState::Ended,
                ..
            })
        ));
    }

    #[test]
    fn test_failure_forces_end_of_session() {
        let polls = vec![
            handshake_reply(0, 2, 0x10000),
            status_reply(Status::ArgError),
            ok_reply(),
        ];
        let mut session = session(polls);
        let mut image = FirmwareImage::from_bytes(vec![0u8; 64]);

        let err = session
            .run(&UpdatePlan::new(0), &mut image, |_, _| {})
            .unwrap_err();
        assert_eq!(err.device_status(), Some(Status::ArgError));
        assert_eq!(session.state(), SessionState::Ended);
        assert_eq!(session.engine().port().opcodes(), vec![0x0A, 0xB2, 0x0E]);
    }

    #[test]
    fn test_failed_end_of_session_carries_both_errors() {
        let polls = vec![
            handshake_reply(0, 2, 0x10000),
            status_reply(Status::IoError),
            status_reply(Status::IoError),
        ];
        let mut session = session(polls);
        let mut image = FirmwareImage::from_bytes(vec![0u8; 64]);

        let err = session
            .run(&UpdatePlan::new(0), &mut image, |_, _| {})
            .unwrap_err();
        let Error::EndOfSession { cause, end } = err else {
            panic!("expected EndOfSession, got {err:?}");
        };
        assert!(matches!(
            *cause,
            Error::DeviceStatus {
                command: Command::SetFlashParams,
                ..
            }
        ));
        assert!(matches!(
            *end,
            Error::DeviceStatus {
                command: Command::EndOfSession,
                ..
            }
        ));
        assert!(session.engine().port().closed);
    }

    #[test]
    fn test_handshake_failure_sends_no_end_of_session() {
        let mut session = session(Vec::new());
        let mut image = FirmwareImage::from_bytes(vec![0u8; 64]);
        let err = session
            .run(&UpdatePlan::new(0), &mut image, |_, _| {})
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Timeout {
                command: Command::Handshake,
                ..
            }
        ));
        assert_eq!(session.engine().port().opcodes(), vec![0x0A]);
        assert!(session.engine().port().closed);
    }

    #[test]
    fn test_misaligned_image_rejected_before_sending() {
        let mut session = session(Vec::new());
        let mut image = FirmwareImage::from_bytes(vec![0u8; 1023]);
        assert!(matches!(
            session.run(&UpdatePlan::new(0), &mut image, |_, _| {}),
            Err(Error::InvalidImage(_))
        ));
        let port = session.engine().port();
        assert!(port.writes.is_empty());
        assert!(!port.closed);
    }

    #[test]
    fn test_image_larger_than_flash_rejected() {
        let polls = vec![handshake_reply(0, 2, 1024), ok_reply()];
        let mut session = session(polls);
        let mut image = FirmwareImage::from_bytes(vec![0u8; 2048]);

        let err = session
            .run(&UpdatePlan::new(0), &mut image, |_, _| {})
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ImageTooLarge {
                len: 2048,
                capacity: 1024
            }
        ));
        assert_eq!(session.engine().port().opcodes(), vec![0x0A, 0x0E]);
    }

    #[test]
    fn test_erase_before_params() {
        let data = vec![0u8; 4];
        let mut polls = full_run_replies(&data);
        polls.insert(1, ok_reply());
        polls.insert(1, ok_reply());
        let mut session = session(polls);
        let mut image = FirmwareImage::from_bytes(data);

        session
            .run(
                &UpdatePlan::new(0).with_erase([3, 4]),
                &mut image,
                |_, _| {},
            )
            .unwrap();
        assert_eq!(
            session.engine().port().opcodes(),
            vec![0x0A, 0xB1, 0xB1, 0xB2, 0xEF, 0x0F, 0x0E]
        );
    }

    #[test]
    fn test_crc_not_performed_still_boots() {
        let data = vec![0u8; 4];
        let mut polls = full_run_replies(&data);
        let crc_index = polls.len() - 3;
        polls[crc_index] = crc_reply(Status::ReadError, 0);
        let mut session = session(polls);
        let mut image = FirmwareImage::from_bytes(data);

        let outcome = session
            .run(&UpdatePlan::new(0), &mut image, |_, _| {})
            .unwrap();
        assert_eq!(
            outcome.verification,
            Some(Verification::NotPerformed(Status::ReadError))
        );
        assert!(outcome.booted);
    }

    #[test]
    fn test_boot_without_verify_is_refused() {
        let mut session = session(Vec::new());
        let mut image = FirmwareImage::from_bytes(vec![0u8; 4]);
        let plan = UpdatePlan::new(0).with_verify(false);
        assert!(matches!(
            session.run(&plan, &mut image, |_, _| {}),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_unconfirmed_boot_fails_and_ends_session() {
        let data = vec![0u8; 4];
        let mut polls = full_run_replies(&data);
        let boot_index = polls.len() - 2;
        polls[boot_index] = Vec::new();
        let timeouts = crate::config::Timeouts::default().with(Command::Boot, Duration::ZERO);
        let engine = Engine::with_delay(
            FakePort::with_polls(polls),
            CountingDelay::default(),
            EngineConfig::default().with_timeouts(timeouts),
        )
        .with_interrupt_checker(|| false);
        let mut session = Session::new(engine);
        let mut image = FirmwareImage::from_bytes(data);

        let err = session
            .run(&UpdatePlan::new(0), &mut image, |_, _| {})
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Timeout {
                command: Command::Boot,
                waited: Duration::ZERO,
            }
        ));
        assert_eq!(session.state(), SessionState::Ended);
        let port = session.engine().port();
        assert_eq!(port.opcodes(), vec![0x0A, 0xB2, 0xEF, 0x0F, 0x0E]);
        assert!(port.closed);
    }
}
