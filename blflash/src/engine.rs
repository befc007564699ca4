//! Request/reply engine.
//!
//! One exchange is in flight at a time: encode the request, write its
//! segments, then poll the port once per tick until the first bytes arrive
//! or the budget runs out. Nothing is ever retried here; callers decide what
//! a failure means.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, trace, warn};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::image::ImageSource;
use crate::port::{Delay, Port, StdDelay};
use crate::protocol::{
    Command, CommandSpec, ImageChecksum, MAX_CHUNK, Reply, Request, RequestEncoder, frame,
};

/// Receive buffer for one poll. Larger than any valid reply so oversized
/// replies are reported as malformed instead of being split.
const RX_BUFFER: usize = 64;

type InterruptChecker = Arc<dyn Fn() -> bool + Send + Sync>;

/// Outcome of a completed image transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferReport {
    /// Bytes acknowledged by the device.
    pub bytes: u64,
    /// FlashData exchanges performed.
    pub chunks: usize,
    /// CRC-32 over every acknowledged byte, in order.
    pub checksum: u32,
}

/// Protocol engine owning the serial port.
pub struct Engine<P: Port, D: Delay = StdDelay> {
    port: P,
    delay: D,
    config: EngineConfig,
    interrupt: Option<InterruptChecker>,
}

impl<P: Port> Engine<P> {
    /// Create an engine with default timing that sleeps the current thread.
    pub fn new(port: P) -> Self {
        Self::with_delay(port, StdDelay, EngineConfig::default())
    }
}

impl<P: Port, D: Delay> Engine<P, D> {
    /// Create an engine with an explicit tick source and configuration.
    pub fn with_delay(port: P, delay: D, config: EngineConfig) -> Self {
        Self {
            port,
            delay,
            config,
            interrupt: None,
        }
    }

    /// Replace the timing configuration.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `checker` instead of the process-wide interrupt checker.
    #[must_use]
    pub fn with_interrupt_checker<F>(mut self, checker: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.interrupt = Some(Arc::new(checker));
        self
    }

    /// Timing configuration in use.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Get a mutable reference to the underlying port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Get a reference to the tick source.
    pub fn delay(&self) -> &D {
        &self.delay
    }

    /// Consume the engine and return the underlying port.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Send `command` and wait up to `timeout` for its reply.
    ///
    /// With a zero timeout the port is polled exactly once; if nothing is
    /// there the result is [`Reply::Unconfirmed`] (or [`Reply::Sent`] for a
    /// command the device never answers).
    pub fn send_and_await(
        &mut self,
        command: Command,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Reply> {
        self.exchange(command.spec(), payload, timeout)
    }

    /// [`send_and_await`](Self::send_and_await) with the configured budget
    /// for `command`.
    pub fn call(&mut self, command: Command, payload: &[u8]) -> Result<Reply> {
        let timeout = self.config.timeouts.for_command(command);
        self.send_and_await(command, payload, timeout)
    }

    /// Send a raw opcode. Unknown opcodes fail before anything is written.
    pub fn send_opcode(&mut self, opcode: u8, payload: &[u8], timeout: Duration) -> Result<Reply> {
        let command = Command::try_from(opcode)?;
        self.send_and_await(command, payload, timeout)
    }

    pub(crate) fn exchange(
        &mut self,
        spec: CommandSpec,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Reply> {
        let command = spec.command;
        let request = match spec.encoder {
            Some(RequestEncoder::Chunk) => frame::encode_chunk(payload)?,
            None => Request::single(frame::encode(command.opcode(), payload)?),
        };

        debug!(
            "{command}: sending {} bytes, timeout {timeout:?}",
            request.len()
        );
        self.write_request(&request)?;
        self.await_reply(spec, timeout)
    }

    fn write_request(&mut self, request: &Request) -> Result<()> {
        for (i, segment) in request.segments().iter().enumerate() {
            if i > 0 {
                self.delay.delay(self.config.inter_write_delay);
            }
            trace!("TX [{}]", hex(segment));
            self.port.send(segment)?;
        }
        Ok(())
    }

    fn await_reply(&mut self, spec: CommandSpec, timeout: Duration) -> Result<Reply> {
        let mut buf = [0u8; RX_BUFFER];

        if timeout.is_zero() {
            let n = self.port.poll(&mut buf)?;
            if n > 0 {
                return decode(spec, &buf[..n]);
            }
            if spec.reply.is_none() {
                return Ok(Reply::Sent);
            }
            debug!("{}: no reply on single poll", spec.command);
            return Ok(Reply::Unconfirmed);
        }

        let ticks = self.config.ticks_for(timeout);
        for _ in 0..ticks {
            self.delay.delay(self.config.tick);
            let n = self.port.poll(&mut buf)?;
            if n > 0 {
                return decode(spec, &buf[..n]);
            }
        }

        Err(Error::Timeout {
            command: spec.command,
            waited: timeout,
        })
    }

    fn interrupted(&self) -> bool {
        match &self.interrupt {
            Some(checker) => checker(),
            None => crate::is_interrupted_requested(),
        }
    }

    /// Stream an image in FlashData windows of up to [`MAX_CHUNK`] bytes.
    ///
    /// Every window must be acknowledged with an OK status before the next
    /// one is read. `progress` receives `(sent_bytes, total_bytes)` after
    /// each acknowledged window.
    pub fn transfer_image<S, F>(&mut self, source: &mut S, mut progress: F) -> Result<TransferReport>
    where
        S: ImageSource + ?Sized,
        F: FnMut(u64, u64),
    {
        let total = source.len();
        let spec = Command::FlashData.spec();
        let timeout = self.config.timeouts.chunk;
        let mut checksum = ImageChecksum::new();
        let mut chunks = 0usize;
        let mut window = [0u8; MAX_CHUNK];

        debug!("Transferring {total} bytes");
        while checksum.len() < total {
            if self.interrupted() {
                warn!(
                    "Transfer interrupted after {} of {total} bytes",
                    checksum.len()
                );
                return Err(Error::Interrupted);
            }

            let remaining = total - checksum.len();
            let size = usize::try_from(remaining).map_or(MAX_CHUNK, |r| r.min(MAX_CHUNK));
            let chunk = &mut window[..size];
            source.read_exact_chunk(chunk)?;

            match self.exchange(spec, chunk, timeout)? {
                Reply::Status => {},
                other => {
                    debug!("Chunk {chunks} not acknowledged: {other:?}");
                    return Err(Error::Timeout {
                        command: Command::FlashData,
                        waited: timeout,
                    });
                },
            }

            checksum.update(chunk);
            chunks += 1;
            trace!("Chunk {chunks} acknowledged ({} bytes)", chunk.len());
            progress(checksum.len(), total);
        }

        let report = TransferReport {
            bytes: checksum.len(),
            chunks,
            checksum: checksum.value(),
        };
        info!(
            "Transferred {} bytes in {} chunks, CRC-32 0x{:08X}",
            report.bytes, report.chunks, report.checksum
        );
        Ok(report)
    }
}

fn decode(spec: CommandSpec, data: &[u8]) -> Result<Reply> {
    trace!("RX [{}]", hex(data));
    match spec.reply {
        Some(kind) => kind.decode(spec.command, data),
        None => Ok(Reply::Sent),
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}
