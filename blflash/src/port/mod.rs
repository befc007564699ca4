//! Serial transport abstraction.
//!
//! The engine never touches a serial device directly. It talks to a [`Port`],
//! which only needs to move bytes: `send` writes a request segment, `poll`
//! returns whatever is waiting without blocking. The tick source of the
//! polling loop is a separate [`Delay`] so tests can run without sleeping.
//!
//! ```text
//! +------------------+
//! |  Session/Engine  |
//! +--------+---------+
//!          |
//! +--------v---------+     +-------------+
//! |    Port trait    |     | Delay trait |
//! +--------+---------+     +-------------+
//!          |
//! +--------v---------+
//! |    NativePort    |
//! |   (serialport)   |
//! +------------------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use blflash::port::Port;
//!
//! fn example<P: Port>(port: &mut P) -> blflash::Result<()> {
//!     port.send(&[0x0A, 0xC0, 0xCC])?;
//!
//!     let mut buf = [0u8; 32];
//!     let n = port.poll(&mut buf)?;
//!     println!("Received: {:02X?}", &buf[..n]);
//!
//!     Ok(())
//! }
//! ```

#[cfg(feature = "native")]
pub mod native;

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Serial port configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
}

/// Baud rate the bootloader listens on out of reset.
pub const DEFAULT_BAUD: u32 = 115_200;

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD,
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
        }
    }
}

/// Byte transport used by the engine.
///
/// `send` and `poll` have default implementations on top of [`Read`] and
/// [`Write`], so most ports only supply the bookkeeping methods.
pub trait Port: Read + Write + Send {
    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Get the current baud rate.
    fn baud_rate(&self) -> u32;

    /// Close the port and release resources.
    ///
    /// After calling this method, the port cannot be used for further I/O.
    fn close(&mut self) -> Result<()>;

    /// Write one request segment, returning the number of bytes written.
    fn send(&mut self, data: &[u8]) -> Result<usize> {
        self.write_all(data)?;
        self.flush()?;
        Ok(data.len())
    }

    /// Read whatever is available without waiting.
    ///
    /// Returns `Ok(0)` when nothing has arrived yet. Would-block and timed-out
    /// reads are reported the same way; any other I/O error is returned.
    fn poll(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

/// Tick source for the exchange polling loop.
pub trait Delay {
    /// Block for `duration`.
    fn delay(&mut self, duration: Duration);
}

/// [`Delay`] that sleeps the current thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdDelay;

impl Delay for StdDelay {
    fn delay(&mut self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// USB-to-UART bridge families commonly found on boards with this bootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum BridgeKind {
    /// CH340/CH341.
    Ch340,
    /// Silicon Labs CP210x.
    Cp210x,
    /// FTDI FT232 family.
    Ftdi,
    /// Prolific PL2303.
    Prolific,
    /// Not a USB port, or an unrecognised bridge.
    Unknown,
}

const KNOWN_BRIDGES: &[(u16, &[u16], BridgeKind)] = &[
    (
        0x1A86,
        &[0x7523, 0x7522, 0x5523, 0x5512, 0x55D4],
        BridgeKind::Ch340,
    ),
    (0x10C4, &[0xEA60, 0xEA70, 0xEA71, 0xEA63], BridgeKind::Cp210x),
    (
        0x0403,
        &[0x6001, 0x6010, 0x6011, 0x6014, 0x6015],
        BridgeKind::Ftdi,
    ),
    (0x067B, &[0x2303, 0x23A3, 0x23C3, 0x23D3], BridgeKind::Prolific),
];

impl BridgeKind {
    /// Classify a USB VID/PID pair.
    #[must_use]
    pub fn from_vid_pid(vid: u16, pid: u16) -> Self {
        KNOWN_BRIDGES
            .iter()
            .find(|(known_vid, pids, _)| *known_vid == vid && pids.contains(&pid))
            .map_or(Self::Unknown, |(_, _, kind)| *kind)
    }

    /// Human-readable name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Ch340 => "CH340/CH341",
            Self::Cp210x => "CP210x",
            Self::Ftdi => "FTDI",
            Self::Prolific => "PL2303",
            Self::Unknown => "Unknown",
        }
    }

    /// Whether this is a recognised bridge.
    pub fn is_known(self) -> bool {
        self != Self::Unknown
    }
}

/// A serial port found on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// Classified USB bridge.
    pub bridge: BridgeKind,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial_number: Option<String>,
}

/// Pick the most plausible bootloader port: the only port, or the only one
/// behind a recognised USB bridge.
pub fn pick_port(ports: &[PortInfo]) -> Option<&PortInfo> {
    if let [only] = ports {
        return Some(only);
    }
    let mut known = ports.iter().filter(|p| p.bridge.is_known());
    match (known.next(), known.next()) {
        (Some(port), None) => Some(port),
        _ => None,
    }
}

#[cfg(feature = "native")]
pub use native::{NativePort, discover_ports};
