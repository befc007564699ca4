//! # blflash
//!
//! Host-side client for a small serial bootloader: handshake, flash
//! parameters, chunked image transfer with a running CRC-32, device-side
//! verification and boot.
//!
//! ## Layers
//!
//! - [`protocol`]: checksums, framing and reply validation
//! - [`engine`]: one request/reply exchange at a time, plus image streaming
//! - [`session`]: the ordered update sequence as a state machine
//! - [`port`]: the byte transport and its native `serialport` implementation
//!
//! ## Features
//!
//! - `native` (default): Native serial port support
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use blflash::{Engine, FirmwareImage, Session, UpdatePlan};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut image = FirmwareImage::from_file("app.bin")?;
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let config = blflash::SerialConfig::new("/dev/ttyUSB0", 115_200);
//!         let port = blflash::NativePort::open(&config)?;
//!         let mut session = Session::new(Engine::new(port));
//!
//!         let outcome = session.run(&UpdatePlan::new(0x0800_4000), &mut image, |sent, total| {
//!             println!("{sent}/{total}");
//!         })?;
//!         println!("Flashed {} bytes", outcome.transfer.bytes);
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod config;
pub mod engine;
pub mod error;
pub mod image;
pub mod port;
pub mod protocol;
pub mod session;

#[cfg(test)]
mod test_support;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register the process-wide interrupt checker.
///
/// [`Engine::transfer_image`] consults it before every window and stops with
/// [`Error::Interrupted`] once it returns `true`. Only the first registration
/// takes effect.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Whether the registered checker asks to stop.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    use std::sync::atomic::{AtomicBool, Ordering};

    static TEST_INTERRUPT_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

    let flag = TEST_INTERRUPT_FLAG
        .get_or_init(|| {
            let shared = Arc::new(AtomicBool::new(false));
            let checker = Arc::clone(&shared);
            set_interrupt_checker(move || checker.load(Ordering::Relaxed));
            shared
        })
        .clone();

    flag.store(value, Ordering::Relaxed);
}

#[cfg(feature = "native")]
pub use port::{NativePort, discover_ports};
pub use {
    config::{EngineConfig, Timeouts},
    engine::{Engine, TransferReport},
    error::{Error, Result},
    image::{FirmwareImage, ImageSource},
    port::{BridgeKind, Delay, Port, PortInfo, SerialConfig, StdDelay, pick_port},
    protocol::{BoardInfo, Command, CrcReport, Reply, Status, Verification},
    session::{Session, SessionState, UpdateOutcome, UpdatePlan},
};
