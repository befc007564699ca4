//! Command implementations.
//!
//! Each subcommand is implemented in its own module for clean separation.

pub(crate) mod completions;
pub(crate) mod erase;
pub(crate) mod flash;
pub(crate) mod ports;
pub(crate) mod probe;

use anyhow::{Context, Result};
use blflash::port::DEFAULT_BAUD;
use blflash::{Delay, Engine, NativePort, Port, SerialConfig, Session, SessionState};
use console::style;

use crate::config::Config;
use crate::serial::{SerialOptions, ask_remember_port, select_serial_port};
use crate::{Cli, CliError, was_interrupted};

/// Get serial port from CLI args, configuration or interactive selection.
pub(crate) fn get_port(cli: &Cli, config: &mut Config) -> Result<String> {
    let options = SerialOptions {
        port: cli.port.clone(),
        non_interactive: cli.non_interactive,
    };

    let selected = select_serial_port(&options, config)?;

    if !selected.is_known && !cli.non_interactive && cli.port.is_none() {
        ask_remember_port(&selected.port, config)?;
    }

    Ok(selected.port.name)
}

/// Baud rate from the command line, then the configuration.
pub(crate) fn baud_rate(cli: &Cli, config: &Config) -> u32 {
    cli.baud
        .or(config.connection.baud)
        .unwrap_or(DEFAULT_BAUD)
}

pub(crate) fn ensure_not_interrupted() -> Result<()> {
    if was_interrupted() {
        Err(CliError::Cancelled("Interrupted".to_string()).into())
    } else {
        Ok(())
    }
}

/// Select and open the bootloader port, ready for a handshake.
pub(crate) fn open_session(cli: &Cli, config: &mut Config) -> Result<Session<NativePort>> {
    let port_name = get_port(cli, config)?;
    let baud = baud_rate(cli, config);
    ensure_not_interrupted()?;

    if !cli.quiet {
        eprintln!(
            "{} Using port {} at {baud} baud",
            style("🔌").cyan(),
            style(&port_name).bold()
        );
    }

    let port = NativePort::open(&SerialConfig::new(port_name.as_str(), baud))
        .with_context(|| format!("Failed to open {port_name}"))?;
    let engine = Engine::new(port).with_config(config.engine_config());
    Ok(Session::new(engine))
}

/// End the session after a single step.
///
/// When the step fails and the closing exchange fails too, the result is
/// [`blflash::Error::EndOfSession`] carrying both.
pub(crate) fn finish<P: Port, D: Delay, T>(
    session: &mut Session<P, D>,
    result: blflash::Result<T>,
) -> Result<T> {
    match result {
        Ok(value) => {
            session.end()?;
            Ok(value)
        },
        Err(cause) => {
            if matches!(
                session.state(),
                SessionState::Disconnected | SessionState::Ended
            ) {
                return Err(cause.into());
            }
            match session.end() {
                Ok(()) => Err(cause.into()),
                Err(end) => Err(blflash::Error::EndOfSession {
                    cause: Box::new(cause),
                    end: Box::new(end),
                }
                .into()),
            }
        },
    }
}
