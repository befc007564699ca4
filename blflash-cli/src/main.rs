//! blflash CLI - Command-line tool for updating firmware over a serial bootloader.
//!
//! ## Features
//!
//! - Flash a raw application image, verify it and boot it
//! - Probe the bootloader for its board identity
//! - Erase flash sectors
//! - Interactive serial port selection
//! - Shell completion generation
//! - Environment variable support

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

mod commands;
mod config;
mod serial;

use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether the user pressed Ctrl-C.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Failures that carry their own exit code.
#[derive(Debug, Error)]
pub(crate) enum CliError {
    /// Bad invocation or unusable environment.
    #[error("{0}")]
    Usage(String),
    /// Unreadable or invalid configuration file.
    #[error("{0}")]
    Config(String),
    /// Image file missing or unreadable.
    #[error("{0}")]
    Image(String),
    /// Prompt dismissed or Ctrl-C.
    #[error("{0}")]
    Cancelled(String),
}

impl CliError {
    fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) | Self::Config(_) => 2,
            Self::Image(_) => 5,
            Self::Cancelled(_) => 130,
        }
    }
}

/// blflash - Update firmware on boards running the serial bootloader.
///
/// Environment variables:
///   BLFLASH_PORT              - Default serial port
///   BLFLASH_BAUD              - Default baud rate (default: 115200)
///   BLFLASH_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
///   RUST_LOG                  - Log filter (overrides -v/-q)
#[derive(Parser)]
#[command(name = "blflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub(crate) struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "BLFLASH_PORT")]
    port: Option<String>,

    /// Baud rate.
    #[arg(short, long, global = true, env = "BLFLASH_BAUD")]
    baud: Option<u32>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "BLFLASH_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write an application image, verify it and boot it.
    Flash {
        /// Raw application image.
        image: PathBuf,

        /// Application start address (hex, e.g. 0x08004000).
        #[arg(short, long, value_parser = parse_hex_u32)]
        address: Option<u32>,

        /// Skip the device-side CRC-32 check (implies --no-boot).
        #[arg(long)]
        no_verify: bool,

        /// Leave the device in the bootloader after flashing.
        #[arg(long)]
        no_boot: bool,

        /// Erase this sector after the handshake (repeatable).
        #[arg(long = "erase", value_name = "SECTOR")]
        erase: Vec<u8>,
    },

    /// Handshake with the bootloader and print the board identity.
    Probe {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Erase flash sectors.
    Erase {
        /// Sector to erase (repeatable).
        #[arg(long = "sector", value_name = "N", required = true)]
        sectors: Vec<u8>,
    },

    /// List available serial ports.
    ListPorts {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type.
        shell: Shell,
    },
}

/// Parse hexadecimal address (supports 0x prefix and underscores).
pub(crate) fn parse_hex_u32(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let s = s.trim_start_matches("0x").trim_start_matches("0X");
    let s: String = s.chars().filter(|c| *c != '_').collect();
    u32::from_str_radix(&s, 16).map_err(|e| format!("Invalid hex address: {e}"))
}

/// Map a failure to the process exit code.
fn exit_code(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(cli_err) = cause.downcast_ref::<CliError>() {
            return cli_err.exit_code();
        }
        if let Some(lib_err) = cause.downcast_ref::<blflash::Error>() {
            return library_exit_code(lib_err);
        }
    }
    1
}

fn library_exit_code(err: &blflash::Error) -> i32 {
    use blflash::Error;

    match err {
        Error::Interrupted => 130,
        Error::InvalidImage(_) | Error::ImageTooLarge { .. } | Error::Data { .. } => 5,
        Error::Io(_) | Error::Serial(_) | Error::Timeout { .. } => 3,
        Error::BufferOverflow { .. }
        | Error::InvalidFrame(_)
        | Error::UnknownCommand(_)
        | Error::MalformedMessage { .. }
        | Error::ReplyChecksum { .. }
        | Error::ImageChecksum { .. }
        | Error::DeviceStatus { .. } => 4,
        Error::Config(_) => 2,
        Error::EndOfSession { cause, .. } => library_exit_code(cause),
        Error::InvalidState { .. } => 1,
    }
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

fn main() {
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();
    init_logging(&cli);

    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        debug!("Could not install Ctrl-C handler: {e}");
    }
    blflash::set_interrupt_checker(was_interrupted);

    if let Err(err) = run(&cli) {
        let code = exit_code(&err);
        eprintln!("{} {err:#}", style("Error:").red().bold());
        process::exit(code);
    }
}

fn run(cli: &Cli) -> Result<()> {
    debug!(
        "blflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    // Port listing and completions never touch the configuration.
    match &cli.command {
        Commands::ListPorts { json } => return commands::ports::cmd_list_ports(*json),
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            return Ok(());
        },
        _ => {},
    }

    let mut config = match &cli.config_path {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load(),
    };

    match &cli.command {
        Commands::Flash {
            image,
            address,
            no_verify,
            no_boot,
            erase,
        } => {
            let options = commands::flash::FlashOptions {
                image,
                address: *address,
                no_verify: *no_verify,
                no_boot: *no_boot,
                erase,
            };
            commands::flash::cmd_flash(cli, &mut config, &options)
        },
        Commands::Probe { json } => commands::probe::cmd_probe(cli, &mut config, *json),
        Commands::Erase { sectors } => commands::erase::cmd_erase(cli, &mut config, sectors),
        Commands::ListPorts { .. } | Commands::Completions { .. } => Ok(()),
    }
}
