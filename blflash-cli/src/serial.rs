//! Interactive serial port selection.
//!
//! Resolution order: `--port`/`BLFLASH_PORT`, the configured port, then
//! auto-detection. Auto-detection prefers ports behind a recognised USB
//! bridge or one remembered in the configuration, prompts when the choice is
//! ambiguous and fails with a usage error in non-interactive mode.

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    blflash::{BridgeKind, PortInfo, discover_ports, pick_port},
    console::style,
    dialoguer::{Confirm, Error as DialoguerError, Select, theme::ColorfulTheme},
    log::{debug, error, info},
    std::io::IsTerminal,
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// Non-interactive mode (fail if the choice is ambiguous).
    pub non_interactive: bool,
}

/// Result of port selection including whether it was a known device.
pub struct SelectedPort {
    /// The selected port info.
    pub port: PortInfo,
    /// Whether this port matched a known/configured device.
    pub is_known: bool,
}

fn usage_err(message: &str) -> anyhow::Error {
    CliError::Usage(message.to_string()).into()
}

/// Ports worth offering: recognised ones if any, otherwise everything.
fn candidate_ports(ports: Vec<PortInfo>, config: &Config) -> Vec<PortInfo> {
    let known: Vec<PortInfo> = ports
        .iter()
        .filter(|p| is_known_device(p, config))
        .cloned()
        .collect();
    if known.is_empty() { ports } else { known }
}

fn select_non_interactive_port(candidates: &[PortInfo], config: &Config) -> Result<SelectedPort> {
    match candidates {
        [] => Err(usage_err("No serial ports available")),
        [port] => Ok(SelectedPort {
            is_known: is_known_device(port, config),
            port: port.clone(),
        }),
        _ => Err(usage_err(
            "Found multiple serial ports; specify one with --port in non-interactive mode",
        )),
    }
}

/// Select a serial port interactively or automatically.
pub fn select_serial_port(options: &SerialOptions, config: &Config) -> Result<SelectedPort> {
    if let Some(port_name) = &options.port {
        return Ok(find_port_by_name(port_name, config));
    }

    if let Some(port_name) = &config.connection.serial {
        debug!("Using port from config: {port_name}");
        return Ok(find_port_by_name(port_name, config));
    }

    let ports = discover_ports()?;
    if ports.is_empty() {
        return Err(usage_err("No serial ports found"));
    }
    let candidates = candidate_ports(ports, config);

    if options.non_interactive {
        return select_non_interactive_port(&candidates, config);
    }

    match pick_port(&candidates) {
        Some(port) if is_known_device(port, config) => {
            info!("Auto-selected port: {} [{}]", port.name, port.bridge.name());
            Ok(SelectedPort {
                port: port.clone(),
                is_known: true,
            })
        },
        Some(port) => {
            ensure_interactive_terminal()?;
            confirm_single_port(port.clone())
        },
        None => {
            ensure_interactive_terminal()?;
            select_port_interactive(candidates, config)
        },
    }
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "Port selection needs a terminal; pass --port or use --non-interactive",
        ))
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("Port selection cancelled".to_string()).into()
            } else {
                usage_err(&format!("Prompt failed: {io_err}"))
            }
        },
    }
}

/// Find a port by name, falling back to a bare entry for ports the host
/// did not enumerate.
fn find_port_by_name(name: &str, config: &Config) -> SelectedPort {
    let ports = discover_ports().unwrap_or_else(|e| {
        debug!("Port enumeration failed: {e}");
        Vec::new()
    });

    let found = ports
        .iter()
        .find(|p| p.name == name)
        .or_else(|| ports.iter().find(|p| p.name.eq_ignore_ascii_case(name)));

    match found {
        Some(port) => SelectedPort {
            is_known: is_known_device(port, config),
            port: port.clone(),
        },
        None => SelectedPort {
            port: PortInfo {
                name: name.to_string(),
                bridge: BridgeKind::Unknown,
                vid: None,
                pid: None,
                manufacturer: None,
                product: None,
                serial_number: None,
            },
            is_known: false,
        },
    }
}

/// Check if a port matches a known device (from config or built-in list).
fn is_known_device(port: &PortInfo, config: &Config) -> bool {
    if port.bridge.is_known() {
        return true;
    }
    match (port.vid, port.pid) {
        (Some(vid), Some(pid)) => config.knows_usb_device(vid, pid),
        _ => false,
    }
}

/// One-line description used in prompts.
fn port_label(port: &PortInfo, config: &Config) -> String {
    let name = if is_known_device(port, config) {
        style(&port.name).bold().to_string()
    } else {
        port.name.clone()
    };

    let device_info = if port.bridge.is_known() {
        format!(" [{}]", style(port.bridge.name()).yellow())
    } else if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
        format!(" ({vid:04X}:{pid:04X})")
    } else {
        String::new()
    };

    let product = port
        .product
        .as_ref()
        .map(|p| format!(" - {}", style(p).dim()))
        .unwrap_or_default();

    format!("{name}{device_info}{product}")
}

fn select_port_interactive(mut ports: Vec<PortInfo>, config: &Config) -> Result<SelectedPort> {
    eprintln!(
        "{} Detected {} serial ports",
        style("ℹ").blue(),
        ports.len()
    );

    ports.sort_by_key(|p| !is_known_device(p, config));

    // Keep labels on one line in narrow terminals.
    let term_width = console::Term::stderr().size().1 as usize;
    let max_item_width = term_width.saturating_sub(4);
    let labels: Vec<String> = ports
        .iter()
        .map(|p| console::truncate_str(&port_label(p, config), max_item_width, "\u{2026}").into_owned())
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select the bootloader port")
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => {
            let port = ports
                .into_iter()
                .nth(index)
                .ok_or_else(|| anyhow::anyhow!("Invalid port index: {index}"))?;
            let is_known = is_known_device(&port, config);
            Ok(SelectedPort { port, is_known })
        },
        None => Err(CliError::Cancelled("Port selection cancelled".to_string()).into()),
    }
}

/// Confirm use of a single unrecognized port.
fn confirm_single_port(port: PortInfo) -> Result<SelectedPort> {
    let product_info = port
        .product
        .as_ref()
        .map(|p| format!(" - {p}"))
        .unwrap_or_default();

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Use {}{product_info}?", port.name))
        .default(true)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        Ok(SelectedPort {
            port,
            is_known: false,
        })
    } else {
        Err(CliError::Cancelled("Port selection cancelled".to_string()).into())
    }
}

/// Ask user if they want to remember this port.
pub fn ask_remember_port(port: &PortInfo, config: &mut Config) -> Result<()> {
    let (Some(vid), Some(pid)) = (port.vid, port.pid) else {
        return Ok(());
    };
    if config.knows_usb_device(vid, pid) {
        return Ok(());
    }

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt("Remember this USB device for auto-detection?")
        .default(false)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        if let Err(e) = config.remember_usb_device(vid, pid) {
            error!("Failed to save port configuration: {e}");
        }
    }

    Ok(())
}
