//! `list-ports` implementation.

use anyhow::Result;
use blflash::discover_ports;
use console::style;

/// List serial ports, as a table or as JSON on stdout.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let ports = discover_ports()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&ports)?);
        return Ok(());
    }

    if ports.is_empty() {
        eprintln!("{} No serial ports found", style("⚠").yellow());
        return Ok(());
    }

    for port in &ports {
        let ids = match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => format!(" ({vid:04X}:{pid:04X})"),
            _ => String::new(),
        };
        let bridge = if port.bridge.is_known() {
            format!(" [{}]", style(port.bridge.name()).yellow())
        } else {
            String::new()
        };
        let product = port
            .product
            .as_ref()
            .map(|p| format!(" - {}", style(p).dim()))
            .unwrap_or_default();
        println!("{}{bridge}{ids}{product}", style(&port.name).bold());
    }
    Ok(())
}
