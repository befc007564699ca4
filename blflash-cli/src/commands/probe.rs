//! `probe` implementation.

use anyhow::Result;
use blflash::Port;
use console::style;

use crate::Cli;
use crate::commands::{finish, open_session};
use crate::config::Config;

/// Handshake, print the board identity and end the session.
pub(crate) fn cmd_probe(cli: &Cli, config: &mut Config, json: bool) -> Result<()> {
    let mut session = open_session(cli, config)?;
    let port_name = session.engine().port().name().to_string();

    let result = session.handshake();
    let board = finish(&mut session, result)?;

    if json {
        let report = serde_json::json!({
            "port": port_name,
            "board": board,
            "board_id": board.board_id_string(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{} {}", style("Port:").bold(), port_name);
        println!(
            "{} {}.{}",
            style("Protocol:").bold(),
            board.version,
            board.revision
        );
        println!("{} {}", style("Board:").bold(), board.board_id_string());
        println!(
            "{} {} bytes (0x{:X})",
            style("Flash:").bold(),
            board.flash_size,
            board.flash_size
        );
    }
    Ok(())
}
