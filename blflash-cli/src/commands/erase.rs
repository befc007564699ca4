//! `erase` implementation.

use anyhow::Result;
use blflash::{NativePort, Session};
use console::style;
use log::info;

use crate::commands::{finish, open_session};
use crate::config::Config;
use crate::{Cli, was_interrupted};

/// Handshake, erase each sector in order and end the session.
pub(crate) fn cmd_erase(cli: &Cli, config: &mut Config, sectors: &[u8]) -> Result<()> {
    let mut session = open_session(cli, config)?;
    let result = erase_sectors(&mut session, sectors, cli.quiet);
    finish(&mut session, result)?;
    info!("Erased {} sector(s)", sectors.len());
    Ok(())
}

fn erase_sectors(
    session: &mut Session<NativePort>,
    sectors: &[u8],
    quiet: bool,
) -> blflash::Result<()> {
    session.handshake()?;
    for &sector in sectors {
        if was_interrupted() {
            return Err(blflash::Error::Interrupted);
        }
        session.erase(sector)?;
        if !quiet {
            eprintln!("{} Erased sector {sector}", style("✓").green());
        }
    }
    Ok(())
}
