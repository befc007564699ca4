//! `flash` implementation.

use anyhow::{Context, Result};
use blflash::{FirmwareImage, ImageSource, UpdatePlan, Verification};
use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::warn;
use std::path::Path;

use crate::commands::open_session;
use crate::config::Config;
use crate::{Cli, CliError, parse_hex_u32, use_fancy_output};

/// Arguments of `flash`.
pub(crate) struct FlashOptions<'a> {
    pub image: &'a Path,
    pub address: Option<u32>,
    pub no_verify: bool,
    pub no_boot: bool,
    pub erase: &'a [u8],
}

/// Resolve the application address: flag first, then `[flash] address`.
fn resolve_address(flag: Option<u32>, config: &Config) -> Result<u32> {
    if let Some(address) = flag {
        return Ok(address);
    }
    match &config.flash.address {
        Some(text) => parse_hex_u32(text)
            .map_err(|e| anyhow::Error::from(CliError::Config(format!("[flash] address {text:?}: {e}")))),
        None => Err(CliError::Usage(
            "No application address; pass --address or set [flash] address".to_string(),
        )
        .into()),
    }
}

/// Build the update plan from flags and configuration defaults.
fn build_plan(options: &FlashOptions<'_>, config: &Config) -> Result<UpdatePlan> {
    let address = resolve_address(options.address, config)?;
    let verify = !(options.no_verify || config.flash.no_verify);
    let wants_boot = !(options.no_boot || config.flash.no_boot);
    if wants_boot && !verify {
        warn!("Not booting: booting requires verification");
    }

    Ok(UpdatePlan::new(address)
        .with_erase(options.erase)
        .with_verify(verify)
        .with_boot(wants_boot && verify))
}

fn progress_bar(cli: &Cli, total: u64) -> ProgressBar {
    if cli.quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb
}

/// Flash command implementation.
pub(crate) fn cmd_flash(cli: &Cli, config: &mut Config, options: &FlashOptions<'_>) -> Result<()> {
    let path = options.image;
    if !cli.quiet {
        eprintln!(
            "{} Loading image {}",
            style("📦").cyan(),
            path.display()
        );
    }

    // The image is checked before any port is opened.
    let mut image = FirmwareImage::from_file(path).map_err(|e| {
        CliError::Image(format!("Failed to load image {}: {e}", path.display()))
    })?;
    image.validate()?;
    let plan = build_plan(options, config)?;

    if !cli.quiet {
        eprintln!(
            "{} {} bytes to 0x{:08X}",
            style("ℹ").blue(),
            image.len(),
            plan.address
        );
    }

    let mut session = open_session(cli, config)?;
    let pb = progress_bar(cli, image.len());
    pb.set_message("writing");

    let result = session.run(&plan, &mut image, |sent, total| {
        pb.set_length(total);
        pb.set_position(sent);
    });
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(err) => {
            pb.abandon();
            return Err(err).with_context(|| format!("Flashing {} failed", path.display()));
        },
    };
    pb.finish_with_message("done");

    if cli.quiet {
        return Ok(());
    }

    eprintln!(
        "{} Wrote {} bytes in {} chunks, CRC-32 0x{:08X}",
        style("✓").green(),
        outcome.transfer.bytes,
        outcome.transfer.chunks,
        outcome.transfer.checksum
    );
    match outcome.verification {
        Some(Verification::Matched(_)) => {
            eprintln!("{} Device checksum matches", style("✓").green());
        },
        Some(Verification::NotPerformed(status)) => {
            eprintln!(
                "{} Device could not compute the checksum: {status}",
                style("⚠").yellow()
            );
        },
        None => {},
    }
    if outcome.booted {
        eprintln!(
            "\n{} Application started at 0x{:08X}",
            style("🎉").green().bold(),
            plan.address
        );
    } else {
        eprintln!("\n{} Flashing complete", style("🎉").green().bold());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(address: Option<u32>) -> FlashOptions<'static> {
        FlashOptions {
            image: Path::new("app.bin"),
            address,
            no_verify: false,
            no_boot: false,
            erase: &[],
        }
    }

    #[test]
    fn test_flag_address_wins_over_config() {
        let mut config = Config::default();
        config.flash.address = Some("0x1000".into());
        assert_eq!(resolve_address(Some(0x2000), &config).unwrap(), 0x2000);
        assert_eq!(resolve_address(None, &config).unwrap(), 0x1000);
    }

    #[test]
    fn test_missing_address_is_usage_error() {
        let err = resolve_address(None, &Config::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Usage(_))
        ));
    }

    #[test]
    fn test_bad_config_address_is_config_error() {
        let mut config = Config::default();
        config.flash.address = Some("0xZZ".into());
        let err = resolve_address(None, &config).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Config(_))
        ));
    }

    #[test]
    fn test_plan_defaults_verify_and_boot() {
        let plan = build_plan(&options(Some(0x0800_4000)), &Config::default()).unwrap();
        assert_eq!(plan, UpdatePlan::new(0x0800_4000));
    }

    #[test]
    fn test_no_verify_also_skips_boot() {
        let mut opts = options(Some(0x0800_4000));
        opts.no_verify = true;
        opts.erase = &[3];
        let plan = build_plan(&opts, &Config::default()).unwrap();
        assert!(!plan.verify);
        assert!(!plan.boot);
        assert_eq!(plan.erase, vec![3]);
    }

    #[test]
    fn test_config_no_boot_applies() {
        let mut config = Config::default();
        config.flash.no_boot = true;
        let plan = build_plan(&options(Some(0)), &config).unwrap();
        assert!(plan.verify);
        assert!(!plan.boot);
    }
}
