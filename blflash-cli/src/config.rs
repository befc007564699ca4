//! Configuration file support for blflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (BLFLASH_*)
//! 3. Local config file (./blflash.toml)
//! 4. Global config file (~/.config/blflash/config.toml)
//!
//! With `--config PATH` only that file is read, and it must parse.

use anyhow::Result;
use blflash::{EngineConfig, Timeouts};
use directories::ProjectDirs;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::CliError;

/// Name of the per-project config file.
pub const LOCAL_CONFIG: &str = "blflash.toml";

/// USB device identification for port matching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsbDevice {
    /// USB Vendor ID.
    pub vid: u16,
    /// USB Product ID.
    pub pid: u16,
}

impl UsbDevice {
    /// Check if this device matches the given USB info.
    pub fn matches(&self, vid: u16, pid: u16) -> bool {
        self.vid == vid && self.pid == pid
    }
}

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub serial: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
    /// Extra USB bridges treated as bootloader ports.
    #[serde(default)]
    pub usb_device: Vec<UsbDevice>,
}

/// Exchange timing, in milliseconds.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EngineSection {
    /// Polling tick.
    pub tick_ms: Option<u64>,
    /// Pause between FlashData segments.
    pub inter_write_ms: Option<u64>,
}

/// Defaults for `flash`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlashConfig {
    /// Application address (hex string, e.g. "0x08004000").
    pub address: Option<String>,
    /// Skip verification by default.
    #[serde(default)]
    pub no_verify: bool,
    /// Skip booting by default.
    #[serde(default)]
    pub no_boot: bool,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Reply budgets in milliseconds; missing entries keep their defaults.
    pub timeouts: Option<Timeouts>,
    /// Polling and pacing.
    #[serde(default)]
    pub engine: EngineSection,
    /// Flash defaults.
    #[serde(default)]
    pub flash: FlashConfig,
}

impl Config {
    /// Load configuration from the global and local files.
    ///
    /// Unreadable implicit files are skipped with a warning.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                match Self::load_from_file(&global_path) {
                    Ok(global) => {
                        debug!("Loaded global config from {}", global_path.display());
                        config.merge(global);
                    },
                    Err(e) => warn!("{e}"),
                }
            }
        }

        let local_path = Path::new(LOCAL_CONFIG);
        if local_path.exists() {
            match Self::load_from_file(local_path) {
                Ok(local) => {
                    debug!("Loaded local config from {LOCAL_CONFIG}");
                    config.merge(local);
                },
                Err(e) => warn!("{e}"),
            }
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let config = Self::load_from_file(path)?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            CliError::Config(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;
        let config = toml::from_str(&content).map_err(|e| {
            CliError::Config(format!(
                "Failed to parse config file {}: {e}",
                path.display()
            ))
        })?;
        Ok(config)
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "blflash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other.connection.serial.is_some() {
            self.connection.serial = other.connection.serial;
        }
        if other.connection.baud.is_some() {
            self.connection.baud = other.connection.baud;
        }
        for device in other.connection.usb_device {
            if !self.connection.usb_device.contains(&device) {
                self.connection.usb_device.push(device);
            }
        }

        if other.timeouts.is_some() {
            self.timeouts = other.timeouts;
        }
        if other.engine.tick_ms.is_some() {
            self.engine.tick_ms = other.engine.tick_ms;
        }
        if other.engine.inter_write_ms.is_some() {
            self.engine.inter_write_ms = other.engine.inter_write_ms;
        }

        if other.flash.address.is_some() {
            self.flash.address = other.flash.address;
        }
        self.flash.no_verify |= other.flash.no_verify;
        self.flash.no_boot |= other.flash.no_boot;
    }

    /// Engine timing assembled from the file, falling back to defaults.
    pub fn engine_config(&self) -> EngineConfig {
        let defaults = EngineConfig::default();
        let mut config = defaults.with_timeouts(self.timeouts.unwrap_or_default());
        if let Some(tick) = self.engine.tick_ms {
            config = config.with_tick(Duration::from_millis(tick));
        }
        if let Some(pause) = self.engine.inter_write_ms {
            config = config.with_inter_write_delay(Duration::from_millis(pause));
        }
        config
    }

    /// Whether a USB VID/PID was remembered as a bootloader port.
    pub fn knows_usb_device(&self, vid: u16, pid: u16) -> bool {
        self.connection
            .usb_device
            .iter()
            .any(|d| d.matches(vid, pid))
    }

    /// Save USB device for future auto-detection.
    pub fn remember_usb_device(&mut self, vid: u16, pid: u16) -> Result<()> {
        if self.knows_usb_device(vid, pid) {
            return Ok(());
        }
        self.connection.usb_device.push(UsbDevice { vid, pid });

        let path = if Path::new(LOCAL_CONFIG).exists() {
            PathBuf::from(LOCAL_CONFIG)
        } else if let Some(global_dir) = Self::global_config_dir() {
            fs::create_dir_all(&global_dir)?;
            global_dir.join("config.toml")
        } else {
            PathBuf::from(LOCAL_CONFIG)
        };

        let mut on_disk = if path.exists() {
            Self::load_from_file(&path)?
        } else {
            Self::default()
        };
        on_disk.connection.usb_device = self.connection.usb_device.clone();

        fs::write(&path, toml::to_string_pretty(&on_disk)?)?;
        info!("Saved USB device to {}", path.display());
        Ok(())
    }
}
