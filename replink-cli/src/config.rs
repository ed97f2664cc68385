//! Configuration file support for the replink CLI.
//!
//! Configuration is loaded with the following priority (highest first):
//! 1. Command-line arguments / environment variables
//! 2. Explicit `--config PATH` file
//! 3. Global config file (`~/.config/replink/config.toml`)

use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// USB device identification for port matching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsbId {
    /// USB Vendor ID.
    pub vid: u16,
    /// USB Product ID.
    pub pid: u16,
}

impl UsbId {
    /// Check if this entry matches the given USB identifiers.
    pub fn matches(&self, vid: u16, pid: u16) -> bool {
        self.vid == vid && self.pid == pid
    }
}

/// Port-related configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub serial: Option<String>,
    /// User-taught USB devices treated as known boards.
    #[serde(default)]
    pub usb_device: Vec<UsbId>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Port configuration.
    #[serde(default)]
    pub port: PortConfig,
    /// Where script projects live; defaults to the platform data dir.
    pub projects_dir: Option<PathBuf>,
}

impl Config {
    /// Load the global configuration, falling back to defaults.
    pub fn load() -> Self {
        match Self::global_config_path() {
            Some(path) if path.exists() => Self::load_from_path(&path),
            _ => Self::default(),
        }
    }

    /// Load configuration from a specific file path (`--config` flag).
    pub fn load_from_path(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    debug!("loaded config from {}", path.display());
                    config
                },
                Err(e) => {
                    warn!("invalid config {}: {e}, using defaults", path.display());
                    Self::default()
                },
            },
            Err(e) => {
                warn!("could not read {}: {e}, using defaults", path.display());
                Self::default()
            },
        }
    }

    /// Path of the global config file, if a home directory can be resolved.
    pub fn global_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "replink").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Persist this configuration to the global config file.
    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::global_config_path()
            .ok_or_else(|| anyhow::anyhow!("could not resolve a config directory"))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml::to_string_pretty(self)?)?;
        debug!("saved config to {}", path.display());
        Ok(())
    }

    /// Record a USB device as known so future selections skip the prompt.
    pub fn remember_usb_device(&mut self, vid: u16, pid: u16) -> anyhow::Result<()> {
        if !self.port.usb_device.iter().any(|d| d.matches(vid, pid)) {
            self.port.usb_device.push(UsbId { vid, pid });
            self.save()?;
        }
        Ok(())
    }

    /// Resolve the projects root: CLI override, then config, then the
    /// platform data directory.
    pub fn projects_root(&self, override_dir: Option<&Path>) -> anyhow::Result<PathBuf> {
        if let Some(dir) = override_dir {
            return Ok(dir.to_path_buf());
        }
        if let Some(ref dir) = self.projects_dir {
            return Ok(dir.clone());
        }
        ProjectDirs::from("", "", "replink")
            .map(|dirs| dirs.data_dir().join("projects"))
            .ok_or_else(|| anyhow::anyhow!("could not resolve a projects directory"))
    }
}
