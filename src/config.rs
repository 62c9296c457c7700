//! Configuration for termweave sessions.
//!
//! Loaded from `~/.termweave/config.toml`; a missing or unreadable file
//! yields the defaults below.
//!
//! ```toml
//! # auto, macos, linux, windows
//! platform = "auto"
//!
//! [input]
//! filter_enabled = true
//! dedup_short_window_ms = 50
//! dedup_alnum_window_ms = 500
//! dedup_horizon_ms = 1000
//! paste_window_ms = 30
//!
//! [output]
//! cache_min_bytes = 102400
//! cache_idle_interval_ms = 5000
//! cache_kind = "full"
//!
//! [resize]
//! debounce_ms = 50
//! ```

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::ui::Platform;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("failed to write config: {0}")]
    Write(#[from] std::io::Error),

    #[error("could not determine config path")]
    NoPath,
}

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Keybinding platform
    pub platform: PlatformSetting,
    pub input: InputConfig,
    pub output: OutputConfig,
    pub resize: ResizeConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformSetting {
    #[default]
    Auto,
    Macos,
    Linux,
    Windows,
}

impl PlatformSetting {
    pub fn resolve(self) -> Platform {
        match self {
            PlatformSetting::Auto => Platform::current(),
            PlatformSetting::Macos => Platform::MacOs,
            PlatformSetting::Linux => Platform::Linux,
            PlatformSetting::Windows => Platform::Windows,
        }
    }
}

/// Keyboard and IME input settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub filter_enabled: bool,
    /// Identical text within this window is a duplicate, whatever its length
    pub dedup_short_window_ms: u64,
    /// Identical single alphanumeric within this window is a duplicate
    pub dedup_alnum_window_ms: u64,
    /// Records older than this are forgotten
    pub dedup_horizon_ms: u64,
    pub paste_window_ms: u64,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            filter_enabled: true,
            dedup_short_window_ms: 50,
            dedup_alnum_window_ms: 500,
            dedup_horizon_ms: 1000,
            paste_window_ms: 30,
        }
    }
}

/// Output stream and snapshot cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Bytes rendered since the last flush before a snapshot is taken
    pub cache_min_bytes: u64,
    pub cache_idle_interval_ms: u64,
    pub cache_kind: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            cache_min_bytes: 100 * 1024,
            cache_idle_interval_ms: 5000,
            cache_kind: "full".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResizeConfig {
    pub debounce_ms: u64,
}

impl Default for ResizeConfig {
    fn default() -> Self {
        Self { debounce_ms: 50 }
    }
}

impl InputConfig {
    pub fn short_window(&self) -> Duration {
        Duration::from_millis(self.dedup_short_window_ms)
    }

    pub fn alnum_window(&self) -> Duration {
        Duration::from_millis(self.dedup_alnum_window_ms)
    }

    pub fn horizon(&self) -> Duration {
        Duration::from_millis(self.dedup_horizon_ms)
    }

    pub fn paste_window(&self) -> Duration {
        Duration::from_millis(self.paste_window_ms)
    }
}

impl OutputConfig {
    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.cache_idle_interval_ms)
    }
}

impl ResizeConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Config {
    /// Load configuration from file
    pub fn load() -> Self {
        let Some(path) = Self::get_config_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match fs::read_to_string(&path) {
            Ok(content) => Self::from_toml_str(&content).unwrap_or_else(|e| {
                warn!("ignoring {}: {}", path.display(), e);
                Self::default()
            }),
            Err(e) => {
                warn!("could not read {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::get_config_path().ok_or(ConfigError::NoPath)?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&path, toml::to_string_pretty(self)?)?;
        debug!("saved config to {}", path.display());
        Ok(())
    }

    /// `~/.termweave/config.toml`
    pub fn get_config_path() -> Option<PathBuf> {
        data_dir().map(|dir| dir.join("config.toml"))
    }
}

/// `~/.termweave`
pub fn data_dir() -> Option<PathBuf> {
    home_dir().map(|home| home.join(".termweave"))
}

// Get home directory
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("USERPROFILE")
        .or_else(|| std::env::var_os("HOME"))
        .map(PathBuf::from)
}
