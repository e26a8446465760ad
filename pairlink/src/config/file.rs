//! Configuration file handling for ~/.pairlink/config.ini.
//!
//! Loads and saves user configuration with sensible defaults. Command-line
//! arguments override config file values when specified.

use ini::Ini;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::{Settings, DEFAULT_DEMAND_PORT, DEFAULT_SUPPLY_PORT};

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    /// Failed to write config file
    #[error("Failed to write config file: {0}")]
    WriteError(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },

    /// Failed to create config directory
    #[error("Failed to create config directory: {0}")]
    DirectoryError(std::io::Error),
}

/// On-disk configuration, one field set per file section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFile {
    pub ports: PortsSettings,
    pub relay: RelaySettings,
}

/// `[ports]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortsSettings {
    pub supply: u16,
    pub demand: u16,
    pub driver: u16,
}

impl Default for PortsSettings {
    fn default() -> Self {
        Self {
            supply: DEFAULT_SUPPLY_PORT,
            demand: DEFAULT_DEMAND_PORT,
            driver: 0,
        }
    }
}

/// `[relay]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelaySettings {
    pub verbose: bool,
    pub idle_timeout: u32,
    pub driver_period: u32,
}

impl ConfigFile {
    /// Load configuration from the default path (~/.pairlink/config.ini).
    ///
    /// If the file doesn't exist, returns defaults.
    pub fn load() -> Result<Self, ConfigFileError> {
        let path = config_file_path();
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    ///
    /// If the file doesn't exist, returns defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file(path)?;
        parse_ini(&ini)
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigFileError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigFileError::DirectoryError)?;
        }

        let content = self.to_config_string();
        std::fs::write(path, content).map_err(|e| ConfigFileError::WriteError(e.to_string()))
    }

    /// Create the default config file if it doesn't exist.
    ///
    /// Returns the path to the config file.
    pub fn ensure_exists() -> Result<PathBuf, ConfigFileError> {
        let path = config_file_path();
        if !path.exists() {
            let config = Self::default();
            config.save_to(&path)?;
        }
        Ok(path)
    }

    /// Flattens the file sections into resolved [`Settings`].
    pub fn to_settings(&self) -> Settings {
        Settings {
            supply_port: self.ports.supply,
            demand_port: self.ports.demand,
            driver_port: self.ports.driver,
            verbose: self.relay.verbose,
            idle_timeout: self.relay.idle_timeout,
            driver_period: self.relay.driver_period,
        }
    }

    fn to_config_string(&self) -> String {
        format!(
            "# pairlink configuration\n\
             #\n\
             # Supply peers connect to [ports] supply, demand peers to\n\
             # [ports] demand. Set driver to a nonzero port to enable the\n\
             # backlog notification endpoint.\n\
             \n\
             [ports]\n\
             supply = {}\n\
             demand = {}\n\
             driver = {}\n\
             \n\
             [relay]\n\
             # Log every forwarded chunk and idle timeout.\n\
             verbose = {}\n\
             # Disconnect descriptors idle for this many seconds (0 = never).\n\
             idle_timeout = {}\n\
             # Seconds between quiet-period backlog reports (0 = disabled).\n\
             driver_period = {}\n",
            self.ports.supply,
            self.ports.demand,
            self.ports.driver,
            self.relay.verbose,
            self.relay.idle_timeout,
            self.relay.driver_period,
        )
    }
}

fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    if let Some(section) = ini.section(Some("ports")) {
        if let Some(value) = section.get("supply") {
            config.ports.supply = parse_number("ports", "supply", value)?;
        }
        if let Some(value) = section.get("demand") {
            config.ports.demand = parse_number("ports", "demand", value)?;
        }
        if let Some(value) = section.get("driver") {
            config.ports.driver = parse_number("ports", "driver", value)?;
        }
    }

    if let Some(section) = ini.section(Some("relay")) {
        if let Some(value) = section.get("verbose") {
            config.relay.verbose = parse_bool("relay", "verbose", value)?;
        }
        if let Some(value) = section.get("idle_timeout") {
            config.relay.idle_timeout = parse_number("relay", "idle_timeout", value)?;
        }
        if let Some(value) = section.get("driver_period") {
            config.relay.driver_period = parse_number("relay", "driver_period", value)?;
        }
    }

    Ok(config)
}

fn parse_number<T: std::str::FromStr>(
    section: &str,
    key: &str,
    value: &str,
) -> Result<T, ConfigFileError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigFileError::InvalidValue {
            section: section.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            reason: "expected a non-negative number".to_string(),
        })
}

fn parse_bool(section: &str, key: &str, value: &str) -> Result<bool, ConfigFileError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(ConfigFileError::InvalidValue {
            section: section.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            reason: "expected true or false".to_string(),
        }),
    }
}

/// Get the path to the config directory (~/.pairlink).
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".pairlink")
}

/// Get the path to the config file (~/.pairlink/config.ini).
pub fn config_file_path() -> PathBuf {
    config_directory().join("config.ini")
}
