//! Configuration types for the relay service.
//!
//! [`Settings`] is the resolved configuration the relay runs with.
//! [`ConfigFile`] loads and saves `~/.pairlink/config.ini`; callers layer
//! command-line flags on top of the file values.
//!
//! # Example
//!
//! ```
//! use pairlink::config::{ConfigFile, Settings};
//!
//! let config = ConfigFile::default();
//! let settings = config.to_settings().with_driver_port(4503);
//! assert_eq!(settings.driver_port, 4503);
//! ```

mod file;

pub use file::{
    config_directory, config_file_path, ConfigFile, ConfigFileError, PortsSettings, RelaySettings,
};

/// Default TCP port for supply peers.
pub const DEFAULT_SUPPLY_PORT: u16 = 4501;

/// Default TCP port for demand peers.
pub const DEFAULT_DEMAND_PORT: u16 = 4502;

/// Resolved relay configuration.
///
/// A port of 0 disables the driver endpoint; a timeout or period of 0
/// disables the corresponding periodic behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Port supply peers connect to.
    pub supply_port: u16,
    /// Port demand peers connect to.
    pub demand_port: u16,
    /// Port driver clients connect to (0 = no driver endpoint).
    pub driver_port: u16,
    /// Log per-chunk forwarding and timeout lines.
    pub verbose: bool,
    /// Disconnect descriptors idle for this many seconds (0 = never).
    pub idle_timeout: u32,
    /// Seconds between quiet-period backlog reports to drivers (0 = none).
    pub driver_period: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            supply_port: DEFAULT_SUPPLY_PORT,
            demand_port: DEFAULT_DEMAND_PORT,
            driver_port: 0,
            verbose: false,
            idle_timeout: 0,
            driver_period: 0,
        }
    }
}

impl Settings {
    pub fn new(supply_port: u16, demand_port: u16) -> Self {
        Self {
            supply_port,
            demand_port,
            ..Self::default()
        }
    }

    pub fn with_driver_port(mut self, port: u16) -> Self {
        self.driver_port = port;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_idle_timeout(mut self, seconds: u32) -> Self {
        self.idle_timeout = seconds;
        self
    }

    pub fn with_driver_period(mut self, seconds: u32) -> Self {
        self.driver_period = seconds;
        self
    }
}
