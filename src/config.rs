//! Layered configuration.
//!
//! 1. Built-in defaults (`Settings::default()`, exposed as a figment provider)
//! 2. TOML file: `--config <path>` or `config/funcgen.toml` if it exists
//! 3. Environment variables prefixed `FUNCGEN_`, `__` separating nested keys
//!
//! ```text
//! FUNCGEN_LOG_LEVEL=debug
//! FUNCGEN_DEVICE__KIND=tti-tga1230
//! FUNCGEN_DEVICE__RESOURCE=/dev/ttyUSB0
//! FUNCGEN_RUN__LEAVE_OUTPUT_ON_FINISH=true
//! ```

use crate::error::{FuncGenError, FuncGenResult};
use crate::logging::{parse_log_level, LogFormat};
use crate::protocol::RunOptions;
use crate::validation::{is_in_range, is_not_empty, is_valid_network_resource, is_valid_path};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::{Figment, Provider};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file used when none is given.
pub const DEFAULT_CONFIG_PATH: &str = "config/funcgen.toml";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "FUNCGEN_";

/// Supported instruments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeviceKind {
    /// Agilent 33220A, SCPI over LAN.
    #[default]
    #[serde(rename = "agilent33220a")]
    Agilent33220A,
    /// TTi TGA1230, RS-232.
    #[serde(rename = "tti-tga1230")]
    TtiTga1230,
    /// In-memory generator.
    #[serde(rename = "null")]
    Null,
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceKind::Agilent33220A => write!(f, "agilent33220a"),
            DeviceKind::TtiTga1230 => write!(f, "tti-tga1230"),
            DeviceKind::Null => write!(f, "null"),
        }
    }
}

impl std::str::FromStr for DeviceKind {
    type Err = FuncGenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "agilent33220a" | "agilent" | "33220a" => Ok(DeviceKind::Agilent33220A),
            "tti-tga1230" | "tti" | "tga1230" => Ok(DeviceKind::TtiTga1230),
            "null" => Ok(DeviceKind::Null),
            _ => Err(FuncGenError::UnknownDevice(s.to_string())),
        }
    }
}

/// Which instrument to open and where.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// Instrument model.
    pub kind: DeviceKind,
    /// `host[:port]` for SCPI over LAN, a port path for RS-232.
    pub resource: String,
    /// RS-232 only.
    pub baud_rate: u32,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            kind: DeviceKind::Agilent33220A,
            resource: "192.168.1.20:5025".to_string(),
            baud_rate: 9600,
        }
    }
}

impl DeviceSettings {
    /// Check the resource fits the device kind.
    pub fn validate(&self) -> FuncGenResult<()> {
        let check = |result: Result<(), &'static str>, field: &str| {
            result.map_err(|e| FuncGenError::Configuration(format!("device.{}: {}", field, e)))
        };
        match self.kind {
            DeviceKind::Agilent33220A => {
                check(is_valid_network_resource(&self.resource), "resource")?
            }
            DeviceKind::TtiTga1230 => {
                check(is_valid_path(&self.resource), "resource")?;
                check(is_in_range(self.baud_rate, 300..=115_200), "baud_rate")?;
            }
            DeviceKind::Null => {}
        }
        Ok(())
    }
}

/// Protocol run behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// Keep the output on while paused.
    pub leave_output_on_pause: bool,
    /// Keep the output on after the last set-point.
    pub leave_output_on_finish: bool,
    /// Keep the output on after a stop.
    pub leave_output_on_stop: bool,
    /// Refresh period of the elapsed-time display after a run finished.
    pub finished_refresh_ms: u64,
    /// Mirror run status on the instrument's front panel.
    pub device_display: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            leave_output_on_pause: false,
            leave_output_on_finish: false,
            leave_output_on_stop: false,
            finished_refresh_ms: 1_000,
            device_display: true,
        }
    }
}

impl RunSettings {
    /// Output handling for the runner.
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            leave_output_on_pause: self.leave_output_on_pause,
            leave_output_on_finish: self.leave_output_on_finish,
            leave_output_on_stop: self.leave_output_on_stop,
        }
    }

    /// `finished_refresh_ms` as a duration.
    pub fn finished_refresh(&self) -> Duration {
        Duration::from_millis(self.finished_refresh_ms)
    }
}

/// Bus timeouts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    /// Read timeout on RS-232 (ms).
    pub serial_read_timeout_ms: u64,
    /// Reply timeout for SCPI queries over LAN (ms).
    pub scpi_command_timeout_ms: u64,
    /// TCP connect timeout (ms).
    pub network_client_timeout_ms: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            serial_read_timeout_ms: 1_000,
            scpi_command_timeout_ms: 2_000,
            network_client_timeout_ms: 5_000,
        }
    }
}

impl TimeoutSettings {
    /// Validate that all timeout values fall within the supported ranges.
    pub fn validate(&self) -> FuncGenResult<()> {
        validate_timeout_range(self.serial_read_timeout_ms, 100, 30_000, "serial_read_timeout_ms")?;
        validate_timeout_range(
            self.scpi_command_timeout_ms,
            500,
            60_000,
            "scpi_command_timeout_ms",
        )?;
        validate_timeout_range(
            self.network_client_timeout_ms,
            1_000,
            120_000,
            "network_client_timeout_ms",
        )
    }

    /// Serial read timeout.
    pub fn serial_read(&self) -> Duration {
        Duration::from_millis(self.serial_read_timeout_ms)
    }

    /// SCPI reply timeout.
    pub fn scpi_command(&self) -> Duration {
        Duration::from_millis(self.scpi_command_timeout_ms)
    }

    /// TCP connect timeout.
    pub fn network_client(&self) -> Duration {
        Duration::from_millis(self.network_client_timeout_ms)
    }
}

fn validate_timeout_range(value: u64, min: u64, max: u64, name: &str) -> FuncGenResult<()> {
    if value < min || value > max {
        return Err(FuncGenError::Configuration(format!(
            "Timeout '{}' = {}ms is out of valid range ({}ms - {}ms). Check [timeouts] in config.",
            name, value, min, max
        )));
    }
    Ok(())
}

/// Complete application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// `trace`, `debug`, `info`, `warn` or `error`.
    pub log_level: String,
    /// Log line format.
    pub log_format: LogFormat,
    /// Instrument selection.
    pub device: DeviceSettings,
    /// Protocol run behaviour.
    pub run: RunSettings,
    /// Bus timeouts.
    pub timeouts: TimeoutSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Compact,
            device: DeviceSettings::default(),
            run: RunSettings::default(),
            timeouts: TimeoutSettings::default(),
        }
    }
}

impl Provider for Settings {
    fn metadata(&self) -> figment::Metadata {
        figment::Metadata::named("Library Defaults")
    }

    fn data(
        &self,
    ) -> Result<figment::value::Map<figment::Profile, figment::value::Dict>, figment::Error> {
        Serialized::defaults(Settings::default()).data()
    }
}

impl Settings {
    /// Load defaults, then the config file, then `FUNCGEN_*` variables.
    ///
    /// An explicitly given file must exist; the default file is optional.
    pub fn load(config_path: Option<&Path>) -> FuncGenResult<Self> {
        Self::load_with_env_prefix(config_path, ENV_PREFIX)
    }

    /// [`Settings::load`] with a custom environment prefix.
    pub fn load_with_env_prefix(config_path: Option<&Path>, env_prefix: &str) -> FuncGenResult<Self> {
        let settings: Settings = Self::figment(config_path, env_prefix)?.extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// The layered provider stack without extraction.
    pub fn figment(config_path: Option<&Path>, env_prefix: &str) -> FuncGenResult<Figment> {
        let mut figment = Figment::from(Settings::default());

        match config_path {
            Some(path) if !path.exists() => {
                return Err(FuncGenError::Configuration(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            Some(path) => figment = figment.merge(Toml::file(path)),
            None => {
                let default_path = PathBuf::from(DEFAULT_CONFIG_PATH);
                if default_path.exists() {
                    figment = figment.merge(Toml::file(default_path));
                }
            }
        }

        Ok(figment.merge(Env::prefixed(env_prefix).split("__")))
    }

    /// Check every section.
    pub fn validate(&self) -> FuncGenResult<()> {
        parse_log_level(&self.log_level).map_err(FuncGenError::Configuration)?;
        if self.device.kind != DeviceKind::Null {
            is_not_empty(&self.device.resource).map_err(|e| {
                FuncGenError::Configuration(format!("device.resource: {}", e))
            })?;
        }
        self.device.validate()?;
        is_in_range(self.run.finished_refresh_ms, 50..=60_000).map_err(|e| {
            FuncGenError::Configuration(format!("run.finished_refresh_ms: {}", e))
        })?;
        self.timeouts.validate()
    }
}
