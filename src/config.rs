//! Layered configuration using Figment
//!
//! Settings are loaded, in increasing order of precedence, from:
//! 1. Built-in defaults ([`Settings::default`])
//! 2. A TOML file (`config/appj.toml` unless another path is given)
//! 3. Environment variables prefixed with `APPJ_`
//!
//! Nested keys are separated by a double underscore:
//!
//! ```text
//! APPJ_APPLICATION__LOG_LEVEL=debug
//! APPJ_DEVICES__JET__PORT=/dev/ttyACM1
//! APPJ_ACQUISITION__SAMPLING_INTERVAL=500ms
//! ```
//!
//! # Example
//!
//! ```no_run
//! use appj_daq::config::Settings;
//!
//! let settings = Settings::load_from("config/appj.toml")?;
//! println!("Jet controller on {}", settings.devices.jet.port);
//! # Ok::<(), appj_daq::error::DaqError>(())
//! ```

use crate::error::{AppResult, DaqError};
use crate::setpoint::Setpoint;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the settings file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/appj.toml";

/// Top-level settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Serial links to the jet controller and sensor bridges
    #[serde(default)]
    pub devices: DeviceSettings,
    /// Device-safe actuator bounds
    #[serde(default)]
    pub limits: Limits,
    /// Acquisition timing
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    /// Output location
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "APPJ open-loop acquisition".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Settings for one serial link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialLinkConfig {
    /// Serial port (e.g. "/dev/ttyACM0", "COM3")
    pub port: String,
    /// Baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Per-response read timeout
    #[serde(with = "humantime_serde", default = "default_link_timeout")]
    pub timeout: Duration,
}

impl SerialLinkConfig {
    /// Link on `port` with the default baud rate and timeout.
    pub fn on(port: &str) -> Self {
        Self {
            port: port.to_string(),
            baud_rate: default_baud_rate(),
            timeout: default_link_timeout(),
        }
    }
}

/// Spectrometer bridge configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrometerConfig {
    /// Serial link to the spectrometer bridge
    pub link: SerialLinkConfig,
    /// Integration time in microseconds
    #[serde(default = "default_integration_time_us")]
    pub integration_time_us: u64,
}

/// Device links used by [`crate::instrument::DeviceContext`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Jet power/flow controller
    pub jet: SerialLinkConfig,
    /// Thermal camera bridge
    pub thermal_camera: SerialLinkConfig,
    /// Spectrometer bridge
    pub spectrometer: SpectrometerConfig,
    /// Power supply duty cycle sent to the jet controller on connect and on release
    #[serde(default = "default_duty_cycle_pct")]
    pub jet_duty_cycle_pct: f64,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            jet: SerialLinkConfig::on("/dev/ttyACM0"),
            thermal_camera: SerialLinkConfig::on("/dev/ttyUSB0"),
            spectrometer: SpectrometerConfig {
                link: SerialLinkConfig::on("/dev/ttyUSB1"),
                integration_time_us: default_integration_time_us(),
            },
            jet_duty_cycle_pct: default_duty_cycle_pct(),
        }
    }
}

/// Device-safe actuator bounds. Setpoints outside `[0, max]` are rejected before a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    /// Maximum jet power in watts
    pub max_power_w: f64,
    /// Maximum carrier gas flow in standard liters per minute
    pub max_flow_slm: f64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_power_w: 40.0,
            max_flow_slm: 10.0,
        }
    }
}

/// Acquisition timing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Fixed polling interval of the sequencer
    #[serde(with = "humantime_serde")]
    pub sampling_interval: Duration,
    /// Timeout for a single sensor read
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,
    /// Nominal setpoint applied during warm-up
    pub warmup_setpoint: Setpoint,
    /// Warm-up duration
    #[serde(with = "humantime_serde")]
    pub warmup_duration: Duration,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            sampling_interval: Duration::from_secs(1),
            read_timeout: Duration::from_millis(800),
            warmup_setpoint: Setpoint::new(2.0, 2.0),
            warmup_duration: Duration::from_secs(600),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for run folders
    pub output_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("ExperimentalData"),
        }
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_baud_rate() -> u32 {
    38400
}

fn default_link_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_integration_time_us() -> u64 {
    72_000
}

fn default_duty_cycle_pct() -> f64 {
    100.0
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl Settings {
    /// Load settings from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load settings from a specific file path and the environment.
    ///
    /// A missing file is not an error; defaults and environment variables still apply.
    /// The result is validated before it is returned.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings: Self = Self::figment(path.as_ref()).extract()?;
        settings.validate()?;
        Ok(settings)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("APPJ_").split("__"))
    }

    /// Validate settings after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Limits are positive and finite
    /// - Sampling interval and read timeout are non-zero
    /// - The sampling interval is at least twice the spectrometer integration time
    /// - The jet duty cycle is in (0, 100] percent
    /// - The warm-up setpoint is within limits
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        for (name, value) in [
            ("max_power_w", self.limits.max_power_w),
            ("max_flow_slm", self.limits.max_flow_slm),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(DaqError::Configuration(format!(
                    "Invalid {name} {value}. Must be a positive number"
                )));
            }
        }

        let acquisition = &self.acquisition;
        if acquisition.sampling_interval.is_zero() {
            return Err(DaqError::Configuration(
                "sampling_interval must be greater than zero".to_string(),
            ));
        }
        if acquisition.read_timeout.is_zero() {
            return Err(DaqError::Configuration(
                "read_timeout must be greater than zero".to_string(),
            ));
        }

        let integration = Duration::from_micros(self.devices.spectrometer.integration_time_us);
        let too_short = integration
            .checked_mul(2)
            .map_or(true, |min| acquisition.sampling_interval < min);
        if too_short {
            return Err(DaqError::Configuration(format!(
                "sampling_interval {:?} must be at least twice the integration time {:?}",
                acquisition.sampling_interval, integration
            )));
        }

        let duty = self.devices.jet_duty_cycle_pct;
        if !(duty > 0.0 && duty <= 100.0) {
            return Err(DaqError::Configuration(format!(
                "Invalid jet_duty_cycle_pct {duty}. Must be in (0, 100]"
            )));
        }

        acquisition.warmup_setpoint.validate(&self.limits)?;
        Ok(())
    }
}
