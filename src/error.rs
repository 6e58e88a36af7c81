//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the ways an acquisition can go wrong, from bad operator input to a jet controller
//! that stops answering.
//!
//! ## Error Hierarchy
//!
//! `DaqError` groups its variants into three operator-facing families:
//!
//! - **Configuration** (`Config`, `Configuration`): the settings file or the setpoint
//!   sequence is malformed or out of bounds. These are raised before a run starts and
//!   guarantee that no device has been touched.
//! - **Device communication** (`DeviceCommunication`, `ReadTimeout`,
//!   `SerialPortNotConnected`): an actuator write or sensor read failed, timed out, or
//!   produced a malformed response. During a run these abort the sequencer; the partial
//!   run is kept.
//! - **Persistence** (`Persistence`): the run recorder could not write its output. The
//!   run stays in memory so the caller can retry.
//!
//! `Io`, `Json` and `Csv` wrap the underlying library errors via `#[from]` so the `?`
//! operator works inside the recorder; they are mapped to `Persistence` at its boundary.
//!
//! Nothing in the crate retries automatically. Recovery is always operator-driven.

use crate::instrument::SensorKind;
use crate::sequencer::SequencerState;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Application error type.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Settings could not be parsed from file or environment.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Settings or setpoints are syntactically valid but unusable.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// I/O failure outside of the recorder boundary.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV (de)serialization failure.
    #[cfg(feature = "storage_csv")]
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// An actuator write or sensor read failed or returned garbage.
    #[error("Device communication error ({device}): {message}")]
    DeviceCommunication {
        /// Device that failed (e.g. "jet", "thermal_camera").
        device: String,
        /// What went wrong.
        message: String,
    },

    /// A sensor did not produce a reading in time.
    #[error("Timed out after {timeout:?} waiting for {sensor} reading")]
    ReadTimeout {
        /// Sensor that was polled.
        sensor: SensorKind,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// A serial link was used before `connect` or after `disconnect`.
    #[error("Serial port not connected")]
    SerialPortNotConnected,

    /// Serial support was compiled out.
    #[error("Serial support not enabled. Rebuild with --features instrument_serial")]
    SerialFeatureDisabled,

    /// Output could not be written.
    #[error("Persistence error at {}: {message}", .path.display())]
    Persistence {
        /// File or directory being written.
        path: PathBuf,
        /// What went wrong.
        message: String,
    },

    /// A compile-time feature needed for this operation is missing.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    /// A run was started on a sequencer that has not been reset.
    #[error("Sequencer is {0:?}; reset it before starting a new run")]
    SequencerNotIdle(SequencerState),
}

impl DaqError {
    /// Shorthand for a [`DaqError::DeviceCommunication`] error.
    pub fn device(device: impl Into<String>, message: impl Into<String>) -> Self {
        DaqError::DeviceCommunication {
            device: device.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a [`DaqError::Persistence`] error.
    pub fn persistence(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        DaqError::Persistence {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// True for the DeviceCommunicationError family, which aborts a running sequence.
    pub fn is_device_failure(&self) -> bool {
        matches!(
            self,
            DaqError::DeviceCommunication { .. }
                | DaqError::ReadTimeout { .. }
                | DaqError::SerialPortNotConnected
                | DaqError::SerialFeatureDisabled
        )
    }
}
