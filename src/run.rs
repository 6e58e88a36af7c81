//! Samples and runs.
//!
//! A [`Run`] is created by the sequencer when acquisition starts, grows one
//! [`Sample`] per interval, and is finalized as either Finished or Aborted.
//! Only the sequencer can append to or finalize a run; everyone else sees a
//! read-only value.

use crate::error::{AppResult, DaqError};
use crate::metadata::Metadata;
use crate::sampler::{SpectrumSample, ThermalSummary};
use crate::setpoint::{Setpoint, SetpointSequence};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Temperature reference for the CEM43 thermal dose.
const CEM_REFERENCE_C: f64 = 43.0;

/// One interval's worth of measurements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Time since the run started
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
    /// The setpoint commanded at or before `elapsed`
    pub setpoint: Setpoint,
    /// Thermal camera summary
    pub thermal: ThermalSummary,
    /// Background-corrected spectrum
    pub spectrum: SpectrumSample,
    /// Set when one or more interval boundaries were skipped before this sample
    #[serde(default)]
    pub overrun: bool,
}

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Acquisition in progress
    Running,
    /// The setpoint sequence was exhausted
    Finished,
    /// Stopped early; samples collected so far are kept
    Aborted,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Running => f.write_str("running"),
            RunStatus::Finished => f.write_str("finished"),
            RunStatus::Aborted => f.write_str("aborted"),
        }
    }
}

/// Why a run ended early.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbortReason {
    /// The operator raised the cancel flag
    Cancelled,
    /// An actuator write or sensor read failed
    DeviceFailure {
        /// Device that failed
        device: String,
        /// Error as reported
        message: String,
    },
}

impl AbortReason {
    /// Describe a device error for the run record.
    pub fn from_error(error: &DaqError) -> Self {
        let device = match error {
            DaqError::DeviceCommunication { device, .. } => device.clone(),
            DaqError::ReadTimeout { sensor, .. } => sensor.to_string(),
            _ => "unknown".to_string(),
        };
        AbortReason::DeviceFailure {
            device,
            message: error.to_string(),
        }
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Cancelled => f.write_str("cancelled by operator"),
            AbortReason::DeviceFailure { message, .. } => f.write_str(message),
        }
    }
}

/// One acquisition session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    id: Uuid,
    started_at: DateTime<Utc>,
    #[serde(default)]
    finished_at: Option<DateTime<Utc>>,
    #[serde(with = "humantime_serde")]
    interval: Duration,
    setpoints: SetpointSequence,
    #[serde(default)]
    wavelengths_nm: Vec<f64>,
    samples: Vec<Sample>,
    status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    abort_reason: Option<AbortReason>,
    #[serde(default)]
    metadata: Metadata,
}

impl Run {
    pub(crate) fn start(setpoints: SetpointSequence, interval: Duration, metadata: Metadata) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            interval,
            setpoints,
            wavelengths_nm: Vec::new(),
            samples: Vec::new(),
            status: RunStatus::Running,
            abort_reason: None,
            metadata,
        }
    }

    /// Append a sample. Timestamps must strictly increase and spectra must
    /// match the run's wavelength grid, which the first spectrum fixes.
    pub(crate) fn push(&mut self, sample: Sample, wavelengths_nm: &[f64]) -> AppResult<()> {
        if self.status != RunStatus::Running {
            return Err(DaqError::Configuration(format!(
                "cannot append to a {} run",
                self.status
            )));
        }
        if let Some(last) = self.samples.last() {
            if sample.elapsed <= last.elapsed {
                return Err(DaqError::Configuration(format!(
                    "sample at {:?} does not follow {:?}",
                    sample.elapsed, last.elapsed
                )));
            }
        }
        if self.wavelengths_nm.is_empty() {
            self.wavelengths_nm = wavelengths_nm.to_vec();
        } else if self.wavelengths_nm.len() != wavelengths_nm.len() {
            return Err(DaqError::device(
                "spectrometer",
                format!(
                    "wavelength grid changed from {} to {} points",
                    self.wavelengths_nm.len(),
                    wavelengths_nm.len()
                ),
            ));
        }
        self.samples.push(sample);
        Ok(())
    }

    pub(crate) fn finish(&mut self, abort_reason: Option<AbortReason>) {
        self.status = if abort_reason.is_some() {
            RunStatus::Aborted
        } else {
            RunStatus::Finished
        };
        self.abort_reason = abort_reason;
        self.finished_at = Some(Utc::now());
    }

    /// Unique identifier assigned when the run starts.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Wall-clock time the run started.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Wall-clock time the run ended, `None` while running.
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Wall-clock time from start to finalization.
    pub fn total_duration(&self) -> Option<Duration> {
        self.finished_at
            .and_then(|end| (end - self.started_at).to_std().ok())
    }

    /// The sequencer's polling interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// The setpoint sequence that produced this run.
    pub fn setpoints(&self) -> &SetpointSequence {
        &self.setpoints
    }

    /// Wavelength grid shared by every sample's spectrum; empty until the first sample.
    pub fn wavelengths(&self) -> &[f64] {
        &self.wavelengths_nm
    }

    /// Samples in acquisition order.
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Running, Finished or Aborted.
    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// Why the run stopped early; `None` for finished runs.
    pub fn abort_reason(&self) -> Option<&AbortReason> {
        self.abort_reason.as_ref()
    }

    /// Operator metadata captured at start.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Sample label from the metadata, if any.
    pub fn label(&self) -> Option<&str> {
        self.metadata.label.as_deref()
    }

    /// Number of samples taken late because interval boundaries were skipped.
    pub fn overrun_count(&self) -> usize {
        self.samples.iter().filter(|s| s.overrun).count()
    }

    /// Cumulative equivalent minutes at 43 °C, from the maximum surface temperature.
    ///
    /// Each sample contributes `K^(43 - T) * ts / 60` with `K = 0.25` below 30 °C
    /// and `0.5` otherwise, `ts` being the polling interval in seconds.
    pub fn thermal_dose(&self) -> f64 {
        let ts = self.interval.as_secs_f64();
        self.samples
            .iter()
            .map(|s| cem43_increment(s.thermal.max_c, ts))
            .sum()
    }
}

fn cem43_increment(temperature_c: f64, ts: f64) -> f64 {
    let k: f64 = if temperature_c < 30.0 { 0.25 } else { 0.5 };
    k.powf(CEM_REFERENCE_C - temperature_c) * ts / 60.0
}
