//! Run Recorder: persists finalized runs to disk.
//!
//! Each run gets its own folder under the configured output directory, named
//! after its local start time and optional sample label:
//!
//! ```text
//! ExperimentalData/
//! └── 2026_03_14_15h09m26s-Sample12/
//!     ├── run.json        full run, the source for `RunRecorder::load`
//!     ├── metadata.json   summary: status, duration, sample count, dose
//!     ├── samples.csv     one row per sample          (storage_csv)
//!     └── spectra.csv     shifted intensities per row (storage_csv)
//! ```
//!
//! Files are rendered in memory, written to a `.tmp` sibling and renamed into
//! place. Persisting the same run again rewrites identical bytes; a failure
//! part-way leaves earlier files intact. The run itself is never consumed, so a
//! caller can retry after a [`DaqError::Persistence`].
//!
//! Aborted runs are recorded like finished ones; `metadata.json` carries the
//! status and the abort reason.

use crate::error::{AppResult, DaqError};
use crate::metadata::Metadata;
use crate::run::{AbortReason, Run, RunStatus};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// File holding the complete serialized run.
pub const RUN_FILE: &str = "run.json";
/// File holding the run summary.
pub const METADATA_FILE: &str = "metadata.json";

/// One output file rendered from a run.
pub trait RunWriter: Send + Sync {
    /// File name inside the run folder.
    fn file_name(&self) -> &'static str;

    /// Serialize the run into the file's bytes.
    fn render(&self, run: &Run) -> AppResult<Vec<u8>>;
}

// ============================================================================
// JSON Writers
// ============================================================================

/// Writes the full run as JSON.
pub struct RunJsonWriter;

impl RunWriter for RunJsonWriter {
    fn file_name(&self) -> &'static str {
        RUN_FILE
    }

    fn render(&self, run: &Run) -> AppResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(run)?)
    }
}

/// Summary written next to the data for quick inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Identifier of the summarized run
    pub run_id: Uuid,
    /// Operator sample label
    pub label: Option<String>,
    /// Wall-clock start time
    pub started_at: DateTime<Utc>,
    /// Wall-clock end time
    pub finished_at: Option<DateTime<Utc>>,
    /// Wall-clock time from start to finish in seconds
    pub total_duration_s: Option<f64>,
    /// Sampling interval
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Finished or Aborted
    pub status: RunStatus,
    /// Why the run stopped early, if it did
    pub abort_reason: Option<AbortReason>,
    /// Samples recorded
    pub sample_count: usize,
    /// Samples taken after their interval boundary had already passed
    pub overrun_count: usize,
    /// Points in the spectrometer grid
    pub wavelength_count: usize,
    /// Cumulative equivalent minutes at 43 °C
    pub thermal_dose_cem43: f64,
    /// Crate version that recorded the run
    pub software_version: String,
    /// Operator metadata, repeated for quick inspection
    pub metadata: Metadata,
}

impl RunSummary {
    /// Summarize a run.
    pub fn of(run: &Run) -> Self {
        Self {
            run_id: run.id(),
            label: run.label().map(str::to_string),
            started_at: run.started_at(),
            finished_at: run.finished_at(),
            total_duration_s: run.total_duration().map(|d| d.as_secs_f64()),
            interval: run.interval(),
            status: run.status(),
            abort_reason: run.abort_reason().cloned(),
            sample_count: run.samples().len(),
            overrun_count: run.overrun_count(),
            wavelength_count: run.wavelengths().len(),
            thermal_dose_cem43: run.thermal_dose(),
            software_version: env!("CARGO_PKG_VERSION").to_string(),
            metadata: run.metadata().clone(),
        }
    }
}

/// Writes [`RunSummary`] as JSON.
pub struct SummaryJsonWriter;

impl RunWriter for SummaryJsonWriter {
    fn file_name(&self) -> &'static str {
        METADATA_FILE
    }

    fn render(&self, run: &Run) -> AppResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(&RunSummary::of(run))?)
    }
}

// ============================================================================
// CSV Writers
// ============================================================================

#[cfg(feature = "storage_csv")]
mod csv_enabled {
    use super::*;

    /// Writes one row per sample: time, temperatures, intensity, setpoint.
    pub struct SamplesCsvWriter;

    impl RunWriter for SamplesCsvWriter {
        fn file_name(&self) -> &'static str {
            "samples.csv"
        }

        fn render(&self, run: &Run) -> AppResult<Vec<u8>> {
            let mut writer = csv::Writer::from_writer(Vec::new());
            writer.write_record([
                "t (s)",
                "Ts (degC)",
                "Ts_spatial (degC)",
                "I (a.u.)",
                "P (W)",
                "q (slm)",
                "overrun",
            ])?;
            for sample in run.samples() {
                writer.write_record([
                    sample.elapsed.as_secs_f64().to_string(),
                    sample.thermal.max_c.to_string(),
                    sample
                        .thermal
                        .spatial_c
                        .map(|t| t.to_string())
                        .unwrap_or_default(),
                    sample.spectrum.total.to_string(),
                    sample.setpoint.power.to_string(),
                    sample.setpoint.flow_rate.to_string(),
                    u8::from(sample.overrun).to_string(),
                ])?;
            }
            into_bytes(writer)
        }
    }

    /// Writes the wavelength grid as header and the shifted intensities of each sample.
    pub struct SpectraCsvWriter;

    impl RunWriter for SpectraCsvWriter {
        fn file_name(&self) -> &'static str {
            "spectra.csv"
        }

        fn render(&self, run: &Run) -> AppResult<Vec<u8>> {
            let mut writer = csv::Writer::from_writer(Vec::new());
            let header = std::iter::once("t (s)".to_string())
                .chain(run.wavelengths().iter().map(|wl| wl.to_string()));
            writer.write_record(header)?;
            for sample in run.samples() {
                let row = std::iter::once(sample.elapsed.as_secs_f64().to_string())
                    .chain(sample.spectrum.intensities.iter().map(|i| i.to_string()));
                writer.write_record(row)?;
            }
            into_bytes(writer)
        }
    }

    fn into_bytes(writer: csv::Writer<Vec<u8>>) -> AppResult<Vec<u8>> {
        writer
            .into_inner()
            .map_err(|e| DaqError::Io(e.into_error()))
    }
}

#[cfg(feature = "storage_csv")]
pub use csv_enabled::{SamplesCsvWriter, SpectraCsvWriter};

// ============================================================================
// Recorder
// ============================================================================

/// Where [`RunRecorder::persist_or_fallback`] put a run.
#[derive(Debug)]
pub enum SavedTo {
    /// The recorder's own root.
    Primary(PathBuf),
    /// The fallback root, after the primary write failed with `error`.
    Fallback { path: PathBuf, error: DaqError },
}

/// Persists runs under a root directory.
pub struct RunRecorder {
    root: PathBuf,
    writers: Vec<Box<dyn RunWriter>>,
}

impl RunRecorder {
    /// Recorder with every writer enabled by the build's features.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let mut writers: Vec<Box<dyn RunWriter>> =
            vec![Box::new(RunJsonWriter), Box::new(SummaryJsonWriter)];
        #[cfg(feature = "storage_csv")]
        {
            writers.push(Box::new(SamplesCsvWriter));
            writers.push(Box::new(SpectraCsvWriter));
        }
        Self {
            root: root.into(),
            writers,
        }
    }

    /// Recorder with an explicit set of writers.
    pub fn with_writers(root: impl Into<PathBuf>, writers: Vec<Box<dyn RunWriter>>) -> Self {
        Self {
            root: root.into(),
            writers,
        }
    }

    /// Directory run folders are created in.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Folder a run is (or would be) written to.
    pub fn run_dir(&self, run: &Run) -> PathBuf {
        let stamp = run
            .started_at()
            .with_timezone(&Local)
            .format("%Y_%m_%d_%Hh%Mm%Ss");
        let name = match run.label() {
            Some(label) => format!("{stamp}-{label}"),
            None => stamp.to_string(),
        };
        self.root.join(name)
    }

    /// Write `run` to its folder and return the folder path.
    ///
    /// Fails without writing if the folder already holds a different run.
    pub fn persist(&self, run: &Run) -> AppResult<PathBuf> {
        let dir = self.run_dir(run);
        fs::create_dir_all(&dir).map_err(|e| DaqError::persistence(&dir, e))?;

        let existing = dir.join(RUN_FILE);
        if existing.exists() {
            let previous = Self::load(&dir)?;
            if previous.id() != run.id() {
                return Err(DaqError::persistence(
                    &dir,
                    format!("folder already holds run {}", previous.id()),
                ));
            }
            debug!(run_id = %run.id(), "Rewriting existing run folder");
        }

        for writer in &self.writers {
            let path = dir.join(writer.file_name());
            let bytes = writer
                .render(run)
                .map_err(|e| DaqError::persistence(&path, e))?;
            write_replace(&path, &bytes)?;
        }

        info!(
            run_id = %run.id(),
            status = %run.status(),
            samples = run.samples().len(),
            "Run saved to {}",
            dir.display()
        );
        Ok(dir)
    }

    /// Persist `run`, falling back to `fallback` if this recorder's root fails.
    ///
    /// Returns the primary error when both writes fail.
    pub fn persist_or_fallback(&self, run: &Run, fallback: &RunRecorder) -> AppResult<SavedTo> {
        let error = match self.persist(run) {
            Ok(dir) => return Ok(SavedTo::Primary(dir)),
            Err(e) => e,
        };
        warn!(
            run_id = %run.id(),
            "Could not save run ({}), trying {}",
            error,
            fallback.root().display()
        );
        match fallback.persist(run) {
            Ok(path) => Ok(SavedTo::Fallback { path, error }),
            Err(fallback_error) => {
                error!(run_id = %run.id(), "Fallback save failed: {}", fallback_error);
                Err(error)
            }
        }
    }

    /// Reload a run from a folder written by [`RunRecorder::persist`].
    pub fn load(dir: impl AsRef<Path>) -> AppResult<Run> {
        let path = dir.as_ref().join(RUN_FILE);
        let bytes = fs::read(&path).map_err(|e| DaqError::persistence(&path, e))?;
        serde_json::from_slice(&bytes).map_err(|e| DaqError::persistence(&path, e))
    }

    /// Read the summary of a persisted run.
    pub fn load_summary(dir: impl AsRef<Path>) -> AppResult<RunSummary> {
        let path = dir.as_ref().join(METADATA_FILE);
        let bytes = fs::read(&path).map_err(|e| DaqError::persistence(&path, e))?;
        serde_json::from_slice(&bytes).map_err(|e| DaqError::persistence(&path, e))
    }
}

/// Write to a temporary sibling, then rename over `path`.
fn write_replace(path: &Path, bytes: &[u8]) -> AppResult<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, bytes).map_err(|e| DaqError::persistence(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        DaqError::persistence(path, e)
    })
}
