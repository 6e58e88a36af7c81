//! Open-Loop Sequencer.
//!
//! Drives a [`DeviceAdapter`] through a [`SetpointSequence`] on a fixed
//! wall-clock period and collects one [`Sample`] per interval.
//!
//! ```text
//!          run()                 sequence exhausted
//!   Idle ─────────▶ Running ─────────────────────────▶ Finished
//!    ▲                 │
//!    │                 │ device failure / cancel flag
//!    │                 ▼
//!    └──── reset() ── Aborted   (Finished also resets to Idle)
//! ```
//!
//! Step `k` is scheduled at `k * interval` from the start of the run. At each
//! step the sequencer checks the cancel flag, commands the setpoint whose
//! window contains the scheduled time (only if it differs from the one last
//! written), then polls the thermal camera and the spectrometer in that order.
//! A step that runs past the next boundary is not caught up: the sequencer
//! moves on to the first boundary after the current time, and the late sample
//! is flagged as an overrun.

use crate::config::{Limits, Settings};
use crate::error::{AppResult, DaqError};
use crate::instrument::DeviceAdapter;
use crate::metadata::Metadata;
use crate::run::{AbortReason, Run, RunStatus, Sample};
use crate::sampler::{sample_spectrum, sample_thermal};
use crate::setpoint::{Setpoint, SetpointSequence};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Externally settable stop request, checked once per interval.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Flag that has not been cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that the current run stops at the next interval.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// True once [`CancelFlag::cancel`] has been called on any clone.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Sequencer lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerState {
    /// Ready to start a run
    Idle,
    /// A run is in progress
    Running,
    /// The last run completed its sequence
    Finished,
    /// The last run stopped early
    Aborted,
}

impl fmt::Display for SequencerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SequencerState::Idle => "idle",
            SequencerState::Running => "running",
            SequencerState::Finished => "finished",
            SequencerState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Timing and bounds for a run.
#[derive(Debug, Clone, PartialEq)]
pub struct SequencerConfig {
    /// Fixed polling period
    pub interval: Duration,
    /// Timeout applied to each sensor read
    pub read_timeout: Duration,
    /// Device-safe actuator bounds
    pub limits: Limits,
}

impl SequencerConfig {
    /// Timing and limits taken from the loaded settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            interval: settings.acquisition.sampling_interval,
            read_timeout: settings.acquisition.read_timeout,
            limits: settings.limits,
        }
    }
}

/// The acquisition driver.
pub struct Sequencer {
    config: SequencerConfig,
    state: SequencerState,
}

impl Sequencer {
    /// Idle sequencer with the given timing.
    pub fn new(config: SequencerConfig) -> Self {
        Self {
            config,
            state: SequencerState::Idle,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SequencerState {
        self.state
    }

    /// Timing and limits this sequencer was built with.
    pub fn config(&self) -> &SequencerConfig {
        &self.config
    }

    /// Return a Finished or Aborted sequencer to Idle.
    pub fn reset(&mut self) {
        if self.state != SequencerState::Running {
            self.state = SequencerState::Idle;
        }
    }

    /// Execute one open-loop run.
    ///
    /// Configuration problems are returned as errors before any device I/O.
    /// Once acquisition has started, device failures and cancellation end the
    /// run early but still return it: the status is [`RunStatus::Aborted`] and
    /// the samples collected so far are kept.
    pub async fn run<D>(
        &mut self,
        device: &mut D,
        setpoints: &SetpointSequence,
        metadata: Metadata,
        cancel: &CancelFlag,
    ) -> AppResult<Run>
    where
        D: DeviceAdapter + ?Sized,
    {
        if self.state != SequencerState::Idle {
            return Err(DaqError::SequencerNotIdle(self.state));
        }
        self.validate(setpoints, &metadata)?;

        self.state = SequencerState::Running;
        let mut run = Run::start(setpoints.clone(), self.config.interval, metadata);
        info!(
            run_id = %run.id(),
            setpoints = setpoints.len(),
            interval = ?self.config.interval,
            duration = ?setpoints.total_duration(self.config.interval),
            "Starting open-loop run"
        );

        let abort = self.acquire(device, setpoints, &mut run, cancel).await;
        run.finish(abort);

        match run.abort_reason() {
            None => {
                self.state = SequencerState::Finished;
                info!(
                    run_id = %run.id(),
                    samples = run.samples().len(),
                    overruns = run.overrun_count(),
                    "Run finished"
                );
            }
            Some(reason) => {
                self.state = SequencerState::Aborted;
                error!(
                    run_id = %run.id(),
                    samples = run.samples().len(),
                    "Run aborted: {}",
                    reason
                );
            }
        }
        debug_assert_ne!(run.status(), RunStatus::Running);
        Ok(run)
    }

    /// Check a sequence and its metadata against this sequencer's configuration.
    ///
    /// [`Sequencer::run`] does this itself; callers can use it to reject bad
    /// input before opening any device.
    pub fn validate(&self, setpoints: &SetpointSequence, metadata: &Metadata) -> AppResult<()> {
        if self.config.interval.is_zero() {
            return Err(DaqError::Configuration(
                "sampling interval must be greater than zero".to_string(),
            ));
        }
        if self.config.read_timeout.is_zero() {
            return Err(DaqError::Configuration(
                "read timeout must be greater than zero".to_string(),
            ));
        }
        setpoints.validate(&self.config.limits)?;
        metadata.validate().map_err(DaqError::Configuration)?;
        if self.config.read_timeout * 2 > self.config.interval {
            warn!(
                read_timeout = ?self.config.read_timeout,
                interval = ?self.config.interval,
                "Two slow sensor reads can overrun the sampling interval"
            );
        }
        Ok(())
    }

    /// The timed loop. Returns why it stopped early, if it did.
    async fn acquire<D>(
        &self,
        device: &mut D,
        setpoints: &SetpointSequence,
        run: &mut Run,
        cancel: &CancelFlag,
    ) -> Option<AbortReason>
    where
        D: DeviceAdapter + ?Sized,
    {
        let interval = self.config.interval;
        let timeout = self.config.read_timeout;
        let total = setpoints.total_duration(interval);
        let start = Instant::now();
        let mut commanded: Option<Setpoint> = None;
        let mut step: u32 = 0;

        loop {
            let scheduled = interval.saturating_mul(step);
            if scheduled >= total {
                return None;
            }
            tokio::time::sleep_until(start + scheduled).await;

            if cancel.is_cancelled() {
                warn!(step, "Cancellation requested");
                return Some(AbortReason::Cancelled);
            }

            let Some(&due) = setpoints.setpoint_at(scheduled, interval) else {
                return None;
            };
            if !commanded.is_some_and(|c| c.same_command(&due)) {
                if let Err(e) = device.set_actuators(due.power, due.flow_rate).await {
                    return Some(AbortReason::from_error(&e));
                }
                debug!(step, power = due.power, flow_rate = due.flow_rate, "Setpoint applied");
                commanded = Some(due);
            }

            let thermal = match sample_thermal(device, timeout).await {
                Ok(summary) => summary,
                Err(e) => return Some(AbortReason::from_error(&e)),
            };
            let spectral = match sample_spectrum(device, timeout).await {
                Ok(reading) => reading,
                Err(e) => return Some(AbortReason::from_error(&e)),
            };

            let elapsed = start.elapsed();
            let next = next_step(elapsed, interval);
            let overrun = next > step.saturating_add(1);
            if overrun {
                warn!(
                    step,
                    skipped = next - step - 1,
                    elapsed = ?elapsed,
                    "Sampling step overran its interval"
                );
            }

            info!(
                step,
                t_s = elapsed.as_secs_f64(),
                ts_c = thermal.max_c,
                intensity = spectral.spectrum.total,
                power = due.power,
                flow_rate = due.flow_rate,
                "Sample"
            );
            let sample = Sample {
                elapsed,
                setpoint: due,
                thermal,
                spectrum: spectral.spectrum,
                overrun,
            };
            if let Err(e) = run.push(sample, &spectral.wavelengths_nm) {
                return Some(AbortReason::from_error(&e));
            }
            step = next;
        }
    }
}

/// Index of the first interval boundary strictly after `elapsed`.
fn next_step(elapsed: Duration, interval: Duration) -> u32 {
    let passed = elapsed.as_nanos() / interval.as_nanos();
    u32::try_from(passed).unwrap_or(u32::MAX - 1) + 1
}
