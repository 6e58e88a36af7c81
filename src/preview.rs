//! Live preview of a single sensor.
//!
//! Polls one sensor at a fixed period for a given duration and hands each
//! reduced reading to a callback. Used to aim the camera and check the
//! spectrometer before a run; no [`crate::run::Run`] is created and nothing is
//! written to disk.

use crate::error::{AppResult, DaqError};
use crate::instrument::{DeviceAdapter, SensorKind};
use crate::sampler::{sample_spectrum, sample_thermal, SpectrumReading, ThermalSummary};
use crate::sequencer::CancelFlag;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Preview parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct PreviewConfig {
    /// Sensor to poll
    pub sensor: SensorKind,
    /// Total preview time
    pub duration: Duration,
    /// Polling period
    pub interval: Duration,
    /// Timeout for each read
    pub read_timeout: Duration,
}

/// One preview reading.
#[derive(Debug, Clone, PartialEq)]
pub enum PreviewReading {
    /// Thermal camera summary
    Thermal {
        /// Time since the preview started
        elapsed: Duration,
        /// Reduced frame
        summary: ThermalSummary,
    },
    /// Spectrometer reading
    Spectrum {
        /// Time since the preview started
        elapsed: Duration,
        /// Background-corrected spectrum and its grid
        reading: SpectrumReading,
    },
}

impl PreviewReading {
    /// Time since the preview started.
    pub fn elapsed(&self) -> Duration {
        match self {
            PreviewReading::Thermal { elapsed, .. } | PreviewReading::Spectrum { elapsed, .. } => {
                *elapsed
            }
        }
    }
}

/// Poll `config.sensor` until `config.duration` has elapsed or `cancel` is set.
///
/// Returns the number of readings delivered. A failed read ends the preview
/// with that error.
pub async fn run_preview<D, F>(
    device: &mut D,
    config: &PreviewConfig,
    cancel: &CancelFlag,
    mut on_reading: F,
) -> AppResult<usize>
where
    D: DeviceAdapter + ?Sized,
    F: FnMut(&PreviewReading),
{
    if config.interval.is_zero() {
        return Err(DaqError::Configuration(
            "preview interval must be greater than zero".to_string(),
        ));
    }
    info!(sensor = %config.sensor, duration = ?config.duration, "Starting preview");

    let start = Instant::now();
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut delivered = 0;

    loop {
        let tick = ticker.tick().await;
        if tick.duration_since(start) >= config.duration || cancel.is_cancelled() {
            break;
        }
        let reading = match config.sensor {
            SensorKind::ThermalCamera => PreviewReading::Thermal {
                summary: sample_thermal(device, config.read_timeout).await?,
                elapsed: start.elapsed(),
            },
            SensorKind::Spectrometer => PreviewReading::Spectrum {
                reading: sample_spectrum(device, config.read_timeout).await?,
                elapsed: start.elapsed(),
            },
        };
        debug!(elapsed = ?reading.elapsed(), "Preview reading");
        on_reading(&reading);
        delivered += 1;
    }

    info!(readings = delivered, "Preview finished");
    Ok(delivered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::SimulatedRig;

    fn config(sensor: SensorKind) -> PreviewConfig {
        PreviewConfig {
            sensor,
            duration: Duration::from_secs(3),
            interval: Duration::from_millis(500),
            read_timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_preview_polls_only_the_chosen_sensor() {
        let mut rig = SimulatedRig::new(0);
        let mut seen = Vec::new();
        let count = run_preview(
            &mut rig,
            &config(SensorKind::Spectrometer),
            &CancelFlag::new(),
            |r| seen.push(r.clone()),
        )
        .await
        .unwrap();

        assert_eq!(count, 6);
        assert_eq!(seen.len(), 6);
        assert!(seen.iter().all(|r| matches!(r, PreviewReading::Spectrum { .. })));
        assert_eq!(rig.reads(SensorKind::ThermalCamera), 0);
        assert!(rig.commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_preview_timeout_surfaces() {
        let mut rig = SimulatedRig::new(0).hang(SensorKind::ThermalCamera);
        let err = run_preview(
            &mut rig,
            &config(SensorKind::ThermalCamera),
            &CancelFlag::new(),
            |_| {},
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DaqError::ReadTimeout { .. }));
    }
}
