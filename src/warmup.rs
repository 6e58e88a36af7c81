//! Jet warm-up.
//!
//! Before a run the jet is held at a nominal setpoint until the substrate
//! temperature settles. The warm-up re-sends the setpoint every interval and
//! logs the surface temperature so the operator can watch it level off.
//! Nothing is recorded.

use crate::config::{Limits, Settings};
use crate::error::{AppResult, DaqError};
use crate::instrument::DeviceAdapter;
use crate::sampler::{sample_thermal, ThermalSummary};
use crate::sequencer::CancelFlag;
use crate::setpoint::Setpoint;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, warn};

/// Warm-up parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct WarmupConfig {
    /// Setpoint held during warm-up
    pub setpoint: Setpoint,
    /// How long to hold it
    pub duration: Duration,
    /// How often the setpoint is re-sent and the temperature read
    pub interval: Duration,
    /// Timeout for each thermal camera read
    pub read_timeout: Duration,
    /// Device-safe actuator bounds
    pub limits: Limits,
}

impl WarmupConfig {
    /// Warmup parameters taken from the loaded settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            setpoint: settings.acquisition.warmup_setpoint,
            duration: settings.acquisition.warmup_duration,
            interval: settings.acquisition.sampling_interval,
            read_timeout: settings.acquisition.read_timeout,
            limits: settings.limits,
        }
    }
}

/// What happened during a warm-up.
#[derive(Debug, Clone, PartialEq)]
pub struct WarmupReport {
    /// Number of times the setpoint was sent
    pub steps: usize,
    /// Last thermal reading, if any
    pub last_thermal: Option<ThermalSummary>,
    /// True if the cancel flag ended the warm-up early
    pub cancelled: bool,
}

/// Hold `config.setpoint` for `config.duration`.
///
/// Unlike a run, a device failure here is returned as an error: there is no
/// partial data worth keeping.
pub async fn run_warmup<D>(
    device: &mut D,
    config: &WarmupConfig,
    cancel: &CancelFlag,
) -> AppResult<WarmupReport>
where
    D: DeviceAdapter + ?Sized,
{
    config.setpoint.validate(&config.limits)?;
    if config.interval.is_zero() {
        return Err(DaqError::Configuration(
            "warm-up interval must be greater than zero".to_string(),
        ));
    }

    let Setpoint {
        power, flow_rate, ..
    } = config.setpoint;
    info!(power, flow_rate, duration = ?config.duration, "Warming up jet");

    let start = Instant::now();
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut report = WarmupReport {
        steps: 0,
        last_thermal: None,
        cancelled: false,
    };

    loop {
        let tick = ticker.tick().await;
        if tick.duration_since(start) >= config.duration {
            break;
        }
        if cancel.is_cancelled() {
            warn!(steps = report.steps, "Warm-up cancelled");
            report.cancelled = true;
            break;
        }

        device.set_actuators(power, flow_rate).await?;
        report.steps += 1;

        let thermal = sample_thermal(device, config.read_timeout).await?;
        info!(
            t_s = start.elapsed().as_secs_f64(),
            ts_c = thermal.max_c,
            "Warm-up"
        );
        report.last_thermal = Some(thermal);
    }

    info!(steps = report.steps, "Warm-up complete");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::SimulatedRig;

    fn config(duration_s: u64) -> WarmupConfig {
        WarmupConfig {
            setpoint: Setpoint::new(2.0, 2.0),
            duration: Duration::from_secs(duration_s),
            interval: Duration::from_secs(1),
            read_timeout: Duration::from_millis(500),
            limits: Limits::default(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_setpoint_resent_every_interval() {
        let mut rig = SimulatedRig::new(0);
        let report = run_warmup(&mut rig, &config(5), &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(report.steps, 5);
        assert!(!report.cancelled);
        assert!(report.last_thermal.is_some());
        assert_eq!(rig.commands(), vec![(2.0, 2.0); 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_bounds_setpoint_rejected_before_io() {
        let mut rig = SimulatedRig::new(0);
        let mut cfg = config(5);
        cfg.setpoint = Setpoint::new(1000.0, 2.0);
        assert!(run_warmup(&mut rig, &cfg, &CancelFlag::new()).await.is_err());
        assert!(rig.commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_warmup() {
        let mut rig = SimulatedRig::new(0);
        let cancel = CancelFlag::new();
        cancel.cancel();
        let report = run_warmup(&mut rig, &config(600), &cancel).await.unwrap();
        assert!(report.cancelled);
        assert_eq!(report.steps, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_failure_is_an_error() {
        let mut rig = SimulatedRig::new(0).fail_thermal_at(3);
        let err = run_warmup(&mut rig, &config(10), &CancelFlag::new())
            .await
            .unwrap_err();
        assert!(err.is_device_failure());
    }
}
