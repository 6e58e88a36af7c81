//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use appj_daq::config::Limits;
use appj_daq::error::AppResult;
use appj_daq::instrument::{DeviceAdapter, SensorKind, SensorReading, SimulatedRig};
use appj_daq::metadata::Metadata;
use appj_daq::run::Run;
use appj_daq::sequencer::{CancelFlag, Sequencer, SequencerConfig};
use appj_daq::setpoint::{Setpoint, SetpointSequence};
use async_trait::async_trait;
use std::time::Duration;

pub const SECOND: Duration = Duration::from_secs(1);

/// `[(10 W, 5, 2 s), (20 W, 5, 2 s)]`
pub fn two_step() -> SetpointSequence {
    SetpointSequence::new(vec![
        Setpoint::new(10.0, 5.0).held_for(2 * SECOND),
        Setpoint::new(20.0, 5.0).held_for(2 * SECOND),
    ])
}

pub fn sequencer(interval: Duration) -> Sequencer {
    Sequencer::new(SequencerConfig {
        interval,
        read_timeout: interval / 4,
        limits: Limits::default(),
    })
}

/// Run `setpoints` on `device` with a fresh sequencer and no cancellation.
pub async fn run_on<D: DeviceAdapter>(
    device: &mut D,
    setpoints: &SetpointSequence,
    interval: Duration,
) -> Run {
    sequencer(interval)
        .run(device, setpoints, Metadata::default(), &CancelFlag::new())
        .await
        .expect("run should start")
}

/// Wraps a [`SimulatedRig`] and raises the cancel flag during the `n`th thermal read.
pub struct CancelDuringRead {
    pub rig: SimulatedRig,
    pub cancel: CancelFlag,
    pub at_read: usize,
    reads: usize,
}

impl CancelDuringRead {
    pub fn new(rig: SimulatedRig, cancel: CancelFlag, at_read: usize) -> Self {
        Self {
            rig,
            cancel,
            at_read,
            reads: 0,
        }
    }
}

#[async_trait]
impl DeviceAdapter for CancelDuringRead {
    async fn set_actuators(&mut self, power: f64, flow_rate: f64) -> AppResult<()> {
        self.rig.set_actuators(power, flow_rate).await
    }

    async fn read_sensor(&mut self, kind: SensorKind) -> AppResult<SensorReading> {
        if kind == SensorKind::ThermalCamera {
            self.reads += 1;
            if self.reads == self.at_read {
                self.cancel.cancel();
            }
        }
        self.rig.read_sensor(kind).await
    }
}
