//! A simulated rig that synthesizes plausible jet and sensor behavior.
//!
//! [`SimulatedRig`] stands in for [`super::DeviceContext`] during dry runs
//! (`appj --simulate`) and in tests. Readings respond to the commanded setpoint:
//! the substrate hot spot grows with power and is cooled by flow, and the
//! emission lines scale with power. Noise comes from a seeded RNG so a given
//! seed always produces the same run.
//!
//! Failures can be injected by call count, and a sensor can be made to hang
//! so that read timeouts can be exercised.

use super::{DeviceAdapter, RawSpectrum, SensorKind, SensorReading, ThermalFrame};
use crate::error::{AppResult, DaqError};
use async_trait::async_trait;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

const AMBIENT_C: f64 = 25.0;
const HOT_SPOT_SIGMA_PX: f64 = 4.0;
const DARK_COUNTS: f64 = 1000.0;
/// (wavelength nm, counts per watt): OH, N2 second positive, atomic O.
const EMISSION_LINES: [(f64, f64); 3] = [(309.0, 900.0), (337.1, 1500.0), (777.4, 600.0)];
const LINE_WIDTH_NM: f64 = 1.5;

struct RigState {
    rng: StdRng,
    latency: Duration,
    frame_width: usize,
    frame_height: usize,
    wavelengths_nm: Vec<f64>,
    power: f64,
    flow_rate: f64,
    commands: Vec<(f64, f64)>,
    actuator_calls: usize,
    thermal_reads: usize,
    spectrum_reads: usize,
    fail_actuator_at: Option<usize>,
    fail_thermal_at: Option<usize>,
    fail_spectrum_at: Option<usize>,
    hung: Option<SensorKind>,
}

/// Deterministic stand-in for the real rig.
///
/// Clones share state, so a test can keep a handle to inspect the command log
/// after the rig has been handed to the sequencer.
#[derive(Clone)]
pub struct SimulatedRig {
    state: Arc<Mutex<RigState>>,
}

impl Default for SimulatedRig {
    fn default() -> Self {
        Self::new(0)
    }
}

impl SimulatedRig {
    /// New rig with a 32x24 camera, a 200-900 nm grid and no latency.
    pub fn new(seed: u64) -> Self {
        let wavelengths_nm = (0..701).map(|i| 200.0 + i as f64).collect();
        Self {
            state: Arc::new(Mutex::new(RigState {
                rng: StdRng::seed_from_u64(seed),
                latency: Duration::ZERO,
                frame_width: 32,
                frame_height: 24,
                wavelengths_nm,
                power: 0.0,
                flow_rate: 0.0,
                commands: Vec::new(),
                actuator_calls: 0,
                thermal_reads: 0,
                spectrum_reads: 0,
                fail_actuator_at: None,
                fail_thermal_at: None,
                fail_spectrum_at: None,
                hung: None,
            })),
        }
    }

    /// Delay every device call by `latency`.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.lock().latency = latency;
        self
    }

    /// Change the camera resolution.
    pub fn with_frame_size(self, width: usize, height: usize) -> Self {
        {
            let mut state = self.lock();
            state.frame_width = width;
            state.frame_height = height;
        }
        self
    }

    /// Replace the spectrometer wavelength grid.
    pub fn with_wavelengths(self, wavelengths_nm: Vec<f64>) -> Self {
        self.lock().wavelengths_nm = wavelengths_nm;
        self
    }

    /// Make the `n`th actuator write (1-based) fail.
    pub fn fail_actuator_at(self, n: usize) -> Self {
        self.lock().fail_actuator_at = Some(n);
        self
    }

    /// Make the `n`th thermal camera read (1-based) fail.
    pub fn fail_thermal_at(self, n: usize) -> Self {
        self.lock().fail_thermal_at = Some(n);
        self
    }

    /// Make the `n`th spectrometer read (1-based) fail.
    pub fn fail_spectrum_at(self, n: usize) -> Self {
        self.lock().fail_spectrum_at = Some(n);
        self
    }

    /// Make every read of `kind` block forever.
    pub fn hang(self, kind: SensorKind) -> Self {
        self.lock().hung = Some(kind);
        self
    }

    /// Every actuator command received, in order, including the release.
    pub fn commands(&self) -> Vec<(f64, f64)> {
        self.lock().commands.clone()
    }

    /// The setpoint currently applied to the jet.
    pub fn current_command(&self) -> (f64, f64) {
        let state = self.lock();
        (state.power, state.flow_rate)
    }

    /// Number of reads attempted on `kind`.
    pub fn reads(&self, kind: SensorKind) -> usize {
        let state = self.lock();
        match kind {
            SensorKind::ThermalCamera => state.thermal_reads,
            SensorKind::Spectrometer => state.spectrum_reads,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RigState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Count a read of `kind`; returns the 1-based call number and whether it hangs.
    fn begin_read(&self, kind: SensorKind) -> (usize, bool) {
        let mut state = self.lock();
        let call = match kind {
            SensorKind::ThermalCamera => {
                state.thermal_reads += 1;
                state.thermal_reads
            }
            SensorKind::Spectrometer => {
                state.spectrum_reads += 1;
                state.spectrum_reads
            }
        };
        (call, state.hung == Some(kind))
    }

    async fn delay(&self) {
        let latency = self.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

impl RigState {
    fn thermal_frame(&mut self) -> ThermalFrame {
        let peak = 1.8 * self.power / (1.0 + 0.15 * self.flow_rate);
        let (cx, cy) = (self.frame_width as f64 / 2.0, self.frame_height as f64 / 2.0);
        let mut pixels_c = Vec::with_capacity(self.frame_width * self.frame_height);
        for row in 0..self.frame_height {
            for col in 0..self.frame_width {
                let r2 = (col as f64 - cx).powi(2) + (row as f64 - cy).powi(2);
                let heat = peak * (-r2 / (2.0 * HOT_SPOT_SIGMA_PX.powi(2))).exp();
                pixels_c.push(AMBIENT_C + heat + self.rng.gen_range(-0.05..0.05));
            }
        }
        ThermalFrame {
            width: self.frame_width,
            height: self.frame_height,
            pixels_c,
        }
    }

    fn spectrum(&mut self) -> RawSpectrum {
        let power = self.power;
        let counts = self
            .wavelengths_nm
            .iter()
            .map(|&wl| {
                let emission: f64 = EMISSION_LINES
                    .iter()
                    .map(|&(center, per_watt)| {
                        per_watt * power * (-((wl - center) / LINE_WIDTH_NM).powi(2) / 2.0).exp()
                    })
                    .sum();
                DARK_COUNTS + emission + self.rng.gen_range(-5.0..5.0)
            })
            .collect();
        RawSpectrum {
            wavelengths_nm: self.wavelengths_nm.clone(),
            counts,
        }
    }
}

fn injected(at: Option<usize>, call: usize) -> bool {
    at == Some(call)
}

#[async_trait]
impl DeviceAdapter for SimulatedRig {
    async fn set_actuators(&mut self, power: f64, flow_rate: f64) -> AppResult<()> {
        self.delay().await;
        let mut state = self.lock();
        state.actuator_calls += 1;
        if injected(state.fail_actuator_at, state.actuator_calls) {
            return Err(DaqError::device("jet", "simulated write failure"));
        }
        state.power = power;
        state.flow_rate = flow_rate;
        state.commands.push((power, flow_rate));
        debug!(power, flow_rate, "Simulated jet command");
        Ok(())
    }

    async fn read_sensor(&mut self, kind: SensorKind) -> AppResult<SensorReading> {
        let (call, hung) = self.begin_read(kind);
        if hung {
            std::future::pending::<()>().await;
        }
        self.delay().await;

        let mut state = self.lock();
        match kind {
            SensorKind::ThermalCamera => {
                if injected(state.fail_thermal_at, call) {
                    return Err(DaqError::device(kind.to_string(), "simulated read failure"));
                }
                Ok(SensorReading::Thermal(state.thermal_frame()))
            }
            SensorKind::Spectrometer => {
                if injected(state.fail_spectrum_at, call) {
                    return Err(DaqError::device(kind.to_string(), "simulated read failure"));
                }
                Ok(SensorReading::Spectrum(state.spectrum()))
            }
        }
    }

    async fn release(&mut self) -> AppResult<()> {
        let mut state = self.lock();
        state.power = 0.0;
        state.flow_rate = 0.0;
        state.commands.push((0.0, 0.0));
        debug!("Simulated rig released");
        Ok(())
    }
}
