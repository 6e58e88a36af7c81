//! Device Adapter: the jet actuators and the sensor peripherals.
//!
//! [`DeviceAdapter`] is the seam the sequencer, samplers, warm-up and preview
//! routines are written against. It exposes two primitives:
//!
//! - `set_actuators(power, flow_rate)` physically changes jet state. Repeating the
//!   same setpoint is safe.
//! - `read_sensor(kind)` returns one raw reading from a [`SensorKind`].
//!
//! Failures (timeouts, malformed responses, closed ports) surface as
//! DeviceCommunication errors; the adapter never retries on its own.
//!
//! Two implementations ship with the crate:
//!
//! - [`DeviceContext`] drives the real rig over three serial links.
//! - [`SimulatedRig`] synthesizes plausible readings for dry runs and tests.
//!
//! Device handles are explicit values, never process-wide state. Use
//! [`with_devices`] to guarantee the jet is switched off and the links closed on
//! every exit path.

use crate::adapters::{LineAdapter, SerialAdapter};
use crate::config::DeviceSettings;
use crate::error::{AppResult, DaqError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use tracing::{error, info};

pub mod mock;
pub mod plasma_jet;
pub mod spectrometer;
pub mod thermal_camera;

pub use mock::SimulatedRig;
pub use plasma_jet::PlasmaJet;
pub use spectrometer::Spectrometer;
pub use thermal_camera::ThermalCamera;

/// The sensors attached to the testbed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    /// Thermal camera looking at the substrate surface
    #[value(name = "thermal", alias = "thermal-camera")]
    ThermalCamera,
    /// Optical emission spectrometer
    Spectrometer,
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorKind::ThermalCamera => f.write_str("thermal_camera"),
            SensorKind::Spectrometer => f.write_str("spectrometer"),
        }
    }
}

/// One thermal camera frame in degrees Celsius, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct ThermalFrame {
    /// Frame width in pixels
    pub width: usize,
    /// Frame height in pixels
    pub height: usize,
    /// Temperatures in °C, `width * height` values
    pub pixels_c: Vec<f64>,
}

impl ThermalFrame {
    /// Temperature at (`row`, `col`), if inside the frame.
    pub fn at(&self, row: usize, col: usize) -> Option<f64> {
        if row < self.height && col < self.width {
            self.pixels_c.get(row * self.width + col).copied()
        } else {
            None
        }
    }
}

/// One raw spectrometer acquisition.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSpectrum {
    /// Wavelength grid in nm
    pub wavelengths_nm: Vec<f64>,
    /// Raw counts, one per wavelength
    pub counts: Vec<f64>,
}

/// A raw reading, tagged by the sensor that produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorReading {
    /// Thermal camera frame
    Thermal(ThermalFrame),
    /// Spectrometer acquisition
    Spectrum(RawSpectrum),
}

impl SensorReading {
    /// The sensor this reading came from.
    pub fn kind(&self) -> SensorKind {
        match self {
            SensorReading::Thermal(_) => SensorKind::ThermalCamera,
            SensorReading::Spectrum(_) => SensorKind::Spectrometer,
        }
    }
}

/// Point-to-point access to the jet actuators and sensors.
#[async_trait]
pub trait DeviceAdapter: Send {
    /// Command jet power (W) and carrier gas flow (slm).
    async fn set_actuators(&mut self, power: f64, flow_rate: f64) -> AppResult<()>;

    /// Block until `kind` produces a reading or its device fails.
    async fn read_sensor(&mut self, kind: SensorKind) -> AppResult<SensorReading>;

    /// Put the rig in a safe state and free the links. Defaults to switching the jet off.
    async fn release(&mut self) -> AppResult<()> {
        self.set_actuators(0.0, 0.0).await
    }
}

#[async_trait]
impl DeviceAdapter for Box<dyn DeviceAdapter> {
    async fn set_actuators(&mut self, power: f64, flow_rate: f64) -> AppResult<()> {
        (**self).set_actuators(power, flow_rate).await
    }

    async fn read_sensor(&mut self, kind: SensorKind) -> AppResult<SensorReading> {
        (**self).read_sensor(kind).await
    }

    async fn release(&mut self) -> AppResult<()> {
        (**self).release().await
    }
}

/// Run `body` with exclusive use of `devices`, then always release them.
///
/// The body takes ownership of the devices and hands them back with its result.
/// Release runs whether the body succeeded or failed; if both fail, the body's
/// error is returned and the release error is logged.
pub async fn with_devices<D, T, F, Fut>(devices: D, body: F) -> AppResult<T>
where
    D: DeviceAdapter,
    F: FnOnce(D) -> Fut,
    Fut: Future<Output = (D, AppResult<T>)>,
{
    let (mut devices, outcome) = body(devices).await;
    let released = devices.release().await;
    match (outcome, released) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(release_err)) => {
            error!("Device release failed after an earlier error: {}", release_err);
            Err(e)
        }
    }
}

/// The real rig: jet controller, thermal camera bridge and spectrometer bridge.
pub struct DeviceContext {
    jet: PlasmaJet<Box<dyn LineAdapter>>,
    camera: ThermalCamera<Box<dyn LineAdapter>>,
    spectrometer: Spectrometer<Box<dyn LineAdapter>>,
    duty_cycle_pct: f64,
}

impl DeviceContext {
    /// Open all serial links described in `settings`.
    pub async fn open(settings: &DeviceSettings) -> AppResult<Self> {
        Self::from_links(
            Box::new(SerialAdapter::from_config(&settings.jet)),
            Box::new(SerialAdapter::from_config(&settings.thermal_camera)),
            Box::new(SerialAdapter::from_config(&settings.spectrometer.link)),
            settings.spectrometer.integration_time_us,
            settings.jet_duty_cycle_pct,
        )
        .await
    }

    /// Connect the given links, set the jet duty cycle and configure the spectrometer.
    ///
    /// Links opened before a failure are closed again before the error is returned.
    pub async fn from_links(
        jet: Box<dyn LineAdapter>,
        camera: Box<dyn LineAdapter>,
        spectrometer: Box<dyn LineAdapter>,
        integration_time_us: u64,
        duty_cycle_pct: f64,
    ) -> AppResult<Self> {
        let mut context = Self {
            jet: PlasmaJet::new(jet),
            camera: ThermalCamera::new(camera),
            spectrometer: Spectrometer::new(spectrometer),
            duty_cycle_pct,
        };
        if let Err(e) = context.connect_all(integration_time_us).await {
            if let Err(close_err) = context.close().await {
                error!("Failed to close links after open error: {}", close_err);
            }
            return Err(e);
        }
        info!("All devices connected");
        Ok(context)
    }

    async fn connect_all(&mut self, integration_time_us: u64) -> AppResult<()> {
        self.jet.connect().await?;
        self.jet.set_duty_cycle(self.duty_cycle_pct).await?;
        self.camera.connect().await?;
        self.spectrometer.connect().await?;
        self.spectrometer.configure(integration_time_us).await
    }

    /// Close every link, reporting the first failure.
    pub async fn close(&mut self) -> AppResult<()> {
        let results = [
            self.jet.disconnect().await,
            self.camera.disconnect().await,
            self.spectrometer.disconnect().await,
        ];
        results.into_iter().collect()
    }
}

#[async_trait]
impl DeviceAdapter for DeviceContext {
    async fn set_actuators(&mut self, power: f64, flow_rate: f64) -> AppResult<()> {
        self.jet.apply(power, flow_rate).await
    }

    async fn read_sensor(&mut self, kind: SensorKind) -> AppResult<SensorReading> {
        match kind {
            SensorKind::ThermalCamera => self.camera.grab_frame().await.map(SensorReading::Thermal),
            SensorKind::Spectrometer => self.spectrometer.acquire().await.map(SensorReading::Spectrum),
        }
    }

    async fn release(&mut self) -> AppResult<()> {
        let mut off = self.jet.off().await;
        if off.is_ok() {
            off = self.jet.set_duty_cycle(self.duty_cycle_pct).await;
        }
        let closed = self.close().await;
        info!("Devices released");
        off.and(closed)
    }
}

/// Parse a comma-separated line of numbers from `device`.
pub(crate) fn parse_csv_floats(device: &str, line: &str) -> AppResult<Vec<f64>> {
    line.split(',')
        .map(|field| {
            let field = field.trim();
            field.parse::<f64>().map_err(|_| {
                DaqError::device(device, format!("malformed numeric field '{field}'"))
            })
        })
        .collect()
}

/// Map an `OK` / `ERR <reason>` acknowledgement to a result.
pub(crate) fn expect_ack(device: &str, command: &str, response: &str) -> AppResult<()> {
    let response = response.trim();
    if response == "OK" {
        Ok(())
    } else if let Some(reason) = response.strip_prefix("ERR") {
        Err(DaqError::device(
            device,
            format!("'{command}' rejected: {}", reason.trim()),
        ))
    } else {
        Err(DaqError::device(
            device,
            format!("unexpected response to '{command}': '{response}'"),
        ))
    }
}
