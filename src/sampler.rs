//! Sensor Samplers: one bounded read, reduced to a small summary.
//!
//! Each sampler issues exactly one [`DeviceAdapter::read_sensor`] call, waits at
//! most `timeout` for it, and reduces the raw reading. Nothing is buffered or
//! averaged between calls.
//!
//! ```
//! use appj_daq::instrument::{DeviceAdapter, SimulatedRig};
//! use appj_daq::sampler::{sample_spectrum, sample_thermal};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let mut rig = SimulatedRig::new(1);
//! rig.set_actuators(3.0, 2.0).await.unwrap();
//!
//! let thermal = sample_thermal(&mut rig, Duration::from_millis(200)).await.unwrap();
//! assert!(thermal.max_c >= thermal.mean_c);
//!
//! let reading = sample_spectrum(&mut rig, Duration::from_millis(200)).await.unwrap();
//! assert_eq!(reading.spectrum.intensities.len(), reading.wavelengths_nm.len());
//! # });
//! ```

use crate::error::{AppResult, DaqError};
use crate::instrument::{DeviceAdapter, RawSpectrum, SensorKind, SensorReading, ThermalFrame};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Distance from the hottest pixel at which the spatial temperature is taken.
pub const SPATIAL_OFFSET_PX: usize = 12;

/// Reduction of one thermal camera frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThermalSummary {
    /// Maximum surface temperature in °C
    pub max_c: f64,
    /// (row, col) of the hottest pixel
    pub max_pixel: (usize, usize),
    /// Frame mean in °C
    pub mean_c: f64,
    /// Mean of the pixels [`SPATIAL_OFFSET_PX`] away from the maximum in the four
    /// cardinal directions; `None` when all four fall outside the frame
    pub spatial_c: Option<f64>,
}

impl ThermalSummary {
    /// Reduce a frame. Empty or inconsistent frames are malformed device output.
    pub fn from_frame(frame: &ThermalFrame) -> AppResult<Self> {
        let device = SensorKind::ThermalCamera.to_string();
        let expected = frame.width.checked_mul(frame.height);
        if frame.pixels_c.is_empty() || expected != Some(frame.pixels_c.len()) {
            return Err(DaqError::device(
                device,
                format!(
                    "frame {}x{} carries {} pixels",
                    frame.width,
                    frame.height,
                    frame.pixels_c.len()
                ),
            ));
        }
        if frame.pixels_c.iter().any(|t| !t.is_finite()) {
            return Err(DaqError::device(device, "frame contains non-finite temperatures"));
        }

        let (max_index, max_c) = frame
            .pixels_c
            .iter()
            .copied()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |best, (i, t)| {
                if t > best.1 {
                    (i, t)
                } else {
                    best
                }
            });
        let (row, col) = (max_index / frame.width, max_index % frame.width);
        let mean_c = frame.pixels_c.iter().sum::<f64>() / frame.pixels_c.len() as f64;

        let d = SPATIAL_OFFSET_PX;
        let neighbours: Vec<f64> = [
            row.checked_sub(d).map(|r| (r, col)),
            Some((row + d, col)),
            col.checked_sub(d).map(|c| (row, c)),
            Some((row, col + d)),
        ]
        .into_iter()
        .flatten()
        .filter_map(|(r, c)| frame.at(r, c))
        .collect();
        let spatial_c = (!neighbours.is_empty())
            .then(|| neighbours.iter().sum::<f64>() / neighbours.len() as f64);
        if !mean_c.is_finite() || spatial_c.is_some_and(|t| !t.is_finite()) {
            return Err(DaqError::device(device, "frame temperatures out of range"));
        }

        Ok(Self {
            max_c,
            max_pixel: (row, col),
            mean_c,
            spatial_c,
        })
    }
}

/// Background-corrected spectrum on the run's wavelength grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrumSample {
    /// Intensities with the background removed, one per wavelength
    pub intensities: Vec<f64>,
    /// Sum of the corrected intensities
    pub total: f64,
    /// Mean raw intensity that was subtracted
    pub background: f64,
}

impl SpectrumSample {
    /// Subtract the mean raw count from every point.
    ///
    /// Non-finite counts or wavelengths, and sums that overflow, are malformed
    /// device output.
    pub fn from_raw(raw: &RawSpectrum) -> AppResult<Self> {
        let device = SensorKind::Spectrometer.to_string();
        if raw.counts.is_empty() || raw.counts.len() != raw.wavelengths_nm.len() {
            return Err(DaqError::device(
                device,
                format!(
                    "{} counts for {} wavelengths",
                    raw.counts.len(),
                    raw.wavelengths_nm.len()
                ),
            ));
        }
        if raw.counts.iter().chain(&raw.wavelengths_nm).any(|v| !v.is_finite()) {
            return Err(DaqError::device(device, "spectrum contains non-finite values"));
        }
        let background = raw.counts.iter().sum::<f64>() / raw.counts.len() as f64;
        let intensities: Vec<f64> = raw.counts.iter().map(|c| c - background).collect();
        let total: f64 = intensities.iter().sum();
        if !background.is_finite()
            || !total.is_finite()
            || intensities.iter().any(|v| !v.is_finite())
        {
            return Err(DaqError::device(device, "spectrum intensities out of range"));
        }
        Ok(Self {
            intensities,
            total,
            background,
        })
    }
}

/// A reduced spectrum plus the grid it was measured on.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumReading {
    /// Wavelength grid in nm
    pub wavelengths_nm: Vec<f64>,
    /// Background-corrected intensities
    pub spectrum: SpectrumSample,
}

async fn read_within<D>(device: &mut D, kind: SensorKind, timeout: Duration) -> AppResult<SensorReading>
where
    D: DeviceAdapter + ?Sized,
{
    tokio::time::timeout(timeout, device.read_sensor(kind))
        .await
        .map_err(|_| DaqError::ReadTimeout {
            sensor: kind,
            timeout,
        })?
}

fn wrong_kind(expected: SensorKind, reading: &SensorReading) -> DaqError {
    DaqError::device(
        expected.to_string(),
        format!("expected a {expected} reading, got {}", reading.kind()),
    )
}

/// Poll the thermal camera once and summarize the frame.
pub async fn sample_thermal<D>(device: &mut D, timeout: Duration) -> AppResult<ThermalSummary>
where
    D: DeviceAdapter + ?Sized,
{
    match read_within(device, SensorKind::ThermalCamera, timeout).await? {
        SensorReading::Thermal(frame) => ThermalSummary::from_frame(&frame),
        other => Err(wrong_kind(SensorKind::ThermalCamera, &other)),
    }
}

/// Poll the spectrometer once and remove the background.
pub async fn sample_spectrum<D>(device: &mut D, timeout: Duration) -> AppResult<SpectrumReading>
where
    D: DeviceAdapter + ?Sized,
{
    match read_within(device, SensorKind::Spectrometer, timeout).await? {
        SensorReading::Spectrum(raw) => {
            let spectrum = SpectrumSample::from_raw(&raw)?;
            Ok(SpectrumReading {
                wavelengths_nm: raw.wavelengths_nm,
                spectrum,
            })
        }
        other => Err(wrong_kind(SensorKind::Spectrometer, &other)),
    }
}
