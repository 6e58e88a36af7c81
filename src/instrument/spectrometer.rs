//! Spectrometer bridge driver
//!
//! Protocol, one line per command:
//!
//! - `INT <us>` sets the integration time and is acknowledged with `OK`.
//! - `WAVE?` returns the wavelength grid in nm as comma-separated values.
//! - `SPEC?` triggers an acquisition and returns raw counts on the same grid.
//!
//! The grid is read once during [`Spectrometer::configure`] and is fixed for the
//! lifetime of the connection.

use super::{expect_ack, parse_csv_floats, RawSpectrum};
use crate::adapters::LineAdapter;
use crate::error::{AppResult, DaqError};
use tracing::info;

const DEVICE: &str = "spectrometer";

/// Driver for the spectrometer bridge.
pub struct Spectrometer<A: LineAdapter> {
    adapter: A,
    wavelengths_nm: Vec<f64>,
}

impl<A: LineAdapter> Spectrometer<A> {
    /// Wrap a (not yet connected) link.
    pub fn new(adapter: A) -> Self {
        Self {
            adapter,
            wavelengths_nm: Vec::new(),
        }
    }

    /// Open the link.
    pub async fn connect(&mut self) -> AppResult<()> {
        self.adapter.connect().await
    }

    /// Close the link.
    pub async fn disconnect(&mut self) -> AppResult<()> {
        self.adapter.disconnect().await
    }

    /// Set the integration time and read the wavelength grid.
    pub async fn configure(&mut self, integration_time_us: u64) -> AppResult<()> {
        let command = format!("INT {integration_time_us}");
        let response = self.adapter.query(&command).await?;
        expect_ack(DEVICE, &command, &response)?;

        let grid = parse_csv_floats(DEVICE, &self.adapter.query("WAVE?").await?)?;
        if grid.is_empty() {
            return Err(DaqError::device(DEVICE, "empty wavelength grid"));
        }
        ensure_finite("wavelength grid", &grid)?;
        info!(
            integration_time_us,
            points = grid.len(),
            "Spectrometer configured"
        );
        self.wavelengths_nm = grid;
        Ok(())
    }

    /// The wavelength grid, empty until configured.
    pub fn wavelengths(&self) -> &[f64] {
        &self.wavelengths_nm
    }

    /// Acquire one spectrum.
    pub async fn acquire(&mut self) -> AppResult<RawSpectrum> {
        if self.wavelengths_nm.is_empty() {
            return Err(DaqError::device(DEVICE, "acquire before configure"));
        }
        let counts = parse_csv_floats(DEVICE, &self.adapter.query("SPEC?").await?)?;
        ensure_finite("spectrum", &counts)?;
        if counts.len() != self.wavelengths_nm.len() {
            return Err(DaqError::device(
                DEVICE,
                format!(
                    "spectrum has {} points, grid has {}",
                    counts.len(),
                    self.wavelengths_nm.len()
                ),
            ));
        }
        Ok(RawSpectrum {
            wavelengths_nm: self.wavelengths_nm.clone(),
            counts,
        })
    }
}

fn ensure_finite(what: &str, values: &[f64]) -> AppResult<()> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(i) => Err(DaqError::device(
            DEVICE,
            format!("{what} has non-finite value {} at index {i}", values[i]),
        )),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockAdapter;

    async fn configured(link: &MockAdapter) -> Spectrometer<MockAdapter> {
        link.push_response("OK").push_response("300,310,320");
        let mut spec = Spectrometer::new(link.clone());
        spec.connect().await.unwrap();
        spec.configure(72_000).await.unwrap();
        spec
    }

    #[tokio::test]
    async fn test_configure_reads_grid() {
        let link = MockAdapter::new();
        let spec = configured(&link).await;
        assert_eq!(spec.wavelengths(), &[300.0, 310.0, 320.0]);
        assert_eq!(link.transcript(), vec!["INT 72000", "WAVE?"]);
    }

    #[tokio::test]
    async fn test_acquire_checks_grid_length() {
        let link = MockAdapter::new();
        let mut spec = configured(&link).await;

        link.push_response("1,2,3");
        assert_eq!(spec.acquire().await.unwrap().counts, vec![1.0, 2.0, 3.0]);

        link.push_response("1,2");
        assert!(spec.acquire().await.unwrap_err().is_device_failure());
    }

    #[tokio::test]
    async fn test_non_finite_values_rejected() {
        let link = MockAdapter::new();
        let mut spec = configured(&link).await;
        for line in ["1000,NaN,1200", "1000,inf,1200", "-inf,1,2"] {
            link.push_response(line);
            let err = spec.acquire().await.unwrap_err();
            assert!(err.to_string().contains("non-finite"), "{err}");
        }

        let link = MockAdapter::new();
        link.push_response("OK").push_response("300,NaN,320");
        let mut spec = Spectrometer::new(link);
        spec.connect().await.unwrap();
        assert!(spec.configure(72_000).await.unwrap_err().is_device_failure());
        assert!(spec.wavelengths().is_empty());
    }

    #[tokio::test]
    async fn test_acquire_requires_configuration() {
        let link = MockAdapter::new();
        let mut spec = Spectrometer::new(link);
        spec.connect().await.unwrap();
        assert!(spec.acquire().await.is_err());
    }
}
