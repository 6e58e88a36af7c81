//! Thermal camera bridge driver
//!
//! The bridge answers `FRAME?` with a single line `<width>,<height>,<t0>,<t1>,...`
//! carrying `width * height` temperatures in °C, row-major.

use super::{parse_csv_floats, ThermalFrame};
use crate::adapters::LineAdapter;
use crate::error::{AppResult, DaqError};

const DEVICE: &str = "thermal_camera";

/// Driver for the thermal camera bridge.
pub struct ThermalCamera<A: LineAdapter> {
    adapter: A,
}

impl<A: LineAdapter> ThermalCamera<A> {
    /// Wrap a (not yet connected) link.
    pub fn new(adapter: A) -> Self {
        Self { adapter }
    }

    /// Open the link.
    pub async fn connect(&mut self) -> AppResult<()> {
        self.adapter.connect().await
    }

    /// Close the link.
    pub async fn disconnect(&mut self) -> AppResult<()> {
        self.adapter.disconnect().await
    }

    /// Request and decode one frame.
    pub async fn grab_frame(&mut self) -> AppResult<ThermalFrame> {
        let line = self.adapter.query("FRAME?").await?;
        parse_frame(&line)
    }
}

/// Largest width or height accepted from the bridge.
const MAX_FRAME_DIM: f64 = 8192.0;

fn parse_frame(line: &str) -> AppResult<ThermalFrame> {
    let values = parse_csv_floats(DEVICE, line)?;
    let (header, pixels) = values.split_at(values.len().min(2));
    let [width, height] = header else {
        return Err(DaqError::device(DEVICE, "frame header missing"));
    };
    let valid_dimension = |v: f64| (1.0..=MAX_FRAME_DIM).contains(&v) && v.fract() == 0.0;
    if !valid_dimension(*width) || !valid_dimension(*height) {
        return Err(DaqError::device(
            DEVICE,
            format!("invalid frame size {width}x{height}"),
        ));
    }
    let (width, height) = (*width as usize, *height as usize);
    if width.checked_mul(height) != Some(pixels.len()) {
        return Err(DaqError::device(
            DEVICE,
            format!(
                "frame {}x{} carries {} pixels",
                width,
                height,
                pixels.len()
            ),
        ));
    }
    Ok(ThermalFrame {
        width,
        height,
        pixels_c: pixels.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockAdapter;

    #[test]
    fn test_parse_frame() {
        let frame = parse_frame("3,2,20,21,22,23,24,25").unwrap();
        assert_eq!((frame.width, frame.height), (3, 2));
        assert_eq!(frame.at(1, 2), Some(25.0));
        assert_eq!(frame.at(2, 0), None);
    }

    #[test]
    fn test_parse_frame_rejects_short_payload() {
        assert!(parse_frame("3,2,20,21").is_err());
        assert!(parse_frame("0,2").is_err());
        assert!(parse_frame("4").is_err());
        assert!(parse_frame("2.5,2,1,2,3,4,5").is_err());
        assert!(parse_frame("1e20,1e20,30").is_err());
        assert!(parse_frame("inf,1,30").is_err());
        assert!(parse_frame("NaN,1,30").is_err());
    }

    #[tokio::test]
    async fn test_grab_frame_over_link() {
        let link = MockAdapter::new();
        link.push_response("1,1,36.6");
        let mut camera = ThermalCamera::new(link.clone());
        camera.connect().await.unwrap();

        let frame = camera.grab_frame().await.unwrap();
        assert_eq!(frame.pixels_c, vec![36.6]);
        assert_eq!(link.transcript(), vec!["FRAME?"]);
    }
}
