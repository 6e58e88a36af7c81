//! Actuator setpoints and the open-loop input trajectory.
//!
//! A [`Setpoint`] is a commanded (power, flow rate) pair, optionally held for a fixed
//! duration. A [`SetpointSequence`] is the ordered trajectory for one run. Sequences
//! are immutable once built; the sequencer only reads them.
//!
//! Sequences usually come from the treatment parameter spreadsheet exported as CSV:
//!
//! ```text
//! power,flow_rate,duration_s
//! 10.0,5.0,2
//! 20.0,5.0,2
//! 15.0,3.0,
//! ```
//!
//! An empty `duration_s` means "hold for one sampling interval".

use crate::config::Limits;
use crate::error::{AppResult, DaqError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// A commanded (power, flow rate) pair for the jet actuators.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Setpoint {
    /// Jet power in watts
    pub power: f64,
    /// Carrier gas flow rate in standard liters per minute
    pub flow_rate: f64,
    /// How long the setpoint is held; one sampling interval when absent
    #[serde(default, skip_serializing_if = "Option::is_none", with = "humantime_serde")]
    pub duration: Option<Duration>,
}

impl Setpoint {
    /// Setpoint held for a single sampling interval.
    pub fn new(power: f64, flow_rate: f64) -> Self {
        Self {
            power,
            flow_rate,
            duration: None,
        }
    }

    /// Same setpoint, held for `duration`.
    pub fn held_for(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// How long this setpoint stays in effect given the sampling interval.
    pub fn hold(&self, interval: Duration) -> Duration {
        self.duration.unwrap_or(interval)
    }

    /// True if both setpoints command the actuators identically.
    pub fn same_command(&self, other: &Setpoint) -> bool {
        self.power == other.power && self.flow_rate == other.flow_rate
    }

    /// Check the setpoint against device-safe bounds.
    pub fn validate(&self, limits: &Limits) -> AppResult<()> {
        check_bound("power", self.power, limits.max_power_w, "W")?;
        check_bound("flow_rate", self.flow_rate, limits.max_flow_slm, "slm")?;
        if self.duration.is_some_and(|d| d.is_zero()) {
            return Err(DaqError::Configuration(
                "setpoint duration must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn check_bound(name: &str, value: f64, max: f64, unit: &str) -> AppResult<()> {
    if !value.is_finite() || value < 0.0 || value > max {
        return Err(DaqError::Configuration(format!(
            "{name} {value} {unit} out of range (0-{max} {unit})"
        )));
    }
    Ok(())
}

/// Ordered trajectory of setpoints for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SetpointSequence {
    steps: Vec<Setpoint>,
}

impl SetpointSequence {
    /// Wrap an ordered list of setpoints.
    pub fn new(steps: Vec<Setpoint>) -> Self {
        Self { steps }
    }

    /// A single setpoint held for the whole treatment time.
    pub fn constant(power: f64, flow_rate: f64, treatment_time: Duration) -> Self {
        Self::new(vec![Setpoint::new(power, flow_rate).held_for(treatment_time)])
    }

    /// Pair independent power and flow series step by step.
    ///
    /// Series of unequal length are truncated to the shorter one.
    pub fn from_series(power: &[f64], flow_rate: &[f64], hold: Option<Duration>) -> Self {
        if power.len() != flow_rate.len() {
            warn!(
                power_steps = power.len(),
                flow_steps = flow_rate.len(),
                "Power and flow series differ in length, using the shorter one"
            );
        }
        let steps = power
            .iter()
            .zip(flow_rate)
            .map(|(&p, &q)| Setpoint {
                power: p,
                flow_rate: q,
                duration: hold,
            })
            .collect();
        Self::new(steps)
    }

    /// Load a sequence from a CSV file with `power,flow_rate[,duration_s]` columns.
    #[cfg(feature = "storage_csv")]
    pub fn from_csv_path(path: impl AsRef<std::path::Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| {
            DaqError::Configuration(format!(
                "cannot open setpoint file {}: {e}",
                path.display()
            ))
        })?;
        Self::from_csv_reader(file)
    }

    /// Parse a sequence from CSV text with `power,flow_rate[,duration_s]` columns.
    #[cfg(feature = "storage_csv")]
    pub fn from_csv_reader<R: std::io::Read>(reader: R) -> AppResult<Self> {
        #[derive(Deserialize)]
        struct Row {
            power: f64,
            flow_rate: f64,
            #[serde(default)]
            duration_s: Option<f64>,
        }

        let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut steps = Vec::new();
        for (line, row) in csv_reader.deserialize::<Row>().enumerate() {
            let row = row.map_err(|e| {
                DaqError::Configuration(format!("malformed setpoint row {}: {e}", line + 1))
            })?;
            let duration = match row.duration_s {
                Some(secs) => Some(Duration::try_from_secs_f64(secs).map_err(|_| {
                    DaqError::Configuration(format!(
                        "invalid duration {secs} s in setpoint row {}",
                        line + 1
                    ))
                })?),
                None => None,
            };
            steps.push(Setpoint {
                power: row.power,
                flow_rate: row.flow_rate,
                duration,
            });
        }
        Ok(Self::new(steps))
    }

    /// Load a sequence from CSV (unavailable without the `storage_csv` feature).
    #[cfg(not(feature = "storage_csv"))]
    pub fn from_csv_path(_path: impl AsRef<std::path::Path>) -> AppResult<Self> {
        Err(DaqError::FeatureNotEnabled("storage_csv".to_string()))
    }

    /// Reject empty sequences and any setpoint outside `limits`.
    pub fn validate(&self, limits: &Limits) -> AppResult<()> {
        if self.steps.is_empty() {
            return Err(DaqError::Configuration(
                "setpoint sequence is empty".to_string(),
            ));
        }
        for (index, step) in self.steps.iter().enumerate() {
            step.validate(limits).map_err(|e| match e {
                DaqError::Configuration(msg) => {
                    DaqError::Configuration(format!("setpoint {index}: {msg}"))
                }
                other => other,
            })?;
        }
        Ok(())
    }

    /// Time until the whole sequence is exhausted.
    pub fn total_duration(&self, interval: Duration) -> Duration {
        self.steps.iter().map(|s| s.hold(interval)).sum()
    }

    /// The setpoint in effect at `elapsed`, or `None` once the sequence is exhausted.
    pub fn setpoint_at(&self, elapsed: Duration, interval: Duration) -> Option<&Setpoint> {
        let mut window_end = Duration::ZERO;
        for step in &self.steps {
            window_end += step.hold(interval);
            if elapsed < window_end {
                return Some(step);
            }
        }
        None
    }

    /// Setpoints in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Setpoint> {
        self.steps.iter()
    }

    /// Setpoints as a slice.
    pub fn as_slice(&self) -> &[Setpoint] {
        &self.steps
    }

    /// Number of setpoints.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// True if the sequence has no setpoints.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl<'a> IntoIterator for &'a SetpointSequence {
    type Item = &'a Setpoint;
    type IntoIter = std::slice::Iter<'a, Setpoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECOND: Duration = Duration::from_secs(1);

    fn two_step() -> SetpointSequence {
        SetpointSequence::new(vec![
            Setpoint::new(10.0, 5.0).held_for(2 * SECOND),
            Setpoint::new(20.0, 5.0).held_for(2 * SECOND),
        ])
    }

    #[test]
    fn test_setpoint_at_windows() {
        let seq = two_step();
        assert_eq!(seq.total_duration(SECOND), 4 * SECOND);
        assert_eq!(seq.setpoint_at(Duration::ZERO, SECOND).unwrap().power, 10.0);
        assert_eq!(seq.setpoint_at(SECOND, SECOND).unwrap().power, 10.0);
        assert_eq!(seq.setpoint_at(2 * SECOND, SECOND).unwrap().power, 20.0);
        assert_eq!(seq.setpoint_at(3 * SECOND, SECOND).unwrap().power, 20.0);
        assert!(seq.setpoint_at(4 * SECOND, SECOND).is_none());
    }

    #[test]
    fn test_missing_duration_holds_one_interval() {
        let seq = SetpointSequence::new(vec![Setpoint::new(1.0, 1.0), Setpoint::new(2.0, 1.0)]);
        let interval = Duration::from_millis(500);
        assert_eq!(seq.total_duration(interval), SECOND);
        assert_eq!(
            seq.setpoint_at(Duration::from_millis(600), interval).unwrap().power,
            2.0
        );
    }

    #[test]
    fn test_validate_rejects_out_of_bounds() {
        let limits = Limits::default();
        assert!(two_step().validate(&limits).is_ok());

        let too_hot = SetpointSequence::new(vec![Setpoint::new(limits.max_power_w + 1.0, 1.0)]);
        let err = too_hot.validate(&limits).unwrap_err();
        assert!(matches!(err, DaqError::Configuration(_)));
        assert!(err.to_string().contains("setpoint 0"));

        let negative = SetpointSequence::new(vec![Setpoint::new(1.0, -0.5)]);
        assert!(negative.validate(&limits).is_err());

        let nan = SetpointSequence::new(vec![Setpoint::new(f64::NAN, 1.0)]);
        assert!(nan.validate(&limits).is_err());

        let zero_hold = SetpointSequence::new(vec![Setpoint::new(1.0, 1.0).held_for(Duration::ZERO)]);
        assert!(zero_hold.validate(&limits).is_err());
    }

    #[test]
    fn test_validate_rejects_empty() {
        let err = SetpointSequence::default()
            .validate(&Limits::default())
            .unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn test_from_series_truncates_to_shorter() {
        let seq = SetpointSequence::from_series(&[1.0, 2.0, 3.0], &[4.0, 5.0], None);
        assert_eq!(seq.len(), 2);
        assert_eq!(seq.as_slice()[1], Setpoint::new(2.0, 5.0));
    }

    #[test]
    fn test_constant_treatment() {
        let seq = SetpointSequence::constant(2.0, 2.0, Duration::from_secs(30));
        assert_eq!(seq.len(), 1);
        assert_eq!(seq.total_duration(SECOND), Duration::from_secs(30));
    }

    #[cfg(feature = "storage_csv")]
    #[test]
    fn test_from_csv_reader() {
        let text = "power,flow_rate,duration_s\n10,5,2\n20, 5, 2.5\n15,3,\n";
        let seq = SetpointSequence::from_csv_reader(text.as_bytes()).unwrap();
        assert_eq!(seq.len(), 3);
        assert_eq!(seq.as_slice()[1].duration, Some(Duration::from_millis(2500)));
        assert_eq!(seq.as_slice()[2].duration, None);
    }

    #[cfg(feature = "storage_csv")]
    #[test]
    fn test_from_csv_reader_rejects_garbage() {
        let text = "power,flow_rate\nten,5\n";
        let err = SetpointSequence::from_csv_reader(text.as_bytes()).unwrap_err();
        assert!(matches!(err, DaqError::Configuration(_)));

        let text = "power,flow_rate,duration_s\n10,5,-1\n";
        assert!(SetpointSequence::from_csv_reader(text.as_bytes()).is_err());
    }
}
