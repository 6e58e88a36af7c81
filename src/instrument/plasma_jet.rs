//! Jet power/flow controller driver
//!
//! The controller firmware accepts one command per line and acknowledges each
//! with `OK` or `ERR <reason>`:
//!
//! | Command      | Meaning                                   |
//! |--------------|-------------------------------------------|
//! | `p,<watts>`  | set jet power                              |
//! | `q,<slm>`    | set carrier gas flow                       |
//! | `d,<pct>`    | set the duty cycle of the power supply     |
//!
//! Bounds are not checked here; setpoints are validated against the configured
//! limits before a run starts.

use super::expect_ack;
use crate::adapters::LineAdapter;
use crate::error::AppResult;
use tracing::debug;

const DEVICE: &str = "jet";

/// Driver for the jet controller.
pub struct PlasmaJet<A: LineAdapter> {
    adapter: A,
}

impl<A: LineAdapter> PlasmaJet<A> {
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

    async fn command(&mut self, command: String) -> AppResult<()> {
        let response = self.adapter.query(&command).await?;
        expect_ack(DEVICE, &command, &response)
    }

    /// Set jet power in watts.
    pub async fn set_power(&mut self, watts: f64) -> AppResult<()> {
        self.command(format!("p,{watts:.2}")).await
    }

    /// Set carrier gas flow in slm.
    pub async fn set_flow(&mut self, slm: f64) -> AppResult<()> {
        self.command(format!("q,{slm:.2}")).await
    }

    /// Set the power supply duty cycle in percent.
    pub async fn set_duty_cycle(&mut self, percent: f64) -> AppResult<()> {
        self.command(format!("d,{percent:.0}")).await
    }

    /// Command power then flow. Both are always written.
    pub async fn apply(&mut self, power: f64, flow_rate: f64) -> AppResult<()> {
        self.set_power(power).await?;
        self.set_flow(flow_rate).await?;
        debug!(power, flow_rate, "Jet setpoint applied");
        Ok(())
    }

    /// Switch the plasma off (zero power, zero flow).
    pub async fn off(&mut self) -> AppResult<()> {
        self.apply(0.0, 0.0).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockAdapter;

    #[tokio::test]
    async fn test_apply_writes_power_then_flow() {
        let link = MockAdapter::new();
        link.respond_to("", "OK");
        let mut jet = PlasmaJet::new(link.clone());
        jet.connect().await.unwrap();

        jet.apply(2.5, 1.25).await.unwrap();
        jet.set_duty_cycle(100.0).await.unwrap();

        assert_eq!(link.transcript(), vec!["p,2.50", "q,1.25", "d,100"]);
    }

    #[tokio::test]
    async fn test_rejected_command_is_device_error() {
        let link = MockAdapter::new();
        link.push_response("OK").push_response("ERR flow controller fault");
        let mut jet = PlasmaJet::new(link);
        jet.connect().await.unwrap();

        let err = jet.apply(2.0, 2.0).await.unwrap_err();
        assert!(err.is_device_failure());
        assert!(err.to_string().contains("flow controller fault"));
    }
}
