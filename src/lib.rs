//! Open-loop data acquisition for an atmospheric-pressure plasma jet (APPJ).
//!
//! The crate drives the jet's power and flow actuators through a predefined
//! setpoint trajectory while polling a thermal camera and an optical emission
//! spectrometer, and records every run to disk.
//!
//! - [`instrument`]: the Device Adapter ([`instrument::DeviceAdapter`]) with the
//!   serial-backed [`instrument::DeviceContext`] and the [`instrument::SimulatedRig`].
//! - [`sampler`]: one-shot thermal and spectral reads with timeouts.
//! - [`sequencer`]: the fixed-period open-loop state machine producing a [`run::Run`].
//! - [`data::storage`]: the Run Recorder.
//! - [`warmup`] and [`preview`]: the auxiliary routines behind the CLI.
//!
//! ```no_run
//! use appj_daq::config::Settings;
//! use appj_daq::data::RunRecorder;
//! use appj_daq::instrument::{with_devices, SimulatedRig};
//! use appj_daq::metadata::Metadata;
//! use appj_daq::sequencer::{CancelFlag, Sequencer, SequencerConfig};
//! use appj_daq::setpoint::{Setpoint, SetpointSequence};
//! use std::time::Duration;
//!
//! # async fn demo() -> appj_daq::error::AppResult<()> {
//! let settings = Settings::load()?;
//! let setpoints = SetpointSequence::new(vec![
//!     Setpoint::new(10.0, 5.0).held_for(Duration::from_secs(2)),
//!     Setpoint::new(20.0, 5.0).held_for(Duration::from_secs(2)),
//! ]);
//! let mut sequencer = Sequencer::new(SequencerConfig::from_settings(&settings));
//! let cancel = CancelFlag::new();
//!
//! let run = with_devices(SimulatedRig::new(0), |mut rig| async move {
//!     let run = sequencer.run(&mut rig, &setpoints, Metadata::default(), &cancel).await;
//!     (rig, run)
//! })
//! .await?;
//! RunRecorder::new(&settings.storage.output_dir).persist(&run)?;
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod config;
pub mod data;
pub mod error;
pub mod instrument;
pub mod metadata;
pub mod preview;
pub mod run;
pub mod sampler;
pub mod sequencer;
pub mod setpoint;
pub mod warmup;
