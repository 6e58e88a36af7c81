//! CLI entry point for the APPJ acquisition tools.
//!
//! ```bash
//! # hold the nominal setpoint until the substrate settles
//! appj warmup --duration 10m
//!
//! # step response from a setpoint file, saved under ExperimentalData/
//! appj run --setpoints steps.csv --label Sample12 --note wafer=Si-0042
//!
//! # constant treatment: 3 W, 2 slm for 60 s
//! appj run --power 3 --flow 2 --time 60s
//!
//! # watch the spectrometer for 30 s without recording
//! appj preview --sensor spectrometer --duration 30s
//!
//! # any of the above without hardware
//! appj --simulate run --power 3 --flow 2 --time 10s
//! ```
//!
//! Ctrl-C stops a warm-up, run or preview at the next interval; an interrupted
//! run is still saved, flagged as aborted.

use anyhow::{bail, Context, Result};
use appj_daq::config::Settings;
use appj_daq::data::{RunRecorder, SavedTo};
use appj_daq::instrument::{with_devices, DeviceAdapter, DeviceContext, SensorKind, SimulatedRig};
use appj_daq::metadata::MetadataBuilder;
use appj_daq::preview::{run_preview, PreviewConfig, PreviewReading};
use appj_daq::sequencer::{CancelFlag, Sequencer, SequencerConfig};
use appj_daq::setpoint::{Setpoint, SetpointSequence};
use appj_daq::warmup::{run_warmup, WarmupConfig};
use clap::{Parser, Subcommand};
use humantime_serde::re::humantime;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "appj")]
#[command(about = "Open-loop acquisition for the APPJ testbed", long_about = None)]
struct Cli {
    /// Settings file (defaults to config/appj.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use the simulated rig instead of the serial devices
    #[arg(long, global = true)]
    simulate: bool,

    /// RNG seed for the simulated rig
    #[arg(long, global = true, default_value_t = 0)]
    seed: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Hold the nominal setpoint for a fixed time
    Warmup {
        /// Jet power in W (defaults to acquisition.warmup_setpoint)
        #[arg(long)]
        power: Option<f64>,

        /// Flow rate in slm (defaults to acquisition.warmup_setpoint)
        #[arg(long)]
        flow: Option<f64>,

        /// Warm-up time, e.g. "10m"
        #[arg(long, value_parser = humantime::parse_duration)]
        duration: Option<Duration>,
    },

    /// Run a setpoint sequence and save the result
    Run {
        /// CSV file with power,flow_rate[,duration_s] columns
        #[arg(long, conflicts_with_all = ["power", "flow", "time"])]
        setpoints: Option<PathBuf>,

        /// Constant jet power in W
        #[arg(long, requires_all = ["flow", "time"])]
        power: Option<f64>,

        /// Constant flow rate in slm
        #[arg(long, requires_all = ["power", "time"])]
        flow: Option<f64>,

        /// Treatment time for a constant setpoint, e.g. "60s"
        #[arg(long, value_parser = humantime::parse_duration, requires_all = ["power", "flow"])]
        time: Option<Duration>,

        /// Sampling interval (defaults to acquisition.sampling_interval)
        #[arg(long, value_parser = humantime::parse_duration)]
        interval: Option<Duration>,

        /// Sample label appended to the output folder name
        #[arg(long)]
        label: Option<String>,

        /// Run description
        #[arg(long)]
        description: Option<String>,

        /// Extra key=value parameters stored with the run
        #[arg(long = "note")]
        notes: Vec<String>,
    },

    /// Poll one sensor and print readings without saving
    Preview {
        /// Sensor to poll
        #[arg(long, value_enum)]
        sensor: SensorKind,

        /// Preview time, e.g. "30s"
        #[arg(long, value_parser = humantime::parse_duration)]
        duration: Duration,

        /// Polling period (defaults to acquisition.sampling_interval)
        #[arg(long, value_parser = humantime::parse_duration)]
        interval: Option<Duration>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }
    .context("Failed to load settings")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&settings.application.log_level)),
        )
        .init();
    info!("{} v{}", settings.application.name, env!("CARGO_PKG_VERSION"));

    // Device I/O is strictly sequential; one thread is enough.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    runtime.block_on(dispatch(cli, settings))
}

async fn dispatch(cli: Cli, settings: Settings) -> Result<()> {
    let cancel = CancelFlag::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping at the next interval");
            on_interrupt.cancel();
        }
    });

    match cli.command {
        Commands::Warmup {
            power,
            flow,
            duration,
        } => {
            let mut config = WarmupConfig::from_settings(&settings);
            config.setpoint = Setpoint::new(
                power.unwrap_or(config.setpoint.power),
                flow.unwrap_or(config.setpoint.flow_rate),
            );
            config.duration = duration.unwrap_or(config.duration);
            config
                .setpoint
                .validate(&config.limits)
                .context("Invalid warm-up setpoint")?;

            let devices = open_devices(&settings, cli.simulate, cli.seed).await?;
            let report = with_devices(devices, |mut dev| async move {
                let report = run_warmup(&mut dev, &config, &cancel).await;
                (dev, report)
            })
            .await
            .context("Warm-up failed")?;
            if let Some(thermal) = report.last_thermal {
                println!("Warm-up done after {} steps, Ts = {:.2} °C", report.steps, thermal.max_c);
            }
            Ok(())
        }

        Commands::Run {
            setpoints,
            power,
            flow,
            time,
            interval,
            label,
            description,
            notes,
        } => {
            let sequence = match (setpoints, power, flow, time) {
                (Some(path), ..) => SetpointSequence::from_csv_path(&path)
                    .with_context(|| format!("Failed to read setpoints from {}", path.display()))?,
                (None, Some(p), Some(q), Some(t)) => SetpointSequence::constant(p, q, t),
                _ => bail!("Provide either --setpoints or --power, --flow and --time"),
            };

            let mut builder = MetadataBuilder::new();
            if let Some(label) = &label {
                builder = builder.label(label);
            }
            if let Some(description) = &description {
                builder = builder.description(description);
            }
            for note in &notes {
                builder = builder.note(note).map_err(anyhow::Error::msg)?;
            }
            let metadata = builder.build();

            let mut config = SequencerConfig::from_settings(&settings);
            config.interval = interval.unwrap_or(config.interval);
            let mut sequencer = Sequencer::new(config);
            sequencer
                .validate(&sequence, &metadata)
                .context("Invalid run configuration")?;

            let devices = open_devices(&settings, cli.simulate, cli.seed).await?;
            let run = with_devices(devices, |mut dev| async move {
                let run = sequencer.run(&mut dev, &sequence, metadata, &cancel).await;
                (dev, run)
            })
            .await
            .context("Run could not start")?;

            println!(
                "Run {} {}: {} samples ({} overruns), CEM43 = {:.4} min",
                run.id(),
                run.status(),
                run.samples().len(),
                run.overrun_count(),
                run.thermal_dose()
            );

            let recorder = RunRecorder::new(&settings.storage.output_dir);
            let fallback = RunRecorder::new(std::env::temp_dir().join("appj_unsaved"));
            match recorder
                .persist_or_fallback(&run, &fallback)
                .with_context(|| format!("Failed to save run {}", run.id()))?
            {
                SavedTo::Primary(dir) => println!("Saved to {}", dir.display()),
                SavedTo::Fallback { path, error } => {
                    println!("Saved to {}", path.display());
                    bail!(
                        "Run {} could not be saved to {}: {error}",
                        run.id(),
                        recorder.root().display()
                    );
                }
            }
            if let Some(reason) = run.abort_reason() {
                bail!("Run aborted: {reason}");
            }
            Ok(())
        }

        Commands::Preview {
            sensor,
            duration,
            interval,
        } => {
            let config = PreviewConfig {
                sensor,
                duration,
                interval: interval.unwrap_or(settings.acquisition.sampling_interval),
                read_timeout: settings.acquisition.read_timeout,
            };
            let devices = open_devices(&settings, cli.simulate, cli.seed).await?;
            with_devices(devices, |mut dev| async move {
                let count = run_preview(&mut dev, &config, &cancel, print_reading).await;
                (dev, count)
            })
            .await
            .context("Preview failed")?;
            Ok(())
        }
    }
}

async fn open_devices(
    settings: &Settings,
    simulate: bool,
    seed: u64,
) -> Result<Box<dyn DeviceAdapter>> {
    if simulate {
        info!(seed, "Using simulated rig");
        return Ok(Box::new(
            SimulatedRig::new(seed).with_latency(Duration::from_millis(40)),
        ));
    }
    let context = DeviceContext::open(&settings.devices)
        .await
        .context("Failed to open devices")?;
    Ok(Box::new(context))
}

fn print_reading(reading: &PreviewReading) {
    match reading {
        PreviewReading::Thermal { elapsed, summary } => {
            let spatial = summary
                .spatial_c
                .map(|t| format!("{t:.2}"))
                .unwrap_or_else(|| "-".to_string());
            println!(
                "t = {:7.2} s  Ts = {:6.2} °C at {:?}  mean = {:6.2} °C  spatial = {}",
                elapsed.as_secs_f64(),
                summary.max_c,
                summary.max_pixel,
                summary.mean_c,
                spatial
            );
        }
        PreviewReading::Spectrum { elapsed, reading } => {
            let peak = reading
                .spectrum
                .intensities
                .iter()
                .zip(&reading.wavelengths_nm)
                .max_by(|a, b| a.0.total_cmp(b.0))
                .map(|(_, wl)| *wl);
            println!(
                "t = {:7.2} s  I = {:10.1}  background = {:8.1}  peak = {} nm",
                elapsed.as_secs_f64(),
                reading.spectrum.total,
                reading.spectrum.background,
                peak.map(|wl| format!("{wl:.1}")).unwrap_or_else(|| "-".to_string())
            );
        }
    }
}
