//! Behavior of the open-loop sequencer against the simulated rig.
//!
//! All tests run on a paused tokio clock, so timestamps are exact.

mod common;

use appj_daq::instrument::{with_devices, SensorKind, SimulatedRig};
use appj_daq::metadata::Metadata;
use appj_daq::run::{AbortReason, RunStatus};
use appj_daq::sequencer::{CancelFlag, SequencerState};
use appj_daq::setpoint::{Setpoint, SetpointSequence};
use common::{run_on, sequencer, two_step, CancelDuringRead, SECOND};
use std::time::Duration;

fn intervals_in(setpoints: &SetpointSequence, interval: Duration) -> usize {
    let total = setpoints.total_duration(interval).as_nanos();
    total.div_ceil(interval.as_nanos()) as usize
}

#[tokio::test(start_paused = true)]
async fn two_step_sequence_gives_four_samples() {
    let mut rig = SimulatedRig::new(1);
    let run = run_on(&mut rig, &two_step(), SECOND).await;

    assert_eq!(run.status(), RunStatus::Finished);
    assert_eq!(run.samples().len(), 4);
    let commanded: Vec<(f64, f64)> = run
        .samples()
        .iter()
        .map(|s| (s.setpoint.power, s.setpoint.flow_rate))
        .collect();
    assert_eq!(
        commanded,
        vec![(10.0, 5.0), (10.0, 5.0), (20.0, 5.0), (20.0, 5.0)]
    );
    let times: Vec<Duration> = run.samples().iter().map(|s| s.elapsed).collect();
    assert_eq!(times, vec![Duration::ZERO, SECOND, 2 * SECOND, 3 * SECOND]);
    assert_eq!(run.setpoints(), &two_step());
}

#[tokio::test(start_paused = true)]
async fn sample_count_matches_elapsed_intervals() {
    let half = Duration::from_millis(500);
    let cases = vec![
        (SetpointSequence::constant(5.0, 2.0, 5 * SECOND), SECOND),
        (
            SetpointSequence::new(vec![
                Setpoint::new(1.0, 1.0),
                Setpoint::new(2.0, 1.0),
                Setpoint::new(3.0, 1.0),
            ]),
            half,
        ),
        (
            SetpointSequence::new(vec![
                Setpoint::new(4.0, 2.0).held_for(Duration::from_millis(1500)),
                Setpoint::new(6.0, 2.0),
            ]),
            SECOND,
        ),
        (two_step(), half),
    ];

    for (setpoints, interval) in cases {
        let mut rig = SimulatedRig::new(2).with_latency(Duration::from_millis(20));
        let run = run_on(&mut rig, &setpoints, interval).await;

        assert_eq!(run.status(), RunStatus::Finished);
        assert_eq!(run.samples().len(), intervals_in(&setpoints, interval));
        assert!(run
            .samples()
            .windows(2)
            .all(|w| w[0].elapsed < w[1].elapsed));
        assert_eq!(run.overrun_count(), 0);
    }
}

#[tokio::test(start_paused = true)]
async fn setpoints_without_duration_hold_one_interval() {
    let mut rig = SimulatedRig::new(3);
    let setpoints = SetpointSequence::new(vec![Setpoint::new(1.0, 1.0), Setpoint::new(2.0, 1.5)]);
    let run = run_on(&mut rig, &setpoints, SECOND).await;

    assert_eq!(run.samples().len(), 2);
    assert_eq!(run.samples()[0].setpoint.power, 1.0);
    assert_eq!(run.samples()[1].setpoint.power, 2.0);
    assert_eq!(rig.commands(), vec![(1.0, 1.0), (2.0, 1.5)]);
}

#[tokio::test(start_paused = true)]
async fn sensor_failure_on_nth_interval_keeps_previous_samples() {
    for n in 1..=4 {
        for kind in [SensorKind::ThermalCamera, SensorKind::Spectrometer] {
            let rig = SimulatedRig::new(4);
            let mut rig = match kind {
                SensorKind::ThermalCamera => rig.fail_thermal_at(n),
                SensorKind::Spectrometer => rig.fail_spectrum_at(n),
            };
            let run = run_on(&mut rig, &two_step(), SECOND).await;

            assert_eq!(run.status(), RunStatus::Aborted, "{kind} failing at {n}");
            assert_eq!(run.samples().len(), n - 1, "{kind} failing at {n}");
            match run.abort_reason() {
                Some(AbortReason::DeviceFailure { device, .. }) => {
                    assert_eq!(device, &kind.to_string())
                }
                other => panic!("unexpected abort reason {other:?}"),
            }
        }
    }
}

#[tokio::test(start_paused = true)]
async fn actuator_failure_aborts_at_its_interval() {
    // the second write happens on the third interval, when 20 W becomes due
    let mut rig = SimulatedRig::new(5).fail_actuator_at(2);
    let run = run_on(&mut rig, &two_step(), SECOND).await;

    assert_eq!(run.status(), RunStatus::Aborted);
    assert_eq!(run.samples().len(), 2);
    assert!(run.samples().iter().all(|s| s.setpoint.power == 10.0));
    assert!(matches!(
        run.abort_reason(),
        Some(AbortReason::DeviceFailure { device, .. }) if device == "jet"
    ));
}

#[tokio::test(start_paused = true)]
async fn read_timeout_aborts_the_run() {
    let mut rig = SimulatedRig::new(6).hang(SensorKind::Spectrometer);
    let run = run_on(&mut rig, &two_step(), SECOND).await;

    assert_eq!(run.status(), RunStatus::Aborted);
    assert!(run.samples().is_empty());
    match run.abort_reason() {
        Some(AbortReason::DeviceFailure { device, message }) => {
            assert_eq!(device, "spectrometer");
            assert!(message.contains("Timed out"), "{message}");
        }
        other => panic!("unexpected abort reason {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn cancel_before_first_setpoint_is_an_empty_aborted_run() {
    let mut rig = SimulatedRig::new(7);
    let mut seq = sequencer(SECOND);
    let cancel = CancelFlag::new();
    cancel.cancel();

    let run = seq
        .run(&mut rig, &two_step(), Metadata::default(), &cancel)
        .await
        .unwrap();

    assert_eq!(run.status(), RunStatus::Aborted);
    assert_eq!(run.abort_reason(), Some(&AbortReason::Cancelled));
    assert!(run.samples().is_empty());
    assert!(rig.commands().is_empty());
    assert_eq!(seq.state(), SequencerState::Aborted);
}

#[tokio::test(start_paused = true)]
async fn cancel_is_honoured_at_the_next_interval() {
    let cancel = CancelFlag::new();
    let mut device = CancelDuringRead::new(SimulatedRig::new(8), cancel.clone(), 2);

    let run = sequencer(SECOND)
        .run(&mut device, &two_step(), Metadata::default(), &cancel)
        .await
        .unwrap();

    // the interval in progress completes; the next one sees the flag
    assert_eq!(run.samples().len(), 2);
    assert_eq!(run.abort_reason(), Some(&AbortReason::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn devices_released_after_aborted_run() {
    let rig = SimulatedRig::new(9).fail_thermal_at(3);
    let handle = rig.clone();
    let mut seq = sequencer(SECOND);

    let run = with_devices(rig, |mut dev| async move {
        let run = seq
            .run(&mut dev, &two_step(), Metadata::default(), &CancelFlag::new())
            .await;
        (dev, run)
    })
    .await
    .unwrap();

    assert_eq!(run.status(), RunStatus::Aborted);
    assert_eq!(handle.current_command(), (0.0, 0.0));
    assert_eq!(handle.commands().last(), Some(&(0.0, 0.0)));
}

#[tokio::test(start_paused = true)]
async fn reset_allows_a_second_run() {
    let mut rig = SimulatedRig::new(10).fail_thermal_at(1);
    let mut seq = sequencer(SECOND);

    let first = seq
        .run(&mut rig, &two_step(), Metadata::default(), &CancelFlag::new())
        .await
        .unwrap();
    assert_eq!(first.status(), RunStatus::Aborted);

    seq.reset();
    let second = seq
        .run(&mut rig, &two_step(), Metadata::default(), &CancelFlag::new())
        .await
        .unwrap();
    assert_eq!(second.status(), RunStatus::Finished);
    assert_eq!(second.samples().len(), 4);
    assert_ne!(first.id(), second.id());
}
