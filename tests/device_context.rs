//! A full run over scripted serial links.

mod common;

use appj_daq::adapters::MockAdapter;
use appj_daq::data::RunRecorder;
use appj_daq::instrument::{with_devices, DeviceContext};
use appj_daq::metadata::Metadata;
use appj_daq::run::{AbortReason, RunStatus};
use appj_daq::sequencer::CancelFlag;
use common::{sequencer, two_step, SECOND};

struct Links {
    jet: MockAdapter,
    camera: MockAdapter,
    spectrometer: MockAdapter,
}

fn links() -> Links {
    let jet = MockAdapter::new();
    jet.respond_to("p,", "OK")
        .respond_to("q,", "OK")
        .respond_to("d,", "OK");
    let camera = MockAdapter::new();
    camera.respond_to("FRAME?", "3,1,24.0,61.5,30.0");
    let spectrometer = MockAdapter::new();
    spectrometer
        .respond_to("INT", "OK")
        .respond_to("WAVE?", "300,309,337.1,400")
        .respond_to("SPEC?", "1000,1800,1400,1000");
    Links {
        jet,
        camera,
        spectrometer,
    }
}

async fn open(links: &Links) -> DeviceContext {
    DeviceContext::from_links(
        Box::new(links.jet.clone()),
        Box::new(links.camera.clone()),
        Box::new(links.spectrometer.clone()),
        72_000,
        100.0,
    )
    .await
    .unwrap()
}

#[tokio::test(start_paused = true)]
async fn run_commands_jet_and_switches_it_off() {
    let links = links();
    let context = open(&links).await;
    let mut seq = sequencer(SECOND);

    let run = with_devices(context, |mut dev| async move {
        let run = seq
            .run(&mut dev, &two_step(), Metadata::default(), &CancelFlag::new())
            .await;
        (dev, run)
    })
    .await
    .unwrap();

    assert_eq!(run.status(), RunStatus::Finished);
    assert_eq!(run.samples().len(), 4);
    assert_eq!(run.wavelengths(), &[300.0, 309.0, 337.1, 400.0]);
    let first = &run.samples()[0];
    assert_eq!(first.thermal.max_c, 61.5);
    assert_eq!(first.thermal.max_pixel, (0, 1));

    assert_eq!(
        links.jet.transcript(),
        vec![
            "d,100", "p,10.00", "q,5.00", "p,20.00", "q,5.00", "p,0.00", "q,0.00", "d,100"
        ]
    );
    assert_eq!(
        links.spectrometer.transcript()[..2],
        ["INT 72000".to_string(), "WAVE?".to_string()]
    );
    assert!(!links.jet.is_connected());
    assert!(!links.camera.is_connected());
    assert!(!links.spectrometer.is_connected());
}

#[tokio::test(start_paused = true)]
async fn garbled_frame_aborts_and_still_releases() {
    let links = links();
    // one good frame, then a truncated line
    links
        .camera
        .push_response("3,1,24.0,61.5,30.0")
        .push_response("3,1,24.0");
    let context = open(&links).await;
    let mut seq = sequencer(SECOND);

    let run = with_devices(context, |mut dev| async move {
        let run = seq
            .run(&mut dev, &two_step(), Metadata::default(), &CancelFlag::new())
            .await;
        (dev, run)
    })
    .await
    .unwrap();

    assert_eq!(run.status(), RunStatus::Aborted);
    assert_eq!(run.samples().len(), 1);
    assert!(matches!(
        run.abort_reason(),
        Some(AbortReason::DeviceFailure { device, .. }) if device == "thermal_camera"
    ));
    let transcript = links.jet.transcript();
    assert_eq!(transcript[transcript.len() - 3..], ["p,0.00", "q,0.00", "d,100"]);
    assert!(!links.camera.is_connected());
}

#[tokio::test(start_paused = true)]
async fn non_finite_spectrum_aborts_and_the_run_reloads() {
    let links = links();
    let context = open(&links).await;
    links
        .spectrometer
        .push_response("1000,1800,1400,1000")
        .push_response("1000,NaN,1200,1000");
    let mut seq = sequencer(SECOND);

    let run = with_devices(context, |mut dev| async move {
        let run = seq
            .run(&mut dev, &two_step(), Metadata::default(), &CancelFlag::new())
            .await;
        (dev, run)
    })
    .await
    .unwrap();

    assert_eq!(run.status(), RunStatus::Aborted);
    assert_eq!(run.samples().len(), 1);
    assert!(matches!(
        run.abort_reason(),
        Some(AbortReason::DeviceFailure { device, .. }) if device == "spectrometer"
    ));

    let root = tempfile::tempdir().unwrap();
    let recorder = RunRecorder::new(root.path());
    let dir = recorder.persist(&run).unwrap();
    assert_eq!(RunRecorder::load(&dir).unwrap(), run);
    assert_eq!(recorder.persist(&run).unwrap(), dir);
}

#[tokio::test(start_paused = true)]
async fn oversized_frame_header_aborts_and_switches_jet_off() {
    let links = links();
    links.camera.push_response("1e20,1e20,30.0");
    let context = open(&links).await;
    let mut seq = sequencer(SECOND);

    let run = with_devices(context, |mut dev| async move {
        let run = seq
            .run(&mut dev, &two_step(), Metadata::default(), &CancelFlag::new())
            .await;
        (dev, run)
    })
    .await
    .unwrap();

    assert_eq!(run.status(), RunStatus::Aborted);
    assert!(run.samples().is_empty());
    assert!(matches!(
        run.abort_reason(),
        Some(AbortReason::DeviceFailure { device, .. }) if device == "thermal_camera"
    ));
    let transcript = links.jet.transcript();
    assert_eq!(transcript[transcript.len() - 3..], ["p,0.00", "q,0.00", "d,100"]);
}
