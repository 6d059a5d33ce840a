//! Driver command sequences over a scripted transport, including a protocol
//! run through the real Agilent driver.

use funcgen::display::DisplaySink;
use funcgen::hardware::transport::MockTransport;
use funcgen::hardware::{Agilent33220A, FunctionGenerator, TtiTga1230};
use funcgen::protocol::{expand, ProtocolRunner, RunOptions, RunnerHandle, RunnerState, Stage};
use std::sync::Arc;
use std::time::Duration;

async fn agilent() -> (Arc<Agilent33220A>, MockTransport) {
    let mock = MockTransport::new();
    mock.respond("VOLT:OFFS?", "+0.00000000000000E+00").await;
    mock.respond("VOLT?", "+1.00000000000000E-01").await;
    mock.respond("*IDN?", "Agilent Technologies,33220A,MY44012345,2.02-2.02-22-2")
        .await;
    (Arc::new(Agilent33220A::new(Box::new(mock.clone()))), mock)
}

// =============================================================================
// Agilent 33220A
// =============================================================================

#[tokio::test]
async fn test_agilent_manual_session() {
    let (gen, mock) = agilent().await;

    gen.connect().await.unwrap();
    assert!(gen.identify().await.unwrap().contains("33220A"));
    gen.apply(1e3, Some(2.0), Some(0.5), Some("squ")).await.unwrap();
    gen.set_output(true).await.unwrap();
    gen.disconnect().await.unwrap();
    gen.close().await.unwrap();

    assert_eq!(
        mock.sent().await,
        vec![
            "SYST:COMM:RLST REM",
            "*IDN?",
            "VOLT:OFFS?",
            "APPL:SQU 1000.000000, 2.0000, 0.5000",
            "OUTP ON",
            "SYST:COMM:RLST LOC",
        ]
    );
    assert!(mock.is_closed().await);
    assert!(!gen.is_connected().await);
    assert!(gen.set_output(false).await.is_err());
}

#[tokio::test]
async fn test_agilent_failed_write_names_the_command() {
    let (gen, mock) = agilent().await;
    mock.fail_on("OUTP").await;

    let err = gen.set_output(true).await.unwrap_err();
    assert!(format!("{:#}", err).contains("OUTP ON"), "got: {err:#}");
}

#[tokio::test(start_paused = true)]
async fn test_protocol_run_over_scpi() {
    let (gen, mock) = agilent().await;
    let device: Arc<dyn FunctionGenerator> = gen.clone();
    device.connect().await.unwrap();
    mock.clear().await;

    let queue = expand(&[Stage::ramp("Growing", 1.0, (0.1, 500.0), (2.5, 500.0), 3)]).unwrap();
    let mut runner = ProtocolRunner::new();
    let sink = tokio::spawn(DisplaySink::new(Some(device.clone()), Vec::new()).run(runner.subscribe()));
    runner
        .start(queue, device.clone(), RunOptions::default())
        .await
        .unwrap();
    let handle = RunnerHandle::spawn(runner, Duration::from_secs(1));

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(handle.status().await.unwrap().state, RunnerState::Finished);
    handle.acknowledge().await.unwrap();
    handle.join().await.unwrap();
    sink.await.unwrap();

    let sent = mock.sent().await;
    let commands: Vec<&str> = sent
        .iter()
        .map(String::as_str)
        .filter(|c| c.starts_with("APPL") || c.starts_with("OUTP"))
        .collect();
    assert_eq!(
        commands,
        vec![
            "APPL:SIN 500.000000, 0.1000",
            "OUTP ON",
            "APPL:SIN 500.000000, 1.3000",
            "APPL:SIN 500.000000, 2.5000",
            "OUTP OFF",
        ]
    );
    assert!(sent.contains(&"DISP:TEXT 'Growing - 1:00\r0.10 Vpp | 500.00 Hz'".to_string()));
    assert_eq!(sent.last().map(String::as_str), Some("DISP:TEXT:CLE"));
}

// =============================================================================
// TTi TGA1230
// =============================================================================

#[tokio::test]
async fn test_tti_manual_session() {
    let mock = MockTransport::new();
    mock.respond("*IDN?", "THURLBY THANDAR, TGA1230, 0, 1.10").await;
    let gen = TtiTga1230::new(Box::new(mock.clone()));

    gen.connect().await.unwrap();
    assert!(gen.identify().await.unwrap().contains("TGA1230"));
    gen.apply(500.0, Some(30.0), None, Some("sine")).await.unwrap();
    gen.set_offset(9.0).await.unwrap();
    gen.set_output(true).await.unwrap();
    gen.set_display(&["ignored".to_string()]).await.unwrap();
    gen.disconnect().await.unwrap();
    gen.close().await.unwrap();

    assert_eq!(
        mock.sent().await,
        vec![
            "ZLOAD OPEN",
            "*IDN?",
            "MODE SINE",
            "WAVFREQ 500.0000",
            "AMPL 30.0000",
            "DCOFFS 5.0000",
            "OUTPUT ON",
            "LOCAL",
        ]
    );
    assert!(mock.is_closed().await);
}

#[tokio::test]
async fn test_tti_cache_is_unchanged_after_failed_write() {
    let mock = MockTransport::new();
    let gen = TtiTga1230::new(Box::new(mock.clone()));
    mock.fail_on("AMPL").await;

    assert!(gen.set_amplitude(5.0).await.is_err());
    assert_eq!(gen.amplitude().await.unwrap(), 2.0);
}
