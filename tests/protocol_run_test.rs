//! End-to-end protocol runs against the null generator, on virtual time.

use funcgen::hardware::mock::{DeviceCall, FaultScenario, NullGenerator};
use funcgen::hardware::FunctionGenerator;
use funcgen::protocol::{
    expand, three_stage_growth, GrowthParams, ProtocolRunner, RunOptions, RunnerEvent,
    RunnerHandle, RunnerState, Stage,
};
use funcgen::{DeviceError, FuncGenError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const REFRESH: Duration = Duration::from_secs(1);

fn growing() -> Vec<Stage> {
    vec![Stage::ramp("Growing", 1.0, (0.1, 500.0), (2.5, 500.0), 3)]
}

async fn started(
    stages: &[Stage],
    gen: &Arc<NullGenerator>,
    options: RunOptions,
) -> (RunnerHandle, broadcast::Receiver<RunnerEvent>) {
    let mut runner = ProtocolRunner::new();
    let events = runner.subscribe();
    runner
        .start(
            expand(stages).unwrap(),
            gen.clone() as Arc<dyn FunctionGenerator>,
            options,
        )
        .await
        .unwrap();
    (RunnerHandle::spawn(runner, REFRESH), events)
}

fn drain(events: &mut broadcast::Receiver<RunnerEvent>) -> Vec<RunnerEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

// =============================================================================
// Complete runs
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_three_point_ramp_applies_in_order_then_switches_off() {
    let gen = Arc::new(NullGenerator::new());
    let (handle, mut events) = started(&growing(), &gen, RunOptions::default()).await;

    // 3 points x 20 s, plus the finishing tick
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(
        handle.status().await.unwrap().state,
        RunnerState::Finished
    );

    let calls = gen.calls().await;
    let amplitudes: Vec<f64> = calls
        .iter()
        .filter_map(|c| match c {
            DeviceCall::Apply { amplitude, .. } => *amplitude,
            _ => None,
        })
        .collect();
    assert_eq!(amplitudes.len(), 3);
    assert!((amplitudes[0] - 0.1).abs() < 1e-9);
    assert!((amplitudes[1] - 1.3).abs() < 1e-9);
    assert!((amplitudes[2] - 2.5).abs() < 1e-9);

    let outputs: Vec<&DeviceCall> = calls
        .iter()
        .filter(|c| matches!(c, DeviceCall::SetOutput(_)))
        .collect();
    assert_eq!(
        outputs,
        vec![&DeviceCall::SetOutput(true), &DeviceCall::SetOutput(false)]
    );
    assert_eq!(calls.last(), Some(&DeviceCall::SetOutput(false)));

    let seen = drain(&mut events);
    let applied = seen
        .iter()
        .filter(|e| matches!(e, RunnerEvent::Applied(_)))
        .count();
    assert_eq!(applied, 3);
    assert!(matches!(seen.last(), Some(RunnerEvent::Finished(Some(_)))));

    handle.acknowledge().await.unwrap();
    let runner = handle.join().await.unwrap();
    assert_eq!(runner.state(), RunnerState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_growth_preset_runs_for_its_full_duration() {
    let params = GrowthParams {
        t1: 1.0,
        t2: 1.0,
        t3: 1.0,
        dt: 30.0,
        ..Default::default()
    };
    let stages = three_stage_growth(&params).unwrap();
    let gen = Arc::new(NullGenerator::new());
    let (handle, _events) = started(&stages, &gen, RunOptions::default()).await;

    tokio::time::sleep(Duration::from_secs(179)).await;
    assert_eq!(handle.status().await.unwrap().state, RunnerState::Running);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(handle.status().await.unwrap().state, RunnerState::Finished);
    assert_eq!(gen.applies().await.len(), 6);

    // Detaching ends at F2 with the amplitude held at U2
    assert_eq!(
        gen.applies().await.last(),
        Some(&DeviceCall::Apply {
            frequency: 50.0,
            amplitude: Some(2.5),
            offset: None,
            mode: None,
        })
    );
    handle.acknowledge().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_finished_run_reports_elapsed_time_until_acknowledged() {
    let gen = Arc::new(NullGenerator::new());
    let (handle, mut events) = started(&growing(), &gen, RunOptions::default()).await;

    tokio::time::sleep(Duration::from_secs(60)).await;
    drain(&mut events);

    tokio::time::sleep(Duration::from_millis(3_500)).await;
    let elapsed: Vec<Duration> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            RunnerEvent::Elapsed { since_completion } => Some(since_completion),
            _ => None,
        })
        .collect();
    assert_eq!(elapsed.len(), 3);
    assert!(elapsed.windows(2).all(|w| w[0] < w[1]));

    handle.acknowledge().await.unwrap();
    handle.join().await.unwrap();
    assert!(matches!(events.recv().await, Ok(RunnerEvent::Acknowledged)));
}

// =============================================================================
// Operator commands
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_pause_holds_position_and_resume_continues() {
    let gen = Arc::new(NullGenerator::new());
    let (handle, _events) = started(&growing(), &gen, RunOptions::default()).await;

    tokio::time::sleep(Duration::from_secs(25)).await;
    handle.pause().await.unwrap();
    let snapshot = handle.status().await.unwrap();
    assert_eq!(snapshot.state, RunnerState::Paused);
    assert_eq!(snapshot.applied, 2);
    assert_eq!(snapshot.until_next_tick, Some(Duration::from_secs(15)));

    // Nothing happens while paused, however long it lasts
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(gen.applies().await.len(), 2);
    assert_eq!(gen.calls().await.last(), Some(&DeviceCall::SetOutput(false)));

    handle.resume().await.unwrap();
    tokio::time::sleep(Duration::from_secs(14)).await;
    assert_eq!(gen.applies().await.len(), 2);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(gen.applies().await.len(), 3);

    handle.stop().await.unwrap();
    assert!(handle.join().await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_stop_drops_remaining_points() {
    let gen = Arc::new(NullGenerator::new());
    let (handle, _events) = started(&growing(), &gen, RunOptions::default()).await;

    tokio::time::sleep(Duration::from_secs(5)).await;
    handle.stop().await.unwrap();
    let runner = handle.join().await.unwrap();
    assert_eq!(runner.state(), RunnerState::Idle);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(gen.applies().await.len(), 1);
    assert_eq!(gen.calls().await.last(), Some(&DeviceCall::SetOutput(false)));
}

#[tokio::test(start_paused = true)]
async fn test_leave_output_on_finish_keeps_output_enabled() {
    let gen = Arc::new(NullGenerator::new());
    let options = RunOptions {
        leave_output_on_finish: true,
        ..Default::default()
    };
    let (handle, _events) = started(&growing(), &gen, options).await;

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(handle.status().await.unwrap().state, RunnerState::Finished);
    assert!(gen.output().await.unwrap());
    assert!(!gen.calls().await.contains(&DeviceCall::SetOutput(false)));
    handle.acknowledge().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_commands_after_task_end_are_rejected() {
    let gen = Arc::new(NullGenerator::new());
    let (handle, _events) = started(&growing(), &gen, RunOptions::default()).await;

    handle.stop().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(handle.is_done());
    assert!(handle.resume().await.is_err());
    assert!(handle.status().await.is_none());
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_device_failure_mid_run_abandons_protocol() {
    let gen = Arc::new(NullGenerator::new().with_fault(FaultScenario::FailApplyAfter(2)));
    let (handle, mut events) = started(&growing(), &gen, RunOptions::default()).await;

    tokio::time::sleep(Duration::from_secs(21)).await;
    let err = handle.join().await.err().unwrap();
    assert!(
        matches!(err, FuncGenError::Device(DeviceError::DeviceCommandFailed(_))),
        "got: {err}"
    );
    assert_eq!(gen.applies().await.len(), 1);
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, RunnerEvent::Failed(_))));
}

#[tokio::test]
async fn test_start_on_disconnected_device_is_rejected() {
    let gen = Arc::new(NullGenerator::new().with_fault(FaultScenario::CommunicationLoss));
    let mut runner = ProtocolRunner::new();
    let err = runner
        .start(
            expand(&growing()).unwrap(),
            gen.clone() as Arc<dyn FunctionGenerator>,
            RunOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(err.is_device_error());
    assert_eq!(runner.state(), RunnerState::Idle);
    assert!(gen.applies().await.is_empty());
}
