//! Timer-driven runner task.
//!
//! [`RunnerHandle::spawn`] moves a started [`ProtocolRunner`] into its own
//! task. The task is the only place the runner is touched: it sleeps until the
//! next tick deadline, serves commands arriving over an `mpsc` channel, and
//! after the run finishes emits [`RunnerEvent::Elapsed`] every refresh period
//! until acknowledged.
//!
//! The task ends once the runner is `Idle` again (stop, acknowledgement or a
//! device failure) and hands the runner back through [`RunnerHandle::join`].
//! A device failure on a timer tick has no caller to return to, so the task
//! keeps the error and `join` returns it.

use super::runner::{ProtocolRunner, RunnerEvent, RunnerSnapshot};
use super::state::RunnerState;
use crate::error::{FuncGenError, FuncGenResult};
use std::future::pending;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, Instant, Interval, MissedTickBehavior};

const COMMAND_CAPACITY: usize = 16;

type Reply = oneshot::Sender<FuncGenResult<()>>;

enum RunnerCommand {
    Pause(Reply),
    Resume(Reply),
    Stop(Reply),
    Acknowledge(Reply),
    Status(oneshot::Sender<RunnerSnapshot>),
}

/// Control handle for a runner task.
pub struct RunnerHandle {
    commands: mpsc::Sender<RunnerCommand>,
    events: broadcast::Sender<RunnerEvent>,
    task: JoinHandle<(ProtocolRunner, Option<FuncGenError>)>,
}

impl RunnerHandle {
    /// Spawn the task for `runner`, which should already be started.
    ///
    /// `finished_refresh` is the period of `Elapsed` events after completion.
    pub fn spawn(runner: ProtocolRunner, finished_refresh: Duration) -> Self {
        let (commands, rx) = mpsc::channel(COMMAND_CAPACITY);
        let events = runner.event_sender();
        let task = tokio::spawn(drive(runner, rx, finished_refresh));
        Self {
            commands,
            events,
            task,
        }
    }

    /// Receive runner events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RunnerEvent> {
        self.events.subscribe()
    }

    /// Pause the run; see [`ProtocolRunner::pause`].
    pub async fn pause(&self) -> FuncGenResult<()> {
        self.request(RunnerCommand::Pause, "pause").await
    }

    /// Resume a paused run.
    pub async fn resume(&self) -> FuncGenResult<()> {
        self.request(RunnerCommand::Resume, "resume").await
    }

    /// Stop the run and drop the remaining set-points.
    pub async fn stop(&self) -> FuncGenResult<()> {
        self.request(RunnerCommand::Stop, "stop").await
    }

    /// Acknowledge a finished run, which ends the task.
    pub async fn acknowledge(&self) -> FuncGenResult<()> {
        self.request(RunnerCommand::Acknowledge, "acknowledge").await
    }

    /// Current snapshot, or `None` once the task has ended.
    pub async fn status(&self) -> Option<RunnerSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(RunnerCommand::Status(tx)).await.ok()?;
        rx.await.ok()
    }

    /// Whether the task has ended.
    pub fn is_done(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the task to end and take the runner back.
    ///
    /// A finished run only ends once acknowledged. A device failure during a
    /// tick comes back as [`DeviceError::DeviceCommandFailed`](crate::DeviceError).
    pub async fn join(self) -> FuncGenResult<ProtocolRunner> {
        let Self { commands, task, .. } = self;
        let result = task.await;
        drop(commands);
        match result {
            Ok((_, Some(failure))) => Err(failure),
            Ok((runner, None)) => Ok(runner),
            Err(err) => {
                tracing::error!(error = %err, "Runner task ended abnormally");
                Err(FuncGenError::RunnerTask(err.to_string()))
            }
        }
    }

    async fn request(
        &self,
        command: impl FnOnce(Reply) -> RunnerCommand,
        action: &'static str,
    ) -> FuncGenResult<()> {
        // A finished task means the runner is idle.
        let gone = || FuncGenError::InvalidTransition {
            state: RunnerState::Idle,
            action,
        };
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| gone())?;
        rx.await.map_err(|_| gone())?
    }
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

async fn next_refresh(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => pending().await,
    }
}

async fn drive(
    mut runner: ProtocolRunner,
    mut commands: mpsc::Receiver<RunnerCommand>,
    finished_refresh: Duration,
) -> (ProtocolRunner, Option<FuncGenError>) {
    let mut refresh: Option<Interval> = None;
    let mut failure = None;

    while runner.state() != RunnerState::Idle {
        if runner.state() == RunnerState::Finished && refresh.is_none() {
            let mut timer = interval_at(Instant::now() + finished_refresh, finished_refresh);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            refresh = Some(timer);
        }

        tokio::select! {
            command = commands.recv() => match command {
                Some(command) => serve(&mut runner, command).await,
                None => {
                    // Every handle is gone; nobody can stop the run later.
                    if runner.state().can_stop() {
                        if let Err(err) = runner.stop().await {
                            tracing::warn!(error = %err, "Failed to stop abandoned run");
                        }
                    }
                    break;
                }
            },
            _ = until(runner.deadline()) => {
                if let Err(err) = runner.tick().await {
                    tracing::error!(error = %err, "Protocol run failed");
                    failure = Some(err);
                }
            }
            _ = next_refresh(&mut refresh) => runner.report_elapsed(),
        }
    }

    tracing::debug!(state = %runner.state(), "Runner task done");
    (runner, failure)
}

async fn serve(runner: &mut ProtocolRunner, command: RunnerCommand) {
    let (reply, result) = match command {
        RunnerCommand::Status(tx) => {
            let _ = tx.send(runner.snapshot());
            return;
        }
        RunnerCommand::Pause(tx) => (tx, runner.pause().await),
        RunnerCommand::Resume(tx) => (tx, runner.resume().await),
        RunnerCommand::Stop(tx) => (tx, runner.stop().await),
        RunnerCommand::Acknowledge(tx) => (tx, runner.acknowledge()),
    };
    // The caller may have given up waiting.
    let _ = reply.send(result);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeviceError;
    use crate::hardware::mock::{DeviceCall, FaultScenario, NullGenerator};
    use crate::protocol::runner::RunOptions;
    use crate::protocol::stage::{expand, Stage};
    use std::sync::Arc;

    async fn started(gen: Arc<NullGenerator>, points: u32) -> ProtocolRunner {
        let queue = expand(&[Stage::ramp(
            "Growing",
            1.0,
            (0.1, 500.0),
            (2.5, 500.0),
            points,
        )])
        .unwrap();
        let mut runner = ProtocolRunner::new();
        runner
            .start(queue, gen, RunOptions::default())
            .await
            .unwrap();
        runner
    }

    #[tokio::test(start_paused = true)]
    async fn runs_to_completion_on_the_timer() {
        let gen = Arc::new(NullGenerator::new());
        let handle = RunnerHandle::spawn(started(gen.clone(), 3).await, Duration::from_secs(1));
        let mut events = handle.subscribe();

        loop {
            match events.recv().await.unwrap() {
                RunnerEvent::Finished(_) => break,
                RunnerEvent::Failed(reason) => panic!("run failed: {reason}"),
                _ => {}
            }
        }

        assert_eq!(gen.applies().await.len(), 3);
        let status = handle.status().await.unwrap();
        assert_eq!(status.state, RunnerState::Finished);
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_is_reported_until_acknowledged() {
        let gen = Arc::new(NullGenerator::new());
        let handle = RunnerHandle::spawn(started(gen, 1).await, Duration::from_secs(1));
        let mut events = handle.subscribe();

        let mut elapsed = Vec::new();
        while elapsed.len() < 3 {
            if let RunnerEvent::Elapsed { since_completion } = events.recv().await.unwrap() {
                elapsed.push(since_completion.as_secs());
            }
        }
        assert_eq!(elapsed, vec![1, 2, 3]);

        handle.acknowledge().await.unwrap();
        let runner = handle.join().await.unwrap();
        assert_eq!(runner.state(), RunnerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_holds_the_timer() {
        let gen = Arc::new(NullGenerator::new());
        let handle = RunnerHandle::spawn(started(gen.clone(), 3).await, Duration::from_secs(1));

        tokio::time::sleep(Duration::from_secs(5)).await;
        handle.pause().await.unwrap();
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(gen.applies().await.len(), 1);

        let status = handle.status().await.unwrap();
        assert_eq!(status.state, RunnerState::Paused);
        assert_eq!(status.until_next_tick, Some(Duration::from_secs(15)));

        handle.resume().await.unwrap();
        tokio::time::sleep(Duration::from_secs(14)).await;
        assert_eq!(gen.applies().await.len(), 1);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(gen.applies().await.len(), 2);

        handle.stop().await.unwrap();
        let runner = handle.join().await.unwrap();
        assert_eq!(runner.state(), RunnerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn commands_after_task_end_are_rejected() {
        let gen = Arc::new(NullGenerator::new());
        let handle = RunnerHandle::spawn(started(gen, 3).await, Duration::from_secs(1));
        handle.stop().await.unwrap();

        // Give the task a chance to exit.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(handle.is_done());
        assert!(matches!(
            handle.pause().await,
            Err(FuncGenError::InvalidTransition { action: "pause", .. })
        ));
        assert!(handle.status().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn device_failure_ends_the_task() {
        let gen = Arc::new(NullGenerator::new().with_fault(FaultScenario::FailApplyAfter(2)));
        let handle = RunnerHandle::spawn(started(gen.clone(), 3).await, Duration::from_secs(1));

        let err = handle.join().await.err().unwrap();
        assert!(matches!(
            err,
            FuncGenError::Device(DeviceError::DeviceCommandFailed(_))
        ));
        assert!(err.to_string().contains("injected failure"), "got: {err}");
        assert_eq!(gen.applies().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn clean_stop_joins_without_error() {
        let gen = Arc::new(NullGenerator::new());
        let handle = RunnerHandle::spawn(started(gen, 3).await, Duration::from_secs(1));
        handle.stop().await.unwrap();
        assert!(handle.join().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_stops_the_run() {
        let gen = Arc::new(NullGenerator::new());
        let handle = RunnerHandle::spawn(started(gen.clone(), 3).await, Duration::from_secs(1));
        drop(handle);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(gen.applies().await.len(), 1);
        assert_eq!(gen.calls().await.last(), Some(&DeviceCall::SetOutput(false)));
    }
}
