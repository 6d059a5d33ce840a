//! Protocol runner state machine.
//!
//! [`ProtocolRunner`] walks a [`ProtocolQueue`] and pushes each set-point to a
//! [`FunctionGenerator`]. It does not own a timer: it exposes the instant at
//! which the next tick is due ([`ProtocolRunner::deadline`]) and whoever drives
//! it (normally [`RunnerHandle`](super::RunnerHandle)) sleeps until then and
//! calls [`ProtocolRunner::tick`].
//!
//! With an `N`-point queue, `start` applies point 0 and ticks 1 through N-1
//! apply the remaining points. Tick N finds the queue exhausted and finishes.
//!
//! Any device error during a transition drops the runner back to `Idle` and
//! is returned as [`DeviceError::DeviceCommandFailed`]. The runner never
//! retries.

use super::stage::{ProtocolQueue, SetPoint};
use super::state::RunnerState;
use crate::error::{DeviceError, FuncGenError, FuncGenResult};
use crate::hardware::capabilities::FunctionGenerator;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

const EVENT_CAPACITY: usize = 64;

/// Output handling at the points where a run stops driving the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunOptions {
    /// Keep the output enabled while paused.
    pub leave_output_on_pause: bool,
    /// Keep the output enabled after the last set-point.
    pub leave_output_on_finish: bool,
    /// Keep the output enabled after an explicit stop.
    pub leave_output_on_stop: bool,
}

/// What was just applied to the device.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    /// Stage the set-point belongs to.
    pub stage: Arc<str>,
    /// Amplitude after clipping, Vpp.
    pub amplitude: f64,
    /// Frequency after clipping, Hz.
    pub frequency: f64,
    /// Time left in the stage.
    pub time_remaining: Duration,
    /// Hold time of this set-point.
    pub tick_duration: Duration,
    /// Zero-based position in the queue.
    pub index: usize,
    /// Queue length.
    pub total: usize,
}

/// Notifications broadcast by the runner.
#[derive(Debug, Clone, PartialEq)]
pub enum RunnerEvent {
    /// A set-point was applied.
    Applied(StatusReport),
    /// The run was paused.
    Paused {
        /// Time that was left on the current set-point.
        remaining: Duration,
    },
    /// A paused run continues.
    Resumed,
    /// The run was stopped before the end of the queue.
    Stopped,
    /// The queue is exhausted. Carries the last applied set-point.
    Finished(Option<StatusReport>),
    /// Periodic report while waiting for acknowledgement.
    Elapsed {
        /// Time since the last set-point ran out.
        since_completion: Duration,
    },
    /// Finished was acknowledged; the runner is idle again.
    Acknowledged,
    /// A device command failed and the run was abandoned.
    Failed(String),
}

/// Point-in-time view of the runner.
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerSnapshot {
    /// Lifecycle state.
    pub state: RunnerState,
    /// Number of set-points applied so far.
    pub applied: usize,
    /// Queue length.
    pub total: usize,
    /// Last applied set-point.
    pub current: Option<StatusReport>,
    /// Time until the next tick (frozen while paused).
    pub until_next_tick: Option<Duration>,
}

/// Drives a function generator through a protocol.
pub struct ProtocolRunner {
    state: RunnerState,
    queue: ProtocolQueue,
    /// Index of the next set-point to apply.
    position: usize,
    device: Option<Arc<dyn FunctionGenerator>>,
    options: RunOptions,
    /// DC offset read from the device at start; amplitudes are clipped against it.
    offset: f64,
    deadline: Option<Instant>,
    paused_remaining: Option<Duration>,
    output_forced_off: bool,
    finished_at: Option<Instant>,
    current: Option<StatusReport>,
    events: broadcast::Sender<RunnerEvent>,
}

impl Default for ProtocolRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolRunner {
    /// Idle runner with no device.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: RunnerState::Idle,
            queue: ProtocolQueue::default(),
            position: 0,
            device: None,
            options: RunOptions::default(),
            offset: 0.0,
            deadline: None,
            paused_remaining: None,
            output_forced_off: false,
            finished_at: None,
            current: None,
            events,
        }
    }

    /// Receive runner events. Subscribe before `start` to see the first point.
    pub fn subscribe(&self) -> broadcast::Receiver<RunnerEvent> {
        self.events.subscribe()
    }

    pub(super) fn event_sender(&self) -> broadcast::Sender<RunnerEvent> {
        self.events.clone()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RunnerState {
        self.state
    }

    /// Output handling of the current run.
    pub fn options(&self) -> RunOptions {
        self.options
    }

    /// When the next tick is due. `None` unless running.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The last applied set-point.
    pub fn current(&self) -> Option<&StatusReport> {
        self.current.as_ref()
    }

    /// Device driven by the current (or last) run.
    pub fn device(&self) -> Option<&Arc<dyn FunctionGenerator>> {
        self.device.as_ref()
    }

    /// Time since the run finished.
    pub fn elapsed_since_finish(&self) -> Option<Duration> {
        self.finished_at.map(|at| at.elapsed())
    }

    /// Point-in-time view for status queries.
    pub fn snapshot(&self) -> RunnerSnapshot {
        let until_next_tick = match self.state {
            RunnerState::Running => self
                .deadline
                .map(|d| d.saturating_duration_since(Instant::now())),
            RunnerState::Paused => self.paused_remaining,
            _ => None,
        };
        RunnerSnapshot {
            state: self.state,
            applied: self.position,
            total: self.queue.len(),
            current: self.current.clone(),
            until_next_tick,
        }
    }

    /// `Idle -> Running`: apply the first set-point, enable the output and arm
    /// the first tick.
    pub async fn start(
        &mut self,
        queue: ProtocolQueue,
        device: Arc<dyn FunctionGenerator>,
        options: RunOptions,
    ) -> FuncGenResult<()> {
        self.require(self.state.can_start(), "start")?;
        if queue.is_empty() {
            return Err(FuncGenError::NoProtocol);
        }
        if !device.is_connected().await {
            return Err(DeviceError::NotConnected.into());
        }

        self.queue = queue;
        self.position = 0;
        self.options = options;
        self.device = Some(Arc::clone(&device));
        self.current = None;
        self.finished_at = None;
        self.paused_remaining = None;
        self.output_forced_off = false;

        self.offset = match device.offset().await {
            Ok(offset) => offset,
            Err(err) => return Err(self.fail(err)),
        };

        tracing::info!(
            points = self.queue.len(),
            duration_s = self.queue.total_duration().as_secs_f64(),
            "Starting protocol"
        );

        self.apply_next().await?;
        if let Err(err) = device.set_output(true).await {
            return Err(self.fail(err));
        }
        self.state = RunnerState::Running;
        Ok(())
    }

    /// One timer step while `Running`: apply the next set-point or finish.
    pub async fn tick(&mut self) -> FuncGenResult<()> {
        self.require(self.state == RunnerState::Running, "tick")?;

        if self.position < self.queue.len() {
            return self.apply_next().await;
        }

        self.deadline = None;
        if !self.options.leave_output_on_finish {
            if let Some(device) = self.device.clone() {
                if let Err(err) = device.set_output(false).await {
                    return Err(self.fail(err));
                }
            }
        }
        self.state = RunnerState::Finished;
        self.finished_at = Some(Instant::now());
        tracing::info!("Protocol finished");
        self.emit(RunnerEvent::Finished(self.current.clone()));
        Ok(())
    }

    /// `Running -> Paused`: suspend the tick, keeping the queue position and
    /// the time left on the current set-point.
    pub async fn pause(&mut self) -> FuncGenResult<()> {
        self.require(self.state.can_pause(), "pause")?;

        let remaining = self
            .deadline
            .take()
            .map(|d| d.saturating_duration_since(Instant::now()))
            .unwrap_or_default();
        self.paused_remaining = Some(remaining);

        if !self.options.leave_output_on_pause {
            if let Some(device) = self.device.clone() {
                if let Err(err) = device.set_output(false).await {
                    return Err(self.fail(err));
                }
            }
            self.output_forced_off = true;
        }

        self.state = RunnerState::Paused;
        tracing::info!(remaining_ms = remaining.as_millis() as u64, "Protocol paused");
        self.emit(RunnerEvent::Paused { remaining });
        Ok(())
    }

    /// `Paused -> Running`: re-arm the tick with the time that was left.
    pub async fn resume(&mut self) -> FuncGenResult<()> {
        self.require(self.state.can_resume(), "resume")?;

        if self.output_forced_off {
            if let Some(device) = self.device.clone() {
                if let Err(err) = device.set_output(true).await {
                    return Err(self.fail(err));
                }
            }
            self.output_forced_off = false;
        }

        let remaining = self.paused_remaining.take().unwrap_or_default();
        self.deadline = Some(Instant::now() + remaining);
        self.state = RunnerState::Running;
        tracing::info!("Protocol resumed");
        self.emit(RunnerEvent::Resumed);
        Ok(())
    }

    /// `Running | Paused -> Idle`: drop the rest of the queue.
    ///
    /// The runner is idle afterwards even if switching the output off fails.
    pub async fn stop(&mut self) -> FuncGenResult<()> {
        self.require(self.state.can_stop(), "stop")?;

        self.deadline = None;
        self.paused_remaining = None;
        self.queue = ProtocolQueue::default();
        self.position = 0;
        self.state = RunnerState::Idle;

        if !self.options.leave_output_on_stop {
            if let Some(device) = self.device.clone() {
                if let Err(err) = device.set_output(false).await {
                    return Err(self.fail(err));
                }
            }
        }

        tracing::info!("Protocol stopped");
        self.emit(RunnerEvent::Stopped);
        Ok(())
    }

    /// `Finished -> Idle`.
    pub fn acknowledge(&mut self) -> FuncGenResult<()> {
        self.require(self.state.can_acknowledge(), "acknowledge")?;
        self.state = RunnerState::Idle;
        self.queue = ProtocolQueue::default();
        self.position = 0;
        self.finished_at = None;
        self.emit(RunnerEvent::Acknowledged);
        Ok(())
    }

    /// Emit an `Elapsed` event if the run has finished.
    pub fn report_elapsed(&self) {
        if let Some(since_completion) = self.elapsed_since_finish() {
            self.emit(RunnerEvent::Elapsed { since_completion });
        }
    }

    /// Clip and apply `queue[position]`, then arm the next tick.
    async fn apply_next(&mut self) -> FuncGenResult<()> {
        let Some(point) = self.queue.get(self.position).cloned() else {
            return Ok(());
        };
        let Some(device) = self.device.clone() else {
            return Err(DeviceError::NotConnected.into());
        };

        let report = self.clip(&point, device.as_ref());
        if let Err(err) = device
            .apply(report.frequency, Some(report.amplitude), None, None)
            .await
        {
            return Err(self.fail(err));
        }

        tracing::debug!(
            stage = %report.stage,
            amplitude = report.amplitude,
            frequency = report.frequency,
            remaining_s = report.time_remaining.as_secs_f64(),
            "Applied set-point {}/{}",
            report.index + 1,
            report.total
        );

        self.position += 1;
        self.deadline = Some(Instant::now() + point.tick_duration);
        self.current = Some(report.clone());
        self.emit(RunnerEvent::Applied(report));
        Ok(())
    }

    fn clip(&self, point: &SetPoint, device: &dyn FunctionGenerator) -> StatusReport {
        let limits = device.limits();
        let frequency = limits.clip_frequency(point.frequency);
        let amplitude = limits.clip_amplitude(point.amplitude, self.offset);
        if frequency != point.frequency || amplitude != point.amplitude {
            tracing::warn!(
                stage = %point.stage,
                requested_amplitude = point.amplitude,
                requested_frequency = point.frequency,
                amplitude,
                frequency,
                "Set-point clipped to device limits"
            );
        }
        StatusReport {
            stage: Arc::clone(&point.stage),
            amplitude,
            frequency,
            time_remaining: point.time_remaining,
            tick_duration: point.tick_duration,
            index: self.position,
            total: self.queue.len(),
        }
    }

    /// Abandon the run after a device error.
    fn fail(&mut self, err: anyhow::Error) -> FuncGenError {
        tracing::error!(error = %format!("{:#}", err), state = %self.state, "Device command failed, run abandoned");
        self.state = RunnerState::Idle;
        self.deadline = None;
        self.paused_remaining = None;
        self.queue = ProtocolQueue::default();
        self.position = 0;
        self.emit(RunnerEvent::Failed(format!("{:#}", err)));
        DeviceError::DeviceCommandFailed(err).into()
    }

    fn require(&self, allowed: bool, action: &'static str) -> FuncGenResult<()> {
        if allowed {
            Ok(())
        } else {
            Err(FuncGenError::InvalidTransition {
                state: self.state,
                action,
            })
        }
    }

    fn emit(&self, event: RunnerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
