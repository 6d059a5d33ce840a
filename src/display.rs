//! Status rendering for the instrument front panel and the console.
//!
//! ```text
//! device:   Growing - 29:55
//!           0.12 Vpp | 500.00 Hz
//! console:  0.12 Vpp | 500.00 Hz | 29:55
//! ```
//!
//! After a run finishes the stage reads `Finished`, the clock counts up from
//! completion and the values show as `--`.

use crate::hardware::capabilities::FunctionGenerator;
use crate::protocol::{ProtocolQueue, RunnerEvent};
use std::f64::consts::SQRT_2;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// `m:ss`; minutes are not wrapped into hours.
pub fn format_clock(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{}:{:02}", secs / 60, secs % 60)
}

fn format_value(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.2}", v),
        None => "--".to_string(),
    }
}

/// `"<U> Vpp | <F> Hz"`.
pub fn values_line(amplitude: Option<f64>, frequency: Option<f64>) -> String {
    format!(
        "{} Vpp | {} Hz",
        format_value(amplitude),
        format_value(frequency)
    )
}

/// The two front panel lines.
pub fn device_lines(
    stage: &str,
    amplitude: Option<f64>,
    frequency: Option<f64>,
    clock: Duration,
) -> [String; 2] {
    [
        format!("{} - {}", stage, format_clock(clock)),
        values_line(amplitude, frequency),
    ]
}

/// One console status line.
pub fn console_line(amplitude: Option<f64>, frequency: Option<f64>, clock: Duration) -> String {
    format!(
        "{} | {}",
        values_line(amplitude, frequency),
        format_clock(clock)
    )
}

/// RMS of a sine with peak-to-peak amplitude `vpp`.
pub fn vrms(vpp: f64) -> f64 {
    vpp / (2.0 * SQRT_2)
}

/// Stage list, point count and total duration of a queue.
pub fn summary(queue: &ProtocolQueue) -> String {
    format!(
        "{} ({} points, {})",
        queue.stage_names().join(" -> "),
        queue.len(),
        format_clock(queue.total_duration())
    )
}

/// Mirrors runner events onto the front panel and a console writer.
pub struct DisplaySink<W> {
    device: Option<Arc<dyn FunctionGenerator>>,
    out: W,
    last_stage: Option<Arc<str>>,
}

impl<W: Write> DisplaySink<W> {
    /// `device` is `None` when front panel output is disabled.
    pub fn new(device: Option<Arc<dyn FunctionGenerator>>, out: W) -> Self {
        Self {
            device,
            out,
            last_stage: None,
        }
    }

    /// Consume events until the run is over (stopped, failed or acknowledged).
    pub async fn run(mut self, mut events: broadcast::Receiver<RunnerEvent>) -> W {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Display fell behind");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            if !self.show(&event).await {
                break;
            }
        }
        self.out
    }

    /// Render one event. Returns false once nothing more will be shown.
    pub async fn show(&mut self, event: &RunnerEvent) -> bool {
        match event {
            RunnerEvent::Applied(report) => {
                let (u, f) = (Some(report.amplitude), Some(report.frequency));
                if self.last_stage.as_deref() != Some(&*report.stage) {
                    self.println(&report.stage);
                    self.last_stage = Some(Arc::clone(&report.stage));
                }
                self.panel(device_lines(&report.stage, u, f, report.time_remaining))
                    .await;
                self.status(&console_line(u, f, report.time_remaining));
                true
            }
            RunnerEvent::Paused { remaining } => {
                self.println(&format!("Paused ({} to next step)", format_clock(*remaining)));
                true
            }
            RunnerEvent::Resumed => {
                self.println("Resumed");
                true
            }
            RunnerEvent::Finished(_) => {
                self.println("Finished");
                self.println("Hit Ctrl-C to stop");
                self.panel(device_lines("Finished", None, None, Duration::ZERO))
                    .await;
                true
            }
            RunnerEvent::Elapsed { since_completion } => {
                self.panel(device_lines("Finished", None, None, *since_completion))
                    .await;
                self.status(&console_line(None, None, *since_completion));
                true
            }
            RunnerEvent::Stopped | RunnerEvent::Acknowledged => {
                self.println("");
                self.clear_panel().await;
                false
            }
            RunnerEvent::Failed(reason) => {
                self.println(&format!("Run aborted: {}", reason));
                self.clear_panel().await;
                false
            }
        }
    }

    async fn panel(&self, lines: [String; 2]) {
        if let Some(device) = &self.device {
            if let Err(err) = device.set_display(&lines).await {
                tracing::warn!(error = %format!("{:#}", err), "Failed to update device display");
            }
        }
    }

    async fn clear_panel(&self) {
        if let Some(device) = &self.device {
            if let Err(err) = device.clear_display().await {
                tracing::warn!(error = %format!("{:#}", err), "Failed to clear device display");
            }
        }
    }

    fn status(&mut self, line: &str) {
        let _ = write!(self.out, "\r{:40}\r{}", "", line);
        let _ = self.out.flush();
    }

    fn println(&mut self, line: &str) {
        let _ = writeln!(self.out, "\n{}", line);
    }
}
