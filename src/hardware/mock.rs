//! In-memory function generator.
//!
//! `NullGenerator` implements [`FunctionGenerator`] without any bus. It keeps
//! the applied settings, records every state-changing call, and can be told to
//! fail in a few scripted ways. Used by the runner tests and by
//! `--device null` dry runs.

use super::agilent::AGILENT_33220A_LIMITS;
use super::capabilities::FunctionGenerator;
use crate::limits::DeviceLimits;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;

/// A recorded state-changing call.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    /// `connect`
    Connect,
    /// `disconnect`
    Disconnect,
    /// `close`
    Close,
    /// `reset`
    Reset,
    /// `set_output`
    SetOutput(bool),
    /// `set_frequency`, unclipped
    SetFrequency(f64),
    /// `set_amplitude`, unclipped
    SetAmplitude(f64),
    /// `set_offset`, unclipped
    SetOffset(f64),
    /// `apply`, with the arguments as given
    Apply {
        /// Requested frequency.
        frequency: f64,
        /// Requested amplitude.
        amplitude: Option<f64>,
        /// Requested offset.
        offset: Option<f64>,
        /// Requested waveform.
        mode: Option<String>,
    },
    /// `set_display`
    SetDisplay(Vec<String>),
    /// `clear_display`
    ClearDisplay,
}

/// Scripted failure.
#[derive(Debug, Clone, PartialEq)]
pub enum FaultScenario {
    /// The Nth `apply` call (1-based) and every one after it fail.
    FailApplyAfter(u32),
    /// Every `set_output` call fails.
    FailOutput,
    /// The bus is gone: `is_connected` is false and every command fails.
    CommunicationLoss,
}

#[derive(Debug)]
struct NullState {
    connected: bool,
    output: bool,
    frequency: f64,
    amplitude: f64,
    offset: f64,
    mode: String,
    display: Vec<String>,
    calls: Vec<DeviceCall>,
    applies: u32,
    faults: Vec<FaultScenario>,
}

impl NullState {
    fn check_bus(&self) -> Result<()> {
        if !self.connected || self.faults.contains(&FaultScenario::CommunicationLoss) {
            Err(anyhow!("null generator: communication lost"))
        } else {
            Ok(())
        }
    }
}

/// Function generator that only remembers what it was told.
#[derive(Debug)]
pub struct NullGenerator {
    limits: DeviceLimits,
    state: Mutex<NullState>,
}

impl Default for NullGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl NullGenerator {
    /// Connected generator with Agilent 33220A limits at 1 kHz, 0.1 Vpp.
    pub fn new() -> Self {
        Self::with_limits(AGILENT_33220A_LIMITS)
    }

    /// Connected generator with custom limits.
    pub fn with_limits(limits: DeviceLimits) -> Self {
        Self {
            limits,
            state: Mutex::new(NullState {
                connected: true,
                output: false,
                frequency: 1000.0,
                amplitude: 0.1,
                offset: 0.0,
                mode: "SIN".to_string(),
                display: Vec::new(),
                calls: Vec::new(),
                applies: 0,
                faults: Vec::new(),
            }),
        }
    }

    /// Add a failure scenario.
    pub fn with_fault(mut self, fault: FaultScenario) -> Self {
        self.state.get_mut().faults.push(fault);
        self
    }

    /// Add a failure scenario to a generator that is already in use.
    pub async fn inject(&self, fault: FaultScenario) {
        self.state.lock().await.faults.push(fault);
    }

    /// Start with a DC offset already applied.
    pub fn with_offset(mut self, offset: f64) -> Self {
        self.state.get_mut().offset = offset;
        self
    }

    /// All recorded calls, in order.
    pub async fn calls(&self) -> Vec<DeviceCall> {
        self.state.lock().await.calls.clone()
    }

    /// Only the recorded `apply` calls.
    pub async fn applies(&self) -> Vec<DeviceCall> {
        self.calls()
            .await
            .into_iter()
            .filter(|c| matches!(c, DeviceCall::Apply { .. }))
            .collect()
    }

    /// Text currently shown on the virtual display.
    pub async fn display(&self) -> Vec<String> {
        self.state.lock().await.display.clone()
    }

    /// Current waveform mode.
    pub async fn mode(&self) -> String {
        self.state.lock().await.mode.clone()
    }
}

#[async_trait]
impl FunctionGenerator for NullGenerator {
    fn limits(&self) -> &DeviceLimits {
        &self.limits
    }

    fn modes(&self) -> &'static [&'static str] {
        &["SIN", "SQU", "RAMP", "DC"]
    }

    async fn connect(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.connected = true;
        state.calls.push(DeviceCall::Connect);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.check_bus()?;
        state.calls.push(DeviceCall::Disconnect);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.connected = false;
        state.calls.push(DeviceCall::Close);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.state.lock().await.check_bus().is_ok()
    }

    async fn identify(&self) -> Result<String> {
        self.state.lock().await.check_bus()?;
        Ok("funcgen,NullGenerator,0,0.1".to_string())
    }

    async fn reset(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.check_bus()?;
        state.output = false;
        state.frequency = 1000.0;
        state.amplitude = 0.1;
        state.offset = 0.0;
        state.mode = "SIN".to_string();
        state.calls.push(DeviceCall::Reset);
        Ok(())
    }

    async fn output(&self) -> Result<bool> {
        let state = self.state.lock().await;
        state.check_bus()?;
        Ok(state.output)
    }

    async fn set_output(&self, enabled: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        state.check_bus()?;
        if state.faults.contains(&FaultScenario::FailOutput) {
            return Err(anyhow!("null generator: injected output failure"));
        }
        state.output = enabled;
        state.calls.push(DeviceCall::SetOutput(enabled));
        Ok(())
    }

    async fn frequency(&self) -> Result<f64> {
        let state = self.state.lock().await;
        state.check_bus()?;
        Ok(state.frequency)
    }

    async fn set_frequency(&self, frequency: f64) -> Result<()> {
        let mut state = self.state.lock().await;
        state.check_bus()?;
        state.frequency = self.limits.clip_frequency(frequency);
        state.calls.push(DeviceCall::SetFrequency(frequency));
        Ok(())
    }

    async fn amplitude(&self) -> Result<f64> {
        let state = self.state.lock().await;
        state.check_bus()?;
        Ok(state.amplitude)
    }

    async fn set_amplitude(&self, amplitude: f64) -> Result<()> {
        let mut state = self.state.lock().await;
        state.check_bus()?;
        state.amplitude = self.limits.clip_amplitude(amplitude, state.offset);
        state.calls.push(DeviceCall::SetAmplitude(amplitude));
        Ok(())
    }

    async fn offset(&self) -> Result<f64> {
        let state = self.state.lock().await;
        state.check_bus()?;
        Ok(state.offset)
    }

    async fn set_offset(&self, offset: f64) -> Result<()> {
        let mut state = self.state.lock().await;
        state.check_bus()?;
        state.offset = self.limits.clip_offset(offset, state.amplitude);
        state.calls.push(DeviceCall::SetOffset(offset));
        Ok(())
    }

    async fn apply(
        &self,
        frequency: f64,
        amplitude: Option<f64>,
        offset: Option<f64>,
        mode: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        state.check_bus()?;

        state.applies += 1;
        let applies = state.applies;
        let failing = state.faults.iter().any(|fault| {
            matches!(fault, FaultScenario::FailApplyAfter(n) if applies >= *n)
        });
        if failing {
            return Err(anyhow!("null generator: injected failure on apply #{}", applies));
        }

        state.calls.push(DeviceCall::Apply {
            frequency,
            amplitude,
            offset,
            mode: mode.map(str::to_string),
        });
        state.frequency = self.limits.clip_frequency(frequency);
        if let Some(u) = amplitude {
            state.amplitude = self.limits.clip_amplitude(u, state.offset);
        }
        if let Some(o) = offset {
            state.offset = self.limits.clip_offset(o, state.amplitude);
        }
        if let Some(mode) = mode {
            state.mode = mode.to_ascii_uppercase();
        }
        Ok(())
    }

    async fn set_display(&self, lines: &[String]) -> Result<()> {
        let mut state = self.state.lock().await;
        state.check_bus()?;
        state.display = lines.to_vec();
        state.calls.push(DeviceCall::SetDisplay(lines.to_vec()));
        Ok(())
    }

    async fn clear_display(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.check_bus()?;
        state.display.clear();
        state.calls.push(DeviceCall::ClearDisplay);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_calls_and_clips() {
        let gen = NullGenerator::new().with_offset(2.0);
        gen.set_amplitude(10.0).await.unwrap();
        assert_eq!(gen.amplitude().await.unwrap(), 6.0);
        assert_eq!(gen.calls().await, vec![DeviceCall::SetAmplitude(10.0)]);
    }

    #[tokio::test]
    async fn fails_from_nth_apply() {
        let gen = NullGenerator::new().with_fault(FaultScenario::FailApplyAfter(2));
        assert!(gen.apply(100.0, Some(1.0), None, None).await.is_ok());
        assert!(gen.apply(100.0, Some(1.0), None, None).await.is_err());
        assert!(gen.apply(100.0, Some(1.0), None, None).await.is_err());
        assert_eq!(gen.applies().await.len(), 1);
    }

    #[tokio::test]
    async fn communication_loss_disconnects() {
        let gen = NullGenerator::new();
        gen.inject(FaultScenario::CommunicationLoss).await;
        assert!(!gen.is_connected().await);
        assert!(gen.set_output(true).await.is_err());
    }

    #[tokio::test]
    async fn apply_records_mode() {
        let gen = NullGenerator::new();
        gen.apply(100.0, None, None, Some("squ")).await.unwrap();
        assert_eq!(gen.mode().await, "SQU");
        assert_eq!(gen.frequency().await.unwrap(), 100.0);
    }

    #[tokio::test]
    async fn output_failure_leaves_output_unchanged() {
        let gen = NullGenerator::new().with_fault(FaultScenario::FailOutput);
        assert!(gen.set_output(true).await.is_err());
        assert!(!gen.output().await.unwrap());
        assert!(gen.apply(100.0, Some(1.0), None, None).await.is_ok());
    }
}
