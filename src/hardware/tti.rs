//! TTi TGA1230 arbitrary waveform generator (RS-232).
//!
//! The serial interface is write-only for settings: nothing but `*IDN?` can be
//! read back. The driver therefore tracks what it last sent, starting from the
//! instrument's power-on state (SINE, 10 Hz, 2 Vpp, 0 V offset, output off),
//! and clips against that cache.
//!
//! There is no remote text display; display calls succeed without doing
//! anything.

use super::capabilities::FunctionGenerator;
use super::transport::Transport;
use crate::limits::DeviceLimits;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;

/// TGA1230 envelope into 50 Ω, sine-like waveforms.
pub const TTI_TGA1230_LIMITS: DeviceLimits = DeviceLimits {
    freq_min: 1.0e-3,
    freq_max: 10.0e6,
    ampl_min: 5.0e-3,
    ampl_max: 20.0,
    freq_precision: 4,
    ampl_precision: 4,
};

const MODES: &[&str] = &[
    "SINE", "SQUARE", "TRIANG", "DC", "POSRMP", "NEGRMP", "COSINE", "HAVSIN", "HAVCOS", "SINC",
    "PULSE", "PULSTRN", "ARB", "SEQ",
];

/// Last values written to the instrument.
#[derive(Debug, Clone, PartialEq)]
struct Settings {
    frequency: f64,
    amplitude: f64,
    offset: f64,
    output: bool,
    mode: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            frequency: 10.0,
            amplitude: 2.0,
            offset: 0.0,
            output: false,
            mode: "SINE".to_string(),
        }
    }
}

/// Driver for the TTi TGA1230.
pub struct TtiTga1230 {
    transport: Box<dyn Transport>,
    settings: Mutex<Option<Settings>>,
    limits: DeviceLimits,
}

impl TtiTga1230 {
    /// Wrap an open transport. The cache starts at power-on defaults.
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            settings: Mutex::new(Some(Settings::default())),
            limits: TTI_TGA1230_LIMITS,
        }
    }

    async fn cached(&self) -> Result<Settings> {
        self.settings
            .lock()
            .await
            .clone()
            .ok_or_else(|| anyhow!("TTi TGA1230 is not connected"))
    }

    /// Send `command` and, on success, record the change in the cache.
    async fn send(&self, command: String, update: impl FnOnce(&mut Settings)) -> Result<()> {
        let mut guard = self.settings.lock().await;
        let settings = guard
            .as_mut()
            .ok_or_else(|| anyhow!("TTi TGA1230 is not connected"))?;

        self.transport
            .write(&command)
            .await
            .with_context(|| format!("TTi TGA1230: {}", command))?;
        update(settings);
        Ok(())
    }

    async fn send_plain(&self, command: &str) -> Result<()> {
        self.send(command.to_string(), |_| {}).await
    }
}

#[async_trait]
impl FunctionGenerator for TtiTga1230 {
    fn limits(&self) -> &DeviceLimits {
        &self.limits
    }

    fn modes(&self) -> &'static [&'static str] {
        MODES
    }

    async fn connect(&self) -> Result<()> {
        self.send_plain("ZLOAD OPEN").await?;
        tracing::info!("TTi TGA1230 ready");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.send_plain("LOCAL").await
    }

    async fn close(&self) -> Result<()> {
        if self.settings.lock().await.take().is_some() {
            self.transport.close().await?;
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.settings.lock().await.is_some()
    }

    async fn identify(&self) -> Result<String> {
        self.cached().await?;
        self.transport.query("*IDN?").await
    }

    async fn output(&self) -> Result<bool> {
        Ok(self.cached().await?.output)
    }

    async fn set_output(&self, enabled: bool) -> Result<()> {
        let command = if enabled { "OUTPUT ON" } else { "OUTPUT OFF" };
        self.send(command.to_string(), |s| s.output = enabled).await
    }

    async fn frequency(&self) -> Result<f64> {
        Ok(self.cached().await?.frequency)
    }

    async fn set_frequency(&self, frequency: f64) -> Result<()> {
        let f = self.limits.clip_frequency(frequency);
        let command = format!("WAVFREQ {}", self.limits.format_frequency(f));
        self.send(command, |s| s.frequency = f).await
    }

    async fn amplitude(&self) -> Result<f64> {
        Ok(self.cached().await?.amplitude)
    }

    async fn set_amplitude(&self, amplitude: f64) -> Result<()> {
        let offset = self.cached().await?.offset;
        let u = self.limits.clip_amplitude(amplitude, offset);
        let command = format!("AMPL {}", self.limits.format_voltage(u));
        self.send(command, |s| s.amplitude = u).await
    }

    async fn offset(&self) -> Result<f64> {
        Ok(self.cached().await?.offset)
    }

    async fn set_offset(&self, offset: f64) -> Result<()> {
        let amplitude = self.cached().await?.amplitude;
        let o = self.limits.clip_offset(offset, amplitude);
        let command = format!("DCOFFS {}", self.limits.format_voltage(o));
        self.send(command, |s| s.offset = o).await
    }

    async fn apply(
        &self,
        frequency: f64,
        amplitude: Option<f64>,
        offset: Option<f64>,
        mode: Option<&str>,
    ) -> Result<()> {
        if let Some(mode) = mode {
            let mode = mode.to_ascii_uppercase();
            if !MODES.contains(&mode.as_str()) {
                return Err(anyhow!(
                    "Unsupported waveform '{}', expected one of {:?}",
                    mode,
                    MODES
                ));
            }
            let command = format!("MODE {}", mode);
            self.send(command, |s| s.mode = mode).await?;
        }

        self.set_frequency(frequency).await?;
        if let Some(u) = amplitude {
            self.set_amplitude(u).await?;
        }
        if let Some(o) = offset {
            self.set_offset(o).await?;
        }
        Ok(())
    }

    async fn set_display(&self, _lines: &[String]) -> Result<()> {
        Ok(())
    }

    async fn clear_display(&self) -> Result<()> {
        Ok(())
    }
}
