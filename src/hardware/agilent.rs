//! Agilent 33220A 20 MHz function/arbitrary waveform generator.
//!
//! SCPI over LAN (or any [`Transport`]). Ranges below assume a 50 Ω load.
//!
//! The instrument can be queried, so clipping always reads the value currently
//! applied on the other axis before writing:
//!
//! ```text
//!   set_amplitude(u):  VOLT:OFFS?  ->  VOLT <clip(u, offset)>
//!   set_offset(o):     VOLT?       ->  VOLT:OFFS <clip(o, amplitude)>
//! ```

use super::capabilities::FunctionGenerator;
use super::transport::Transport;
use crate::limits::DeviceLimits;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};

/// 33220A envelope into 50 Ω.
pub const AGILENT_33220A_LIMITS: DeviceLimits = DeviceLimits {
    freq_min: 1.0e-6,
    freq_max: 2.0e7,
    ampl_min: 1.0e-2,
    ampl_max: 5.0,
    freq_precision: 6,
    ampl_precision: 4,
};

const MODES: &[&str] = &["SIN", "SQU", "RAMP", "DC", "NOIS", "PULS", "USER"];

/// Driver for the Agilent 33220A.
pub struct Agilent33220A {
    transport: Box<dyn Transport>,
    open: AtomicBool,
    limits: DeviceLimits,
}

impl Agilent33220A {
    /// Wrap an open transport.
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            open: AtomicBool::new(true),
            limits: AGILENT_33220A_LIMITS,
        }
    }

    fn bus(&self) -> Result<&dyn Transport> {
        if self.open.load(Ordering::Acquire) {
            Ok(self.transport.as_ref())
        } else {
            Err(anyhow!("Agilent 33220A is not connected"))
        }
    }

    async fn write(&self, command: &str) -> Result<()> {
        self.bus()?
            .write(command)
            .await
            .with_context(|| format!("Agilent 33220A: {}", command))
    }

    async fn query_f64(&self, query: &str) -> Result<f64> {
        let response = self.bus()?.query(query).await?;
        response
            .trim()
            .parse::<f64>()
            .with_context(|| format!("Failed to parse '{}' as f64 from query: {}", response, query))
    }

    fn resolve_mode(&self, mode: Option<&str>) -> Result<String> {
        let mode = mode.unwrap_or("SIN").to_ascii_uppercase();
        if MODES.contains(&mode.as_str()) {
            Ok(mode)
        } else {
            Err(anyhow!(
                "Unsupported waveform '{}', expected one of {:?}",
                mode,
                MODES
            ))
        }
    }
}

/// Quote text for `DISP:TEXT`; embedded single quotes are doubled.
fn display_text(lines: &[String]) -> String {
    format!("'{}'", lines.join("\r").replace('\'', "''"))
}

#[async_trait]
impl FunctionGenerator for Agilent33220A {
    fn limits(&self) -> &DeviceLimits {
        &self.limits
    }

    fn modes(&self) -> &'static [&'static str] {
        MODES
    }

    async fn connect(&self) -> Result<()> {
        self.write("SYST:COMM:RLST REM").await?;
        tracing::info!("Agilent 33220A under remote control");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.write("SYST:COMM:RLST LOC").await
    }

    async fn close(&self) -> Result<()> {
        if self.open.swap(false, Ordering::AcqRel) {
            self.transport.close().await?;
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    async fn identify(&self) -> Result<String> {
        self.bus()?.query("*IDN?").await
    }

    async fn reset(&self) -> Result<()> {
        self.write("*RST").await
    }

    async fn output(&self) -> Result<bool> {
        Ok(self.query_f64("OUTP?").await? != 0.0)
    }

    async fn set_output(&self, enabled: bool) -> Result<()> {
        self.write(if enabled { "OUTP ON" } else { "OUTP OFF" }).await
    }

    async fn frequency(&self) -> Result<f64> {
        self.query_f64("FREQ?").await
    }

    async fn set_frequency(&self, frequency: f64) -> Result<()> {
        let f = self.limits.clip_frequency(frequency);
        self.write(&format!("FREQ {}", self.limits.format_frequency(f)))
            .await
    }

    async fn amplitude(&self) -> Result<f64> {
        self.query_f64("VOLT?").await
    }

    async fn set_amplitude(&self, amplitude: f64) -> Result<()> {
        let offset = self.offset().await?;
        let u = self.limits.clip_amplitude(amplitude, offset);
        self.write(&format!("VOLT {}", self.limits.format_voltage(u)))
            .await
    }

    async fn offset(&self) -> Result<f64> {
        self.query_f64("VOLT:OFFS?").await
    }

    async fn set_offset(&self, offset: f64) -> Result<()> {
        let amplitude = self.amplitude().await?;
        let o = self.limits.clip_offset(offset, amplitude);
        self.write(&format!("VOLT:OFFS {}", self.limits.format_voltage(o)))
            .await
    }

    async fn apply(
        &self,
        frequency: f64,
        amplitude: Option<f64>,
        offset: Option<f64>,
        mode: Option<&str>,
    ) -> Result<()> {
        let mode = self.resolve_mode(mode)?;
        let f = self.limits.clip_frequency(frequency);
        let mut command = format!("APPL:{} {}", mode, self.limits.format_frequency(f));

        // APPL takes the amplitude positionally before the offset.
        let amplitude = match (amplitude, offset) {
            (None, Some(_)) => Some(self.amplitude().await?),
            (u, _) => u,
        };

        if let Some(u) = amplitude {
            let current_offset = self.offset().await?;
            let u = self.limits.clip_amplitude(u, current_offset);
            command.push_str(", ");
            command.push_str(&self.limits.format_voltage(u));

            if let Some(o) = offset {
                let o = self.limits.clip_offset(o, u);
                command.push_str(", ");
                command.push_str(&self.limits.format_voltage(o));
            }
        }

        self.write(&command).await
    }

    async fn set_display(&self, lines: &[String]) -> Result<()> {
        self.write(&format!("DISP:TEXT {}", display_text(lines)))
            .await
    }

    async fn clear_display(&self) -> Result<()> {
        self.write("DISP:TEXT:CLE").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::transport::MockTransport;

    async fn driver() -> (Agilent33220A, MockTransport) {
        let mock = MockTransport::new();
        mock.respond("VOLT:OFFS?", "+0.00000000000000E+00").await;
        mock.respond("VOLT?", "+1.00000000000000E+00").await;
        (Agilent33220A::new(Box::new(mock.clone())), mock)
    }

    #[tokio::test]
    async fn apply_formats_with_device_precision() {
        let (gen, mock) = driver().await;
        gen.apply(500.0, Some(0.1), None, None).await.unwrap();

        assert_eq!(
            mock.sent().await,
            vec!["VOLT:OFFS?", "APPL:SIN 500.000000, 0.1000"]
        );
    }

    #[tokio::test]
    async fn apply_without_amplitude_sends_frequency_only() {
        let (gen, mock) = driver().await;
        gen.apply(3e7, None, None, Some("squ")).await.unwrap();
        assert_eq!(mock.sent().await, vec!["APPL:SQU 20000000.000000"]);
    }

    #[tokio::test]
    async fn apply_clips_offset_against_new_amplitude() {
        let (gen, mock) = driver().await;
        gen.apply(100.0, Some(4.0), Some(4.5), None).await.unwrap();

        let sent = mock.sent().await;
        assert_eq!(sent.last().unwrap(), "APPL:SIN 100.000000, 4.0000, 3.0000");
    }

    #[tokio::test]
    async fn apply_rejects_unknown_mode() {
        let (gen, mock) = driver().await;
        assert!(gen.apply(100.0, None, None, Some("SINE")).await.is_err());
        assert!(mock.sent().await.is_empty());
    }

    #[tokio::test]
    async fn set_amplitude_clips_against_queried_offset() {
        let (gen, mock) = driver().await;
        mock.respond("VOLT:OFFS?", "2.0").await;

        gen.set_amplitude(10.0).await.unwrap();
        assert_eq!(mock.sent().await, vec!["VOLT:OFFS?", "VOLT 6.0000"]);
    }

    #[tokio::test]
    async fn set_offset_clips_against_queried_amplitude() {
        let (gen, mock) = driver().await;
        gen.set_offset(-5.0).await.unwrap();
        assert_eq!(mock.sent().await, vec!["VOLT?", "VOLT:OFFS -4.5000"]);
    }

    #[tokio::test]
    async fn output_and_remote_commands() {
        let (gen, mock) = driver().await;
        mock.respond("OUTP?", "1").await;

        gen.connect().await.unwrap();
        gen.set_output(false).await.unwrap();
        assert!(gen.output().await.unwrap());
        gen.disconnect().await.unwrap();

        assert_eq!(
            mock.sent().await,
            vec!["SYST:COMM:RLST REM", "OUTP OFF", "OUTP?", "SYST:COMM:RLST LOC"]
        );
    }

    #[tokio::test]
    async fn display_lines_are_joined_and_quoted() {
        let (gen, mock) = driver().await;
        gen.set_display(&["Growing - 0:40".into(), "1.30 Vpp | 500.00 Hz".into()])
            .await
            .unwrap();
        gen.set_display(&["it's".into()]).await.unwrap();
        gen.clear_display().await.unwrap();

        assert_eq!(
            mock.sent().await,
            vec![
                "DISP:TEXT 'Growing - 0:40\r1.30 Vpp | 500.00 Hz'",
                "DISP:TEXT 'it''s'",
                "DISP:TEXT:CLE"
            ]
        );
    }

    #[tokio::test]
    async fn closed_driver_reports_not_connected() {
        let (gen, mock) = driver().await;
        gen.close().await.unwrap();

        assert!(!gen.is_connected().await);
        assert!(mock.is_closed().await);
        let err = gen.set_output(true).await.unwrap_err();
        assert!(err.to_string().contains("not connected"), "got: {err}");
    }
}
