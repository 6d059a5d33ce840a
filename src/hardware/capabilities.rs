//! Function generator capability.
//!
//! Every driver (Agilent over SCPI, TTi over RS-232, the in-memory
//! `NullGenerator`) implements [`FunctionGenerator`]. Protocol code only ever
//! talks to this trait.
//!
//! # Design Philosophy
//!
//! - Async (uses #[async_trait]) and thread-safe (Send + Sync)
//! - `&self` everywhere; drivers keep their state behind a Mutex
//! - Uses anyhow::Result for errors
//! - Getters never write to the instrument; setters never read back silently
//!   beyond what clipping needs
//!
//! # Example
//!
//! ```rust,ignore
//! async fn park<G: FunctionGenerator + ?Sized>(device: &G) -> anyhow::Result<()> {
//!     device.set_output(false).await?;
//!     device.apply(500.0, Some(0.1), None, None).await?;
//!     device.set_display(&["parked".to_string()]).await
//! }
//! ```

use crate::limits::DeviceLimits;
use anyhow::Result;
use async_trait::async_trait;

/// Capability: Function Generator
///
/// # Contract
/// - Amplitudes are peak-to-peak volts, offsets volts, frequencies hertz
/// - Setters clip through the shared limits engine: amplitude against the
///   offset currently applied, offset against the amplitude currently applied
/// - `apply` sets frequency and, when given, amplitude and offset in one go
/// - Display calls are best effort; devices without a text display ignore them
#[async_trait]
pub trait FunctionGenerator: Send + Sync {
    /// Envelope of this instrument.
    fn limits(&self) -> &DeviceLimits;

    /// Supported waveform mode names (e.g. `SIN`, `SQU`, `RAMP`).
    fn modes(&self) -> &'static [&'static str];

    /// Check whether `mode` names a supported waveform (case-insensitive).
    fn supports_mode(&self, mode: &str) -> bool {
        self.modes().iter().any(|m| m.eq_ignore_ascii_case(mode))
    }

    /// Take the instrument under remote control.
    async fn connect(&self) -> Result<()>;

    /// Return the instrument to local (front panel) control.
    async fn disconnect(&self) -> Result<()>;

    /// Release the underlying bus handle.
    async fn close(&self) -> Result<()>;

    /// Whether the bus handle is open.
    async fn is_connected(&self) -> bool;

    /// Instrument identification string.
    async fn identify(&self) -> Result<String>;

    /// Restore power-on defaults.
    ///
    /// # Default Implementation
    /// Does nothing.
    async fn reset(&self) -> Result<()> {
        Ok(())
    }

    /// Output state.
    async fn output(&self) -> Result<bool>;

    /// Switch the output on or off.
    async fn set_output(&self, enabled: bool) -> Result<()>;

    /// Current frequency in Hz.
    async fn frequency(&self) -> Result<f64>;

    /// Set frequency in Hz.
    async fn set_frequency(&self, frequency: f64) -> Result<()>;

    /// Current amplitude in Vpp.
    async fn amplitude(&self) -> Result<f64>;

    /// Set amplitude in Vpp.
    async fn set_amplitude(&self, amplitude: f64) -> Result<()>;

    /// Current DC offset in V.
    async fn offset(&self) -> Result<f64>;

    /// Set DC offset in V.
    async fn set_offset(&self, offset: f64) -> Result<()>;

    /// Combined set of frequency, optional amplitude, optional offset and
    /// optional waveform mode.
    async fn apply(
        &self,
        frequency: f64,
        amplitude: Option<f64>,
        offset: Option<f64>,
        mode: Option<&str>,
    ) -> Result<()>;

    /// Show text on the front panel, one entry per line.
    async fn set_display(&self, lines: &[String]) -> Result<()>;

    /// Clear the front panel text.
    async fn clear_display(&self) -> Result<()>;
}
