//! Device envelope and clipping rules.
//!
//! A function generator has a frequency range and a single combined voltage
//! swing ceiling (`max_out`) shared by the AC amplitude and the DC offset:
//!
//! ```text
//!   offset + amplitude/2 <= max_out
//!   offset - amplitude/2 >= -max_out
//! ```
//!
//! Amplitudes are peak-to-peak. Clipping one axis always looks at the value
//! currently applied on the other axis, so callers clip amplitude against the
//! offset already on the device and vice versa. Clipping a brand new
//! (amplitude, offset) pair in one go is not supported.
//!
//! None of these functions fail: requests outside the envelope saturate.

use serde::{Deserialize, Serialize};

/// Physical envelope of one instrument.
///
/// Immutable for the lifetime of a driver instance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceLimits {
    /// Lowest settable frequency in Hz.
    pub freq_min: f64,
    /// Highest settable frequency in Hz.
    pub freq_max: f64,
    /// Smallest amplitude in Vpp.
    pub ampl_min: f64,
    /// Envelope half-range in V (`max_out`).
    pub ampl_max: f64,
    /// Decimal digits used when sending a frequency.
    pub freq_precision: usize,
    /// Decimal digits used when sending an amplitude or offset.
    pub ampl_precision: usize,
}

impl DeviceLimits {
    /// Envelope half-range (`max_out`).
    pub fn max_out(&self) -> f64 {
        self.ampl_max
    }

    /// Largest amplitude the device accepts with zero offset.
    pub fn max_amplitude(&self) -> f64 {
        2.0 * self.ampl_max
    }

    /// Clamp a frequency into `[freq_min, freq_max]`.
    pub fn clip_frequency(&self, frequency: f64) -> f64 {
        clip_frequency(frequency, self)
    }

    /// Clip an amplitude against the offset currently applied.
    pub fn clip_amplitude(&self, amplitude: f64, offset: f64) -> f64 {
        clip_amplitude(amplitude, offset, self)
    }

    /// Clip an offset against the amplitude currently applied.
    pub fn clip_offset(&self, offset: f64, amplitude: f64) -> f64 {
        clip_offset(offset, amplitude, self)
    }

    /// Format a frequency with the device precision.
    pub fn format_frequency(&self, frequency: f64) -> String {
        format!("{:.*}", self.freq_precision, frequency)
    }

    /// Format an amplitude or offset with the device precision.
    pub fn format_voltage(&self, volts: f64) -> String {
        format!("{:.*}", self.ampl_precision, volts)
    }
}

/// Clamp `frequency` into the device frequency range. NaN reads as the minimum.
pub fn clip_frequency(frequency: f64, limits: &DeviceLimits) -> f64 {
    if frequency.is_nan() || frequency < limits.freq_min {
        limits.freq_min
    } else if frequency > limits.freq_max {
        limits.freq_max
    } else {
        frequency
    }
}

/// Clip a peak-to-peak amplitude so that `offset ± amplitude/2` stays inside
/// `[-max_out, max_out]`.
///
/// Anything below the device minimum (and NaN) returns the minimum. The
/// result never goes below the minimum either: an offset that leaves less
/// than `ampl_min` of headroom, or none at all, still yields `ampl_min`.
pub fn clip_amplitude(amplitude: f64, offset: f64, limits: &DeviceLimits) -> f64 {
    let max_out = limits.max_out();
    if amplitude.is_nan() || amplitude < limits.ampl_min {
        limits.ampl_min
    } else if offset + amplitude / 2.0 > max_out || offset - amplitude / 2.0 < -max_out {
        // The side the offset leans towards binds first: 2*(max_out - offset)
        // for a positive offset, 2*(max_out + offset) for a negative one.
        (2.0 * (max_out - offset.abs())).max(limits.ampl_min)
    } else {
        amplitude
    }
}

/// Clip a DC offset so that `offset ± amplitude/2` stays inside
/// `[-max_out, max_out]`.
pub fn clip_offset(offset: f64, amplitude: f64, limits: &DeviceLimits) -> f64 {
    let max_out = limits.max_out();
    if offset + amplitude / 2.0 > max_out {
        max_out - amplitude / 2.0
    } else if offset - amplitude / 2.0 < -max_out {
        amplitude / 2.0 - max_out
    } else {
        offset
    }
}
