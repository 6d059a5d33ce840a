//! # funcgen
//!
//! Control of laboratory function generators used to grow lipid vesicles by
//! electroformation. The crate sends voltage/frequency/waveform commands to an
//! instrument and drives it through multi-stage timed protocols.
//!
//! ## Crate Structure
//!
//! - **`limits`**: Device envelope (`DeviceLimits`) and the co-dependent
//!   amplitude/offset/frequency clipping rules shared by every driver.
//! - **`protocol`**: Stage expansion into set-points, the protocol runner state
//!   machine, the timer-driven runner task, CSV protocol tables and presets.
//! - **`hardware`**: The `FunctionGenerator` capability trait, bus transports
//!   (SCPI over TCP, RS-232) and vendor drivers (Agilent 33220A, TTi TGA1230),
//!   plus an in-memory `NullGenerator` for tests and dry runs.
//! - **`display`**: Rendering of runner status for the device front panel and
//!   the console.
//! - **`config`**: Layered configuration (defaults, TOML file, environment).
//! - **`logging`**: `tracing` subscriber initialisation.
//! - **`error`**: Typed errors at the library boundary.
//! - **`validation`**: Small helpers used by configuration validation.

pub mod config;
pub mod display;
pub mod error;
pub mod hardware;
pub mod limits;
pub mod logging;
pub mod protocol;
pub mod validation;

pub use error::{DeviceError, FuncGenError, FuncGenResult, ValidationError};
pub use hardware::capabilities::FunctionGenerator;
pub use limits::DeviceLimits;
pub use protocol::{
    expand, ProtocolQueue, ProtocolRunner, RunOptions, RunnerEvent, RunnerHandle, RunnerState,
    SetPoint, Stage,
};
