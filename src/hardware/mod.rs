//! Function generator drivers.
//!
//! - [`capabilities`]: the `FunctionGenerator` trait every driver implements
//! - [`transport`]: line-oriented buses (SCPI over TCP, in-memory mock)
//! - [`serial`]: RS-232 transport (`instrument_serial` feature)
//! - [`agilent`], [`tti`]: vendor drivers
//! - [`mock`]: `NullGenerator` for tests and dry runs
//! - [`factory`]: build a connected driver from configuration

pub mod agilent;
pub mod capabilities;
pub mod factory;
pub mod mock;
#[cfg(feature = "instrument_serial")]
pub mod serial;
pub mod transport;
pub mod tti;

pub use agilent::Agilent33220A;
pub use capabilities::FunctionGenerator;
pub use factory::open_device;
pub use mock::NullGenerator;
pub use tti::TtiTga1230;
