//! RS-232 transport.
//!
//! Protocol: 8N1, software flow control (XON/XOFF), commands terminated with
//! `\n`. The TTi TGA12xx series ships at 9600 baud.

use super::transport::LineTransport;
use anyhow::{Context, Result};
use std::time::Duration;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

/// Line transport over a serial port.
pub type SerialTransport = LineTransport<SerialStream>;

impl SerialTransport {
    /// Open `port_path` at `baud_rate`.
    pub fn open(port_path: &str, baud_rate: u32, read_timeout: Duration) -> Result<Self> {
        let port = tokio_serial::new(port_path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::Software)
            .open_native_async()
            .with_context(|| format!("Failed to open serial port: {}", port_path))?;

        tracing::info!(port = port_path, baud_rate, "Opened serial port");
        Ok(LineTransport::new(port, "\n", format!("serial://{}", port_path)).with_timeout(read_timeout))
    }
}
