//! Build a connected driver from configuration.

use super::agilent::Agilent33220A;
use super::capabilities::FunctionGenerator;
use super::mock::NullGenerator;
use super::transport::TcpTransport;
use super::tti::TtiTga1230;
use crate::config::{DeviceKind, DeviceSettings, TimeoutSettings};
use crate::error::{DeviceError, FuncGenResult};
use std::sync::Arc;

/// Open the bus for `device`, wrap it in the matching driver and take the
/// instrument under remote control.
pub async fn open_device(
    device: &DeviceSettings,
    timeouts: &TimeoutSettings,
) -> FuncGenResult<Arc<dyn FunctionGenerator>> {
    let generator: Arc<dyn FunctionGenerator> = match device.kind {
        DeviceKind::Null => Arc::new(NullGenerator::new()),
        DeviceKind::Agilent33220A => {
            let transport = TcpTransport::connect(&device.resource, timeouts.network_client())
                .await
                .map_err(DeviceError::from)?
                .with_timeout(timeouts.scpi_command());
            Arc::new(Agilent33220A::new(Box::new(transport)))
        }
        DeviceKind::TtiTga1230 => open_tti(device, timeouts)?,
    };

    generator.connect().await.map_err(DeviceError::from)?;
    tracing::info!(kind = %device.kind, resource = %device.resource, "Device ready");
    Ok(generator)
}

#[cfg(feature = "instrument_serial")]
fn open_tti(
    device: &DeviceSettings,
    timeouts: &TimeoutSettings,
) -> FuncGenResult<Arc<dyn FunctionGenerator>> {
    use super::serial::SerialTransport;

    let transport = SerialTransport::open(&device.resource, device.baud_rate, timeouts.serial_read())
        .map_err(DeviceError::from)?;
    Ok(Arc::new(TtiTga1230::new(Box::new(transport))))
}

#[cfg(not(feature = "instrument_serial"))]
fn open_tti(
    _device: &DeviceSettings,
    _timeouts: &TimeoutSettings,
) -> FuncGenResult<Arc<dyn FunctionGenerator>> {
    Err(crate::error::FuncGenError::FeatureNotEnabled(
        "instrument_serial".to_string(),
    ))
}
