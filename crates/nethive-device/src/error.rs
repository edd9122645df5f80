//! Errors constructing or driving the real TUN device.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("failed to create TUN interface: {0}")]
    Create(#[source] std::io::Error),

    #[error("kernel route command failed for {prefix}: {stderr}")]
    RouteInstall { prefix: String, stderr: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type DeviceResult<T> = Result<T, DeviceError>;
