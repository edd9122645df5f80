//! Top-level engine error taxonomy (§7), composed from every sub-crate's
//! error type via `#[from]`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid CIDR: {0}")]
    InvalidCidr(String),

    #[error("invalid private key")]
    InvalidPrivateKey,

    #[error("missing private key")]
    MissingPrivateKey,

    #[error("invalid peer id: {0}")]
    InvalidPeerId(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Policy(#[from] nethive_core::PolicyError),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Fatal engine errors: surfaced from `run()` and mapped to a non-zero exit
/// code (§7 user-visible behavior). Everything else is absorbed and logged.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("device error: {0}")]
    Device(#[from] nethive_device::DeviceError),

    #[error("transport error: {0}")]
    Transport(#[from] nethive_transport::TransportError),

    #[error("interface read failed: {0}")]
    InterfaceClosed(#[source] std::io::Error),

    #[error("endpoint bind failed: {0}")]
    EndpointBind(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
