//! Transport-layer error taxonomy.

use thiserror::Error;

use crate::framing::FramingError;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to bind endpoint: {0}")]
    Bind(String),

    #[error("failed to connect to peer: {0}")]
    Connect(String),

    #[error("connect timed out")]
    ConnectTimeout,

    #[error("no candidate addresses for peer")]
    NoCandidates,

    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    #[error("gossip error: {0}")]
    Gossip(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type TransportResult<T> = Result<T, TransportError>;
