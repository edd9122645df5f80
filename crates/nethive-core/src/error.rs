//! Core error taxonomy (§7), composed by downstream crates via `#[from]`.

use thiserror::Error;

/// Errors that originate in the core data model (parsing, policy, identity).
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid packet: {0}")]
    InvalidPacket(#[from] crate::packet::ParseError),

    #[error("configuration error: {0}")]
    Configuration(#[from] crate::policy::PolicyError),

    #[error("invalid peer id: {0}")]
    InvalidPeerId(#[from] crate::identity::PeerIdError),

    #[error("no route to destination")]
    NoRoute,
}

/// Reasons a packet was dropped, for logging and the engine error channel.
///
/// Distinct from `CoreError`: drop reasons never propagate as a hard error,
/// they are absorbed locally and only logged (§7 propagation policy).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    InvalidPacket,
    NoRoute,
    Backpressure,
    MulticastDisabled,
    DialFailed,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DropReason::InvalidPacket => "invalid packet",
            DropReason::NoRoute => "no route",
            DropReason::Backpressure => "backpressure",
            DropReason::MulticastDisabled => "multicast disabled",
            DropReason::DialFailed => "dial failed",
        };
        write!(f, "{s}")
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
