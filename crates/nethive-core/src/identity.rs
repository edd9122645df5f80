//! Peer identity backed by an iroh Ed25519 public key.

use std::hash::{Hash, Hasher};

use iroh::PublicKey;
use serde::{Deserialize, Serialize};

/// Opaque, comparable, hashable peer identifier derived from a peer's public key.
///
/// The printable form (`Display`) is a base58 string, matching the wire
/// convention used for `PeersRouteTable` keys and DHT rendezvous keys.
#[derive(Clone, Copy, Eq)]
pub struct PeerId(pub(crate) PublicKey);

impl PeerId {
    /// Wrap an iroh public key as a `PeerId`.
    pub fn new(key: PublicKey) -> Self {
        Self(key)
    }

    /// The underlying iroh public key.
    pub fn public_key(&self) -> PublicKey {
        self.0
    }

    /// Raw 32-byte representation.
    pub fn as_bytes(&self) -> [u8; 32] {
        *self.0.as_bytes()
    }

    /// Parse from a raw 32-byte slice.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PeerIdError> {
        let key = PublicKey::try_from(bytes).map_err(|_| PeerIdError::InvalidBytes)?;
        Ok(Self(key))
    }

    /// Parse from the base58 printable form.
    pub fn from_base58(s: &str) -> Result<Self, PeerIdError> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|_| PeerIdError::InvalidBase58)?;
        Self::from_bytes(&bytes)
    }

    /// Base58 printable form.
    pub fn to_base58(&self) -> String {
        bs58::encode(self.as_bytes()).into_string()
    }

    /// Short, truncated form for log lines.
    pub fn short_id(&self) -> String {
        let s = self.to_base58();
        s.chars().take(8).collect()
    }
}

impl PartialEq for PeerId {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Hash for PeerId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.as_bytes().hash(state);
    }
}

impl std::fmt::Debug for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PeerId({})", self.to_base58())
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_base58())
    }
}

impl Serialize for PeerId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_bytes(&self.as_bytes())
    }
}

impl<'de> Deserialize<'de> for PeerId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bytes: Vec<u8> = Deserialize::deserialize(deserializer)?;
        Self::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

/// Errors constructing a `PeerId`.
#[derive(Debug, thiserror::Error)]
pub enum PeerIdError {
    #[error("invalid public key bytes")]
    InvalidBytes,
    #[error("invalid base58 encoding")]
    InvalidBase58,
}
