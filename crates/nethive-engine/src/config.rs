//! Persisted JSON configuration (§6, §4.9): loaded once at startup, written
//! back with defaults (and a freshly generated keypair) on first run.
//!
//! Field names mirror the on-disk `PascalCase` keys via
//! `serde(rename = "...")`, matching `core/config/config.go`'s key names.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ipnet::IpNet;
use iroh::SecretKey;
use nethive_core::{DEFAULT_CHAN_SIZE, DEFAULT_MTU, PeerId};
use nethive_logging::LogSinkConfig;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

fn default_tun_name() -> String {
    "hive0".to_string()
}

fn default_mtu() -> usize {
    DEFAULT_MTU
}

fn default_chan_size() -> usize {
    DEFAULT_CHAN_SIZE
}

fn default_local_addr() -> String {
    "192.168.168.1/24".to_string()
}

fn default_log_configs() -> Vec<LogSinkConfig> {
    nethive_logging::default_sinks()
}

/// The persisted configuration document, one-to-one with §6's key table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(rename = "TUNName", default = "default_tun_name")]
    pub tun_name: String,

    #[serde(rename = "MTU", default = "default_mtu")]
    pub mtu: usize,

    #[serde(rename = "LocalAddr", default = "default_local_addr")]
    pub local_addr: String,

    #[serde(rename = "PrivateKey")]
    pub private_key: Option<String>,

    #[serde(rename = "PeerID", default)]
    pub peer_id: String,

    #[serde(rename = "Bootstraps", default)]
    pub bootstraps: Vec<String>,

    #[serde(rename = "PeersRouteTable", default)]
    pub peers_route_table: HashMap<String, Vec<String>>,

    #[serde(rename = "EnableMDNS", default)]
    pub enable_mdns: bool,

    #[serde(rename = "EnableBroadcast", default)]
    pub enable_broadcast: bool,

    #[serde(rename = "EnableAutoRelay", default)]
    pub enable_auto_relay: bool,

    #[serde(rename = "Relays", default)]
    pub relays: Vec<String>,

    #[serde(rename = "LogConfigs", default = "default_log_configs")]
    pub log_configs: Vec<LogSinkConfig>,

    #[serde(rename = "ChanSize", default = "default_chan_size")]
    pub chan_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tun_name: default_tun_name(),
            mtu: default_mtu(),
            local_addr: default_local_addr(),
            private_key: None,
            peer_id: String::new(),
            bootstraps: Vec::new(),
            peers_route_table: HashMap::new(),
            enable_mdns: false,
            enable_broadcast: false,
            enable_auto_relay: false,
            relays: Vec::new(),
            log_configs: default_log_configs(),
            chan_size: default_chan_size(),
        }
    }
}

impl EngineConfig {
    /// Load the config at `path`, or generate and persist a default one
    /// (with a fresh keypair) if it doesn't exist yet.
    pub fn load_or_init(path: &Path) -> ConfigResult<Self> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)?;
            serde_json::from_str(&text)?
        } else {
            Self::default()
        };

        if config.private_key.is_none() {
            let secret = SecretKey::generate(&mut rand::rng());
            config.private_key = Some(hex::encode(secret.to_bytes()));
            config.peer_id = PeerId::new(secret.public()).to_base58();
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&config)?)?;

        Ok(config)
    }

    /// The local overlay address/prefix, parsed.
    pub fn local_prefix(&self) -> ConfigResult<IpNet> {
        self.local_addr
            .parse()
            .map_err(|_| ConfigError::InvalidCidr(self.local_addr.clone()))
    }

    /// Decode the hex-encoded private key into an `iroh::SecretKey`.
    pub fn secret_key(&self) -> ConfigResult<SecretKey> {
        let hex_str = self
            .private_key
            .as_deref()
            .ok_or(ConfigError::MissingPrivateKey)?;
        let bytes = hex::decode(hex_str).map_err(|_| ConfigError::InvalidPrivateKey)?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ConfigError::InvalidPrivateKey)?;
        Ok(SecretKey::from_bytes(&array))
    }

    /// Parse `PeersRouteTable` into the `PeerId -> [Prefix]` map the
    /// `RoutePolicy` is built from.
    pub fn route_entries(&self) -> ConfigResult<HashMap<PeerId, Vec<IpNet>>> {
        let mut entries = HashMap::with_capacity(self.peers_route_table.len());
        for (peer_str, prefixes) in &self.peers_route_table {
            let peer = PeerId::from_base58(peer_str)
                .map_err(|_| ConfigError::InvalidPeerId(peer_str.clone()))?;
            let mut nets = Vec::with_capacity(prefixes.len());
            for p in prefixes {
                nets.push(
                    p.parse::<IpNet>()
                        .map_err(|_| ConfigError::InvalidCidr(p.clone()))?,
                );
            }
            entries.insert(peer, nets);
        }
        Ok(entries)
    }

    /// Bootstrap peer multi-addresses, as iroh node addresses.
    ///
    /// Bootstrap entries are base58 peer ids (the original `multi-address
    /// strings` of §6 collapse to bare node ids under iroh, which resolves
    /// addresses itself via its own discovery rather than requiring a
    /// dialable multiaddr up front).
    pub fn bootstrap_ids(&self) -> ConfigResult<Vec<iroh::EndpointId>> {
        self.bootstraps
            .iter()
            .map(|s| {
                PeerId::from_base58(s)
                    .map(|p| p.public_key())
                    .map_err(|_| ConfigError::InvalidPeerId(s.clone()))
            })
            .collect()
    }

    pub fn local_peer_id(&self) -> ConfigResult<PeerId> {
        PeerId::from_base58(&self.peer_id).map_err(|_| ConfigError::InvalidPeerId(self.peer_id.clone()))
    }
}

/// Default config file path (§6 CLI).
pub fn default_config_path() -> PathBuf {
    PathBuf::from("/var/lib/NetHive/config.json")
}
