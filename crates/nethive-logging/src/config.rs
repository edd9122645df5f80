//! Configuration types for the logging system: the sinks the persisted
//! config's `LogConfigs` key names, kept deliberately small (no
//! OpenTelemetry, no peer-context layer).
//!
//! `LogConfigs` is itself the list (matching `core/config/config.go`'s
//! `LogConfigs []mlog.CoreConfig`): there is no shared top-level level,
//! each sink carries its own, mirroring `mlog.CoreConfig.Level` being
//! parsed into its own independent `zap.AtomicLevel` per core.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

fn default_level() -> String {
    "info".to_string()
}

fn default_prefix() -> String {
    "nethive".to_string()
}

/// One entry of the persisted config's `LogConfigs` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "sink", rename_all = "lowercase")]
pub enum LogSinkConfig {
    /// Human-readable (or ANSI-colored) output to stderr.
    Console {
        #[serde(default = "default_level")]
        level: String,
        #[serde(default)]
        pretty: bool,
        #[serde(default)]
        ansi: bool,
    },
    /// Daily-rotating JSONL files under `directory`.
    File {
        #[serde(default = "default_level")]
        level: String,
        directory: PathBuf,
        #[serde(default = "default_prefix")]
        prefix: String,
    },
}

impl LogSinkConfig {
    pub fn level(&self) -> &str {
        match self {
            LogSinkConfig::Console { level, .. } => level,
            LogSinkConfig::File { level, .. } => level,
        }
    }
}

impl Default for LogSinkConfig {
    fn default() -> Self {
        LogSinkConfig::Console {
            level: default_level(),
            pretty: false,
            ansi: false,
        }
    }
}

/// The default `LogConfigs` value: one plain console sink at `info`.
pub fn default_sinks() -> Vec<LogSinkConfig> {
    vec![LogSinkConfig::default()]
}

/// Verbose, colored console sink used before a persisted config is loaded.
pub fn bootstrap_sinks() -> Vec<LogSinkConfig> {
    vec![LogSinkConfig::Console {
        level: default_level(),
        pretty: true,
        ansi: true,
    }]
}
