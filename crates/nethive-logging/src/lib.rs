//! # NetHive logging
//!
//! A `tracing-subscriber` setup driven by the persisted config's
//! `LogConfigs` list: console and rotating-file sinks, each filtered at its
//! own configured level (matching `mlog.CoreConfig` having its own
//! `zap.AtomicLevel` per core rather than one shared threshold).

pub mod config;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, fmt};

pub use config::{LogSinkConfig, bootstrap_sinks, default_sinks};

/// The filter applied to a single sink's layer: `RUST_LOG` overrides every
/// sink uniformly when set, otherwise each sink falls back to its own
/// `level`.
fn sink_filter(sink: &LogSinkConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(sink.level()))
}

fn build_layers(sinks: &[LogSinkConfig]) -> (Vec<Box<dyn Layer<Registry> + Send + Sync>>, Vec<WorkerGuard>) {
    let mut guards = Vec::new();
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    for sink in sinks {
        match sink {
            LogSinkConfig::Console { pretty, ansi, .. } => {
                let layer = fmt::layer().with_ansi(*ansi).with_target(true);
                let filter = sink_filter(sink);
                if *pretty {
                    layers.push(layer.pretty().with_filter(filter).boxed());
                } else {
                    layers.push(layer.json().with_filter(filter).boxed());
                }
            }
            LogSinkConfig::File { directory, prefix, .. } => {
                let appender = RollingFileAppender::new(Rotation::DAILY, directory, prefix);
                let (non_blocking, guard) = tracing_appender::non_blocking(appender);
                guards.push(guard);
                let filter = sink_filter(sink);
                layers.push(fmt::layer().json().with_writer(non_blocking).with_filter(filter).boxed());
            }
        }
    }

    (layers, guards)
}

/// Initialize the global `tracing` subscriber from `sinks`.
///
/// Returns the `WorkerGuard`s produced by any file sinks; these must be
/// kept alive for the lifetime of the process (dropping one stops flushing
/// its writer), matching `tracing_appender`'s own contract.
///
/// # Panics
///
/// Panics if a global subscriber has already been set. Use
/// [`bootstrap_guard`] for a subscriber that's only needed until the real
/// one (built from the persisted config) replaces it.
pub fn init(sinks: &[LogSinkConfig]) -> Vec<WorkerGuard> {
    let (layers, guards) = build_layers(sinks);
    Registry::default().with(layers).init();
    guards
}

/// Install a scoped subscriber for use before the persisted config is
/// loaded, without claiming the process-global slot `init` needs later.
///
/// Dropping the returned guard restores whatever subscriber (if any) was
/// active before this call, the same scoped-default contract
/// `tracing::subscriber::set_default` always exposes.
pub fn bootstrap_guard(sinks: &[LogSinkConfig]) -> (tracing::subscriber::DefaultGuard, Vec<WorkerGuard>) {
    let (layers, guards) = build_layers(sinks);
    let subscriber = Registry::default().with(layers);
    (tracing::subscriber::set_default(subscriber), guards)
}
