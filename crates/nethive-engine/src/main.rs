//! The `nethive` binary (C11, §4.11): `--config <path>`, no subcommands.

use std::path::PathBuf;

use clap::Parser;
use nethive_engine::{Engine, EngineConfig, default_config_path};

#[derive(Parser)]
#[command(name = "nethive", about = "Peer-to-peer overlay VPN dataplane engine")]
struct Cli {
    /// Path to the persisted JSON configuration file.
    #[arg(long, default_value_os_t = default_config_path())]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = {
        let (_bootstrap_guard, _bootstrap_file_guards) =
            nethive_logging::bootstrap_guard(&nethive_logging::bootstrap_sinks());
        match EngineConfig::load_or_init(&cli.config) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("failed to load configuration from {}: {err}", cli.config.display());
                std::process::exit(1);
            }
        }
    };

    // Install the real global subscriber now that the persisted config (and
    // its `LogConfigs`) is available; the scoped bootstrap subscriber above
    // only covered config loading.
    let _guards = nethive_logging::init(&config.log_configs);

    let engine = match Engine::bootstrap(config).await {
        Ok(engine) => engine,
        Err(err) => {
            eprintln!("failed to start engine: {err}");
            std::process::exit(1);
        }
    };

    let shutdown = engine.shutdown_handle();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = shutdown.send(());
    });

    if let Err(err) = engine.run().await {
        eprintln!("engine exited with a fatal error: {err}");
        std::process::exit(1);
    }
}
