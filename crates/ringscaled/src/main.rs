//! ringscaled — the ringscale daemon.
//!
//! Opens the embedded coordination store, seeds it from the bootstrap
//! file and runs one or more scale managers until Ctrl-C.
//!
//! # Usage
//!
//! ```text
//! ringscaled run --config /etc/ringscale/ringscale.toml --managers 2
//! ringscaled check-config --config /etc/ringscale/ringscale.toml
//! ```

mod daemon;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use ringscale_core::DaemonConfig;

#[derive(Parser)]
#[command(name = "ringscaled", about = "ringscale load-balancer control plane")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scale managers until interrupted.
    Run {
        /// Bootstrap file (TOML).
        #[arg(long)]
        config: Option<PathBuf>,

        /// Data directory for the coordination store.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Manager config names, later names override earlier ones.
        #[arg(long = "name")]
        names: Vec<String>,

        /// Number of managers to run in this process.
        #[arg(long)]
        managers: Option<usize>,

        /// Log as JSON lines.
        #[arg(long)]
        log_json: bool,
    },
    /// Validate a bootstrap file and exit.
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,ringscale=debug,ringscaled=debug".parse().unwrap());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            data_dir,
            names,
            managers,
            log_json,
        } => {
            let mut daemon = daemon::load_config(config.as_deref())?;
            if let Some(data_dir) = data_dir {
                daemon.data_dir = data_dir;
            }
            if !names.is_empty() {
                daemon.names = names;
            }
            if let Some(managers) = managers {
                daemon.managers = managers;
            }
            daemon.log_json |= log_json;
            init_tracing(daemon.log_json);
            daemon::run(daemon).await
        }
        Command::CheckConfig { config } => {
            init_tracing(false);
            let daemon = DaemonConfig::from_file(&config)?;
            daemon::check(&daemon)?;
            info!(
                path = ?config,
                managers = daemon.managers,
                endpoints = daemon.endpoints.len(),
                "configuration is valid"
            );
            Ok(())
        }
    }
}
