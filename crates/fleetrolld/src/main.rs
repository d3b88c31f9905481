//! fleetrolld: the fleetroll daemon.
//!
//! Runs rolling deployments described by a `fleet.toml`, serves the REST
//! API, and inspects the deployment history kept in the state store.
//!
//! # Usage
//!
//! ```text
//! fleetrolld init --fleet web --current v1 --target v2
//! fleetrolld deploy --config fleet.toml --data-dir /var/lib/fleetroll
//! fleetrolld serve --config fleet.toml --port 8480 --data-dir /var/lib/fleetroll
//! fleetrolld history --data-dir /var/lib/fleetroll --fleet web
//! fleetrolld unlock --data-dir /var/lib/fleetroll --fleet web
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(
    name = "fleetrolld",
    about = "fleetroll: rolling deployments with a minimum healthy capacity",
    version,
    propagate_version = true
)]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a fleet.toml scaffold describing a simulated fleet.
    Init {
        #[arg(long, default_value = "web")]
        fleet: String,
        /// Version the simulated fleet starts on.
        #[arg(long, default_value = "v1")]
        current: String,
        /// Version to deploy.
        #[arg(long, default_value = "v2")]
        target: String,
        #[arg(short, long, default_value = "fleet.toml")]
        output: PathBuf,
    },
    /// Run one deployment against the simulated fleet and stream its events.
    Deploy {
        #[arg(short, long, default_value = "fleet.toml")]
        config: PathBuf,
        /// Persist leases, records and events here (in-memory if omitted).
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Serve the REST API for the configured fleet.
    Serve {
        #[arg(short, long, default_value = "fleet.toml")]
        config: PathBuf,
        #[arg(long, default_value = "8480")]
        port: u16,
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// List recorded deployments.
    History {
        #[arg(long)]
        data_dir: PathBuf,
        /// Only show deployments of this fleet.
        #[arg(long)]
        fleet: Option<String>,
    },
    /// Break a lease left behind by a crashed deployment.
    Unlock {
        #[arg(long)]
        data_dir: PathBuf,
        #[arg(long)]
        fleet: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,fleetroll=debug"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    match cli.command {
        Command::Init {
            fleet,
            current,
            target,
            output,
        } => commands::inspect::init(&fleet, &current, &target, &output),
        Command::Deploy { config, data_dir } => {
            commands::deploy::run(&config, data_dir.as_deref()).await
        }
        Command::Serve {
            config,
            port,
            data_dir,
        } => commands::serve::run(&config, port, data_dir.as_deref()).await,
        Command::History { data_dir, fleet } => {
            commands::inspect::history(&data_dir, fleet.as_deref())
        }
        Command::Unlock { data_dir, fleet } => commands::inspect::unlock(&data_dir, &fleet),
    }
}
