use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use relaychain_core::config::Config;
use relaychain_core::ledger::LedgerStore;
use relaychain_core::logging::{init_logging_with_config, LogConfig};
use relaychain_core::metrics::init_metrics;
use relaychain_core::server::RelayServer;
use relaychain_core::storage::StorageLock;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "relaychain")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Set the log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON formatted logging
    #[arg(long)]
    json_logs: bool,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the relay server until interrupted
    Serve {
        /// Listen address, e.g. 0.0.0.0:12345
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Directory holding the ledger and member list
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Check every block of the ledger and exit
    Verify {
        /// Directory holding the ledger and member list
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

/// Defaults, then the config file, then environment, then flags
fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::default(),
    };
    config.apply_env().context("Invalid environment override")?;

    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if args.json_logs {
        config.logging.json_format = true;
    }

    let data_dir = match &args.command {
        Command::Serve { bind, data_dir } => {
            if let Some(bind) = bind {
                config.server.bind_address = *bind;
            }
            data_dir
        }
        Command::Verify { data_dir } => data_dir,
    };
    if let Some(dir) = data_dir {
        config.store.data_dir = dir.clone();
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn serve(config: &Config) -> Result<()> {
    let server = match RelayServer::bind(config).await {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "Failed to start relay");
            return Err(e.into());
        }
    };

    let tail = server.state().ledger().tail()?;
    info!(
        addr = %server.local_addr()?,
        data_dir = %config.store.data_dir.display(),
        tail_index = tail.index,
        tail_hash = %tail.hash,
        "Relay started"
    );

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Interrupt received, exiting"),
    }
    Ok(())
}

fn verify(config: &Config) -> Result<()> {
    let data_dir = &config.store.data_dir;
    let _lock = StorageLock::acquire(data_dir)
        .with_context(|| format!("Cannot lock {}", data_dir.display()))?;

    let path = config.store.ledger_path();
    if !path.exists() {
        bail!("No ledger at {}", path.display());
    }

    let ledger = LedgerStore::open(&path)?;
    match ledger.verify_chain() {
        Ok(report) => {
            info!(
                blocks = report.blocks,
                tail_index = report.tail.index,
                "Ledger verified"
            );
            println!(
                "{}: {} blocks, tail {} ({})",
                path.display(),
                report.blocks,
                report.tail.index,
                report.tail.hash
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Ledger verification failed");
            Err(e).with_context(|| format!("{} failed verification", path.display()))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    init_logging_with_config(LogConfig::try_from(&config.logging)?)?;
    init_metrics();

    match args.command {
        Command::Serve { .. } => serve(&config).await,
        Command::Verify { .. } => verify(&config),
    }
}
