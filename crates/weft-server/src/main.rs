//! Weft relay binary
//!
//! ## Usage
//!
//! ```bash
//! # Run the relay (default)
//! weft-server [--config relay.toml] [--listen 0.0.0.0:1999] [--database weft.db]
//!
//! # Project rows
//! weft-server create-project <id>
//! weft-server show <id>
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use weft_server::{RelayConfig, RelayServer, SqliteStore};
use weft_types::DocumentId;

/// Relay and snapshot service for weft canvases.
#[derive(Parser, Debug)]
#[command(name = "weft-server")]
#[command(about = "Relay and snapshot service for weft canvases")]
struct Args {
    /// TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Listen address, e.g. 0.0.0.0:1999
    #[arg(long, global = true)]
    listen: Option<String>,

    /// SQLite database path
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Quiet period before a room persists, in milliseconds
    #[arg(long, global = true)]
    debounce_ms: Option<u64>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the relay (default)
    Serve,
    /// Create an empty project row
    CreateProject { id: String },
    /// Print a project's stored snapshot as JSON
    Show { id: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let result = match &args.command {
        None | Some(Command::Serve) => run_server(config).await,
        Some(Command::CreateProject { id }) => cmd_create_project(&config, id),
        Some(Command::Show { id }) => cmd_show(&config, id),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Defaults, then the config file, then flags.
fn load_config(args: &Args) -> Result<RelayConfig> {
    let mut config = RelayConfig::load(args.config.as_deref())?;
    if let Some(listen) = &args.listen {
        config.set_listen(listen)?;
    }
    if let Some(database) = &args.database {
        config.database = database.clone();
    }
    if let Some(ms) = args.debounce_ms {
        config.debounce = Duration::from_millis(ms);
    }
    Ok(config)
}

fn open_store(config: &RelayConfig) -> Result<SqliteStore> {
    SqliteStore::open(&config.database)
        .with_context(|| format!("opening database {}", config.database.display()))
}

async fn run_server(config: RelayConfig) -> Result<()> {
    let store = open_store(&config)?;
    tracing::info!(
        listen = %config.listen,
        database = %config.database.display(),
        debounce_ms = config.debounce.as_millis() as u64,
        "starting weft relay"
    );
    let server = RelayServer::new(config, Arc::new(store));

    tokio::select! {
        result = server.run() => result.context("relay stopped")?,
        signal = tokio::signal::ctrl_c() => {
            signal.context("installing ctrl-c handler")?;
            tracing::info!("shutting down, flushing rooms");
            for (room, outcome) in server.registry().flush_all().await {
                tracing::info!(%room, ?outcome, "room flushed");
            }
        }
    }
    Ok(())
}

fn cmd_create_project(config: &RelayConfig, id: &str) -> Result<()> {
    let store = open_store(config)?;
    let document = DocumentId::new(id);
    store.create_project(&document)?;
    println!("Created project {document}");
    Ok(())
}

fn cmd_show(config: &RelayConfig, id: &str) -> Result<()> {
    let store = open_store(config)?;
    match store.get(&DocumentId::new(id))? {
        Some(record) => {
            println!("{}", serde_json::to_string_pretty(&record.content)?);
            eprintln!("updated_at: {}", record.updated_at);
        }
        None => eprintln!("Project {id} has no snapshot yet"),
    }
    Ok(())
}
