//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use reconciler_core::ReconciliationEngine;
use reconciler_server::AppState;
use reconciler_shared::{
    AppConfig, ContactId, IdentifyRequest, IdentifyResponse, init_config, load_config,
    load_config_from,
};
use reconciler_storage::{ContactStore, MemoryStore, Storage};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Reconciler - link contact fragments into one customer identity.
#[derive(Parser)]
#[command(
    name = "reconciler",
    version,
    about = "Reconcile emails and phone numbers into consolidated customer identities.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.reconciler/reconciler.toml).
    #[arg(long, global = true, env = "RECONCILER_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Start the HTTP API.
    Serve {
        /// Interface to bind (overrides config).
        #[arg(long)]
        host: Option<String>,

        /// Port to bind (overrides config).
        #[arg(short, long)]
        port: Option<u16>,

        /// Contact database path (overrides config).
        #[arg(long)]
        db: Option<PathBuf>,

        /// Keep contacts in memory; nothing is persisted.
        #[arg(long)]
        in_memory: bool,
    },

    /// Reconcile a single contact fragment and print the consolidated view.
    Identify {
        /// Email address.
        #[arg(short, long)]
        email: Option<String>,

        /// Phone number.
        #[arg(short, long)]
        phone: Option<String>,

        /// Contact database path (overrides config).
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Print the consolidated view of the group containing a contact.
    Show {
        /// Any contact id in the group.
        id: i64,

        /// Contact database path (overrides config).
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "reconciler=info,tower_http=info",
        1 => "reconciler=debug,tower_http=debug",
        _ => "reconciler=trace,tower_http=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Serve {
            host,
            port,
            db,
            in_memory,
        } => {
            let mut config = resolve_config(config_path)?;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            config.storage.in_memory |= in_memory;
            cmd_serve(&config, db.as_deref()).await
        }
        Command::Identify { email, phone, db } => {
            let config = resolve_config(config_path)?;
            cmd_identify(&config, db.as_deref(), email, phone).await
        }
        Command::Show { id, db } => {
            let config = resolve_config(config_path)?;
            cmd_show(&config, db.as_deref(), ContactId(id)).await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path).await,
        },
    }
}

/// Load config from an explicit path, or the default location.
fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    })
}

/// Open the configured contact store; `db` overrides the config path.
async fn open_store(config: &AppConfig, db: Option<&Path>) -> Result<Arc<dyn ContactStore>> {
    if config.storage.in_memory && db.is_none() {
        info!("using in-memory contact store");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let path = match db {
        Some(p) => p.to_path_buf(),
        None => config.storage.resolved_path()?,
    };
    info!(path = %path.display(), "opening contact database");
    Ok(Arc::new(Storage::open(&path).await?))
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_serve(config: &AppConfig, db: Option<&Path>) -> Result<()> {
    let store = open_store(config, db).await?;
    let state = Arc::new(AppState::new(ReconciliationEngine::new(store)));

    let addr = config.server.bind_addr();
    info!(%addr, "starting reconciler API");
    println!("Serving on http://{addr}");

    reconciler_server::serve(&addr, state).await?;
    Ok(())
}

async fn cmd_identify(
    config: &AppConfig,
    db: Option<&Path>,
    email: Option<String>,
    phone: Option<String>,
) -> Result<()> {
    if config.storage.in_memory && db.is_none() {
        return Err(eyre!(
            "identify needs a persistent store; pass --db or disable storage.in_memory"
        ));
    }

    let engine = ReconciliationEngine::new(open_store(config, db).await?);
    let contact = engine
        .identify(IdentifyRequest::new(email, phone))
        .await?;

    println!(
        "{}",
        serde_json::to_string_pretty(&IdentifyResponse { contact })?
    );
    Ok(())
}

async fn cmd_show(config: &AppConfig, db: Option<&Path>, id: ContactId) -> Result<()> {
    let engine = ReconciliationEngine::new(open_store(config, db).await?);
    let contact = engine
        .lookup(id)
        .await?
        .ok_or_else(|| eyre!("no contact with id {id}"))?;

    println!(
        "{}",
        serde_json::to_string_pretty(&IdentifyResponse { contact })?
    );
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = resolve_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
