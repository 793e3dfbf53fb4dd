//! Component — command-line entry point. `serve` boots the gateway,
//! scheduler, and health monitor together; the `approvals` subcommands give
//! an operator a terminal-based alternative to the `/safeguard/*` HTTP
//! surface for inspecting and deciding on pending requests.
//!
//! Grounded on `cli/commands/mod.rs`'s `Cli`/`Commands` clap-derive shape
//! and its `run()` dispatch loop; the teacher's onboarding/channels/pairing
//! commands have no counterpart here and are not carried over.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use std::sync::Arc;
use tracing::info;

use crate::approvals::ApprovalStore;
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::gateway::{self, AppState};
use crate::health::{Collaborator, HealthMonitor};
use crate::registry::ToolRegistry;
use crate::scheduler::Scheduler;
use crate::secrets::EncryptionKey;
use crate::state_store::MokaStateStore;

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "AI-operations control plane: tool gate, approval queue, and workflow scheduler")]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway, scheduler, and health monitor until interrupted.
    Serve,
    /// Inspect and decide on queued approvals from the terminal.
    Approvals {
        #[command(subcommand)]
        cmd: ApprovalCommands,
    },
}

#[derive(Subcommand)]
enum ApprovalCommands {
    /// List pending (unexpired) approval requests.
    List,
    /// Approve a pending request.
    Approve {
        approval_id: String,
        #[arg(long)]
        approver: String,
        #[arg(long)]
        comment: Option<String>,
    },
    /// Reject a pending request.
    Reject {
        approval_id: String,
        #[arg(long)]
        approver: String,
        #[arg(long)]
        comment: Option<String>,
    },
}

fn open_approval_store(config: &Config) -> Result<ApprovalStore> {
    let conn = Connection::open(&config.sqlite_path).context("opening approval store database")?;
    let secrets = Arc::new(MokaStateStore::new());
    let encryption = EncryptionKey::derive(&config.encryption_key);
    ApprovalStore::open(conn, secrets, encryption).context("initializing approval store schema")
}

async fn serve() -> Result<()> {
    let config = Config::from_env();
    config.validate().map_err(anyhow::Error::msg)?;
    info!(?config, "starting warden");

    let mut registry = ToolRegistry::new();
    crate::tools::register_builtins(&mut registry, &config)?;
    let registry = Arc::new(registry);
    let dispatcher = Arc::new(Dispatcher::new(registry.clone()));

    let approvals = Arc::new(open_approval_store(&config)?);

    let collaborators = config
        .collaborators
        .iter()
        .map(|c| Collaborator { name: c.name.clone(), url: c.url.clone(), critical: c.critical })
        .collect();
    let health_store = Arc::new(MokaStateStore::new());
    let health = Arc::new(HealthMonitor::new(health_store, collaborators));
    health.start();

    let scheduler = Arc::new(Scheduler::new());
    scheduler.start();

    let state = AppState { registry, dispatcher, approvals, health, config: Arc::new(config.clone()) };
    let server = gateway::start(&config.host, config.port, state).await?;

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("shutdown signal received");
    health.stop();
    scheduler.shutdown().await;
    server.abort();
    Ok(())
}

fn print_approval(record: &crate::approvals::ApprovalRecord) {
    println!(
        "{}  {:<20} {:<10} expires_in={}s  {}",
        record.approval_id,
        record.tool_name,
        record.security_level,
        record.time_remaining_seconds,
        serde_json::to_string(&record.arguments).unwrap_or_default(),
    );
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve => serve().await?,
        Commands::Approvals { cmd } => {
            let config = Config::from_env();
            let store = open_approval_store(&config)?;
            match cmd {
                ApprovalCommands::List => {
                    for record in store.list_pending(100)? {
                        print_approval(&record);
                    }
                }
                ApprovalCommands::Approve { approval_id, approver, comment } => {
                    let record = store.approve(&approval_id, &approver, comment)?;
                    println!("approved {}", record.approval_id);
                }
                ApprovalCommands::Reject { approval_id, approver, comment } => {
                    let record = store.reject(&approval_id, &approver, comment)?;
                    println!("rejected {}", record.approval_id);
                }
            }
        }
    }

    Ok(())
}
