#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::too_many_lines,
    clippy::uninlined_format_args
)]

use anyhow::{Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

use botpanel::Config;
use botpanel::lifecycle::process;
use botpanel::sync::{ContactSyncEngine, Pipeline, RefreshOutcome};

/// Control plane for a long-running chat-bot worker.
#[derive(Parser, Debug)]
#[command(name = "botpanel")]
#[command(version)]
#[command(about = "Supervise a chat-bot worker and keep its contact directory fresh.", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the panel: worker supervision, contact sync, HTTP control surface (default)
    Serve {
        /// Port to listen on; defaults to [gateway].port
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to; defaults to [gateway].host
        #[arg(long)]
        host: Option<String>,
    },

    /// Run one refresh pass in the foreground
    Sync {
        #[arg(value_enum)]
        target: SyncTarget,
    },

    /// Print cached friend and group names
    Contacts,

    /// Show snapshot and worker pidfile status
    Status,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SyncTarget {
    Friends,
    Groups,
}

impl From<SyncTarget> for Pipeline {
    fn from(target: SyncTarget) -> Self {
        match target {
            SyncTarget::Friends => Pipeline::Friends,
            SyncTarget::Groups => Pipeline::Groups,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging - respects RUST_LOG env var, defaults to INFO
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = Config::load_or_init()?;

    match cli.command.unwrap_or(Commands::Serve {
        port: None,
        host: None,
    }) {
        Commands::Serve { port, host } => {
            let port = port.unwrap_or(config.gateway.port);
            let host = host.unwrap_or_else(|| config.gateway.host.clone());
            info!("Starting botpanel on {host}:{port}");
            botpanel::daemon::run(config, host, port).await
        }

        Commands::Sync { target } => {
            let engine = Arc::new(ContactSyncEngine::from_config(&config)?);
            let pipeline = Pipeline::from(target);
            match engine.refresh(pipeline).await? {
                RefreshOutcome::Completed { records, processed } => {
                    println!("{pipeline}: {records} records written ({processed} ids processed)");
                    println!("Snapshot: {}", engine.snapshots().path(pipeline).display());
                    Ok(())
                }
                RefreshOutcome::AlreadyRunning => bail!("{pipeline} refresh already in progress"),
                RefreshOutcome::NotSupported => bail!(
                    "Remote directory not configured; set [directory] enabled, base_url and app_id in {}",
                    config.config_path.display()
                ),
            }
        }

        Commands::Contacts => {
            let engine = ContactSyncEngine::from_config(&config)?;
            let names = engine.get_contacts_cached();
            println!("Friends ({}):", names.friends.len());
            for name in &names.friends {
                println!("  {name}");
            }
            println!("Groups ({}):", names.groups.len());
            for name in &names.groups {
                println!("  {name}");
            }
            Ok(())
        }

        Commands::Status => {
            let engine = ContactSyncEngine::from_config(&config)?;
            let status = engine.status().snapshot();
            let (worker, pid) = process::pidfile_status(&config.pid_path())?;

            println!("botpanel {}", env!("CARGO_PKG_VERSION"));
            println!("Config:     {}", config.config_path.display());
            println!("Snapshots:  {}", config.snapshot_dir().display());
            println!();
            println!(
                "Worker:     {worker}{}",
                pid.map(|p| format!(" (PID {p})")).unwrap_or_default()
            );
            println!(
                "Directory:  {}",
                if engine.is_configured() { "configured" } else { "not configured" }
            );
            for (label, exists, valid) in [
                ("Friends", status.friend_file_exists, engine.snapshots().is_valid(Pipeline::Friends)),
                ("Groups", status.group_file_exists, engine.snapshots().is_valid(Pipeline::Groups)),
            ] {
                let state = match (exists, valid) {
                    (false, _) => "missing",
                    (true, false) => "empty",
                    (true, true) => "ok",
                };
                println!("{label:<11} {state}");
            }
            Ok(())
        }
    }
}
