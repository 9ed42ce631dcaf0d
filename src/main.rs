//! CLI entrypoint: `memkeepd serve` (the worker), `memkeepd bridge` (the
//! stdio SearchBridge), `memkeepd migrate` (one-shot data-dir migration).
//! Generalizes the teacher's `main.rs` subcommand dispatch.

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use memkeep::http::state::SharedState;
use memkeep::scheduler::Scheduler;
use memkeep::{bridge, config, db, lockfile, migrate, telemetry};

const GLOBAL_CONCURRENCY_CAP: usize = 4;

#[derive(Parser)]
#[command(name = "memkeepd", about = "Local-first coding-session memory worker")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP worker (ingest, distill, serve queries).
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run the stdio JSON-RPC SearchBridge.
    Bridge {
        #[arg(long)]
        base_url: Option<String>,
        #[arg(long)]
        worker_binary: Option<String>,
    },
    /// One-shot migration from a legacy data directory.
    Migrate {
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { host, port } => run_serve(host, port).await,
        Command::Bridge { base_url, worker_binary } => {
            // Must run before anything else touches stdout/stderr logging.
            telemetry::init_bridge();
            let opts = bridge::BridgeOptions {
                base_url: base_url.unwrap_or_else(default_base_url),
                worker_binary,
            };
            bridge::run_stdio(opts).await
        }
        Command::Migrate { dry_run, force } => {
            telemetry::init_worker();
            match migrate::run(dry_run, force)? {
                Some(report) => {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
                None => println!("nothing to migrate"),
            }
            Ok(())
        }
    }
}

fn default_base_url() -> String {
    let host = config::resolve(&config::WORKER_HOST).unwrap_or_else(|| "127.0.0.1".to_string());
    let port = config::resolve(&config::WORKER_PORT).unwrap_or_else(|| "37777".to_string());
    format!("http://{host}:{port}")
}

async fn run_serve(host_override: Option<String>, port_override: Option<u16>) -> Result<()> {
    telemetry::init_worker();

    if let Some(holder) = lockfile::active_holder() {
        anyhow::bail!("a worker is already running (pid {}, port {})", holder.pid, holder.port);
    }

    let host = host_override.unwrap_or_else(|| config::resolve(&config::WORKER_HOST).unwrap_or_else(|| "127.0.0.1".to_string()));
    let port = port_override.unwrap_or_else(|| {
        config::resolve(&config::WORKER_PORT)
            .and_then(|v| v.parse().ok())
            .unwrap_or(37777)
    });

    lockfile::acquire(port)?;

    let conn = db::open_db()?;
    let vector: Arc<dyn memkeep::vector::VectorIndex> = Arc::new(memkeep::vector::SqliteVectorIndex);
    let scheduler = Arc::new(Scheduler::new(GLOBAL_CONCURRENCY_CAP));
    let state = SharedState::new(conn, vector, scheduler);

    tracing::info!(host, port, "starting worker");
    let result = memkeep::http::serve(state, &host, port).await;
    lockfile::release();
    result
}
