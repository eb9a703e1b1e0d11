//! folio-worker entry point.
//!
//! This file is intentionally thin: it sets up tracing, parses the CLI, and
//! wires the broker manager, database pool and consume loop together. The
//! actual pipeline lives in the library modules.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use folio_broker::topology::TRADE_EXCHANGE;
use folio_broker::BrokerManager;
use folio_worker::{TradeProcessor, TradeWorker, WorkerConfig};

#[derive(Parser)]
#[command(name = "folio-worker")]
#[command(about = "Trade-ingestion worker for the folio portfolio tracker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume trade-creation messages and reconcile positions.
    Run,

    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Publish a JSON payload onto the trade exchange. Operator tool for
    /// feeding the pipeline and re-injecting hand-drained dead letters.
    Publish {
        /// Routing key (trade.create.single | trade.create.bulk)
        #[arg(long, default_value = folio_schemas::ROUTING_KEY_BULK)]
        routing_key: String,

        /// Path to a file containing the JSON payload
        #[arg(long)]
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    /// Check connectivity and schema presence.
    Status,

    /// Apply SQL migrations.
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience). Silent if the file does
    // not exist — production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let cli = Cli::parse();
    match cli.cmd {
        Commands::Run => run_worker().await,
        Commands::Db { cmd } => match cmd {
            DbCmd::Status => {
                let pool = folio_db::connect_from_env().await?;
                let status = folio_db::status(&pool).await?;
                println!(
                    "db ok: {}, positions table present: {}",
                    status.ok, status.has_positions_table
                );
                Ok(())
            }
            DbCmd::Migrate => {
                let pool = folio_db::connect_from_env().await?;
                folio_db::migrate(&pool).await?;
                println!("migrations applied");
                Ok(())
            }
        },
        Commands::Publish { routing_key, file } => publish_payload(&routing_key, &file).await,
    }
}

async fn run_worker() -> anyhow::Result<()> {
    let config = WorkerConfig::from_env();

    let pool = folio_db::connect_from_env().await?;
    folio_db::status(&pool).await.context("database not reachable")?;

    let broker = BrokerManager::new(config.amqp_url.clone());
    // A failed first connect is not fatal: the manager keeps retrying with
    // backoff and the consume loop subscribes once the broker is up.
    if broker.init().await.is_err() {
        warn!("broker not reachable at startup; will keep retrying");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = TradeWorker::new(broker.clone(), TradeProcessor::new(pool));
    let mut worker_task = tokio::spawn(async move { worker.run(shutdown_rx).await });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);

            // Let the in-flight message finish its transaction, but only
            // within the grace period.
            if tokio::time::timeout(config.shutdown_grace, &mut worker_task)
                .await
                .is_err()
            {
                warn!(
                    grace_secs = config.shutdown_grace.as_secs(),
                    "shutdown grace exceeded; terminating worker"
                );
                worker_task.abort();
            }
        }
        res = &mut worker_task => {
            res.context("worker task ended unexpectedly")?;
        }
    }

    broker.shutdown().await;
    Ok(())
}

async fn publish_payload(routing_key: &str, file: &PathBuf) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("read payload file {}", file.display()))?;
    let payload: serde_json::Value =
        serde_json::from_str(&raw).context("payload must be valid JSON")?;

    let config = WorkerConfig::from_env();
    let broker = BrokerManager::new(config.amqp_url);
    broker.init().await.context("broker not reachable")?;

    broker
        .publish(TRADE_EXCHANGE, routing_key, &payload)
        .await
        .context("publish failed")?;
    println!("published to {TRADE_EXCHANGE} with routing key {routing_key}");

    broker.shutdown().await;
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}
