//! mpi-ingest - payment event ingestion service
//!
//! `serve` runs the admin HTTP API (and the live tailer when enabled);
//! the remaining subcommands run one administrative operation and exit.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mpi_common::api::load_shared_secret;
use mpi_common::IngestConfig;
use sqlx::SqlitePool;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mpi_ingest::chain::{JsonRpcLogSource, LogSource};
use mpi_ingest::db::poison::ListOrder;
use mpi_ingest::db::init_database_pool;
use mpi_ingest::ingest::{IngestServices, Tailer};
use mpi_ingest::{build_router, AppState};

/// Command-line arguments for mpi-ingest
#[derive(Parser, Debug)]
#[command(name = "mpi-ingest")]
#[command(about = "Payment event ingestion service")]
#[command(version)]
struct Args {
    /// Configuration file (overrides MPI_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the admin HTTP API (default)
    Serve,

    /// Replay an inclusive block range
    Replay {
        #[arg(long)]
        from: i64,
        #[arg(long)]
        to: i64,
    },

    /// Inspect or retry quarantined events
    Poison {
        #[command(subcommand)]
        action: PoisonAction,
    },

    /// Link play records to songs the catalog now knows
    Relink {
        #[arg(long)]
        limit: Option<u32>,
    },
}

#[derive(Subcommand, Debug)]
enum PoisonAction {
    /// Newest first
    List {
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
    /// Oldest first
    Retry {
        #[arg(long)]
        limit: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mpi_ingest=info,mpi_common=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting mpi-ingest v{}", env!("CARGO_PKG_VERSION"));

    let config = IngestConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    std::fs::create_dir_all(&config.root_folder).with_context(|| {
        format!("Failed to create root folder {}", config.root_folder.display())
    })?;

    let pool = init_database_pool(&config)
        .await
        .context("Failed to open database")?;
    info!("Database: {}", config.database_path().display());

    let source: Arc<dyn LogSource> = Arc::new(
        JsonRpcLogSource::new(
            config.chain.rpc_url.clone(),
            Duration::from_millis(config.chain.request_timeout_ms),
        )
        .context("Failed to build RPC client")?,
    );

    let services = IngestServices::from_config(pool.clone(), source.clone(), &config)
        .context("Failed to construct ingestion services")?;

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, pool, source, services, shutdown).await,
        Command::Replay { from, to } => {
            let summary = services.replay.replay(from, to, &shutdown).await?;
            println!("{}", serde_json::to_string(&summary)?);
            Ok(())
        }
        Command::Poison {
            action: PoisonAction::List { limit },
        } => {
            let limit = limit.min(config.ingest.poison_list_max);
            let records = services.poison.list(limit, ListOrder::NewestFirst).await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
            Ok(())
        }
        Command::Poison {
            action: PoisonAction::Retry { limit },
        } => {
            let limit = limit.unwrap_or(config.ingest.retry_batch_default);
            let summary = services.retry.retry_batch(limit, &shutdown).await?;
            println!("{}", serde_json::to_string(&summary)?);
            Ok(())
        }
        Command::Relink { limit } => {
            let limit = limit.unwrap_or(config.ingest.retry_batch_default);
            let linked = services.engine.relink_unlinked(limit).await?;
            println!("{}", serde_json::json!({ "linked": linked }));
            Ok(())
        }
    }
}

async fn serve(
    config: IngestConfig,
    pool: SqlitePool,
    source: Arc<dyn LogSource>,
    services: IngestServices,
    shutdown: CancellationToken,
) -> Result<()> {
    let shared_secret = load_shared_secret(&pool)
        .await
        .context("Failed to load shared secret")?;
    if shared_secret == 0 {
        warn!("API authentication disabled (shared_secret = 0)");
    } else {
        info!("Loaded shared secret for API authentication");
    }

    let tailer = if config.tail.enabled {
        let tailer = Tailer::new(source, services.replay.clone(), pool.clone(), &config);
        Some(tokio::spawn(tailer.run(shutdown.child_token())))
    } else {
        info!("Live tailer disabled");
        None
    };

    let state = AppState::new(
        pool,
        shared_secret,
        services,
        config.ingest.clone(),
        shutdown.clone(),
    );
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.http.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", config.http.bind))?;
    info!("mpi-ingest listening on http://{}", config.http.bind);
    info!("Health check: http://{}/health", config.http.bind);

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
        .await
        .context("Server error")?;

    if let Some(handle) = tailer {
        if let Err(e) = handle.await {
            error!("Tailer task failed: {}", e);
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Cancel the root token on Ctrl+C or SIGTERM
async fn cancel_on_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }

    shutdown.cancel();
}
