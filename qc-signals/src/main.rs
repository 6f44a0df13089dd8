//! qc-signals - signal consolidation service and operator CLI
//!
//! `serve` runs the HTTP API, `hydrate` imports `fct_signals` into the
//! signals table, `count` reports table sizes.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use qc_common::config::{CliOverrides, ServiceConfig};
use qc_common::db::{connect_readonly, init_database};
use qc_common::time::millis_to_duration;
use qc_signals::db::count_signals;
use qc_signals::services::{ContributionService, HydrateOptions, SignalHydrator, TechnicalDetailsService};
use qc_signals::sources::SqliteMart;
use qc_signals::{build_router, AppState};
use sqlx::SqlitePool;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Command-line arguments for qc-signals
#[derive(Parser, Debug)]
#[command(name = "qc-signals")]
#[command(about = "Signal consolidation and hierarchical contribution service")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Application database (signals table)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Analytics database holding fct_signals / fct_contributions
    #[arg(long, global = true)]
    mart_database: Option<PathBuf>,

    /// Log level when RUST_LOG is not set
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API
    Serve {
        /// Address to listen on
        #[arg(long)]
        bind: Option<String>,
    },
    /// Import signals from fct_signals into the signals table
    Hydrate {
        /// Restrict to one pipeline run
        #[arg(short, long)]
        run_id: Option<String>,

        /// Restrict to these facilities (repeatable)
        #[arg(short, long = "facility-id")]
        facility_id: Vec<String>,

        /// Maximum number of mart rows to read
        #[arg(short, long)]
        limit: Option<u32>,

        /// Rows per upsert statement
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Count stored signals
    Count {
        /// Restrict to one facility
        #[arg(short, long)]
        facility_id: Option<String>,

        /// Count rows available in fct_signals instead
        #[arg(long)]
        source: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let overrides = CliOverrides {
        config_file: cli.config.clone(),
        database_path: cli.database.clone(),
        mart_database_path: cli.mart_database.clone(),
        bind_address: match &cli.command {
            Command::Serve { bind } => bind.clone(),
            _ => None,
        },
        run_id: match &cli.command {
            Command::Hydrate { run_id, .. } => run_id.clone(),
            _ => None,
        },
        log_level: cli.log_level.clone(),
    };
    let config = ServiceConfig::resolve(&overrides);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)))
        .init();

    info!("Starting qc-signals v{}", env!("CARGO_PKG_VERSION"));
    info!("Database path: {}", config.database_path.display());

    let db = init_database(&config.database_path)
        .await
        .context("Failed to initialize application database")?;

    match cli.command {
        Command::Serve { .. } => serve(&config, db).await,
        Command::Hydrate {
            facility_id,
            limit,
            batch_size,
            ..
        } => {
            let options = HydrateOptions {
                run_id: config.run_id.clone(),
                facility_ids: facility_id,
                limit,
                batch_size: batch_size.unwrap_or(config.import_batch_size),
            };
            hydrate(&config, db, options).await
        }
        Command::Count { facility_id, source } => count(&config, db, facility_id, source).await,
    }
}

/// Mart adapter; the application database doubles as the mart when none is configured
async fn open_mart(config: &ServiceConfig, db: &SqlitePool) -> SqliteMart {
    let pool = match &config.mart_database_path {
        Some(path) => match connect_readonly(path).await {
            Ok(pool) => {
                info!("Mart database: {} (read-only)", path.display());
                pool
            }
            Err(e) => {
                warn!("Mart database unavailable ({}), reading marts from the application database", e);
                db.clone()
            }
        },
        None => db.clone(),
    };
    SqliteMart::new(pool).with_run_id(config.run_id.clone())
}

async fn serve(config: &ServiceConfig, db: SqlitePool) -> Result<()> {
    let mart = Arc::new(open_mart(config, &db).await);

    if config.hydrate_on_startup {
        let options = HydrateOptions {
            run_id: config.run_id.clone(),
            batch_size: config.import_batch_size,
            ..Default::default()
        };
        let stats = SignalHydrator::new(db.clone(), mart.clone(), options).hydrate().await;
        info!(
            "Startup hydration: {} processed, {} skipped",
            stats.processed, stats.skipped
        );
    }

    let contributions = ContributionService::new(
        mart.clone(),
        millis_to_duration(config.contribution_query_timeout_ms),
    );
    let technical_details = TechnicalDetailsService::new(mart);
    let app = build_router(AppState::new(db, contributions, technical_details));

    let listener = tokio::net::TcpListener::bind(config.bind_address.as_str())
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_address))?;
    info!("qc-signals listening on http://{}", config.bind_address);
    info!("Health check: http://{}/health", config.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

async fn hydrate(config: &ServiceConfig, db: SqlitePool, options: HydrateOptions) -> Result<()> {
    println!("Hydrating signals from fct_signals...");
    if let Some(run_id) = &options.run_id {
        println!("Run ID: {}", run_id);
    }
    if !options.facility_ids.is_empty() {
        println!("Filtering to facilities: {}", options.facility_ids.join(", "));
    }
    if let Some(limit) = options.limit {
        println!("Limiting to {} signals", limit);
    }

    let mart = Arc::new(open_mart(config, &db).await);
    let stats = SignalHydrator::new(db, mart, options).hydrate().await;

    println!();
    println!("Hydration complete:");
    println!("  Signals processed: {}", stats.processed);
    println!("  Signals created: {}", stats.created);
    println!("  Signals updated: {}", stats.updated);
    println!("  Signals skipped: {}", stats.skipped);
    println!("  Batches: {}", stats.batches);
    Ok(())
}

async fn count(config: &ServiceConfig, db: SqlitePool, facility_id: Option<String>, source: bool) -> Result<()> {
    if source {
        let options = HydrateOptions {
            run_id: config.run_id.clone(),
            facility_ids: facility_id.into_iter().collect(),
            ..Default::default()
        };
        let mart = Arc::new(open_mart(config, &db).await);
        let total = SignalHydrator::new(db, mart, options).source_count().await;
        println!("Rows in fct_signals: {}", total);
        return Ok(());
    }

    let total = count_signals(&db, facility_id.as_deref()).await?;
    match facility_id {
        Some(facility_id) => println!("Signals for facility {}: {}", facility_id, total),
        None => println!("Total signals: {}", total),
    }
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
