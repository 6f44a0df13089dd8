//! Database initialization

use crate::{Error, Result};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::{info, warn};

/// Open (creating if needed) the application database and ensure its schema
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // WAL lets API readers proceed while a hydration batch is writing
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    create_signals_table(&pool).await?;

    Ok(pool)
}

/// Open the analytics database read-only
///
/// The marts belong to the pipeline; this process never writes to them.
pub async fn connect_readonly(db_path: &Path) -> Result<SqlitePool> {
    if !db_path.exists() {
        return Err(Error::NotFound(format!(
            "Analytics database not found: {}",
            db_path.display()
        )));
    }

    let db_url = format!("sqlite://{}?mode=ro", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await
        .map_err(|e| {
            warn!(path = %db_path.display(), error = %e, "Read-only connect failed");
            Error::Database(e)
        })?;

    info!("Opened analytics database (read-only): {}", db_path.display());
    Ok(pool)
}

/// Create the canonical signals table
///
/// `facility_id` is `NOT NULL DEFAULT ''` rather than nullable: SQLite treats
/// NULLs as distinct in a unique index, which would let two facility-less
/// signals with the same identity coexist.
pub async fn create_signals_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS signals (
            guid TEXT PRIMARY KEY,
            canonical_node_id TEXT NOT NULL,
            metric_id TEXT NOT NULL,
            domain TEXT NOT NULL DEFAULT 'Efficiency'
                CHECK (domain IN ('Efficiency', 'Safety', 'Effectiveness')),
            facility_id TEXT NOT NULL DEFAULT '',
            system_name TEXT,
            service_line TEXT,
            sub_service_line TEXT,
            description TEXT NOT NULL,
            metric_value TEXT NOT NULL,
            peer_mean TEXT,
            peer_std TEXT,
            percentile_rank TEXT,
            encounters INTEGER,
            detected_at TEXT NOT NULL,
            temporal_node_id TEXT,
            entity_dimensions TEXT,
            entity_dimensions_hash TEXT NOT NULL,
            groupby_label TEXT,
            group_value TEXT,
            metric_trend_timeline TEXT,
            trend_direction TEXT,
            simplified_signal_type TEXT,
            simplified_severity INTEGER,
            simplified_severity_range TEXT,
            simplified_inputs TEXT,
            simplified_indicators TEXT,
            simplified_reasoning TEXT,
            simplified_severity_calculation TEXT,
            metadata TEXT,
            metadata_per_period TEXT,
            peer_percentile_trends TEXT,
            workflow_status TEXT NOT NULL DEFAULT 'new'
                CHECK (workflow_status IN ('new', 'assigned', 'in_progress', 'resolved', 'closed')),
            workflow_notes TEXT,
            assigned_to TEXT,
            import_revision INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS uq_signals_entity_metric_detected
        ON signals(canonical_node_id, metric_id, facility_id, entity_dimensions_hash, detected_at)
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_signals_facility ON signals(facility_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_signals_detected_at ON signals(detected_at)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_signals_workflow_status ON signals(workflow_status)")
        .execute(pool)
        .await?;

    Ok(())
}
