//! Database initialization
//!
//! Opens (or creates) the SQLite database and brings the schema up to date.
//! Every statement is idempotent, so calling `init_database` on an existing
//! database is safe.

use crate::config::EngineConfig;
use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

/// Default SQLite busy timeout
const BUSY_TIMEOUT_MS: u64 = 5000;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Pragmas go on the connect options so every pooled connection gets them,
    // not just the first one
    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path.display()))?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS));

    let pool = SqlitePoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    init_schema(&pool).await?;

    Ok(pool)
}

/// Create every table and index used by the engine
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    create_settings_table(pool).await?;
    create_profiles_table(pool).await?;
    create_projects_table(pool).await?;
    create_project_permissions_table(pool).await?;
    create_labels_table(pool).await?;
    create_training_sets_table(pool).await?;
    create_data_table(pool).await?;
    create_data_labels_table(pool).await?;
    create_data_predictions_table(pool).await?;
    create_data_vectors_table(pool).await?;
    create_queues_table(pool).await?;
    create_data_queue_table(pool).await?;
    create_assigned_data_table(pool).await?;
    create_pipeline_batches_table(pool).await?;
    create_pipeline_tasks_table(pool).await?;

    add_trigger_decision_column(pool).await?;

    Ok(())
}

/// Add `pipeline_batches.trigger_decision` to databases created without it
async fn add_trigger_decision_column(pool: &SqlitePool) -> Result<()> {
    let has_column: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM pragma_table_info('pipeline_batches') WHERE name = 'trigger_decision'",
    )
    .fetch_one(pool)
    .await?;

    if has_column == 0 {
        sqlx::query("ALTER TABLE pipeline_batches ADD COLUMN trigger_decision TEXT")
            .execute(pool)
            .await?;
        info!("Added trigger_decision column to pipeline_batches");
    }

    Ok(())
}

/// Create the settings table
///
/// Stores application configuration key-value pairs.
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Mirror the engine configuration into the settings table
///
/// Existing values win; only missing or NULL keys are written.
pub async fn seed_settings(pool: &SqlitePool, config: &EngineConfig) -> Result<()> {
    ensure_setting(pool, "items_per_label", &config.items_per_label.to_string()).await?;
    ensure_setting(
        pool,
        "redundancy_factor",
        &config
            .redundancy_factor
            .map(|f| f.to_string())
            .unwrap_or_else(|| "other_annotators".to_string()),
    )
    .await?;
    ensure_setting(pool, "ordering_policy", &config.ordering_policy).await?;
    ensure_setting(pool, "vectorize_partition_size", &config.vectorize_partition_size.to_string()).await?;
    ensure_setting(pool, "task_retry_budget", &config.task_retry_budget.to_string()).await?;
    ensure_setting(pool, "task_timeout_ms", &config.task_timeout_ms.to_string()).await?;
    ensure_setting(pool, "worker_concurrency", &config.worker_concurrency.to_string()).await?;
    ensure_setting(pool, "dedup_on_text", if config.dedup_on_text { "true" } else { "false" }).await?;
    ensure_setting(pool, "database_max_lock_wait_ms", "5000").await?;

    Ok(())
}

/// Read a setting, falling back to `default` when absent
pub async fn get_setting_u64(pool: &SqlitePool, key: &str, default: u64) -> Result<u64> {
    let value: Option<i64> =
        sqlx::query_scalar::<_, Option<i64>>("SELECT CAST(value AS INTEGER) FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?
            .flatten();

    Ok(value.map(|v| v.max(0) as u64).unwrap_or(default))
}

async fn ensure_setting(pool: &SqlitePool, key: &str, default_value: &str) -> Result<()> {
    let existing: Option<Option<String>> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;

    match existing {
        None => {
            // INSERT OR IGNORE: concurrent initializers may race past the lookup
            sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(default_value)
                .execute(pool)
                .await?;

            info!("Initialized setting '{}' with default value: {}", key, default_value);
        }
        Some(None) => {
            sqlx::query("UPDATE settings SET value = ?, updated_at = CURRENT_TIMESTAMP WHERE key = ?")
                .bind(default_value)
                .bind(key)
                .execute(pool)
                .await?;

            warn!("Setting '{}' was NULL, reset to default: {}", key, default_value);
        }
        Some(Some(_)) => {}
    }

    Ok(())
}

async fn create_profiles_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS profiles (
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_projects_table(pool: &SqlitePool) -> Result<()> {
    // current_training_set is the single "current" pointer; it only moves
    // through a compare-and-swap update
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            creator_id TEXT NOT NULL REFERENCES profiles(id),
            batch_size INTEGER NOT NULL CHECK (batch_size >= 0),
            current_training_set INTEGER NOT NULL DEFAULT 0,
            training_in_progress INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_project_permissions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS project_permissions (
            project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
            profile_id TEXT NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
            permission TEXT NOT NULL DEFAULT 'CODER' CHECK (permission IN ('ADMIN', 'CODER')),
            PRIMARY KEY (project_id, profile_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_labels_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS labels (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            UNIQUE (project_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_training_sets_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS training_sets (
            project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
            set_number INTEGER NOT NULL CHECK (set_number >= 0),
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (project_id, set_number)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_data_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS data (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
            training_set INTEGER NOT NULL,
            text TEXT NOT NULL,
            hash TEXT NOT NULL,
            upload_id TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_data_project_hash ON data(project_id, hash)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_data_upload ON data(upload_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_data_labels_table(pool: &SqlitePool) -> Result<()> {
    // At most one human label per datum
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS data_labels (
            data_id TEXT PRIMARY KEY REFERENCES data(id) ON DELETE CASCADE,
            label_id TEXT NOT NULL REFERENCES labels(id) ON DELETE CASCADE,
            profile_id TEXT REFERENCES profiles(id),
            training_set INTEGER NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_data_predictions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS data_predictions (
            data_id TEXT PRIMARY KEY REFERENCES data(id) ON DELETE CASCADE,
            label_id TEXT NOT NULL REFERENCES labels(id) ON DELETE CASCADE,
            score REAL NOT NULL CHECK (score >= 0.0 AND score <= 1.0)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_data_vectors_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS data_vectors (
            data_id TEXT PRIMARY KEY REFERENCES data(id) ON DELETE CASCADE,
            vector TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_queues_table(pool: &SqlitePool) -> Result<()> {
    // fill_version is bumped as the first write of every fill transaction
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS queues (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
            length INTEGER NOT NULL CHECK (length >= 0),
            fill_version INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_data_queue_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS data_queue (
            queue_id TEXT NOT NULL REFERENCES queues(id) ON DELETE CASCADE,
            data_id TEXT NOT NULL REFERENCES data(id) ON DELETE CASCADE,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (queue_id, data_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // A datum sits in at most one queue
    sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS idx_data_queue_data ON data_queue(data_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_assigned_data_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS assigned_data (
            profile_id TEXT NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
            data_id TEXT NOT NULL REFERENCES data(id) ON DELETE CASCADE,
            queue_id TEXT NOT NULL REFERENCES queues(id) ON DELETE CASCADE,
            assigned_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (profile_id, data_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_assigned_data_data ON assigned_data(data_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_pipeline_batches_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_batches (
            batch_id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
            training_set INTEGER NOT NULL,
            state TEXT NOT NULL,
            total_tasks INTEGER NOT NULL DEFAULT 0,
            outstanding INTEGER NOT NULL DEFAULT 0,
            error TEXT,
            trigger_decision TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_pipeline_tasks_table(pool: &SqlitePool) -> Result<()> {
    // One row per vectorization task; SUCCEEDED is written at most once so a
    // redelivered success never decrements the batch counter twice
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_tasks (
            task_key TEXT PRIMARY KEY,
            batch_id TEXT NOT NULL REFERENCES pipeline_batches(batch_id) ON DELETE CASCADE,
            state TEXT NOT NULL DEFAULT 'PENDING' CHECK (state IN ('PENDING', 'SUCCEEDED', 'FAILED')),
            last_error TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
