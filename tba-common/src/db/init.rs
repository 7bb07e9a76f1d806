//! Database initialization
//!
//! Creates the database file on first run and applies the schema
//! idempotently (`CREATE TABLE IF NOT EXISTS`), so every process that opens
//! the database (server, admin CLI, tests) sees the same layout.

use crate::config::DatabaseConfig;
use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Schema version written to `schema_version`
///
/// **IMPORTANT:** Increment this when the table layout changes
pub const CURRENT_SCHEMA_VERSION: i64 = 2;

/// Open (creating if needed) the database at `db_path` with default settings
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    init_database_with(&DatabaseConfig {
        path: db_path.to_path_buf(),
        busy_timeout_ms: 5000,
        max_connections: 10,
    })
    .await
}

/// Open (creating if needed) the database described by `config` and apply the schema
pub async fn init_database_with(config: &DatabaseConfig) -> Result<SqlitePool> {
    let db_path = &config.path;
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Per-connection settings; WAL allows concurrent readers alongside one writer
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(config.busy_timeout_ms));

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }
    debug!("Database busy timeout set to {} ms", config.busy_timeout_ms);

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create all tables and indexes (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_categories_table(pool).await?;
    create_submissions_table(pool).await?;
    create_allocation_entries_table(pool).await?;
    create_category_aggregates_table(pool).await?;
    create_cache_entries_table(pool).await?;
    record_schema_version(pool).await?;
    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_categories_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS categories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            description TEXT NOT NULL DEFAULT '',
            color TEXT NOT NULL DEFAULT '#007bff',
            display_order INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_categories_display_order ON categories(display_order, name)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_submissions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS submissions (
            submission_key TEXT PRIMARY KEY,
            user_id TEXT,
            submitted_at TEXT NOT NULL,
            ip_address TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_submissions_user ON submissions(user_id, submitted_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_submissions_submitted_at ON submissions(submitted_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_allocation_entries_table(pool: &SqlitePool) -> Result<()> {
    // One row per category per submission; the grouping key plus category is unique
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS allocation_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            submission_key TEXT NOT NULL REFERENCES submissions(submission_key),
            user_id TEXT,
            category_id INTEGER NOT NULL REFERENCES categories(id) ON DELETE CASCADE,
            percentage_hundredths INTEGER NOT NULL
                CHECK (percentage_hundredths BETWEEN 0 AND 10000),
            created_at TEXT NOT NULL,
            ip_address TEXT,
            UNIQUE (submission_key, category_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_entries_category ON allocation_entries(category_id, created_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_entries_user ON allocation_entries(user_id, created_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_entries_created_at ON allocation_entries(created_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_category_aggregates_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS category_aggregates (
            category_id INTEGER PRIMARY KEY REFERENCES categories(id) ON DELETE CASCADE,
            total_hundredths INTEGER NOT NULL DEFAULT 0,
            submission_count INTEGER NOT NULL DEFAULT 0,
            average_hundredths INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Submissions already folded into category_aggregates
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS aggregated_submissions (
            submission_key TEXT PRIMARY KEY
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_cache_entries_table(pool: &SqlitePool) -> Result<()> {
    // expires_at_ms NULL means the entry never expires
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cache_entries (
            cache_key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            expires_at_ms INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn record_schema_version(pool: &SqlitePool) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(CURRENT_SCHEMA_VERSION)
        .execute(pool)
        .await?;

    Ok(())
}

/// Latest applied schema version, 0 when none recorded
pub async fn get_schema_version(pool: &SqlitePool) -> Result<i64> {
    let version: Option<i64> =
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await?;

    Ok(version.unwrap_or(0))
}
