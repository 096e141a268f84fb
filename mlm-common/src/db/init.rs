//! Database initialization
//!
//! Opens (creating if needed) the SQLite database, creates the schema,
//! runs migrations and seeds default settings. The returned pool is the
//! storage handle every engine component receives; callers close it at
//! shutdown with `SqlitePool::close`.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Connection pool tuning, normally taken from the `[database]` TOML section
#[derive(Debug, Clone, Copy)]
pub struct DatabaseOptions {
    pub max_connections: u32,
    pub min_connections: u32,
    /// How long a writer waits for the SQLite writer lock before failing
    pub busy_timeout: Duration,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            max_connections: 20,
            min_connections: 1,
            busy_timeout: Duration::from_millis(5000),
        }
    }
}

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    init_database_with(db_path, DatabaseOptions::default()).await
}

/// Initialize database with explicit pool options
pub async fn init_database_with(db_path: &Path, options: DatabaseOptions) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Pragmas are set through connect options so every pooled connection
    // carries them, not just the first one.
    // WAL: concurrent readers with one writer, so dashboard reads never block placements
    let connect_options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(options.busy_timeout);

    let pool = SqlitePoolOptions::new()
        .max_connections(options.max_connections)
        .min_connections(options.min_connections)
        .connect_with(connect_options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // Idempotent - safe to call on every start
    create_schema_version_table(&pool).await?;
    create_settings_table(&pool).await?;
    create_reference_tables(&pool).await?;
    create_members_table(&pool).await?;
    create_tree_nodes_table(&pool).await?;
    create_metrics_table(&pool).await?;
    create_tree_revision_table(&pool).await?;

    crate::db::migrations::run_migrations(&pool).await?;

    init_default_settings(&pool).await?;

    info!(
        "Database busy timeout set to {} ms",
        options.busy_timeout.as_millis()
    );

    Ok(pool)
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

/// Create the settings table
///
/// Stores runtime engine configuration key-value pairs.
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

/// Initialize or update default settings
///
/// Ensures all engine settings exist, resetting NULL values to defaults.
async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    // Position Finder walk bound
    ensure_setting(pool, "slot_search_max_depth", "15").await?;
    // 0 = propagate all the way to the root
    ensure_setting(pool, "propagation_depth_cap", "0").await?;
    // Dashboard "recent joins" rolling window
    ensure_setting(pool, "recent_join_window_days", "7").await?;

    info!("Default settings initialized");
    Ok(())
}

/// Ensure a setting exists with the specified default value
///
/// If the setting doesn't exist, it will be created with the default.
/// If the setting exists but has a NULL value, it will be reset to the default.
async fn ensure_setting(pool: &SqlitePool, key: &str, default_value: &str) -> Result<()> {
    let value: Option<Option<String>> = sqlx::query_scalar(
        "SELECT value FROM settings WHERE key = ?"
    )
    .bind(key)
    .fetch_optional(pool)
    .await?;

    match value {
        None => {
            // INSERT OR IGNORE: concurrent initializers may both get here
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

/// Create countries, regions, packages and package_prices
///
/// Reference data is read-only input to placement; rows are only ever
/// inserted by seeding tools and deactivated by admins.
pub async fn create_reference_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS countries (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL DEFAULT 'active' CHECK (status IN ('active', 'inactive'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS regions (
            id INTEGER PRIMARY KEY,
            country_id INTEGER NOT NULL REFERENCES countries(id),
            name TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active' CHECK (status IN ('active', 'inactive')),
            UNIQUE (country_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS packages (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            pv INTEGER NOT NULL CHECK (pv >= 0),
            bv INTEGER NOT NULL CHECK (bv >= 0),
            status TEXT NOT NULL DEFAULT 'active' CHECK (status IN ('active', 'inactive'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS package_prices (
            package_id INTEGER NOT NULL REFERENCES packages(id),
            country_id INTEGER NOT NULL REFERENCES countries(id),
            price REAL NOT NULL CHECK (price >= 0),
            PRIMARY KEY (package_id, country_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the members table (Member Ledger)
pub async fn create_members_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS members (
            guid TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            sponsor_id TEXT REFERENCES members(guid),
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            phone TEXT NOT NULL UNIQUE,
            country_id INTEGER NOT NULL REFERENCES countries(id),
            region_id INTEGER NOT NULL REFERENCES regions(id),
            package_id INTEGER NOT NULL REFERENCES packages(id),
            password_hash TEXT NOT NULL,
            pin_hash TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active' CHECK (status IN ('active', 'inactive')),
            created_at TEXT NOT NULL,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_members_sponsor ON members(sponsor_id)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Create the tree_nodes table (Tree Store)
///
/// Triggers make occupied child slots and node rows permanent at the
/// storage level.
pub async fn create_tree_nodes_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tree_nodes (
            member_id TEXT PRIMARY KEY REFERENCES members(guid),
            parent_id TEXT REFERENCES tree_nodes(member_id),
            left_child_id TEXT UNIQUE REFERENCES tree_nodes(member_id),
            right_child_id TEXT UNIQUE REFERENCES tree_nodes(member_id),
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            CHECK (left_child_id IS NULL OR left_child_id <> member_id),
            CHECK (right_child_id IS NULL OR right_child_id <> member_id),
            CHECK (parent_id IS NULL OR parent_id <> member_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tree_nodes_parent ON tree_nodes(parent_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TRIGGER IF NOT EXISTS trg_tree_nodes_slot_permanent
        BEFORE UPDATE OF left_child_id, right_child_id, parent_id ON tree_nodes
        WHEN (OLD.left_child_id IS NOT NULL AND NEW.left_child_id IS NOT OLD.left_child_id)
          OR (OLD.right_child_id IS NOT NULL AND NEW.right_child_id IS NOT OLD.right_child_id)
          OR (NEW.parent_id IS NOT OLD.parent_id)
        BEGIN
            SELECT RAISE(ABORT, 'tree position is permanent');
        END
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TRIGGER IF NOT EXISTS trg_tree_nodes_no_delete
        BEFORE DELETE ON tree_nodes
        BEGIN
            SELECT RAISE(ABORT, 'tree nodes are never deleted');
        END
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the metrics table (Metric Store)
pub async fn create_metrics_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS metrics (
            member_id TEXT PRIMARY KEY REFERENCES members(guid),
            self_pv INTEGER NOT NULL DEFAULT 0 CHECK (self_pv >= 0),
            self_bv INTEGER NOT NULL DEFAULT 0 CHECK (self_bv >= 0),
            left_pv INTEGER NOT NULL DEFAULT 0 CHECK (left_pv >= 0),
            right_pv INTEGER NOT NULL DEFAULT 0 CHECK (right_pv >= 0),
            total_pv INTEGER NOT NULL DEFAULT 0 CHECK (total_pv >= 0),
            left_bv INTEGER NOT NULL DEFAULT 0 CHECK (left_bv >= 0),
            right_bv INTEGER NOT NULL DEFAULT 0 CHECK (right_bv >= 0),
            total_bv INTEGER NOT NULL DEFAULT 0 CHECK (total_bv >= 0),
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the tree_revision counter
///
/// Every tree/metric write transaction bumps this single row first, which
/// takes the SQLite writer lock before any precondition is read.
pub async fn create_tree_revision_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tree_revision (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            revision INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("INSERT OR IGNORE INTO tree_revision (id, revision) VALUES (1, 0)")
        .execute(pool)
        .await?;

    Ok(())
}
