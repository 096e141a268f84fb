//! Database schema migrations
//!
//! Versioned, idempotent migrations tracked in `schema_version`. Tables are
//! created with their current shape by `init`; migrations bring databases
//! created by older builds up to date.
//!
//! # Migration Guidelines
//!
//! 1. **Never modify existing migrations**
//! 2. **Always add new migrations** - one function per schema change
//! 3. **Check before altering** - every migration must be safe to re-run

use crate::Result;
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Current schema version
///
/// **IMPORTANT:** Increment this when adding new migrations
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Get current schema version from database
///
/// Returns 0 if schema_version has no rows
pub async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let table_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM sqlite_master
            WHERE type='table' AND name='schema_version'
        )
        "#
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        return Ok(0);
    }

    let version: Option<i32> = sqlx::query_scalar(
        "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1"
    )
    .fetch_optional(pool)
    .await?;

    Ok(version.unwrap_or(0))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;

    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current_version = get_schema_version(pool).await?;

    if current_version == CURRENT_SCHEMA_VERSION {
        info!("Database schema is up to date (v{})", current_version);
        return Ok(());
    }

    if current_version > CURRENT_SCHEMA_VERSION {
        warn!(
            "Database schema version ({}) is newer than code version ({})",
            current_version, CURRENT_SCHEMA_VERSION
        );
        warn!("This may indicate a downgrade. Proceeding with caution.");
        return Ok(());
    }

    info!(
        "Running database migrations: v{} -> v{}",
        current_version, CURRENT_SCHEMA_VERSION
    );

    if current_version < 1 {
        migrate_v1(pool).await?;
        set_schema_version(pool, 1).await?;
        info!("✓ Migration v1 completed");
    }

    info!("All migrations completed successfully");
    Ok(())
}

/// Migration v1: Backfill zeroed metric rows for placed members
///
/// Members placed before the Metric Store existed have a tree row but no
/// metrics row; propagation needs one per ancestor.
async fn migrate_v1(pool: &SqlitePool) -> Result<()> {
    info!("Running migration v1: Backfill metrics rows");

    let result = sqlx::query(
        r#"
        INSERT INTO metrics (member_id)
        SELECT t.member_id FROM tree_nodes t
        LEFT JOIN metrics m ON m.member_id = t.member_id
        WHERE m.member_id IS NULL
        "#,
    )
    .execute(pool)
    .await?;

    if result.rows_affected() > 0 {
        warn!("  Backfilled {} missing metrics rows", result.rows_affected());
    } else {
        info!("  No missing metrics rows - skipping");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init::init_database;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_fresh_database_is_at_current_version() {
        let dir = TempDir::new().unwrap();
        let pool = init_database(&dir.path().join("mlm.db")).await.unwrap();

        let version = get_schema_version(&pool).await.unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);

        // Re-running is a no-op
        run_migrations(&pool).await.unwrap();
        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_version")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows, CURRENT_SCHEMA_VERSION as i64);

        pool.close().await;
    }

    #[tokio::test]
    async fn test_backfill_creates_missing_metrics_rows() {
        let dir = TempDir::new().unwrap();
        let pool = init_database(&dir.path().join("mlm.db")).await.unwrap();

        sqlx::query("INSERT INTO countries (id, name) VALUES (1, 'Kenya')")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO regions (id, country_id, name) VALUES (1, 1, 'Nairobi')")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO packages (id, name, pv, bv) VALUES (1, 'Starter', 50, 50)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(
            r#"
            INSERT INTO members (guid, username, first_name, last_name, email, phone,
                                 country_id, region_id, package_id, password_hash, pin_hash, created_at)
            VALUES ('m-1', 'early', 'F', 'L', 'early@example.com', '+1', 1, 1, 1, 'x', 'y',
                    '2025-01-01T00:00:00Z')
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();
        // Placed by a build without the Metric Store: tree row, no metrics row
        sqlx::query("INSERT INTO tree_nodes (member_id) VALUES ('m-1')")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("DELETE FROM schema_version").execute(&pool).await.unwrap();

        run_migrations(&pool).await.unwrap();

        let row: (i64, i64, i64) = sqlx::query_as(
            "SELECT self_pv, left_pv, total_bv FROM metrics WHERE member_id = 'm-1'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(row, (0, 0, 0));
        assert_eq!(get_schema_version(&pool).await.unwrap(), CURRENT_SCHEMA_VERSION);

        pool.close().await;
    }
}
