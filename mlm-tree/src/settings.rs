//! Runtime engine settings loaded from the `settings` table
//!
//! Missing or NULL values use built-in defaults and are written back so
//! the table always shows the effective configuration.

use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::error::{Result, TreeError};

/// Position Finder walk bound when unset
pub const DEFAULT_SLOT_SEARCH_MAX_DEPTH: u32 = 15;

/// Rolling window for "recent joins" when unset
pub const DEFAULT_RECENT_JOIN_WINDOW_DAYS: u32 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EngineSettings {
    /// Deepest level (relative to the start member) Position Finder inspects
    pub slot_search_max_depth: u32,
    /// Maximum ancestors updated per propagation; `None` = up to the root
    pub propagation_depth_cap: Option<u32>,
    pub recent_join_window_days: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            slot_search_max_depth: DEFAULT_SLOT_SEARCH_MAX_DEPTH,
            propagation_depth_cap: None,
            recent_join_window_days: DEFAULT_RECENT_JOIN_WINDOW_DAYS,
        }
    }
}

impl EngineSettings {
    /// Load settings from database, writing defaults back for missing keys
    pub async fn load(pool: &SqlitePool) -> Result<Self> {
        let slot_search_max_depth =
            get_u32(pool, "slot_search_max_depth", DEFAULT_SLOT_SEARCH_MAX_DEPTH).await?;
        let cap = get_u32(pool, "propagation_depth_cap", 0).await?;
        let recent_join_window_days =
            get_u32(pool, "recent_join_window_days", DEFAULT_RECENT_JOIN_WINDOW_DAYS).await?;

        let settings = Self {
            slot_search_max_depth,
            propagation_depth_cap: (cap > 0).then_some(cap),
            recent_join_window_days,
        };

        info!(
            slot_search_max_depth = settings.slot_search_max_depth,
            propagation_depth_cap = ?settings.propagation_depth_cap,
            recent_join_window_days = settings.recent_join_window_days,
            "Engine settings loaded"
        );

        Ok(settings)
    }
}

/// Write one setting (used by the admin binary and tests)
pub async fn store_setting(pool: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT OR REPLACE INTO settings (key, value, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP)",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;

    Ok(())
}

async fn get_u32(pool: &SqlitePool, key: &str, default: u32) -> Result<u32> {
    let value: Option<Option<String>> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;

    match value.flatten() {
        Some(raw) => raw.trim().parse::<u32>().map_err(|e| {
            TreeError::InvalidInput(format!("setting '{}' = {:?} is not a u32: {}", key, raw, e))
        }),
        None => {
            warn!("Setting '{}' not found in database, using default: {}", key, default);
            store_setting(pool, key, &default.to_string()).await?;
            Ok(default)
        }
    }
}
