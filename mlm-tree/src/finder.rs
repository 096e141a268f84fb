//! Position Finder
//!
//! Finds the shallowest member with an empty `side` slot on the single-file
//! chain that starts at a member and always follows the `side` child.
//! One bounded recursive query fetches the chain.

use mlm_common::Side;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::db::{parse_id, parse_opt_id};
use crate::error::{Result, TreeError};
use crate::settings::EngineSettings;

#[derive(Clone)]
pub struct PositionFinder {
    db: SqlitePool,
    max_depth: u32,
}

impl PositionFinder {
    pub fn new(db: SqlitePool, settings: &EngineSettings) -> Self {
        Self {
            db,
            max_depth: settings.slot_search_max_depth,
        }
    }

    /// Shallowest member at depth `0..=max_depth` below `start_member_id`
    /// whose `side` slot is empty
    pub async fn find_open_slot(&self, start_member_id: Uuid, side: Side) -> Result<Uuid> {
        let mut conn = self.db.acquire().await?;
        find_open_slot_in(&mut conn, start_member_id, side, self.max_depth).await
    }
}

/// Chain walk on an existing connection (used inside placement transactions)
pub async fn find_open_slot_in(
    conn: &mut SqliteConnection,
    start_member_id: Uuid,
    side: Side,
    max_depth: u32,
) -> Result<Uuid> {
    let column = side.child_column();
    let sql = format!(
        r#"
        WITH RECURSIVE chain(member_id, child_id, depth) AS (
            SELECT member_id, {column}, 0
            FROM tree_nodes
            WHERE member_id = ?
            UNION ALL
            SELECT t.member_id, t.{column}, c.depth + 1
            FROM tree_nodes t
            JOIN chain c ON t.member_id = c.child_id
            WHERE c.depth < ?
        )
        SELECT member_id, child_id, depth FROM chain ORDER BY depth
        "#
    );

    let rows = sqlx::query(&sql)
        .bind(start_member_id.to_string())
        .bind(max_depth as i64)
        .fetch_all(&mut *conn)
        .await?;

    if rows.is_empty() {
        return Err(TreeError::NotFound(start_member_id));
    }

    for row in &rows {
        if parse_opt_id(row.get("child_id"))?.is_none() {
            let member_id = parse_id(&row.get::<String, _>("member_id"))?;
            debug!(
                start = %start_member_id,
                side = %side,
                depth = row.get::<i64, _>("depth"),
                found = %member_id,
                "Found open slot"
            );
            return Ok(member_id);
        }
    }

    Err(TreeError::SlotSearchExhausted {
        start: start_member_id,
        side,
        max_depth,
    })
}
