//! Metric Store: per-member PV/BV accumulators

use mlm_common::{MetricRecord, Side};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use std::collections::HashMap;
use uuid::Uuid;

use super::parse_id;
use crate::error::Result;

pub(crate) fn metrics_from_row(row: &SqliteRow) -> MetricRecord {
    MetricRecord {
        self_pv: row.get("self_pv"),
        self_bv: row.get("self_bv"),
        left_pv: row.get("left_pv"),
        right_pv: row.get("right_pv"),
        total_pv: row.get("total_pv"),
        left_bv: row.get("left_bv"),
        right_bv: row.get("right_bv"),
        total_bv: row.get("total_bv"),
    }
}

/// Create the record for a newly placed member: leg accumulators at zero,
/// own purchase folded in
pub async fn insert_metrics(
    conn: &mut SqliteConnection,
    member_id: Uuid,
    self_pv: i64,
    self_bv: i64,
) -> Result<()> {
    sqlx::query("INSERT INTO metrics (member_id, self_pv, self_bv) VALUES (?, ?, ?)")
        .bind(member_id.to_string())
        .bind(self_pv)
        .bind(self_bv)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

pub async fn load_metrics(conn: &mut SqliteConnection, member_id: Uuid) -> Result<Option<MetricRecord>> {
    let row = sqlx::query(
        r#"
        SELECT self_pv, self_bv, left_pv, right_pv, total_pv, left_bv, right_bv, total_bv
        FROM metrics
        WHERE member_id = ?
        "#,
    )
    .bind(member_id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.as_ref().map(metrics_from_row))
}

/// Add a delta to one leg and the totals; returns `false` if no record exists
pub async fn apply_leg_delta(
    conn: &mut SqliteConnection,
    member_id: Uuid,
    side: Side,
    delta_pv: i64,
    delta_bv: i64,
) -> Result<bool> {
    let leg = side.as_str();
    let sql = format!(
        r#"
        UPDATE metrics
        SET {leg}_pv = {leg}_pv + ?,
            total_pv = total_pv + ?,
            {leg}_bv = {leg}_bv + ?,
            total_bv = total_bv + ?,
            updated_at = CURRENT_TIMESTAMP
        WHERE member_id = ?
        "#
    );

    let result = sqlx::query(&sql)
        .bind(delta_pv)
        .bind(delta_pv)
        .bind(delta_bv)
        .bind(delta_bv)
        .bind(member_id.to_string())
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() == 1)
}

/// Add to the member's own purchased value
pub async fn add_self_value(
    conn: &mut SqliteConnection,
    member_id: Uuid,
    pv: i64,
    bv: i64,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE metrics
        SET self_pv = self_pv + ?, self_bv = self_bv + ?, updated_at = CURRENT_TIMESTAMP
        WHERE member_id = ?
        "#,
    )
    .bind(pv)
    .bind(bv)
    .bind(member_id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Every metric record keyed by member, for the audit
pub async fn load_all_metrics(conn: &mut SqliteConnection) -> Result<HashMap<Uuid, MetricRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT member_id, self_pv, self_bv, left_pv, right_pv, total_pv, left_bv, right_bv, total_bv
        FROM metrics
        "#,
    )
    .fetch_all(&mut *conn)
    .await?;

    let mut records = HashMap::with_capacity(rows.len());
    for row in &rows {
        let id = parse_id(&row.get::<String, _>("member_id"))?;
        records.insert(id, metrics_from_row(row));
    }
    Ok(records)
}
