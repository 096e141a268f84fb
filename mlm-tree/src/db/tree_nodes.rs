//! Tree Store: binary-tree adjacency rows
//!
//! A child slot is written exactly once, by `claim_slot`. Rows are never
//! deleted (enforced by storage triggers as well).

use mlm_common::{Side, TreeNode};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use super::{parse_id, parse_opt_id};
use crate::error::Result;

fn node_from_row(row: &SqliteRow) -> Result<TreeNode> {
    Ok(TreeNode {
        member_id: parse_id(&row.get::<String, _>("member_id"))?,
        parent_id: parse_opt_id(row.get("parent_id"))?,
        left_child_id: parse_opt_id(row.get("left_child_id"))?,
        right_child_id: parse_opt_id(row.get("right_child_id"))?,
    })
}

/// Increment the tree revision and return the new value
///
/// Called as the first statement of every tree write transaction: the write
/// takes the SQLite writer lock (waiting up to the busy timeout), so all
/// reads that follow in the transaction see the latest committed tree.
pub async fn bump_revision(conn: &mut SqliteConnection) -> Result<i64> {
    let revision: i64 = sqlx::query_scalar(
        "UPDATE tree_revision SET revision = revision + 1 WHERE id = 1 RETURNING revision",
    )
    .fetch_one(&mut *conn)
    .await?;

    Ok(revision)
}

pub async fn current_revision(conn: &mut SqliteConnection) -> Result<i64> {
    let revision: Option<i64> = sqlx::query_scalar("SELECT revision FROM tree_revision WHERE id = 1")
        .fetch_optional(&mut *conn)
        .await?;

    Ok(revision.unwrap_or(0))
}

pub async fn load_node(conn: &mut SqliteConnection, member_id: Uuid) -> Result<Option<TreeNode>> {
    let row = sqlx::query(
        r#"
        SELECT member_id, parent_id, left_child_id, right_child_id
        FROM tree_nodes
        WHERE member_id = ?
        "#,
    )
    .bind(member_id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(node_from_row).transpose()
}

pub async fn node_exists(conn: &mut SqliteConnection, member_id: Uuid) -> Result<bool> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM tree_nodes WHERE member_id = ?)")
        .bind(member_id.to_string())
        .fetch_one(&mut *conn)
        .await?;

    Ok(exists)
}

/// The member without a parent, if the tree has been bootstrapped
pub async fn find_root(conn: &mut SqliteConnection) -> Result<Option<Uuid>> {
    let root: Option<String> = sqlx::query_scalar(
        "SELECT member_id FROM tree_nodes WHERE parent_id IS NULL ORDER BY created_at, member_id LIMIT 1",
    )
    .fetch_optional(&mut *conn)
    .await?;

    root.as_deref().map(parse_id).transpose()
}

/// Insert a node with both child slots empty
pub async fn insert_node(
    conn: &mut SqliteConnection,
    member_id: Uuid,
    parent_id: Option<Uuid>,
) -> Result<()> {
    sqlx::query("INSERT INTO tree_nodes (member_id, parent_id) VALUES (?, ?)")
        .bind(member_id.to_string())
        .bind(parent_id.map(|id| id.to_string()))
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Point `parent_id`'s `side` slot at `child_id` if the slot is still empty
///
/// Returns `false` when the slot was already occupied (nothing written).
pub async fn claim_slot(
    conn: &mut SqliteConnection,
    parent_id: Uuid,
    side: Side,
    child_id: Uuid,
) -> Result<bool> {
    let column = side.child_column();
    let sql = format!(
        "UPDATE tree_nodes SET {column} = ? WHERE member_id = ? AND {column} IS NULL"
    );

    let result = sqlx::query(&sql)
        .bind(child_id.to_string())
        .bind(parent_id.to_string())
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() == 1)
}

/// Every node in the store, for the audit
pub async fn load_all_nodes(conn: &mut SqliteConnection) -> Result<Vec<TreeNode>> {
    let rows = sqlx::query(
        r#"
        SELECT member_id, parent_id, left_child_id, right_child_id
        FROM tree_nodes
        ORDER BY member_id
        "#,
    )
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(node_from_row).collect()
}
