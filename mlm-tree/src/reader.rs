//! Tree Reader
//!
//! Reconstructs a member's whole downline for dashboards.
//!
//! **Algorithm:**
//! 1. One recursive query follows left/right pointers from the root and
//!    returns every descendant with its member row, metrics and depth,
//!    ordered by depth then id
//! 2. Rows go into an id -> node lookup, and each child id is mapped to the
//!    (parent, side) pointer that reached it
//! 3. Deepest rows first, each node is taken out of the lookup and attached
//!    to its parent's slot, so a node is moved only after all its children
//!    have been attached to it
//!
//! Both queries run in one read transaction, so the view and its revision
//! come from the same snapshot. No locks beyond that snapshot are taken.

use chrono::{DateTime, Duration, Utc};
use mlm_common::{time, Member, MetricRecord, Side, TreeNode};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use crate::db::members::member_from_row;
use crate::db::metrics::metrics_from_row;
use crate::db::{parse_id, parse_opt_id, tree_nodes};
use crate::error::{Result, TreeError};
use crate::settings::EngineSettings;

const SUBTREE_SQL: &str = r#"
    WITH RECURSIVE subtree(member_id, left_child_id, right_child_id, depth) AS (
        SELECT member_id, left_child_id, right_child_id, 0
        FROM tree_nodes
        WHERE member_id = ?
        UNION ALL
        SELECT t.member_id, t.left_child_id, t.right_child_id, s.depth + 1
        FROM tree_nodes t
        JOIN subtree s ON t.member_id = s.left_child_id OR t.member_id = s.right_child_id
    )
    SELECT s.member_id, s.left_child_id, s.right_child_id, s.depth,
           tn.parent_id,
           m.guid, m.username, m.sponsor_id, m.first_name, m.last_name, m.email, m.phone,
           m.country_id, m.region_id, m.package_id, m.status, m.created_at,
           COALESCE(x.self_pv, 0) AS self_pv,
           COALESCE(x.self_bv, 0) AS self_bv,
           COALESCE(x.left_pv, 0) AS left_pv,
           COALESCE(x.right_pv, 0) AS right_pv,
           COALESCE(x.total_pv, 0) AS total_pv,
           COALESCE(x.left_bv, 0) AS left_bv,
           COALESCE(x.right_bv, 0) AS right_bv,
           COALESCE(x.total_bv, 0) AS total_bv
    FROM subtree s
    JOIN tree_nodes tn ON tn.member_id = s.member_id
    JOIN members m ON m.guid = s.member_id
    LEFT JOIN metrics x ON x.member_id = s.member_id
    ORDER BY s.depth, s.member_id
"#;

/// One member of a reconstructed tree
#[derive(Debug, Clone, Serialize)]
pub struct TreeViewNode {
    pub member: Member,
    pub metrics: MetricRecord,
    /// Distance from the requested root
    pub depth: u32,
    pub left: Option<Box<TreeViewNode>>,
    pub right: Option<Box<TreeViewNode>>,
}

impl TreeViewNode {
    pub fn child(&self, side: Side) -> Option<&TreeViewNode> {
        match side {
            Side::Left => self.left.as_deref(),
            Side::Right => self.right.as_deref(),
        }
    }

    /// Pre-order walk without recursion, so deep chains need no stack depth
    pub fn walk(&self) -> impl Iterator<Item = &TreeViewNode> {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let node = stack.pop()?;
            if let Some(right) = node.right.as_deref() {
                stack.push(right);
            }
            if let Some(left) = node.left.as_deref() {
                stack.push(left);
            }
            Some(node)
        })
    }

    /// Number of members in this subtree, including this one
    pub fn size(&self) -> usize {
        self.walk().count()
    }
}

/// Nested downline of one member
#[derive(Debug, Clone, Serialize)]
pub struct TreeView {
    pub root: TreeViewNode,
    /// Members in the view, root included
    pub node_count: usize,
    pub max_depth: u32,
    /// Tree revision the snapshot observed
    pub revision: i64,
}

/// Aggregate counters for a member's dashboard
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StatsView {
    pub member_id: Uuid,
    pub left_pv: i64,
    pub right_pv: i64,
    pub total_pv: i64,
    pub left_bv: i64,
    pub right_bv: i64,
    pub total_bv: i64,
    pub total_descendants: usize,
    /// Descendants created within the rolling window
    pub recent_joins: usize,
    pub recent_window_days: u32,
    /// Descendants at depth > 0
    pub pairs: usize,
    pub left_count: usize,
    pub right_count: usize,
    pub max_depth: u32,
    pub revision: i64,
}

struct FlatRow {
    node: TreeNode,
    member: Member,
    metrics: MetricRecord,
    depth: u32,
}

#[derive(Clone)]
pub struct TreeReader {
    db: SqlitePool,
    recent_window_days: u32,
}

impl TreeReader {
    pub fn new(db: SqlitePool, settings: &EngineSettings) -> Self {
        Self {
            db,
            recent_window_days: settings.recent_join_window_days,
        }
    }

    /// Full downline of `root_member_id`; `NotFound` if it has no tree row
    pub async fn read_subtree(&self, root_member_id: Uuid) -> Result<TreeView> {
        let mut tx = self.db.begin().await?;
        let revision = tree_nodes::current_revision(&mut tx).await?;

        let rows = sqlx::query(SUBTREE_SQL)
            .bind(root_member_id.to_string())
            .fetch_all(&mut *tx)
            .await?;

        tx.commit().await?;

        let mut flat = Vec::with_capacity(rows.len());
        for row in &rows {
            let depth: i64 = row.get("depth");
            flat.push(FlatRow {
                node: TreeNode {
                    member_id: parse_id(&row.get::<String, _>("member_id"))?,
                    parent_id: parse_opt_id(row.get("parent_id"))?,
                    left_child_id: parse_opt_id(row.get("left_child_id"))?,
                    right_child_id: parse_opt_id(row.get("right_child_id"))?,
                },
                member: member_from_row(row)?,
                metrics: metrics_from_row(row),
                depth: depth as u32,
            });
        }

        debug!(root = %root_member_id, rows = flat.len(), revision, "Fetched subtree rows");

        assemble(root_member_id, flat, revision)
    }

    /// Dashboard counters, with the recent window evaluated now
    pub async fn read_stats(&self, root_member_id: Uuid) -> Result<StatsView> {
        self.read_stats_at(root_member_id, time::now()).await
    }

    /// Dashboard counters with an explicit evaluation time
    pub async fn read_stats_at(&self, root_member_id: Uuid, now: DateTime<Utc>) -> Result<StatsView> {
        let view = self.read_subtree(root_member_id).await?;
        Ok(stats_from_view(&view, now, self.recent_window_days))
    }
}

/// Fold flat rows into a nested tree anchored at `root_id`
fn assemble(root_id: Uuid, rows: Vec<FlatRow>, revision: i64) -> Result<TreeView> {
    if rows.is_empty() {
        return Err(TreeError::NotFound(root_id));
    }

    let node_count = rows.len();
    let max_depth = rows.iter().map(|r| r.depth).max().unwrap_or(0);

    // child id -> (parent id, slot) from the pointers that reached it
    let mut reached_from: HashMap<Uuid, (Uuid, Side)> = HashMap::with_capacity(node_count);
    for row in &rows {
        if let Some(left) = row.node.left_child_id {
            reached_from.insert(left, (row.node.member_id, Side::Left));
        }
        if let Some(right) = row.node.right_child_id {
            reached_from.insert(right, (row.node.member_id, Side::Right));
        }
    }

    let order: Vec<Uuid> = rows.iter().map(|r| r.node.member_id).collect();
    let mut lookup: HashMap<Uuid, TreeViewNode> = rows
        .into_iter()
        .map(|r| {
            (
                r.node.member_id,
                TreeViewNode {
                    member: r.member,
                    metrics: r.metrics,
                    depth: r.depth,
                    left: None,
                    right: None,
                },
            )
        })
        .collect();

    for id in order.iter().rev() {
        if *id == root_id {
            continue;
        }
        let (parent_id, side) = *reached_from.get(id).ok_or_else(|| {
            TreeError::Inconsistent(format!("{} returned without a parent pointer", id))
        })?;
        let node = lookup
            .remove(id)
            .ok_or_else(|| TreeError::Inconsistent(format!("{} reached twice", id)))?;
        let parent = lookup.get_mut(&parent_id).ok_or_else(|| {
            TreeError::Inconsistent(format!("parent {} of {} not materialized", parent_id, id))
        })?;
        match side {
            Side::Left => parent.left = Some(Box::new(node)),
            Side::Right => parent.right = Some(Box::new(node)),
        }
    }

    let root = lookup
        .remove(&root_id)
        .ok_or(TreeError::NotFound(root_id))?;

    Ok(TreeView {
        root,
        node_count,
        max_depth,
        revision,
    })
}

fn stats_from_view(view: &TreeView, now: DateTime<Utc>, window_days: u32) -> StatsView {
    let root = &view.root;
    let cutoff = now - Duration::days(i64::from(window_days));

    let descendants = || root.walk().filter(|n| n.depth > 0);
    let recent_joins = descendants()
        .filter(|n| n.member.created_at >= cutoff && n.member.created_at <= now)
        .count();

    StatsView {
        member_id: root.member.id,
        left_pv: root.metrics.left_pv,
        right_pv: root.metrics.right_pv,
        total_pv: root.metrics.total_pv,
        left_bv: root.metrics.left_bv,
        right_bv: root.metrics.right_bv,
        total_bv: root.metrics.total_bv,
        total_descendants: view.node_count - 1,
        recent_joins,
        recent_window_days: window_days,
        pairs: descendants().count(),
        left_count: root.left.as_deref().map(TreeViewNode::size).unwrap_or(0),
        right_count: root.right.as_deref().map(TreeViewNode::size).unwrap_or(0),
        max_depth: view.max_depth,
        revision: view.revision,
    }
}
