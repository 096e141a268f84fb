//! Propagation Engine
//!
//! Walks from a starting member up to the root, adding a PV/BV delta to the
//! leg accumulator facing the path at every hop.
//!
//! **Algorithm:**
//! 1. Add the delta to `current.{side}_pv/bv` and `current.total_pv/bv`
//! 2. Load `current`'s parent; stop if there is none
//! 3. Recompute `side` as the slot `current` occupies on that parent
//! 4. Move to the parent and repeat, unless the depth cap is reached
//!
//! Hops are applied strictly in order; each hop's side depends on the
//! parent link resolved by the previous one.

use mlm_common::{MetricRecord, Side};
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::{metrics, tree_nodes};
use crate::error::{Result, TreeError};
use crate::settings::EngineSettings;

/// Outcome of one propagation walk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PropagationReport {
    /// Number of ancestors whose accumulators were updated
    pub hops: u32,
    /// Last member updated
    pub last_member_id: Option<Uuid>,
    pub reached_root: bool,
    pub stopped_at_cap: bool,
}

/// Result of a repurchase by an existing member
#[derive(Debug, Clone, Serialize)]
pub struct PurchaseResult {
    pub member_id: Uuid,
    pub metrics: MetricRecord,
    pub propagation: PropagationReport,
}

fn check_delta(delta_pv: i64, delta_bv: i64) -> Result<()> {
    if delta_pv < 0 || delta_bv < 0 {
        return Err(TreeError::InvalidInput(format!(
            "propagation deltas must be non-negative (pv={}, bv={})",
            delta_pv, delta_bv
        )));
    }
    Ok(())
}

/// Propagate inside the caller's transaction
///
/// `from_member_id` receives the delta on `side`; every ancestor above it
/// receives it on the side it is reached from. `depth_cap` bounds the number
/// of members updated (`None` = up to the root).
pub async fn propagate_in(
    conn: &mut SqliteConnection,
    from_member_id: Uuid,
    side: Side,
    delta_pv: i64,
    delta_bv: i64,
    depth_cap: Option<u32>,
) -> Result<PropagationReport> {
    check_delta(delta_pv, delta_bv)?;

    let mut report = PropagationReport {
        hops: 0,
        last_member_id: None,
        reached_root: false,
        stopped_at_cap: false,
    };
    let mut current = from_member_id;
    let mut side = side;

    loop {
        if let Some(cap) = depth_cap {
            if report.hops >= cap {
                report.stopped_at_cap = true;
                break;
            }
        }

        if !metrics::apply_leg_delta(conn, current, side, delta_pv, delta_bv).await? {
            return Err(TreeError::NotFound(current));
        }
        report.hops += 1;
        report.last_member_id = Some(current);

        debug!(
            member_id = %current,
            side = %side,
            delta_pv,
            delta_bv,
            hop = report.hops,
            "Propagated value"
        );

        let node = tree_nodes::load_node(conn, current)
            .await?
            .ok_or(TreeError::NotFound(current))?;

        let Some(parent_id) = node.parent_id else {
            report.reached_root = true;
            break;
        };

        let parent = tree_nodes::load_node(conn, parent_id)
            .await?
            .ok_or(TreeError::ParentNotFound(parent_id))?;

        side = parent.side_of(current).ok_or_else(|| {
            TreeError::Inconsistent(format!(
                "{} names {} as parent but is in neither of its slots",
                current, parent_id
            ))
        })?;
        current = parent_id;
    }

    Ok(report)
}

/// Standalone entry point for value changes outside a placement
#[derive(Clone)]
pub struct PropagationEngine {
    db: SqlitePool,
    depth_cap: Option<u32>,
}

impl PropagationEngine {
    pub fn new(db: SqlitePool, settings: &EngineSettings) -> Self {
        Self {
            db,
            depth_cap: settings.propagation_depth_cap,
        }
    }

    /// Propagate a delta in its own transaction
    pub async fn propagate(
        &self,
        from_member_id: Uuid,
        side: Side,
        delta_pv: i64,
        delta_bv: i64,
    ) -> Result<PropagationReport> {
        check_delta(delta_pv, delta_bv)?;

        let mut tx = self.db.begin().await?;
        tree_nodes::bump_revision(&mut tx).await?;

        let report =
            propagate_in(&mut tx, from_member_id, side, delta_pv, delta_bv, self.depth_cap).await?;

        tx.commit().await?;
        Ok(report)
    }

    /// Record a repurchase: add to the member's own value, then propagate
    /// from its parent on the side the member occupies
    ///
    /// The root has no upline, so only its own value changes.
    pub async fn record_purchase(&self, member_id: Uuid, pv: i64, bv: i64) -> Result<PurchaseResult> {
        check_delta(pv, bv)?;

        let mut tx = self.db.begin().await?;
        tree_nodes::bump_revision(&mut tx).await?;

        let node = tree_nodes::load_node(&mut tx, member_id)
            .await?
            .ok_or(TreeError::NotFound(member_id))?;

        if !metrics::add_self_value(&mut tx, member_id, pv, bv).await? {
            return Err(TreeError::NotFound(member_id));
        }

        let propagation = match node.parent_id {
            Some(parent_id) => {
                let parent = tree_nodes::load_node(&mut tx, parent_id)
                    .await?
                    .ok_or(TreeError::ParentNotFound(parent_id))?;
                let side = parent.side_of(member_id).ok_or_else(|| {
                    TreeError::Inconsistent(format!(
                        "{} is in neither slot of its parent {}",
                        member_id, parent_id
                    ))
                })?;
                propagate_in(&mut tx, parent_id, side, pv, bv, self.depth_cap).await?
            }
            None => PropagationReport {
                hops: 0,
                last_member_id: None,
                reached_root: true,
                stopped_at_cap: false,
            },
        };

        let metrics = metrics::load_metrics(&mut tx, member_id)
            .await?
            .ok_or(TreeError::NotFound(member_id))?;

        tx.commit().await?;

        info!(
            member_id = %member_id,
            pv,
            bv,
            hops = propagation.hops,
            "Recorded purchase"
        );

        Ok(PurchaseResult {
            member_id,
            metrics,
            propagation,
        })
    }
}
