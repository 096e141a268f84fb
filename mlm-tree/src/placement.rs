//! Placement Engine
//!
//! Validates and executes insertion of a new member at a parent + side.
//!
//! **Transaction layout** (all-or-nothing):
//! 1. Bump the tree revision (takes the writer lock, serializing placements)
//! 2. Check preconditions: not yet placed, parent exists, slot empty,
//!    references active, sponsor resolvable
//! 3. Insert Member, insert TreeNode, claim the parent's slot
//! 4. Insert the new member's MetricRecord
//! 5. Propagate the package PV/BV from the parent upward
//! 6. Commit
//!
//! Any error returns early and drops the transaction, which rolls it back.
//! Dropping the future (client disconnect) does the same.

use mlm_common::{time, MetricRecord, Package, Side};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{members, metrics, reference, tree_nodes};
use crate::error::{Result, TreeError};
use crate::finder;
use crate::propagation::{propagate_in, PropagationReport};
use crate::settings::EngineSettings;

/// Validated registration payload
///
/// Business-field validation and username/email/phone uniqueness are the
/// caller's responsibility; references are re-verified here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    pub username: String,
    /// Commission sponsor; not required to equal the placement parent
    pub sponsor_username: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub country_id: i64,
    pub region_id: i64,
    pub package_id: i64,
    pub password_hash: String,
    pub pin_hash: String,
}

/// Outcome of a committed placement
#[derive(Debug, Clone, Serialize)]
pub struct PlacementResult {
    pub member_id: Uuid,
    /// `None` only for the root
    pub assigned_parent_id: Option<Uuid>,
    pub assigned_side: Option<Side>,
    /// The new member's record after commit
    pub resulting_metrics: MetricRecord,
    /// The parent's record after propagation
    pub parent_metrics: Option<MetricRecord>,
    pub propagation: PropagationReport,
    pub package_price: Option<f64>,
    pub tree_revision: i64,
}

/// Where a placement goes
#[derive(Debug, Clone, Copy)]
enum Target {
    /// Exactly this parent and side
    Slot(Uuid, Side),
    /// Shallowest open slot down this side's lineage
    SearchBelow(Uuid, Side),
}

#[derive(Clone)]
pub struct PlacementEngine {
    db: SqlitePool,
    settings: EngineSettings,
}

impl PlacementEngine {
    pub fn new(db: SqlitePool, settings: EngineSettings) -> Self {
        Self { db, settings }
    }

    /// Place `member_id` in `side` slot of `parent_id`
    pub async fn place(
        &self,
        member_id: Uuid,
        parent_id: Uuid,
        side: Side,
        registration: &Registration,
    ) -> Result<PlacementResult> {
        let result = self
            .try_place(member_id, Target::Slot(parent_id, side), registration)
            .await;
        log_outcome(member_id, &result);
        result
    }

    /// Place under the shallowest open `side` slot found below `start_member_id`
    ///
    /// The slot search runs inside the placement transaction, so the slot
    /// cannot be taken between finding and claiming it.
    pub async fn place_auto(
        &self,
        member_id: Uuid,
        start_member_id: Uuid,
        side: Side,
        registration: &Registration,
    ) -> Result<PlacementResult> {
        let result = self
            .try_place(member_id, Target::SearchBelow(start_member_id, side), registration)
            .await;
        log_outcome(member_id, &result);
        result
    }

    /// Bootstrap the single root member
    pub async fn create_root(
        &self,
        member_id: Uuid,
        registration: &Registration,
    ) -> Result<PlacementResult> {
        let mut tx = self.db.begin().await?;
        let revision = tree_nodes::bump_revision(&mut tx).await?;

        if let Some(root) = tree_nodes::find_root(&mut tx).await? {
            return Err(TreeError::RootExists(root));
        }
        ensure_not_placed(&mut tx, member_id).await?;

        let package = reference::verify_references(
            &mut tx,
            registration.country_id,
            registration.region_id,
            registration.package_id,
        )
        .await?;
        let sponsor_id = resolve_sponsor(&mut tx, registration).await?;

        members::insert_member(&mut tx, member_id, sponsor_id, registration, time::now()).await?;
        tree_nodes::insert_node(&mut tx, member_id, None).await?;
        metrics::insert_metrics(&mut tx, member_id, package.pv, package.bv).await?;

        let resulting_metrics = metrics::load_metrics(&mut tx, member_id)
            .await?
            .ok_or(TreeError::NotFound(member_id))?;
        let package_price =
            reference::package_price(&mut tx, package.id, registration.country_id).await?;

        tx.commit().await?;

        info!(member_id = %member_id, username = %registration.username, "Created tree root");

        Ok(PlacementResult {
            member_id,
            assigned_parent_id: None,
            assigned_side: None,
            resulting_metrics,
            parent_metrics: None,
            propagation: PropagationReport {
                hops: 0,
                last_member_id: None,
                reached_root: true,
                stopped_at_cap: false,
            },
            package_price,
            tree_revision: revision,
        })
    }

    async fn try_place(
        &self,
        member_id: Uuid,
        target: Target,
        registration: &Registration,
    ) -> Result<PlacementResult> {
        let mut tx = self.db.begin().await?;
        let revision = tree_nodes::bump_revision(&mut tx).await?;

        let (parent_id, side) = match target {
            Target::Slot(parent_id, side) => (parent_id, side),
            Target::SearchBelow(start, side) => {
                let parent =
                    finder::find_open_slot_in(&mut tx, start, side, self.settings.slot_search_max_depth)
                        .await?;
                (parent, side)
            }
        };

        let (propagation, package) =
            self.place_in(&mut tx, member_id, parent_id, side, registration).await?;

        let resulting_metrics = metrics::load_metrics(&mut tx, member_id)
            .await?
            .ok_or(TreeError::NotFound(member_id))?;
        let parent_metrics = metrics::load_metrics(&mut tx, parent_id).await?;
        let package_price =
            reference::package_price(&mut tx, package.id, registration.country_id).await?;

        tx.commit().await?;

        Ok(PlacementResult {
            member_id,
            assigned_parent_id: Some(parent_id),
            assigned_side: Some(side),
            resulting_metrics,
            parent_metrics,
            propagation,
            package_price,
            tree_revision: revision,
        })
    }

    /// Preconditions and writes for one placement, inside `conn`'s transaction
    async fn place_in(
        &self,
        conn: &mut SqliteConnection,
        member_id: Uuid,
        parent_id: Uuid,
        side: Side,
        registration: &Registration,
    ) -> Result<(PropagationReport, Package)> {
        ensure_not_placed(conn, member_id).await?;

        let parent = tree_nodes::load_node(conn, parent_id)
            .await?
            .ok_or(TreeError::ParentNotFound(parent_id))?;
        if parent.child(side).is_some() {
            return Err(TreeError::PositionTaken { parent_id, side });
        }

        let package = reference::verify_references(
            conn,
            registration.country_id,
            registration.region_id,
            registration.package_id,
        )
        .await?;
        let sponsor_id = resolve_sponsor(conn, registration).await?;

        members::insert_member(conn, member_id, sponsor_id, registration, time::now()).await?;
        tree_nodes::insert_node(conn, member_id, Some(parent_id)).await?;

        // First and only write to this slot
        if !tree_nodes::claim_slot(conn, parent_id, side, member_id).await? {
            return Err(TreeError::PositionTaken { parent_id, side });
        }

        metrics::insert_metrics(conn, member_id, package.pv, package.bv).await?;

        let propagation = propagate_in(
            conn,
            parent_id,
            side,
            package.pv,
            package.bv,
            self.settings.propagation_depth_cap,
        )
        .await?;

        Ok((propagation, package))
    }
}

async fn ensure_not_placed(conn: &mut SqliteConnection, member_id: Uuid) -> Result<()> {
    if tree_nodes::node_exists(conn, member_id).await? || members::member_exists(conn, member_id).await? {
        return Err(TreeError::DuplicateMember(member_id));
    }
    Ok(())
}

async fn resolve_sponsor(
    conn: &mut SqliteConnection,
    registration: &Registration,
) -> Result<Option<Uuid>> {
    match registration.sponsor_username.as_deref() {
        Some(username) => members::find_member_id_by_username(conn, username)
            .await?
            .map(Some)
            .ok_or_else(|| TreeError::InvalidReference(format!("sponsor {:?} does not exist", username))),
        None => Ok(None),
    }
}

fn log_outcome(member_id: Uuid, result: &Result<PlacementResult>) {
    match result {
        Ok(placed) => info!(
            member_id = %member_id,
            parent_id = ?placed.assigned_parent_id,
            side = ?placed.assigned_side,
            hops = placed.propagation.hops,
            revision = placed.tree_revision,
            "Placed member"
        ),
        Err(e) => warn!(member_id = %member_id, error = %e, "Placement rejected"),
    }
}
