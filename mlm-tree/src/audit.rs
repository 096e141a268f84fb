//! Tree Audit
//!
//! Whole-store invariant checker. Loads every tree node and metric record
//! in one read snapshot and reports each violation found; it never repairs
//! anything.

use mlm_common::{MetricRecord, Side, TreeNode};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{metrics, tree_nodes};
use crate::error::Result;
use crate::settings::EngineSettings;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    NoRoot,
    MultipleRoots { roots: Vec<Uuid> },
    DanglingParent { member_id: Uuid, parent_id: Uuid },
    DanglingChild { member_id: Uuid, side: Side, child_id: Uuid },
    /// `parent_id`'s slot points at a child whose own parent is different
    PointerMismatch { parent_id: Uuid, side: Side, child_id: Uuid, child_parent: Option<Uuid> },
    /// Member names a parent that holds it in neither slot
    NotInParentSlots { member_id: Uuid, parent_id: Uuid },
    Orphan { member_id: Uuid },
    Cycle { member_id: Uuid },
    MissingMetrics { member_id: Uuid },
    TotalMismatch { member_id: Uuid, pv: bool, bv: bool },
    AccumulatorDrift {
        member_id: Uuid,
        side: Side,
        stored_pv: i64,
        expected_pv: i64,
        stored_bv: i64,
        expected_bv: i64,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub node_count: usize,
    pub root: Option<Uuid>,
    pub revision: i64,
    /// Accumulators compared against recomputed subtree sums
    pub drift_checked: bool,
    pub violations: Vec<Violation>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

#[derive(Clone)]
pub struct TreeAuditor {
    db: SqlitePool,
    check_drift: bool,
}

impl TreeAuditor {
    /// Drift is only checked when propagation is uncapped; with a cap,
    /// ancestors above it legitimately miss value.
    pub fn new(db: SqlitePool, settings: &EngineSettings) -> Self {
        Self {
            db,
            check_drift: settings.propagation_depth_cap.is_none(),
        }
    }

    pub async fn audit(&self) -> Result<AuditReport> {
        let mut tx = self.db.begin().await?;
        let revision = tree_nodes::current_revision(&mut tx).await?;
        let nodes = tree_nodes::load_all_nodes(&mut tx).await?;
        let records = metrics::load_all_metrics(&mut tx).await?;
        tx.commit().await?;

        let report = check(nodes, &records, revision, self.check_drift);

        if report.is_clean() {
            info!(nodes = report.node_count, revision, "Tree audit clean");
        } else {
            warn!(
                nodes = report.node_count,
                violations = report.violations.len(),
                revision,
                "Tree audit found violations"
            );
        }

        Ok(report)
    }
}

fn check(
    nodes: Vec<TreeNode>,
    records: &HashMap<Uuid, MetricRecord>,
    revision: i64,
    check_drift: bool,
) -> AuditReport {
    let mut violations = Vec::new();
    let node_count = nodes.len();
    let by_id: HashMap<Uuid, TreeNode> = nodes.into_iter().map(|n| (n.member_id, n)).collect();

    let mut roots: Vec<Uuid> = by_id.values().filter(|n| n.is_root()).map(|n| n.member_id).collect();
    roots.sort();
    let root = match roots.len() {
        0 => {
            if node_count > 0 {
                violations.push(Violation::NoRoot);
            }
            None
        }
        1 => Some(roots[0]),
        _ => {
            violations.push(Violation::MultipleRoots { roots: roots.clone() });
            Some(roots[0])
        }
    };

    let mut ids: Vec<Uuid> = by_id.keys().copied().collect();
    ids.sort();

    for id in &ids {
        let node = &by_id[id];

        if let Some(parent_id) = node.parent_id {
            match by_id.get(&parent_id) {
                None => violations.push(Violation::DanglingParent { member_id: *id, parent_id }),
                Some(parent) if parent.side_of(*id).is_none() => {
                    violations.push(Violation::NotInParentSlots { member_id: *id, parent_id })
                }
                Some(_) => {}
            }
        }

        for side in [Side::Left, Side::Right] {
            let Some(child_id) = node.child(side) else { continue };
            match by_id.get(&child_id) {
                None => violations.push(Violation::DanglingChild { member_id: *id, side, child_id }),
                Some(child) if child.parent_id != Some(*id) => violations.push(Violation::PointerMismatch {
                    parent_id: *id,
                    side,
                    child_id,
                    child_parent: child.parent_id,
                }),
                Some(_) => {}
            }
        }

        // Parent chain must end at a root within node_count steps
        let mut current = node.parent_id;
        let mut steps = 0;
        while let Some(p) = current {
            steps += 1;
            if steps > node_count {
                violations.push(Violation::Cycle { member_id: *id });
                break;
            }
            current = by_id.get(&p).and_then(|n| n.parent_id);
        }

        match records.get(id) {
            None => violations.push(Violation::MissingMetrics { member_id: *id }),
            Some(m) => {
                let pv = m.total_pv != m.left_pv + m.right_pv;
                let bv = m.total_bv != m.left_bv + m.right_bv;
                if pv || bv {
                    violations.push(Violation::TotalMismatch { member_id: *id, pv, bv });
                }
            }
        }
    }

    // Reachability from the root along child pointers
    let mut order = Vec::with_capacity(node_count);
    if let Some(root) = root {
        let mut seen = HashSet::with_capacity(node_count);
        let mut queue = VecDeque::from([root]);
        seen.insert(root);
        while let Some(id) = queue.pop_front() {
            order.push(id);
            let Some(node) = by_id.get(&id) else { continue };
            for child in [node.left_child_id, node.right_child_id].into_iter().flatten() {
                if !by_id.contains_key(&child) {
                    continue;
                }
                if seen.insert(child) {
                    queue.push_back(child);
                } else {
                    violations.push(Violation::Cycle { member_id: child });
                }
            }
        }
        for id in &ids {
            if !seen.contains(id) {
                violations.push(Violation::Orphan { member_id: *id });
            }
        }
    }

    if check_drift {
        // (pv, bv) of each reachable subtree, built leaves-first
        let mut subtree: HashMap<Uuid, (i64, i64)> = HashMap::with_capacity(order.len());
        for id in order.iter().rev() {
            let node = &by_id[id];
            let own = records.get(id).map(|m| (m.self_pv, m.self_bv)).unwrap_or((0, 0));
            let mut sum = own;
            for side in [Side::Left, Side::Right] {
                let expected = node
                    .child(side)
                    .and_then(|c| subtree.get(&c).copied())
                    .unwrap_or((0, 0));
                sum.0 += expected.0;
                sum.1 += expected.1;

                if let Some(m) = records.get(id) {
                    let (stored_pv, stored_bv) = (m.leg_pv(side), m.leg_bv(side));
                    if stored_pv != expected.0 || stored_bv != expected.1 {
                        violations.push(Violation::AccumulatorDrift {
                            member_id: *id,
                            side,
                            stored_pv,
                            expected_pv: expected.0,
                            stored_bv,
                            expected_bv: expected.1,
                        });
                    }
                }
            }
            subtree.insert(*id, sum);
        }
    }

    AuditReport {
        node_count,
        root,
        revision,
        drift_checked: check_drift,
        violations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: Uuid, parent: Option<Uuid>, left: Option<Uuid>, right: Option<Uuid>) -> TreeNode {
        TreeNode {
            member_id: id,
            parent_id: parent,
            left_child_id: left,
            right_child_id: right,
        }
    }

    fn record(self_pv: i64, left_pv: i64, right_pv: i64) -> MetricRecord {
        MetricRecord {
            self_pv,
            self_bv: self_pv,
            left_pv,
            right_pv,
            total_pv: left_pv + right_pv,
            left_bv: left_pv,
            right_bv: right_pv,
            total_bv: left_pv + right_pv,
        }
    }

    #[test]
    fn test_consistent_tree_is_clean() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let nodes = vec![node(a, None, Some(b), Some(c)), node(b, Some(a), None, None), node(c, Some(a), None, None)];
        let records = HashMap::from([(a, record(10, 50, 30)), (b, record(50, 0, 0)), (c, record(30, 0, 0))]);

        let report = check(nodes, &records, 3, true);
        assert!(report.is_clean(), "{:?}", report.violations);
        assert_eq!(report.root, Some(a));
        assert_eq!(report.node_count, 3);
    }

    #[test]
    fn test_empty_store_is_clean() {
        let report = check(Vec::new(), &HashMap::new(), 0, true);
        assert!(report.is_clean());
        assert_eq!(report.root, None);
    }

    #[test]
    fn test_orphan_and_mismatch_reported() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        // b claims a as parent but a does not hold it
        let nodes = vec![node(a, None, None, None), node(b, Some(a), None, None)];
        let records = HashMap::from([(a, record(0, 0, 0)), (b, record(0, 0, 0))]);

        let report = check(nodes, &records, 0, false);
        assert!(report.violations.contains(&Violation::NotInParentSlots { member_id: b, parent_id: a }));
        assert!(report.violations.contains(&Violation::Orphan { member_id: b }));
    }

    #[test]
    fn test_multiple_roots_and_missing_metrics() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let nodes = vec![node(a, None, None, None), node(b, None, None, None)];
        let records = HashMap::from([(a, record(0, 0, 0))]);

        let report = check(nodes, &records, 0, false);
        assert!(report.violations.iter().any(|v| matches!(v, Violation::MultipleRoots { .. })));
        assert!(report.violations.contains(&Violation::MissingMetrics { member_id: b }));
    }

    #[test]
    fn test_drift_detected_when_uncapped() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let nodes = vec![node(a, None, Some(b), None), node(b, Some(a), None, None)];
        let records = HashMap::from([(a, record(0, 40, 0)), (b, record(50, 0, 0))]);

        let report = check(nodes.clone(), &records, 0, true);
        assert!(report.violations.iter().any(|v| matches!(
            v,
            Violation::AccumulatorDrift { member_id, side: Side::Left, stored_pv: 40, expected_pv: 50, .. }
                if *member_id == a
        )));

        let capped = check(nodes, &records, 0, false);
        assert!(capped.is_clean());
    }

    #[test]
    fn test_total_mismatch_detected() {
        let a = Uuid::new_v4();
        let mut broken = record(0, 0, 0);
        broken.total_pv = 5;
        let report = check(vec![node(a, None, None, None)], &HashMap::from([(a, broken)]), 0, false);
        assert_eq!(
            report.violations,
            vec![Violation::TotalMismatch { member_id: a, pv: true, bv: false }]
        );
    }
}
