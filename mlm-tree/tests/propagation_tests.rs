//! Propagation Engine integration tests

mod helpers;

use helpers::TestTree;
use mlm_common::Side;
use mlm_tree::TreeError;
use uuid::Uuid;

#[tokio::test]
async fn test_right_chain_sums_at_every_ancestor() {
    let t = TestTree::new().await;
    let root = t.create_root("root", t.packages.gold).await;
    let chain = t.chain("r", root, Side::Right, 6, t.packages.bronze).await;

    // Member at index i has 5 - i members below it, 20 PV each
    for (i, id) in chain.iter().enumerate() {
        let m = t.metrics(*id).await;
        let below = (chain.len() - 1 - i) as i64;
        assert_eq!(m.right_pv, below * 20, "member {}", i);
        assert_eq!(m.left_pv, 0);
        assert_eq!(m.total_pv, m.right_pv);
    }

    let root_metrics = t.metrics(root).await;
    assert_eq!(root_metrics.right_pv, 6 * 20);
    assert_eq!(root_metrics.left_pv, 0);
}

#[tokio::test]
async fn test_side_recomputed_at_each_hop() {
    let t = TestTree::new().await;
    let a = t.create_root("a", t.packages.gold).await;
    // a -L-> b -R-> c -L-> d
    let b = t.place("b", a, Side::Left, t.packages.gold).await;
    let c = t.place("c", b, Side::Right, t.packages.gold).await;
    let d = t.place("d", c, Side::Left, t.packages.bronze).await;

    let c_metrics = t.metrics(c).await;
    assert_eq!((c_metrics.left_pv, c_metrics.right_pv), (20, 0));

    let b_metrics = t.metrics(b).await;
    assert_eq!((b_metrics.left_pv, b_metrics.right_pv), (0, 50 + 20));

    let a_metrics = t.metrics(a).await;
    assert_eq!((a_metrics.left_pv, a_metrics.right_pv), (50 + 50 + 20, 0));

    let d_metrics = t.metrics(d).await;
    assert_eq!(d_metrics.total_pv, 0);
}

#[tokio::test]
async fn test_standalone_propagation_walks_to_root() {
    let t = TestTree::new().await;
    let a = t.create_root("a", t.packages.gold).await;
    let b = t.place("b", a, Side::Right, t.packages.gold).await;
    let c = t.place("c", b, Side::Left, t.packages.gold).await;

    let report = t
        .engine
        .propagation
        .propagate(c, Side::Right, 7, 5)
        .await
        .unwrap();

    assert_eq!(report.hops, 3);
    assert_eq!(report.last_member_id, Some(a));
    assert!(report.reached_root);
    assert!(!report.stopped_at_cap);

    let c_metrics = t.metrics(c).await;
    assert_eq!((c_metrics.right_pv, c_metrics.right_bv), (7, 5));
    let b_metrics = t.metrics(b).await;
    assert_eq!((b_metrics.left_pv, b_metrics.left_bv), (50 + 7, 50 + 5));
    let a_metrics = t.metrics(a).await;
    assert_eq!(a_metrics.right_pv, 100 + 7);
    assert_eq!(a_metrics.right_bv, 100 + 5);
    assert_eq!(a_metrics.total_bv, 105);
}

#[tokio::test]
async fn test_depth_cap_limits_updated_ancestors() {
    let t = TestTree::with_settings(&[("propagation_depth_cap", "2")]).await;
    assert_eq!(t.settings().propagation_depth_cap, Some(2));

    let root = t.create_root("root", t.packages.gold).await;
    let chain = t.chain("l", root, Side::Left, 3, t.packages.bronze).await;

    // Placing chain[2] reached chain[1] and chain[0] only
    let root_metrics = t.metrics(root).await;
    assert_eq!(root_metrics.left_pv, 2 * 20);
    assert_eq!(t.metrics(chain[0]).await.left_pv, 2 * 20);
    assert_eq!(t.metrics(chain[1]).await.left_pv, 20);

    let report = t
        .engine
        .propagation
        .propagate(chain[2], Side::Left, 1, 1)
        .await
        .unwrap();
    assert_eq!(report.hops, 2);
    assert_eq!(report.last_member_id, Some(chain[1]));
    assert!(report.stopped_at_cap);
    assert!(!report.reached_root);
}

#[tokio::test]
async fn test_zero_delta_is_accepted() {
    let t = TestTree::new().await;
    let a = t.create_root("a", t.packages.gold).await;
    let b = t.place("b", a, Side::Left, t.packages.gold).await;

    let before = t.metrics(a).await;
    let report = t.engine.propagation.propagate(b, Side::Left, 0, 0).await.unwrap();
    assert_eq!(report.hops, 2);
    assert_eq!(t.metrics(a).await, before);
}

#[tokio::test]
async fn test_negative_delta_rejected() {
    let t = TestTree::new().await;
    let a = t.create_root("a", t.packages.gold).await;

    let result = t.engine.propagation.propagate(a, Side::Left, -5, 0).await;
    assert!(matches!(result, Err(TreeError::InvalidInput(_))));
    assert_eq!(t.metrics(a).await.left_pv, 0);
}

#[tokio::test]
async fn test_unknown_start_not_found() {
    let t = TestTree::new().await;
    t.create_root("a", t.packages.gold).await;

    let missing = Uuid::new_v4();
    let result = t.engine.propagation.propagate(missing, Side::Left, 1, 1).await;
    assert!(matches!(result, Err(TreeError::NotFound(id)) if id == missing));
}

#[tokio::test]
async fn test_purchase_updates_self_and_upline() {
    let t = TestTree::new().await;
    let a = t.create_root("a", t.packages.gold).await;
    let b = t.place("b", a, Side::Right, t.packages.gold).await;
    let c = t.place("c", b, Side::Left, t.packages.silver).await;

    let purchase = t.engine.propagation.record_purchase(c, 40, 25).await.unwrap();

    assert_eq!(purchase.member_id, c);
    assert_eq!(purchase.metrics.self_pv, 30 + 40);
    assert_eq!(purchase.metrics.self_bv, 30 + 25);
    // c's own legs are untouched
    assert_eq!(purchase.metrics.total_pv, 0);
    assert_eq!(purchase.propagation.hops, 2);
    assert!(purchase.propagation.reached_root);

    let b_metrics = t.metrics(b).await;
    assert_eq!((b_metrics.left_pv, b_metrics.left_bv), (30 + 40, 30 + 25));
    let a_metrics = t.metrics(a).await;
    assert_eq!(a_metrics.right_pv, 50 + 30 + 40);

    let report = t.engine.auditor.audit().await.unwrap();
    assert!(report.is_clean(), "{:?}", report.violations);
}

#[tokio::test]
async fn test_root_purchase_has_no_upline() {
    let t = TestTree::new().await;
    let a = t.create_root("a", t.packages.gold).await;

    let purchase = t.engine.propagation.record_purchase(a, 10, 10).await.unwrap();
    assert_eq!(purchase.propagation.hops, 0);
    assert_eq!(purchase.metrics.self_pv, 60);
    assert_eq!(purchase.metrics.total_pv, 0);
}
