//! Tree Audit integration tests

mod helpers;

use helpers::TestTree;
use mlm_common::Side;
use mlm_tree::Violation;

#[tokio::test]
async fn test_empty_store_is_clean() {
    let t = TestTree::new().await;

    let report = t.engine.auditor.audit().await.unwrap();
    assert!(report.is_clean());
    assert_eq!(report.node_count, 0);
    assert_eq!(report.root, None);
}

#[tokio::test]
async fn test_mixed_tree_is_clean() {
    let t = TestTree::new().await;
    let a = t.create_root("a", t.packages.gold).await;
    let b = t.place("b", a, Side::Left, t.packages.gold).await;
    let c = t.place("c", a, Side::Right, t.packages.silver).await;
    t.chain("bl", b, Side::Left, 5, t.packages.bronze).await;
    t.chain("cr", c, Side::Right, 3, t.packages.gold).await;
    t.engine.propagation.record_purchase(c, 15, 15).await.unwrap();

    let report = t.engine.auditor.audit().await.unwrap();
    assert!(report.is_clean(), "{:?}", report.violations);
    assert_eq!(report.root, Some(a));
    assert_eq!(report.node_count, 11);
    assert!(report.drift_checked);
}

#[tokio::test]
async fn test_out_of_band_edit_reported_as_drift() {
    let t = TestTree::new().await;
    let a = t.create_root("a", t.packages.gold).await;
    t.place("b", a, Side::Left, t.packages.gold).await;

    sqlx::query("UPDATE metrics SET left_pv = left_pv + 1, total_pv = total_pv + 1 WHERE member_id = ?")
        .bind(a.to_string())
        .execute(&t.pool)
        .await
        .unwrap();

    let report = t.engine.auditor.audit().await.unwrap();
    assert_eq!(report.violations.len(), 1);
    assert!(matches!(
        &report.violations[0],
        Violation::AccumulatorDrift { member_id, side: Side::Left, stored_pv: 51, expected_pv: 50, .. }
            if *member_id == a
    ));
}

#[tokio::test]
async fn test_capped_propagation_skips_drift_check() {
    let t = TestTree::with_settings(&[("propagation_depth_cap", "1")]).await;
    let a = t.create_root("a", t.packages.gold).await;
    t.chain("l", a, Side::Left, 3, t.packages.bronze).await;

    let report = t.engine.auditor.audit().await.unwrap();
    assert!(!report.drift_checked);
    assert!(report.is_clean(), "{:?}", report.violations);
}
