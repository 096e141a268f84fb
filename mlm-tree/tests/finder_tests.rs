//! Position Finder integration tests

mod helpers;

use helpers::TestTree;
use mlm_common::Side;
use mlm_tree::TreeError;
use uuid::Uuid;

#[tokio::test]
async fn test_start_with_open_slot_is_returned() {
    let t = TestTree::new().await;
    let a = t.create_root("a", t.packages.gold).await;
    t.place("b", a, Side::Left, t.packages.gold).await;

    let found = t.engine.finder.find_open_slot(a, Side::Right).await.unwrap();
    assert_eq!(found, a);
}

#[tokio::test]
async fn test_follows_only_the_requested_side() {
    let t = TestTree::new().await;
    let a = t.create_root("a", t.packages.gold).await;
    let right = t.chain("r", a, Side::Right, 4, t.packages.bronze).await;
    // Open right slots off the chain must not be picked
    t.place("l", a, Side::Left, t.packages.bronze).await;

    let found = t.engine.finder.find_open_slot(a, Side::Right).await.unwrap();
    assert_eq!(found, right[3]);

    let found = t.engine.finder.find_open_slot(right[1], Side::Right).await.unwrap();
    assert_eq!(found, right[3]);
}

#[tokio::test]
async fn test_slot_at_max_depth_is_found() {
    let t = TestTree::with_settings(&[("slot_search_max_depth", "3")]).await;
    let a = t.create_root("a", t.packages.gold).await;
    let chain = t.chain("l", a, Side::Left, 3, t.packages.bronze).await;

    // chain[2] sits at depth 3 below a
    let found = t.engine.finder.find_open_slot(a, Side::Left).await.unwrap();
    assert_eq!(found, chain[2]);
}

#[tokio::test]
async fn test_search_exhausted_beyond_max_depth() {
    let t = TestTree::with_settings(&[("slot_search_max_depth", "3")]).await;
    let a = t.create_root("a", t.packages.gold).await;
    t.chain("l", a, Side::Left, 4, t.packages.bronze).await;

    let result = t.engine.finder.find_open_slot(a, Side::Left).await;
    match result {
        Err(TreeError::SlotSearchExhausted { start, side, max_depth }) => {
            assert_eq!(start, a);
            assert_eq!(side, Side::Left);
            assert_eq!(max_depth, 3);
        }
        other => panic!("Expected SlotSearchExhausted, got {:?}", other),
    }

    let placed = t
        .engine
        .placement
        .place_auto(Uuid::new_v4(), a, Side::Left, &t.registration("late", t.packages.gold))
        .await;
    assert!(matches!(placed, Err(TreeError::SlotSearchExhausted { .. })));
    assert_eq!(t.row_counts().await, (5, 5, 5));
}

#[tokio::test]
async fn test_unknown_start_not_found() {
    let t = TestTree::new().await;
    t.create_root("a", t.packages.gold).await;

    let missing = Uuid::new_v4();
    let result = t.engine.finder.find_open_slot(missing, Side::Left).await;
    assert!(matches!(result, Err(TreeError::NotFound(id)) if id == missing));
}
