//! Topic integration tests.
//!
//! Verifies:
//! - push assigns contiguous offsets and list returns them in order
//! - list ranges are half-open and clipped to what exists
//! - offsets continue across committed transactions
//! - racing pushers conflict instead of reusing offsets

use futures_util::TryStreamExt;
use serde::{Deserialize, Serialize};
use syncdoc_core::Context;
use syncdoc_store::kv::MemTransaction;
use syncdoc_store::{MemStore, StoreError, Topic, TopicEntry};

// ─── Helpers ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Item {
    value: String,
}

fn item(value: &str) -> Item {
    Item {
        value: value.to_string(),
    }
}

fn entry(offset: u64, value: &str) -> TopicEntry<Item> {
    TopicEntry {
        offset,
        data: item(value),
    }
}

async fn list(txn: &MemTransaction, start: u64, end: u64) -> Vec<TopicEntry<Item>> {
    let ctx = Context::background();
    let topic: Topic<_, Item> = Topic::new(txn);
    topic.list(&ctx, start, end).try_collect().await.unwrap()
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_push_and_list_with_offsets() {
    let store = MemStore::new();
    let txn = store.begin();
    let ctx = Context::background();
    let topic = Topic::new(&txn);

    let offsets = topic
        .push(&ctx, &[item("A"), item("B"), item("C")])
        .await
        .unwrap();
    assert_eq!(offsets, 0..3);

    assert_eq!(
        list(&txn, 0, 3).await,
        vec![entry(0, "A"), entry(1, "B"), entry(2, "C")]
    );
}

#[tokio::test]
async fn test_multiple_pushes_and_ranges() {
    let store = MemStore::new();
    let txn = store.begin();
    let ctx = Context::background();
    let topic = Topic::new(&txn);

    topic.push(&ctx, &[item("X"), item("Y")]).await.unwrap();
    assert_eq!(topic.push(&ctx, &[item("Z")]).await.unwrap(), 2..3);
    assert_eq!(topic.next_offset(&ctx).await.unwrap(), 3);

    assert_eq!(list(&txn, 1, 3).await, vec![entry(1, "Y"), entry(2, "Z")]);
    assert_eq!(list(&txn, 0, 2).await, vec![entry(0, "X"), entry(1, "Y")]);
}

#[tokio::test]
async fn test_range_outside_offsets_is_empty() {
    let store = MemStore::new();
    let txn = store.begin();
    let ctx = Context::background();
    Topic::new(&txn).push(&ctx, &[item("A")]).await.unwrap();

    assert!(list(&txn, 2, 5).await.is_empty());
    assert!(list(&txn, 1, 1).await.is_empty());
}

#[tokio::test]
async fn test_empty_push_reserves_nothing() {
    let store = MemStore::new();
    let txn = store.begin();
    let ctx = Context::background();
    let topic: Topic<_, Item> = Topic::new(&txn);

    assert_eq!(topic.push(&ctx, &[]).await.unwrap(), 0..0);
    assert_eq!(topic.next_offset(&ctx).await.unwrap(), 0);
}

#[tokio::test]
async fn test_large_range_tail() {
    let store = MemStore::new();
    let txn = store.begin();
    let ctx = Context::background();
    let items: Vec<Item> = (0..1000).map(|i| item(&i.to_string())).collect();
    Topic::new(&txn).push(&ctx, &items).await.unwrap();

    let tail = list(&txn, 990, 1000).await;
    assert_eq!(tail.len(), 10);
    assert_eq!(tail[0], entry(990, "990"));
    assert_eq!(tail[9], entry(999, "999"));
}

#[tokio::test]
async fn test_offsets_continue_across_transactions() {
    let store = MemStore::new();
    let ctx = Context::background();

    let txn = store.begin();
    Topic::new(&txn).push(&ctx, &[item("First")]).await.unwrap();
    txn.commit().unwrap();

    let txn = store.begin();
    let offsets = Topic::new(&txn).push(&ctx, &[item("Second")]).await.unwrap();
    assert_eq!(offsets, 1..2);
    txn.commit().unwrap();

    let txn = store.begin();
    assert_eq!(
        list(&txn, 0, 3).await,
        vec![entry(0, "First"), entry(1, "Second")]
    );
}

#[tokio::test]
async fn test_racing_pushers_conflict() {
    let store = MemStore::new();
    let ctx = Context::background();

    let first = store.begin();
    let second = store.begin();
    Topic::new(&first).push(&ctx, &[item("a")]).await.unwrap();
    Topic::new(&second).push(&ctx, &[item("b")]).await.unwrap();

    first.commit().unwrap();
    let err = second.commit().unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));

    // the loser retries on a fresh snapshot and gets the next offset
    let retry = store.begin();
    let offsets = Topic::new(&retry).push(&ctx, &[item("b")]).await.unwrap();
    assert_eq!(offsets, 1..2);
    retry.commit().unwrap();

    let txn = store.begin();
    assert_eq!(list(&txn, 0, 10).await, vec![entry(0, "a"), entry(1, "b")]);
}
