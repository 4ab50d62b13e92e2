//! DocRepo on the RocksDB substrate.
//!
//! Verifies:
//! - documents, indexes and topics persist across reopen
//! - conflicting transactions fail at commit
//! - rollback discards every write of a transaction

mod common;

use common::*;
use futures_util::TryStreamExt;
use syncdoc_core::Context;
use syncdoc_store::data::{IgnoreChanges, TopicChangeFeed};
use syncdoc_store::kv::with_prefix;
use syncdoc_store::{index_key, Condition, DocRepo, RocksStore, StoreConfig, StoreError};
use tempfile::TempDir;

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn open(dir: &TempDir) -> RocksStore {
    RocksStore::open(StoreConfig::for_testing(dir.path())).unwrap()
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_persists_across_reopen() {
    let dir = TempDir::new().unwrap();
    let config = person_config(manual_clock());
    let ctx = Context::background();

    let id = {
        let store = open(&dir);
        let txn = store.begin();
        let repo = DocRepo::new(&txn, &config, IgnoreChanges);
        let ada = repo
            .create(&ctx, Person::new("ada", 36).with_email("ada@x"))
            .await
            .unwrap();
        repo.create(&ctx, Person::new("eve", 30)).await.unwrap();
        drop(repo);
        txn.commit().unwrap();
        ada.id
    };

    let store = open(&dir);
    let txn = store.begin();
    let repo = DocRepo::new(&txn, &config, IgnoreChanges);
    assert_eq!(repo.get_by_id(&ctx, id).await.unwrap().unwrap().name, "ada");

    let found = repo
        .get_unique(&ctx, BY_EMAIL, index_key!["ada@x"])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, id);

    let ages: Vec<u32> = repo
        .query(&ctx, BY_AGE, Condition::all())
        .unwrap()
        .map_ok(|p| p.age)
        .try_collect()
        .await
        .unwrap();
    assert_eq!(ages, vec![30, 36]);
}

#[tokio::test]
async fn test_change_feed_persists() {
    let dir = TempDir::new().unwrap();
    let config = person_config(manual_clock());
    let ctx = Context::background();
    let store = open(&dir);

    for name in ["a", "b"] {
        let txn = store.begin();
        let feed = TopicChangeFeed::new(with_prefix(&txn, "feed/"));
        let repo = DocRepo::with_prefix(&txn, "people/", &config, feed);
        repo.create(&ctx, Person::new(name, 1)).await.unwrap();
        drop(repo);
        txn.commit().unwrap();
    }

    let txn = store.begin();
    let feed = TopicChangeFeed::new(with_prefix(&txn, "feed/"));
    let offsets: Vec<u64> = feed
        .topic()
        .list(&ctx, 0, u64::MAX)
        .map_ok(|e| e.offset)
        .try_collect()
        .await
        .unwrap();
    assert_eq!(offsets, vec![0, 1]);
}

#[tokio::test]
async fn test_conflicting_updates_fail_at_commit() {
    let dir = TempDir::new().unwrap();
    let config = person_config(manual_clock());
    let ctx = Context::background();
    let store = open(&dir);

    let txn = store.begin();
    let id = DocRepo::new(&txn, &config, IgnoreChanges)
        .create(&ctx, Person::new("ada", 36))
        .await
        .unwrap()
        .id;
    txn.commit().unwrap();

    let first = store.begin();
    let second = store.begin();
    DocRepo::new(&first, &config, IgnoreChanges)
        .update(&ctx, id, |p| p.age = 40)
        .await
        .unwrap();
    DocRepo::new(&second, &config, IgnoreChanges)
        .update(&ctx, id, |p| p.age = 50)
        .await
        .unwrap();

    first.commit().unwrap();
    let err = second.commit().unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));

    let txn = store.begin();
    let repo = DocRepo::new(&txn, &config, IgnoreChanges);
    assert_eq!(repo.get_by_id(&ctx, id).await.unwrap().unwrap().age, 40);
}

#[tokio::test]
async fn test_rollback_discards_writes() {
    let dir = TempDir::new().unwrap();
    let config = person_config(manual_clock());
    let ctx = Context::background();
    let store = open(&dir);

    let txn = store.begin();
    let id = DocRepo::new(&txn, &config, IgnoreChanges)
        .create(&ctx, Person::new("ada", 36))
        .await
        .unwrap()
        .id;
    txn.rollback().unwrap();

    let txn = store.begin();
    let repo = DocRepo::new(&txn, &config, IgnoreChanges);
    assert!(repo.get_by_id(&ctx, id).await.unwrap().is_none());
    let by_age: Vec<Person> = repo
        .get(&ctx, BY_AGE, index_key![36])
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert!(by_age.is_empty());
}
