use criterion::{criterion_group, criterion_main, Criterion};
use futures_util::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::hint::black_box;
use syncdoc_core::{Context, Document, Timestamp};
use syncdoc_store::kv::key_codec;
use syncdoc_store::{
    index_key, Condition, DocRepo, DocRepoConfig, IgnoreChanges, IndexSpec, MemStore, RocksStore,
    StoreConfig, Topic,
};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Note {
    id: Uuid,
    created_at: Timestamp,
    updated_at: Timestamp,
    author: String,
    rank: u32,
    body: String,
}

impl Document for Note {
    fn id(&self) -> Uuid {
        self.id
    }
    fn created_at(&self) -> Timestamp {
        self.created_at
    }
    fn updated_at(&self) -> Timestamp {
        self.updated_at
    }
    fn set_created_at(&mut self, at: Timestamp) {
        self.created_at = at;
    }
    fn set_updated_at(&mut self, at: Timestamp) {
        self.updated_at = at;
    }
}

fn note(rank: u32) -> Note {
    Note {
        id: Uuid::new_v4(),
        created_at: Timestamp::ZERO,
        updated_at: Timestamp::ZERO,
        author: format!("author-{}", rank % 10),
        rank,
        body: "a short note body".into(),
    }
}

fn note_config() -> DocRepoConfig<Note> {
    DocRepoConfig::new()
        .index("rank", IndexSpec::new(|n: &Note| index_key![n.rank]))
        .and_then(|c| {
            c.index(
                "author_rank",
                IndexSpec::new(|n: &Note| index_key![n.author.clone(), n.rank]),
            )
        })
        .unwrap()
}

// ─── Key codec ──────────────────────────────────────────────

fn bench_key_encode(c: &mut Criterion) {
    let key = index_key!["author-3", 42u32, Uuid::new_v4()];
    c.bench_function("key_encode_3_parts", |b| {
        b.iter(|| black_box(key_codec::encode(black_box(&key))))
    });
}

fn bench_key_decode(c: &mut Criterion) {
    let encoded = key_codec::encode(&index_key!["author-3", 42u32, Uuid::new_v4()]);
    c.bench_function("key_decode_3_parts", |b| {
        b.iter(|| black_box(key_codec::decode(black_box(&encoded)).unwrap()))
    });
}

// ─── Document repository ────────────────────────────────────

fn bench_mem_create(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = MemStore::new();
    let config = note_config();
    let ctx = Context::background();
    let mut rank = 0u32;

    c.bench_function("mem_create_2_indexes", |b| {
        b.iter(|| {
            rank += 1;
            rt.block_on(async {
                let txn = store.begin();
                DocRepo::new(&txn, &config, IgnoreChanges)
                    .create(&ctx, note(rank))
                    .await
                    .unwrap();
                txn.commit().unwrap();
            })
        })
    });
}

fn bench_mem_query(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = MemStore::new();
    let config = note_config();
    let ctx = Context::background();

    rt.block_on(async {
        let txn = store.begin();
        let repo = DocRepo::new(&txn, &config, IgnoreChanges);
        for rank in 0..1000 {
            repo.create(&ctx, note(rank)).await.unwrap();
        }
        drop(repo);
        txn.commit().unwrap();
    });

    c.bench_function("mem_query_range_100_of_1000", |b| {
        b.iter(|| {
            rt.block_on(async {
                let txn = store.begin();
                let repo = DocRepo::new(&txn, &config, IgnoreChanges);
                let found: Vec<Note> = repo
                    .query(&ctx, "rank", Condition::gte(index_key![400]).and_lte(index_key![499]))
                    .unwrap()
                    .try_collect()
                    .await
                    .unwrap();
                black_box(found);
            })
        })
    });
}

fn bench_rocks_create(c: &mut Criterion) {
    let dir = std::env::temp_dir().join(format!("syncdoc_bench_create_{}", Uuid::new_v4()));
    let store = RocksStore::open(StoreConfig {
        path: dir.clone(),
        ..StoreConfig::default()
    })
    .unwrap();
    let rt = tokio::runtime::Runtime::new().unwrap();
    let config = note_config();
    let ctx = Context::background();
    let mut rank = 0u32;

    c.bench_function("rocks_create_2_indexes", |b| {
        b.iter(|| {
            rank += 1;
            rt.block_on(async {
                let txn = store.begin();
                DocRepo::new(&txn, &config, IgnoreChanges)
                    .create(&ctx, note(rank))
                    .await
                    .unwrap();
                txn.commit().unwrap();
            })
        })
    });

    drop(store);
    let _ = std::fs::remove_dir_all(&dir);
}

// ─── Topic ──────────────────────────────────────────────────

fn bench_topic_push(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = MemStore::new();
    let ctx = Context::background();
    let batch: Vec<Vec<u8>> = (0..16).map(|_| vec![7u8; 128]).collect();

    c.bench_function("topic_push_16x128B", |b| {
        b.iter(|| {
            rt.block_on(async {
                let txn = store.begin();
                Topic::new(&txn).push(&ctx, &batch).await.unwrap();
                txn.commit().unwrap();
            })
        })
    });
}

criterion_group!(
    benches,
    bench_key_encode,
    bench_key_decode,
    bench_mem_create,
    bench_mem_query,
    bench_rocks_create,
    bench_topic_push,
);
criterion_main!(benches);
