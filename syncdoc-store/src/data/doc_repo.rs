//! Document repository.
//!
//! Owns the primary store for one document type and keeps every index in
//! step with it. All writes of one operation are issued concurrently and
//! joined; if any of them fails the caller must abandon the transaction.
//!
//! ```text
//!  create / update / apply
//!        │
//!        ├──► d/<id>               lz4(crdt state)
//!        ├──► i/<name>/...         Index::sync(prev, next)   (per index)
//!        └──► OnDocChange          (create / update only)
//! ```

use super::change::OnDocChange;
use super::codec::{decode_state, encode_state};
use super::error::{DataError, Result};
use super::index::{Index, IndexSpec};
use super::update_checker::UpdateChecker;
use crate::kv::key_codec::{display_key, IndexKey};
use crate::kv::{with_prefix, Condition, Prefixed, Transaction};
use futures_util::future::{self, try_join, try_join_all};
use futures_util::stream::{LocalBoxStream, StreamExt, TryStreamExt};
use std::sync::Arc;
use syncdoc_core::{Clock, Context, Crdt, CrdtDiff, CrdtError, Document, SystemClock};
use uuid::Uuid;

/// Default number of id→document reads kept in flight by `get`/`query`.
pub const DEFAULT_LOOKAHEAD: usize = 32;

const PRIMARY_PREFIX: &str = "d/";
const INDEX_PREFIX: &str = "i/";

// ─── Configuration ─────────────────────────────────────────────────

/// Validates a document before it is written.
pub trait Schema<D>: Send + Sync {
    fn validate(&self, doc: &D) -> Result<(), String>;
}

impl<D, F> Schema<D> for F
where
    F: Fn(&D) -> Result<(), String> + Send + Sync,
{
    fn validate(&self, doc: &D) -> Result<(), String> {
        self(doc)
    }
}

/// Schema that accepts every document.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl<D> Schema<D> for AcceptAll {
    fn validate(&self, _doc: &D) -> Result<(), String> {
        Ok(())
    }
}

/// Per document type settings, built once and shared by every
/// transaction's repository.
pub struct DocRepoConfig<D> {
    indexes: Vec<(String, IndexSpec<D>)>,
    schema: Box<dyn Schema<D>>,
    clock: Arc<dyn Clock>,
    lookahead: usize,
}

impl<D: Document + 'static> DocRepoConfig<D> {
    pub fn new() -> Self {
        Self {
            indexes: Vec::new(),
            schema: Box::new(AcceptAll),
            clock: Arc::new(SystemClock::new()),
            lookahead: DEFAULT_LOOKAHEAD,
        }
    }

    /// Register an index. Names must not contain `/`; registering a name
    /// twice replaces the earlier spec.
    pub fn index(mut self, name: impl Into<String>, spec: IndexSpec<D>) -> Result<Self> {
        let name = name.into();
        if name.contains('/') {
            return Err(DataError::InvalidIndexName(name));
        }
        self.indexes.retain(|(existing, _)| *existing != name);
        self.indexes.push((name, spec));
        Ok(self)
    }

    pub fn schema(mut self, schema: impl Schema<D> + 'static) -> Self {
        self.schema = Box::new(schema);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn lookahead(mut self, lookahead: usize) -> Self {
        self.lookahead = lookahead.max(1);
        self
    }

    pub fn index_names(&self) -> impl Iterator<Item = &str> {
        self.indexes.iter().map(|(name, _)| name.as_str())
    }
}

impl<D: Document + 'static> Default for DocRepoConfig<D> {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Repository ────────────────────────────────────────────────────

pub struct DocRepo<'a, T: ?Sized, D, L> {
    primary: Prefixed<'a, T>,
    indexes: Vec<Index<'a, T, D>>,
    config: &'a DocRepoConfig<D>,
    on_change: L,
}

impl<'a, T, D, L> DocRepo<'a, T, D, L>
where
    T: Transaction + ?Sized,
    D: Document + 'static,
    L: OnDocChange,
{
    pub fn new(txn: &'a T, config: &'a DocRepoConfig<D>, on_change: L) -> Self {
        Self::with_prefix(txn, "", config, on_change)
    }

    /// Repository whose whole keyspace lives under `prefix`.
    pub fn with_prefix(
        txn: &'a T,
        prefix: impl AsRef<[u8]>,
        config: &'a DocRepoConfig<D>,
        on_change: L,
    ) -> Self {
        let root = with_prefix(txn, prefix);
        let indexes = config
            .indexes
            .iter()
            .map(|(name, spec)| {
                Index::new(root.nested(format!("{INDEX_PREFIX}{name}/")), name, spec)
            })
            .collect();
        Self {
            primary: root.nested(PRIMARY_PREFIX),
            indexes,
            config,
            on_change,
        }
    }

    pub fn on_change(&self) -> &L {
        &self.on_change
    }

    // ─── Reads ───

    async fn load(&self, ctx: &Context, id: Uuid) -> Result<Option<Crdt<D>>> {
        match self.primary.get(ctx, id.as_bytes()).await? {
            Some(bytes) => Ok(Some(Crdt::load(&decode_state(&bytes)?)?)),
            None => Ok(None),
        }
    }

    /// Current snapshot of `id`, `None` if it does not exist.
    pub async fn get_by_id(&self, ctx: &Context, id: Uuid) -> Result<Option<D>> {
        match self.load(ctx, id).await? {
            Some(crdt) => Ok(Some(crdt.snapshot()?)),
            None => Ok(None),
        }
    }

    /// Full CRDT state of `id`, for seeding a replica.
    pub async fn get_state(&self, ctx: &Context, id: Uuid) -> Result<Option<CrdtDiff>> {
        match self.primary.get(ctx, id.as_bytes()).await? {
            Some(bytes) => Ok(Some(decode_state(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Every document, ordered by id bytes.
    pub fn get_all<'s>(&'s self, ctx: &'s Context) -> LocalBoxStream<'s, Result<D>> {
        self.primary
            .query(ctx, Condition::all())
            .map(|entry| -> Result<D> {
                let entry = entry?;
                let crdt = Crdt::<D>::load(&decode_state(&entry.value)?)?;
                Ok(crdt.snapshot()?)
            })
            .boxed_local()
    }

    fn index(&self, name: &str) -> Result<&Index<'a, T, D>> {
        self.indexes
            .iter()
            .find(|index| index.name() == name)
            .ok_or_else(|| DataError::IndexNotFound(name.to_string()))
    }

    /// Documents whose `index_name` key equals `key`.
    pub fn get<'s>(
        &'s self,
        ctx: &'s Context,
        index_name: &str,
        key: IndexKey,
    ) -> Result<LocalBoxStream<'s, Result<D>>> {
        let index = self.index(index_name)?;
        Ok(self.resolve(ctx, index.get(ctx, key)))
    }

    /// Documents whose `index_name` key satisfies `condition`.
    pub fn query<'s>(
        &'s self,
        ctx: &'s Context,
        index_name: &str,
        condition: Condition<IndexKey>,
    ) -> Result<LocalBoxStream<'s, Result<D>>> {
        let index = self.index(index_name)?;
        Ok(self.resolve(ctx, index.query(ctx, condition)))
    }

    /// The single document under `key`, `None` if there is none.
    ///
    /// Fails with [`DataError::Multiplicity`] if more than one matches.
    pub async fn get_unique(&self, ctx: &Context, index_name: &str, key: IndexKey) -> Result<Option<D>> {
        let index = self.index(index_name)?;
        let ids: Vec<Uuid> = index.get(ctx, key.clone()).take(2).try_collect().await?;
        match ids.as_slice() {
            [] => Ok(None),
            [id] => self.get_by_id(ctx, *id).await,
            _ => Err(DataError::Multiplicity {
                index: index_name.to_string(),
                key: display_key(&key),
            }),
        }
    }

    /// Look up documents for `ids`, keeping at most `lookahead` reads in
    /// flight and preserving the order of `ids`.
    fn resolve<'s>(
        &'s self,
        ctx: &'s Context,
        ids: LocalBoxStream<'s, Result<Uuid>>,
    ) -> LocalBoxStream<'s, Result<D>> {
        ids.map(move |id| async move {
            let id = id?;
            Ok::<_, DataError>((id, self.get_by_id(ctx, id).await?))
        })
        .buffered(self.config.lookahead.max(1))
        .filter_map(|resolved: Result<(Uuid, Option<D>)>| {
            future::ready(match resolved {
                Ok((_, Some(doc))) => Some(Ok(doc)),
                Ok((id, None)) => {
                    log::warn!("index entry points to missing doc {id}");
                    None
                }
                Err(e) => Some(Err(e)),
            })
        })
        .boxed_local()
    }

    // ─── Writes ───

    fn ensure_valid(&self, doc: &D) -> Result<()> {
        self.config
            .schema
            .validate(doc)
            .map_err(DataError::SchemaInvalid)
    }

    /// `createdAt` never changes once stored and `updatedAt` never
    /// precedes it.
    fn ensure_timestamps(prev: Option<&D>, next: &D) -> Result<()> {
        if let Some(prev) = prev {
            if next.created_at() != prev.created_at() {
                return Err(DataError::SchemaInvalid(format!(
                    "createdAt is immutable (was {}, got {})",
                    prev.created_at(),
                    next.created_at()
                )));
            }
        }
        if next.updated_at() < next.created_at() {
            return Err(DataError::SchemaInvalid(format!(
                "updatedAt {} precedes createdAt {}",
                next.updated_at(),
                next.created_at()
            )));
        }
        Ok(())
    }

    async fn put(&self, ctx: &Context, id: Uuid, crdt: &Crdt<D>) -> Result<()> {
        self.primary
            .put(ctx, id.as_bytes(), &encode_state(&crdt.state()))
            .await?;
        Ok(())
    }

    async fn sync(
        &self,
        ctx: &Context,
        id: Uuid,
        prev: Option<&D>,
        next: Option<&D>,
        diff: Option<&CrdtDiff>,
    ) -> Result<()> {
        let indexes = try_join_all(self.indexes.iter().map(|index| index.sync(ctx, prev, next)));
        let notify = async {
            match diff {
                Some(diff) => self.on_change.on_change(ctx, id, diff).await,
                None => Ok(()),
            }
        };
        try_join(indexes, notify).await?;
        Ok(())
    }

    /// Store a new document, stamping `createdAt` and `updatedAt`.
    pub async fn create(&self, ctx: &Context, mut doc: D) -> Result<D> {
        let id = doc.id();
        if self.primary.get(ctx, id.as_bytes()).await?.is_some() {
            return Err(DataError::AlreadyExists(id));
        }

        let now = self.config.clock.now();
        doc.set_created_at(now);
        doc.set_updated_at(now);
        self.ensure_valid(&doc)?;

        let crdt = Crdt::from_value(&doc)?;
        let created = crdt.snapshot()?;
        let diff = crdt.state();
        try_join(
            self.put(ctx, id, &crdt),
            self.sync(ctx, id, None, Some(&created), Some(&diff)),
        )
        .await?;

        log::debug!("created doc {id}");
        Ok(created)
    }

    /// Apply `recipe` to the current snapshot of `id`.
    ///
    /// A recipe that changes nothing is a no-op: nothing is written and
    /// no change is reported.
    pub async fn update<F>(&self, ctx: &Context, id: Uuid, recipe: F) -> Result<D>
    where
        F: FnOnce(&mut D),
    {
        let mut crdt = self.load(ctx, id).await?.ok_or(DataError::NotFound(id))?;
        let prev = crdt.snapshot()?;

        let mut next = prev.clone();
        recipe(&mut next);
        if next == prev {
            log::debug!("update of {id} changed nothing");
            return Ok(prev);
        }
        if next.id() != id {
            return Err(DataError::IdMismatch {
                expected: id,
                actual: next.id(),
            });
        }
        if next.updated_at() == prev.updated_at() {
            next.set_updated_at(self.config.clock.now());
        }
        Self::ensure_timestamps(Some(&prev), &next)?;
        self.ensure_valid(&next)?;

        let Some(diff) = crdt.write(&next)? else {
            return Ok(prev);
        };
        let next = crdt.snapshot()?;
        try_join(
            self.put(ctx, id, &crdt),
            self.sync(ctx, id, Some(&prev), Some(&next), Some(&diff)),
        )
        .await?;

        log::debug!("updated doc {id} ({} byte diff)", diff.len());
        Ok(next)
    }

    /// Merge a remotely produced `diff` into `id`.
    ///
    /// Creates the document if it does not exist yet. When it does and a
    /// `checker` is given, fields the checker rejects fail the whole apply.
    /// Indexes are kept in sync; no change notification is emitted.
    pub async fn apply(
        &self,
        ctx: &Context,
        id: Uuid,
        diff: &CrdtDiff,
        checker: Option<&dyn UpdateChecker<D>>,
    ) -> Result<D> {
        let (prev, crdt) = match self.load(ctx, id).await? {
            Some(mut crdt) => {
                let prev = crdt.snapshot()?;
                crdt.apply(diff)?;
                (Some(prev), crdt)
            }
            None => (None, Crdt::load(diff)?),
        };

        let next = crdt.snapshot().map_err(|e| match e {
            CrdtError::Serialization(e) => DataError::SchemaInvalid(e.to_string()),
            other => DataError::Crdt(other),
        })?;
        if next.id() != id {
            return Err(DataError::IdMismatch {
                expected: id,
                actual: next.id(),
            });
        }

        if let (Some(prev), Some(checker)) = (&prev, checker) {
            checker
                .check(prev, &next)
                .map_err(DataError::UnauthorizedWrite)?;
        }
        Self::ensure_timestamps(prev.as_ref(), &next)?;
        self.ensure_valid(&next)?;

        try_join(
            self.put(ctx, id, &crdt),
            self.sync(ctx, id, prev.as_ref(), Some(&next), None),
        )
        .await?;

        log::debug!("applied remote diff to {id}");
        Ok(next)
    }
}
