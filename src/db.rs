use crate::builder::RepositoryBuilder;
use crate::erase::Eraser;
use crate::error::Result;
use crate::index::IndexWriter;
use crate::keys::{self, KeySpace};
use crate::query::{QueryEngine, QueryResult};
use crate::record::{Feature, Normalizer, Record};
use crate::search::SearchEngine;
use crate::spatial::BoundingBox;
use crate::storage::{KvStore, MemoryStore};
use crate::types::{Cancellation, Config, PlaceStats, StoreStats};
use std::sync::Arc;
use tracing::info;

#[cfg(feature = "aof")]
use crate::storage::AofStore;
#[cfg(feature = "aof")]
use std::path::Path;

/// Geo-indexed place repository.
///
/// Cloning is cheap and shares the store. There is no lock around operations: every
/// write is one or more atomic store transactions, and concurrent callers interleave
/// between them.
#[derive(Clone)]
pub struct PlaceRepository {
    inner: Arc<RepositoryInner>,
}

struct RepositoryInner {
    store: Arc<dyn KvStore>,
    normalizer: Normalizer,
    config: Config,
}

impl PlaceRepository {
    pub(crate) fn from_parts(store: Arc<dyn KvStore>, normalizer: Normalizer, config: Config) -> Self {
        Self {
            inner: Arc::new(RepositoryInner {
                store,
                normalizer,
                config,
            }),
        }
    }

    /// A repository over a fresh in-memory store with default settings
    pub fn memory() -> Result<Self> {
        RepositoryBuilder::new().store(MemoryStore::new()).build()
    }

    /// A repository persisted to the append-only log at `path`
    #[cfg(feature = "aof")]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(path, Config::default())
    }

    #[cfg(feature = "aof")]
    pub fn open_with_config<P: AsRef<Path>>(path: P, config: Config) -> Result<Self> {
        config.validate()?;
        let store = AofStore::open(path, &config)?;
        RepositoryBuilder::new().store(store).config(config).build()
    }

    pub fn builder() -> RepositoryBuilder {
        RepositoryBuilder::new()
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// The underlying store
    pub fn store(&self) -> &dyn KvStore {
        self.inner.store.as_ref()
    }

    fn writer(&self) -> IndexWriter<'_> {
        IndexWriter::new(self.store(), &self.inner.normalizer, &self.inner.config)
    }

    fn queries(&self) -> QueryEngine<'_> {
        QueryEngine::new(self.store(), &self.inner.config)
    }

    /// Validate, normalize and store one place with all its index entries in a single
    /// transaction.
    ///
    /// A feature carrying an `id` replaces the stored place with that id; index entries
    /// the old version had and the new one lacks are removed. Fails with
    /// [`PlaceError::Validation`](crate::PlaceError::Validation) on a missing geometry or
    /// name, and with [`PlaceError::Write`](crate::PlaceError::Write) if the store rejects
    /// the commit. Nothing is retried internally.
    pub fn save(&self, feature: Feature) -> Result<Record> {
        self.writer().save(feature)
    }

    /// Store many places in bounded transactions. Returns the number of places committed.
    ///
    /// Not atomic across the whole input. If a commit is rejected, earlier transactions
    /// remain and the error's [`committed`](crate::PlaceError::committed) count says how
    /// many places they held. Re-running the same input is safe for features with ids.
    pub fn save_all<I>(&self, features: I) -> Result<usize>
    where
        I: IntoIterator<Item = Feature>,
    {
        self.save_all_with(features, &Cancellation::none())
    }

    /// [`save_all`](Self::save_all), checking `cancel` before every commit
    pub fn save_all_with<I>(&self, features: I, cancel: &Cancellation) -> Result<usize>
    where
        I: IntoIterator<Item = Feature>,
    {
        self.writer().save_all(features, cancel)
    }

    /// Places in `bbox`, at most `limit`, in no particular order. Check
    /// [`QueryResult::coverage`] for boxes too large to scan completely.
    pub fn find_in_bounds(&self, bbox: &BoundingBox, limit: usize) -> Result<QueryResult> {
        self.queries().find_in_bounds(bbox, limit)
    }

    /// Places of one category in `bbox`, without scanning other categories
    pub fn find_by_category(
        &self,
        category: &str,
        bbox: &BoundingBox,
        limit: usize,
    ) -> Result<QueryResult> {
        self.queries().find_by_category(category, bbox, limit)
    }

    /// Places whose token set contains every token of `query`
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<Record>> {
        SearchEngine::new(self.store(), &self.inner.config).search(query, limit)
    }

    pub fn find_by_id(&self, id: &str) -> Result<Option<Record>> {
        self.store()
            .get(&keys::primary_key(id))?
            .map(|item| Record::from_bytes(&item.value))
            .transpose()
    }

    /// Delete every place and index entry. Returns the number of keys deleted.
    pub fn remove_all(&self) -> Result<usize> {
        self.remove_all_with(&Cancellation::none())
    }

    pub fn remove_all_with(&self, cancel: &Cancellation) -> Result<usize> {
        Eraser::new(self.store(), &self.inner.config).remove_all(cancel)
    }

    /// Number of stored places
    pub fn count(&self) -> Result<usize> {
        Ok(self
            .store()
            .scan_prefix(&KeySpace::Primary.prefix(), None)?
            .len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self
            .store()
            .scan_prefix(&KeySpace::Primary.prefix(), Some(1))?
            .is_empty())
    }

    /// Total places and per-category counts. Places without a category only count
    /// towards the total.
    pub fn get_stats(&self) -> Result<PlaceStats> {
        let mut stats = PlaceStats::default();
        for (_, item) in self.store().scan_prefix(&KeySpace::Primary.prefix(), None)? {
            let record = Record::from_bytes(&item.value)?;
            stats.total_places += 1;
            if let Some(category) = record.category() {
                *stats.by_category.entry(category.to_owned()).or_default() += 1;
            }
        }
        Ok(stats)
    }

    pub fn store_stats(&self) -> Result<StoreStats> {
        self.store().stats()
    }

    /// Reseed when the repository holds fewer than `threshold` places: erase everything,
    /// then load `features`. Returns whether seeding happened.
    pub fn seed_if_sparse<I>(&self, features: I, threshold: usize) -> Result<bool>
    where
        I: IntoIterator<Item = Feature>,
    {
        let existing = self.count()?;
        if existing >= threshold {
            info!(existing, threshold, "repository already populated; skipping seed");
            return Ok(false);
        }

        self.remove_all()?;
        let seeded = self.save_all(features)?;
        info!(existing, seeded, "seeded repository");
        Ok(true)
    }

    /// Flush the store to durable storage, if it has any
    pub fn sync(&self) -> Result<()> {
        self.store().sync()
    }
}
