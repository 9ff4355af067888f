//! Repository builder for explicit wiring
//!
//! The store, clock and id generator are injected here rather than reached through
//! globals, so tests can run against a deterministic clock and sequential ids.

use crate::db::PlaceRepository;
use crate::error::Result;
use crate::ports::{Clock, IdGenerator, SystemClock, UlidGenerator};
use crate::record::Normalizer;
use crate::storage::{KvStore, MemoryStore};
use crate::types::Config;
use std::path::PathBuf;
use std::sync::Arc;

/// Builder for creating repositories with custom wiring.
///
/// Defaults: an in-memory store, [`Config::default`], the system clock and ULID ids.
///
/// # Examples
///
/// ## Deterministic ids and time
/// ```rust
/// use placestore::{Feature, FixedClock, MemoryStore, RepositoryBuilder, SequentialIds};
/// use std::sync::Arc;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let repo = RepositoryBuilder::new()
///     .store(MemoryStore::new())
///     .clock(Arc::new(FixedClock::new(1_700_000_000_000)))
///     .ids(Arc::new(SequentialIds::new("place")))
///     .build()?;
///
/// let saved = repo.save(Feature::point(41.40, 2.17, "Sagrada Família"))?;
/// assert_eq!(saved.id, "place-000001");
/// assert_eq!(saved.created_at(), 1_700_000_000_000);
/// # Ok(())
/// # }
/// ```
///
/// ## Persistent store with custom limits
/// ```rust
/// use placestore::{Config, RepositoryBuilder, SyncPolicy};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let temp_path = std::env::temp_dir().join("builder_doc_places.aof");
/// let config = Config::default()
///     .with_batch_limits(50, 800)
///     .with_sync_policy(SyncPolicy::Always);
///
/// let repo = RepositoryBuilder::new()
///     .aof_path(&temp_path)
///     .config(config)
///     .build()?;
/// assert_eq!(repo.config().batch_place_limit, 50);
/// # drop(repo);
/// # std::fs::remove_file(temp_path)?;
/// # Ok(())
/// # }
/// ```
pub struct RepositoryBuilder {
    store: Option<Arc<dyn KvStore>>,
    aof_path: Option<PathBuf>,
    config: Config,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl RepositoryBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            aof_path: None,
            config: Config::default(),
            clock: Arc::new(SystemClock),
            ids: Arc::new(UlidGenerator::new()),
        }
    }

    /// Use an existing store. Takes precedence over [`aof_path`](Self::aof_path).
    pub fn store<S: KvStore + 'static>(mut self, store: S) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Persist to an append-only log at `path`, replaying it on build
    #[cfg(feature = "aof")]
    pub fn aof_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.aof_path = Some(path.into());
        self
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Validate the configuration, open the store and assemble the repository.
    pub fn build(self) -> Result<PlaceRepository> {
        self.config.validate()?;

        let store: Arc<dyn KvStore> = match (self.store, self.aof_path) {
            (Some(store), _) => store,
            #[cfg(feature = "aof")]
            (None, Some(path)) => Arc::new(crate::storage::AofStore::open(path, &self.config)?),
            _ => Arc::new(MemoryStore::new()),
        };

        let normalizer = Normalizer::new(self.clock, self.ids, self.config.index_precision);
        Ok(PlaceRepository::from_parts(store, normalizer, self.config))
    }
}

impl Default for RepositoryBuilder {
    fn default() -> Self {
        Self::new()
    }
}
