//! Ordered key-value stores
//!
//! The repository talks to storage only through [`KvStore`]: point reads, ordered prefix
//! scans, and atomic batches guarded by optimistic version checks. Two implementations
//! ship with the crate: [`MemoryStore`] and, with the `aof` feature, [`AofStore`], which
//! keeps the same tables in memory and logs every committed batch to disk.

use crate::batch::{AtomicBatch, BatchOperation, CommitOutcome, VersionCheck};
use crate::error::{PlaceError, Result};
use crate::types::StoreStats;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// A stored value and the version of the commit that wrote it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    pub value: Bytes,
    pub version: u64,
}

/// Trait for ordered key-value stores with atomic batches.
///
/// Implementations must apply a batch all-or-nothing: either every check passes and every
/// operation is visible afterwards, or nothing changes and the commit reports
/// [`CommitOutcome::Conflict`].
pub trait KvStore: Send + Sync {
    /// Get a value by key
    fn get(&self, key: &[u8]) -> Result<Option<Versioned>>;

    /// Get several keys at once, in the order given
    fn get_many(&self, keys: &[Bytes]) -> Result<Vec<Option<Versioned>>> {
        keys.iter().map(|key| self.get(key)).collect()
    }

    /// Key-value pairs starting with `prefix`, in key order, at most `limit` of them
    fn scan_prefix(&self, prefix: &[u8], limit: Option<usize>) -> Result<Vec<(Bytes, Versioned)>>;

    /// Apply a batch atomically
    fn commit(&self, batch: AtomicBatch) -> Result<CommitOutcome>;

    /// Get store statistics
    fn stats(&self) -> Result<StoreStats>;

    /// Flush any pending writes to persistent storage
    fn sync(&self) -> Result<()> {
        Ok(())
    }

    /// Convenience single-key write without preconditions
    fn set(&self, key: &[u8], value: &[u8]) -> Result<CommitOutcome> {
        let mut batch = AtomicBatch::new();
        batch.set(key, value);
        self.commit(batch)
    }

    /// Convenience single-key delete without preconditions
    fn delete(&self, key: &[u8]) -> Result<CommitOutcome> {
        let mut batch = AtomicBatch::new();
        batch.delete(key);
        self.commit(batch)
    }
}

impl<S: KvStore + ?Sized> KvStore for Arc<S> {
    fn get(&self, key: &[u8]) -> Result<Option<Versioned>> {
        (**self).get(key)
    }

    fn get_many(&self, keys: &[Bytes]) -> Result<Vec<Option<Versioned>>> {
        (**self).get_many(keys)
    }

    fn scan_prefix(&self, prefix: &[u8], limit: Option<usize>) -> Result<Vec<(Bytes, Versioned)>> {
        (**self).scan_prefix(prefix, limit)
    }

    fn commit(&self, batch: AtomicBatch) -> Result<CommitOutcome> {
        (**self).commit(batch)
    }

    fn stats(&self) -> Result<StoreStats> {
        (**self).stats()
    }

    fn sync(&self) -> Result<()> {
        (**self).sync()
    }
}

/// Computes the upper bound for a prefix scan.
fn calculate_prefix_end(prefix: &[u8]) -> Vec<u8> {
    let mut prefix_end = prefix.to_vec();

    // Smallest key greater than every key starting with `prefix`
    while let Some(last_byte) = prefix_end.pop() {
        if last_byte < 255 {
            prefix_end.push(last_byte + 1);
            break;
        }
    }
    prefix_end
}

/// The in-memory tables behind both stores
#[derive(Debug, Default)]
pub(crate) struct Tables {
    data: BTreeMap<Bytes, Versioned>,
    version: u64,
    commits: u64,
    conflicts: u64,
    fail_after: Option<u64>,
}

impl Tables {
    fn get(&self, key: &[u8]) -> Option<Versioned> {
        self.data.get(key).cloned()
    }

    /// Range scan over `[prefix, prefix_end)`, O(log n + k).
    fn scan_prefix(&self, prefix: &[u8], limit: Option<usize>) -> Vec<(Bytes, Versioned)> {
        let limit = limit.unwrap_or(usize::MAX);
        let start = Bytes::copy_from_slice(prefix);
        let prefix_end = calculate_prefix_end(prefix);

        let range = if prefix.is_empty() || prefix_end.len() < prefix.len() {
            // Empty prefix, or all trailing bytes were 0xFF: scan to the end
            self.data.range(start..)
        } else {
            self.data.range(start..Bytes::from(prefix_end))
        };

        range
            .filter(|(key, _)| key.starts_with(prefix))
            .take(limit)
            .map(|(key, item)| (key.clone(), item.clone()))
            .collect()
    }

    fn check_passes(&self, check: &VersionCheck) -> bool {
        let current = self.data.get(&check.key).map(|item| item.version);
        current == check.version
    }

    /// Whether a batch may be applied. Counts the conflict when it may not.
    fn admit(&mut self, batch: &AtomicBatch) -> bool {
        let injected = self.fail_after.is_some_and(|remaining| remaining == 0);
        if injected || !batch.checks().iter().all(|check| self.check_passes(check)) {
            self.conflicts += 1;
            return false;
        }
        if let Some(remaining) = self.fail_after.as_mut() {
            *remaining -= 1;
        }
        true
    }

    /// Apply operations under a fresh version, returning it.
    fn apply(&mut self, operations: &[BatchOperation]) -> u64 {
        self.version += 1;
        let version = self.version;
        for op in operations {
            match op {
                BatchOperation::Set { key, value } => {
                    self.data.insert(
                        key.clone(),
                        Versioned {
                            value: value.clone(),
                            version,
                        },
                    );
                }
                BatchOperation::Delete { key } => {
                    self.data.remove(key);
                }
            }
        }
        self.commits += 1;
        version
    }

    fn stats(&self) -> StoreStats {
        StoreStats {
            key_count: self.data.len(),
            commits: self.commits,
            conflicts: self.conflicts,
            log_size: 0,
        }
    }
}

/// In-memory store using a BTreeMap.
///
/// Cloning shares the underlying tables, so a test can keep a handle to a store it has
/// handed to a repository.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let the next `n` commits through, then refuse every later one with a conflict.
    /// Used to exercise partial-failure paths.
    pub fn fail_commits_after(&self, n: u64) {
        if let Ok(mut tables) = self.tables.write() {
            tables.fail_after = Some(n);
        }
    }

    /// Stop refusing commits
    pub fn heal(&self) {
        if let Ok(mut tables) = self.tables.write() {
            tables.fail_after = None;
        }
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Versioned>> {
        let tables = self.tables.read().map_err(|_| PlaceError::Lock)?;
        Ok(tables.get(key))
    }

    fn get_many(&self, keys: &[Bytes]) -> Result<Vec<Option<Versioned>>> {
        let tables = self.tables.read().map_err(|_| PlaceError::Lock)?;
        Ok(keys.iter().map(|key| tables.get(key)).collect())
    }

    fn scan_prefix(&self, prefix: &[u8], limit: Option<usize>) -> Result<Vec<(Bytes, Versioned)>> {
        let tables = self.tables.read().map_err(|_| PlaceError::Lock)?;
        Ok(tables.scan_prefix(prefix, limit))
    }

    fn commit(&self, batch: AtomicBatch) -> Result<CommitOutcome> {
        let mut tables = self.tables.write().map_err(|_| PlaceError::Lock)?;
        if !tables.admit(&batch) {
            return Ok(CommitOutcome::Conflict);
        }
        let version = tables.apply(batch.operations());
        Ok(CommitOutcome::Committed { version })
    }

    fn stats(&self) -> Result<StoreStats> {
        let tables = self.tables.read().map_err(|_| PlaceError::Lock)?;
        Ok(tables.stats())
    }
}

#[cfg(feature = "aof")]
pub use aof::AofStore;

#[cfg(feature = "aof")]
mod aof {
    use super::*;
    use crate::persistence::AOFFile;
    use crate::types::{Config, SyncPolicy};
    use std::path::Path;
    use std::time::{Duration, Instant};
    use tracing::{debug, info, warn};

    struct AofInner {
        tables: Tables,
        log: AOFFile,
        sync_policy: SyncPolicy,
        last_sync: Instant,
        closed: bool,
    }

    impl AofInner {
        fn ensure_open(&self) -> Result<()> {
            if self.closed {
                return Err(PlaceError::DatabaseClosed);
            }
            Ok(())
        }

        fn maybe_sync(&mut self) -> Result<()> {
            match self.sync_policy {
                SyncPolicy::Always => self.log.sync()?,
                SyncPolicy::EverySecond if self.last_sync.elapsed() >= Duration::from_secs(1) => {
                    self.log.sync()?;
                    self.last_sync = Instant::now();
                }
                _ => {}
            }
            Ok(())
        }

        fn compact(&mut self) -> Result<()> {
            let AofInner { tables, log, .. } = self;
            log.rewrite(tables.data.iter().map(|(key, item)| (key, &item.value)))
        }
    }

    /// Persistent store: the memory tables plus an append-only log of committed batches.
    ///
    /// A batch is appended to the log before it becomes visible. Opening the store replays
    /// the log; the log is compacted once it passes the configured size threshold.
    #[derive(Clone)]
    pub struct AofStore {
        inner: Arc<RwLock<AofInner>>,
    }

    impl AofStore {
        /// Open (or create) a store backed by the log at `path`.
        pub fn open<P: AsRef<Path>>(path: P, config: &Config) -> Result<Self> {
            let mut log = AOFFile::open(path.as_ref(), config.rewrite_size_threshold)?;
            let mut tables = Tables::default();

            let batches = log.replay()?;
            let replayed = batches.len();
            for operations in &batches {
                tables.apply(operations);
            }
            // Replayed batches are history, not commits of this session
            tables.commits = 0;

            info!(
                path = %path.as_ref().display(),
                batches = replayed,
                keys = tables.data.len(),
                "opened append-only store"
            );

            Ok(Self {
                inner: Arc::new(RwLock::new(AofInner {
                    tables,
                    log,
                    sync_policy: config.sync_policy,
                    last_sync: Instant::now(),
                    closed: false,
                })),
            })
        }

        /// Rewrite the log so it holds only the live key set.
        pub fn compact(&self) -> Result<()> {
            let mut inner = self.inner.write().map_err(|_| PlaceError::Lock)?;
            inner.ensure_open()?;
            inner.compact()
        }

        /// Sync the log and refuse further operations.
        pub fn close(&self) -> Result<()> {
            let mut inner = self.inner.write().map_err(|_| PlaceError::Lock)?;
            if inner.closed {
                return Ok(());
            }
            inner.log.sync()?;
            inner.closed = true;
            Ok(())
        }
    }

    impl KvStore for AofStore {
        fn get(&self, key: &[u8]) -> Result<Option<Versioned>> {
            let inner = self.inner.read().map_err(|_| PlaceError::Lock)?;
            inner.ensure_open()?;
            Ok(inner.tables.get(key))
        }

        fn get_many(&self, keys: &[Bytes]) -> Result<Vec<Option<Versioned>>> {
            let inner = self.inner.read().map_err(|_| PlaceError::Lock)?;
            inner.ensure_open()?;
            Ok(keys.iter().map(|key| inner.tables.get(key)).collect())
        }

        fn scan_prefix(
            &self,
            prefix: &[u8],
            limit: Option<usize>,
        ) -> Result<Vec<(Bytes, Versioned)>> {
            let inner = self.inner.read().map_err(|_| PlaceError::Lock)?;
            inner.ensure_open()?;
            Ok(inner.tables.scan_prefix(prefix, limit))
        }

        fn commit(&self, batch: AtomicBatch) -> Result<CommitOutcome> {
            let mut inner = self.inner.write().map_err(|_| PlaceError::Lock)?;
            inner.ensure_open()?;

            if !inner.tables.admit(&batch) {
                return Ok(CommitOutcome::Conflict);
            }

            // Durable first, then visible
            inner.log.append_batch(batch.operations())?;
            let version = inner.tables.apply(batch.operations());

            // The batch is logged and visible from here on; later failures must not
            // report it as uncommitted.
            if let Err(e) = inner.maybe_sync() {
                warn!(version, error = %e, "sync after commit failed");
            }

            if inner.log.needs_rewrite() {
                debug!(size = inner.log.size(), "append-only log past threshold");
                if let Err(e) = inner.compact() {
                    warn!(version, error = %e, "compaction after commit failed");
                }
            }

            Ok(CommitOutcome::Committed { version })
        }

        fn stats(&self) -> Result<StoreStats> {
            let inner = self.inner.read().map_err(|_| PlaceError::Lock)?;
            Ok(StoreStats {
                log_size: inner.log.size(),
                ..inner.tables.stats()
            })
        }

        fn sync(&self) -> Result<()> {
            let mut inner = self.inner.write().map_err(|_| PlaceError::Lock)?;
            inner.ensure_open()?;
            inner.log.sync()?;
            inner.last_sync = Instant::now();
            Ok(())
        }
    }
}

/// A memory store whose commits start failing with an IO error after `ok` successes
#[cfg(test)]
pub(crate) struct BrokenStore {
    pub(crate) inner: MemoryStore,
    ok: std::sync::atomic::AtomicU64,
}

#[cfg(test)]
impl BrokenStore {
    pub(crate) fn after(ok: u64) -> Self {
        Self {
            inner: MemoryStore::new(),
            ok: std::sync::atomic::AtomicU64::new(ok),
        }
    }
}

#[cfg(test)]
impl KvStore for BrokenStore {
    fn get(&self, key: &[u8]) -> Result<Option<Versioned>> {
        self.inner.get(key)
    }

    fn scan_prefix(&self, prefix: &[u8], limit: Option<usize>) -> Result<Vec<(Bytes, Versioned)>> {
        self.inner.scan_prefix(prefix, limit)
    }

    fn commit(&self, batch: AtomicBatch) -> Result<CommitOutcome> {
        use std::sync::atomic::Ordering;
        let left = self.ok.load(Ordering::SeqCst);
        if left == 0 {
            return Err(PlaceError::Io(std::io::Error::other("disk full")));
        }
        self.ok.store(left - 1, Ordering::SeqCst);
        self.inner.commit(batch)
    }

    fn stats(&self) -> Result<StoreStats> {
        self.inner.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn committed(outcome: CommitOutcome) -> u64 {
        match outcome {
            CommitOutcome::Committed { version } => version,
            CommitOutcome::Conflict => panic!("unexpected conflict"),
        }
    }

    #[test]
    fn test_memory_store_basic_ops() {
        let store = MemoryStore::new();

        let version = committed(store.set(b"test_key", b"test_value").unwrap());
        let item = store.get(b"test_key").unwrap().unwrap();
        assert_eq!(item.value.as_ref(), b"test_value");
        assert_eq!(item.version, version);
        assert!(store.get(b"nonexistent").unwrap().is_none());

        store.delete(b"test_key").unwrap();
        assert!(store.get(b"test_key").unwrap().is_none());
    }

    #[test]
    fn test_prefix_scan_edge_cases() {
        let store = MemoryStore::new();
        let mut batch = AtomicBatch::new();
        let keys: [&[u8]; 9] = [
            b"a",
            b"b",
            b"test\xff\xffa",
            b"test\xff\xffb",
            b"test\xff\xff\xff",
            b"testb",
            b"abc",
            b"abcd",
            b"abd",
        ];
        for key in keys {
            batch.set(key, b"value");
        }
        store.commit(batch).unwrap();

        assert_eq!(store.scan_prefix(b"", None).unwrap().len(), 9);
        assert_eq!(store.scan_prefix(b"test\xff\xff", None).unwrap().len(), 3);
        assert_eq!(store.scan_prefix(b"abc", None).unwrap().len(), 2);
        assert_eq!(store.scan_prefix(b"nonexistent", None).unwrap().len(), 0);
        assert_eq!(store.scan_prefix(b"a", None).unwrap().len(), 4);
    }

    #[test]
    fn test_prefix_scan_ordering_and_limit() {
        let store = MemoryStore::new();
        let mut batch = AtomicBatch::new();
        batch
            .set(b"prefix:z", b"v")
            .set(b"prefix:a", b"v")
            .set(b"prefix:m", b"v")
            .set(b"different:key", b"v");
        store.commit(batch).unwrap();

        let keys: Vec<Bytes> = store
            .scan_prefix(b"prefix:", None)
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["prefix:a", "prefix:m", "prefix:z"]);

        let limited = store.scan_prefix(b"prefix:", Some(2)).unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[1].0.as_ref(), b"prefix:m");
    }

    #[test]
    fn test_version_checks() {
        let store = MemoryStore::new();

        let mut batch = AtomicBatch::new();
        batch.check(b"k", None).set(b"k", b"1");
        let v1 = committed(store.commit(batch).unwrap());

        // Stale version
        let mut batch = AtomicBatch::new();
        batch.check(b"k", Some(v1 + 10)).set(b"k", b"2").set(b"other", b"x");
        assert_eq!(store.commit(batch).unwrap(), CommitOutcome::Conflict);
        assert!(store.get(b"other").unwrap().is_none());
        assert_eq!(store.get(b"k").unwrap().unwrap().value.as_ref(), b"1");

        // Current version
        let mut batch = AtomicBatch::new();
        batch.check(b"k", Some(v1)).set(b"k", b"2");
        let v2 = committed(store.commit(batch).unwrap());
        assert!(v2 > v1);

        let stats = store.stats().unwrap();
        assert_eq!(stats.commits, 2);
        assert_eq!(stats.conflicts, 1);
        assert_eq!(stats.key_count, 1);
    }

    #[test]
    fn test_batch_applies_in_order() {
        let store = MemoryStore::new();
        let mut batch = AtomicBatch::new();
        batch.set(b"key1", b"value1").set(b"key2", b"value2").delete(b"key1");
        store.commit(batch).unwrap();

        assert!(store.get(b"key1").unwrap().is_none());
        assert!(store.get(b"key2").unwrap().is_some());
    }

    #[test]
    fn test_get_many_preserves_order() {
        let store = MemoryStore::new();
        store.set(b"a", b"1").unwrap();
        store.set(b"c", b"3").unwrap();

        let keys = [
            Bytes::from_static(b"c"),
            Bytes::from_static(b"b"),
            Bytes::from_static(b"a"),
        ];
        let values: Vec<Option<Bytes>> = store
            .get_many(&keys)
            .unwrap()
            .into_iter()
            .map(|item| item.map(|i| i.value))
            .collect();
        assert_eq!(
            values,
            vec![Some(Bytes::from_static(b"3")), None, Some(Bytes::from_static(b"1"))]
        );
    }

    #[test]
    fn test_fault_injection() {
        let store = MemoryStore::new();
        store.fail_commits_after(1);

        assert!(store.set(b"a", b"1").unwrap().is_committed());
        assert_eq!(store.set(b"b", b"2").unwrap(), CommitOutcome::Conflict);
        assert!(store.get(b"b").unwrap().is_none());

        store.heal();
        assert!(store.set(b"b", b"2").unwrap().is_committed());
    }

    #[cfg(feature = "aof")]
    #[test]
    fn test_aof_store_reopen() {
        use crate::types::Config;
        use tempfile::TempDir;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("places.aof");
        let config = Config::default();

        {
            let store = AofStore::open(&path, &config).unwrap();
            store.set(b"kept", b"1").unwrap();
            store.set(b"dropped", b"2").unwrap();
            store.delete(b"dropped").unwrap();

            let mut batch = AtomicBatch::new();
            batch.check(b"kept", None).set(b"never", b"3");
            assert_eq!(store.commit(batch).unwrap(), CommitOutcome::Conflict);
            store.close().unwrap();
            assert!(matches!(store.get(b"kept"), Err(PlaceError::DatabaseClosed)));
        }

        let store = AofStore::open(&path, &config).unwrap();
        assert_eq!(store.get(b"kept").unwrap().unwrap().value.as_ref(), b"1");
        assert!(store.get(b"dropped").unwrap().is_none());
        assert!(store.get(b"never").unwrap().is_none());
        assert_eq!(store.stats().unwrap().key_count, 1);
    }
}
