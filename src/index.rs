//! Index writer: turns records into the primary entry plus their secondary index entries
//!
//! Every write goes through one [`AtomicBatch`] per transaction. Before a record is
//! written its current primary entry is read; secondary keys the old record had and the
//! new one lacks are deleted in the same batch, and a version check on the primary key
//! makes a concurrent writer fail the commit instead of leaving stale entries behind.

use crate::batch::{AtomicBatch, CommitOutcome};
use crate::error::{PlaceError, Result};
use crate::keys;
use crate::record::{Feature, Normalizer, Record};
use crate::storage::KvStore;
use crate::types::{Cancellation, Config};
use bytes::Bytes;
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// The keys a record occupies outside the primary key space
pub fn secondary_keys(record: &Record, precision: usize) -> BTreeSet<Bytes> {
    let mut entries = BTreeSet::new();
    entries.insert(keys::spatial_key(precision, &record.geohash, &record.id));
    if let Some(category) = record.category() {
        entries.insert(keys::category_key(category, &record.geohash, &record.id));
    }
    for token in record.tokens() {
        entries.insert(keys::search_key(&token, &record.id));
    }
    entries
}

/// The record currently stored under an id, and its version
#[derive(Debug, Clone)]
struct Stored {
    record: Record,
    version: u64,
}

/// Writes records and keeps their index entries consistent
pub struct IndexWriter<'a> {
    store: &'a dyn KvStore,
    normalizer: &'a Normalizer,
    config: &'a Config,
}

impl<'a> IndexWriter<'a> {
    pub fn new(store: &'a dyn KvStore, normalizer: &'a Normalizer, config: &'a Config) -> Self {
        Self {
            store,
            normalizer,
            config,
        }
    }

    fn load(&self, id: &str) -> Result<Option<Stored>> {
        self.store
            .get(&keys::primary_key(id))?
            .map(|item| -> Result<Stored> {
                Ok(Stored {
                    record: Record::from_bytes(&item.value)?,
                    version: item.version,
                })
            })
            .transpose()
    }

    /// Queue the writes for `record` and return the number of key operations added.
    ///
    /// `previous` is what the batch will replace: the stored record, or a record queued
    /// earlier in the same batch. `check` is the primary-key precondition to add, if any.
    fn stage(
        &self,
        batch: &mut AtomicBatch,
        record: &Record,
        previous: Option<&Record>,
        check: Option<Option<u64>>,
    ) -> Result<usize> {
        let primary = keys::primary_key(&record.id);
        let entries = secondary_keys(record, self.normalizer.precision());

        if let Some(version) = check {
            batch.check(&primary, version);
        }

        let mut ops = 0;
        if let Some(previous) = previous {
            for stale in secondary_keys(previous, self.normalizer.precision()).difference(&entries)
            {
                batch.delete(stale);
                ops += 1;
            }
        }

        batch.set(&primary, record.to_bytes()?);
        for key in &entries {
            batch.set(key, record.id.as_bytes());
        }

        Ok(ops + 1 + entries.len())
    }

    /// Normalize and write one place in a single transaction.
    pub fn save(&self, feature: Feature) -> Result<Record> {
        let stored = match Normalizer::requested_id(&feature) {
            Some(id) => self.load(id)?,
            None => None,
        };
        let record = self
            .normalizer
            .normalize(feature, stored.as_ref().map(|s| &s.record))?;

        let mut batch = AtomicBatch::new();
        let ops = self.stage(
            &mut batch,
            &record,
            stored.as_ref().map(|s| &s.record),
            Some(stored.as_ref().map(|s| s.version)),
        )?;

        match self.store.commit(batch)? {
            CommitOutcome::Committed { version } => {
                debug!(id = %record.id, ops, version, "saved place");
                Ok(record)
            }
            CommitOutcome::Conflict => {
                warn!(id = %record.id, "save rejected by store");
                Err(PlaceError::write(0, "transaction rejected by store"))
            }
        }
    }

    /// Write many places in a sequence of bounded transactions.
    ///
    /// A transaction is committed once it holds `batch_place_limit` places or an estimated
    /// `batch_op_limit` key operations, whichever comes first. Returns the number of places
    /// committed. On a rejected commit, earlier transactions stay written and the error
    /// carries their place count.
    pub fn save_all<I>(&self, features: I, cancel: &Cancellation) -> Result<usize>
    where
        I: IntoIterator<Item = Feature>,
    {
        let mut pending = PendingBatch::default();
        let mut committed = 0;
        let mut batches = 0;

        for feature in features {
            let id = Normalizer::requested_id(&feature).map(str::to_owned);

            // A repeated id in this batch replaces the queued record; the primary check
            // was already added by its first occurrence.
            let queued = id.as_deref().and_then(|id| pending.records.get(id).cloned());
            let (previous, check) = match queued {
                Some(record) => (Some(record), None),
                None => {
                    let stored = match id.as_deref() {
                        Some(id) => self.load(id)?,
                        None => None,
                    };
                    let version = stored.as_ref().map(|s| s.version);
                    (stored.map(|s| s.record), Some(version))
                }
            };

            let record = match self.normalizer.normalize(feature, previous.as_ref()) {
                Ok(record) => record,
                Err(e) => {
                    warn!(committed, error = %e, "save_all stopped on invalid feature");
                    return Err(e);
                }
            };

            let ops = self.stage(&mut pending.batch, &record, previous.as_ref(), check)?;
            pending.ops += ops;
            pending.places += 1;
            pending.records.insert(record.id.clone(), record);

            if pending.places >= self.config.batch_place_limit
                || pending.ops >= self.config.batch_op_limit
            {
                committed += self.commit_pending(&mut pending, committed, cancel)?;
                batches += 1;
            }
        }

        if pending.places > 0 {
            committed += self.commit_pending(&mut pending, committed, cancel)?;
            batches += 1;
        }

        info!(places = committed, batches, "saved places");
        Ok(committed)
    }

    fn commit_pending(
        &self,
        pending: &mut PendingBatch,
        committed: usize,
        cancel: &Cancellation,
    ) -> Result<usize> {
        cancel.check(committed)?;

        let PendingBatch {
            batch,
            places,
            ops,
            ..
        } = std::mem::take(pending);

        let outcome = self.store.commit(batch).map_err(|e| {
            warn!(places, committed, error = %e, "place batch failed");
            PlaceError::write(committed, e.to_string())
        })?;

        match outcome {
            CommitOutcome::Committed { version } => {
                debug!(places, ops, version, "committed place batch");
                Ok(places)
            }
            CommitOutcome::Conflict => {
                warn!(places, committed, "place batch rejected by store");
                Err(PlaceError::write(
                    committed,
                    format!("batch of {} places rejected by store", places),
                ))
            }
        }
    }
}

/// The transaction `save_all` is accumulating
#[derive(Default)]
struct PendingBatch {
    batch: AtomicBatch,
    places: usize,
    ops: usize,
    records: FxHashMap<String, Record>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SequentialIds};
    use crate::storage::{BrokenStore, MemoryStore};
    use crate::types::Config;
    use std::sync::Arc;

    fn normalizer() -> Normalizer {
        Normalizer::new(
            Arc::new(FixedClock::new(1_000)),
            Arc::new(SequentialIds::new("p")),
            4,
        )
    }

    fn keys_under(store: &MemoryStore, space: keys::KeySpace) -> Vec<Vec<String>> {
        store
            .scan_prefix(&space.prefix(), None)
            .unwrap()
            .into_iter()
            .filter_map(|(key, _)| keys::decode(&key))
            .collect()
    }

    #[test]
    fn test_save_writes_every_index() {
        let store = MemoryStore::new();
        let normalizer = normalizer();
        let config = Config::default();
        let writer = IndexWriter::new(&store, &normalizer, &config);

        let record = writer
            .save(
                Feature::point(41.40, 2.17, "Sagrada Família")
                    .with_category("culture")
                    .with_tags(["gaudi", "church"]),
            )
            .unwrap();

        assert_eq!(keys_under(&store, keys::KeySpace::Primary).len(), 1);
        assert_eq!(
            keys_under(&store, keys::KeySpace::Spatial),
            vec![vec!["geo", "4", "sp3e", record.id.as_str()]]
        );
        assert_eq!(
            keys_under(&store, keys::KeySpace::Category),
            vec![vec!["category", "culture", "sp3e", record.id.as_str()]]
        );
        assert_eq!(keys_under(&store, keys::KeySpace::Search).len(), 5);
        assert_eq!(store.stats().unwrap().commits, 1);
    }

    #[test]
    fn test_resave_drops_stale_entries() {
        let store = MemoryStore::new();
        let normalizer = normalizer();
        let config = Config::default();
        let writer = IndexWriter::new(&store, &normalizer, &config);

        writer
            .save(
                Feature::point(41.40, 2.17, "Old Market")
                    .with_id("m")
                    .with_category("shopping"),
            )
            .unwrap();
        let moved = writer
            .save(Feature::point(40.71, -74.00, "New Market").with_id("m"))
            .unwrap();

        assert_eq!(moved.created_at(), 1_000);
        assert_eq!(
            keys_under(&store, keys::KeySpace::Spatial),
            vec![vec!["geo", "4", moved.geohash.as_str(), "m"]]
        );
        assert!(keys_under(&store, keys::KeySpace::Category).is_empty());

        let tokens: Vec<String> = keys_under(&store, keys::KeySpace::Search)
            .into_iter()
            .map(|segments| segments[1].clone())
            .collect();
        assert_eq!(tokens, vec!["market", "new"]);
    }

    #[test]
    fn test_save_conflict_is_write_error() {
        let store = MemoryStore::new();
        let normalizer = normalizer();
        let config = Config::default();
        let writer = IndexWriter::new(&store, &normalizer, &config);

        store.fail_commits_after(0);
        let err = writer.save(Feature::point(1.0, 1.0, "Nowhere")).unwrap_err();
        assert!(matches!(err, PlaceError::Write { committed: 0, .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_save_all_respects_op_limit() {
        let store = MemoryStore::new();
        let normalizer = normalizer();
        // Each place below costs 1 primary + 1 spatial + 3 tokens = 5 ops
        let config = Config::default().with_batch_limits(100, 10);
        let writer = IndexWriter::new(&store, &normalizer, &config);

        let features = (0..6).map(|i| Feature::point(10.0, 10.0 + i as f64, format!("alpha beta place{}", i)));
        let saved = writer.save_all(features, &Cancellation::none()).unwrap();

        assert_eq!(saved, 6);
        assert_eq!(store.stats().unwrap().commits, 3);
    }

    #[test]
    fn test_save_all_repeated_id_keeps_last() {
        let store = MemoryStore::new();
        let normalizer = normalizer();
        let config = Config::default();
        let writer = IndexWriter::new(&store, &normalizer, &config);

        let features = vec![
            Feature::point(41.40, 2.17, "First Name").with_id("dup"),
            Feature::point(40.71, -74.00, "Second Name").with_id("dup"),
        ];
        assert_eq!(writer.save_all(features, &Cancellation::none()).unwrap(), 2);

        assert_eq!(keys_under(&store, keys::KeySpace::Primary).len(), 1);
        assert_eq!(keys_under(&store, keys::KeySpace::Spatial).len(), 1);
        let tokens: Vec<String> = keys_under(&store, keys::KeySpace::Search)
            .into_iter()
            .map(|segments| segments[1].clone())
            .collect();
        assert_eq!(tokens, vec!["name", "second"]);
    }

    #[test]
    fn test_save_all_cancelled_before_commit() {
        let store = MemoryStore::new();
        let normalizer = normalizer();
        let config = Config::default().with_batch_limits(2, 500);
        let writer = IndexWriter::new(&store, &normalizer, &config);

        let cancel = Cancellation::none();
        cancel.cancel();
        let features = (0..4).map(|i| Feature::point(0.0, i as f64, format!("place {}", i)));
        let err = writer.save_all(features, &cancel).unwrap_err();

        assert!(matches!(err, PlaceError::Cancelled { committed: 0 }));
        assert_eq!(store.stats().unwrap().key_count, 0);
    }

    #[test]
    fn test_save_all_store_error_keeps_count() {
        let store = BrokenStore::after(2);
        let normalizer = normalizer();
        let config = Config::default().with_batch_limits(3, 500);
        let writer = IndexWriter::new(&store, &normalizer, &config);

        let features = (0..8).map(|i| Feature::point(5.0, i as f64, format!("kiosk {}", i)));
        let err = writer.save_all(features, &Cancellation::none()).unwrap_err();

        assert!(matches!(err, PlaceError::Write { committed: 6, .. }));
        assert_eq!(keys_under(&store.inner, keys::KeySpace::Primary).len(), 6);
    }
}
