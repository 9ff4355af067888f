//! Bulk erase of every key space, in bounded transactions

use crate::batch::{AtomicBatch, CommitOutcome};
use crate::error::{PlaceError, Result};
use crate::keys::KeySpace;
use crate::storage::KvStore;
use crate::types::{Cancellation, Config};
use tracing::{debug, info, warn};

pub struct Eraser<'a> {
    store: &'a dyn KvStore,
    config: &'a Config,
}

impl<'a> Eraser<'a> {
    pub fn new(store: &'a dyn KvStore, config: &'a Config) -> Self {
        Self { store, config }
    }

    /// Delete every key in every key space, `erase_batch_limit` keys per transaction.
    ///
    /// Returns the number of keys deleted. Not atomic as a whole: readers may observe a
    /// partially erased store, and on failure the error carries the keys already deleted.
    /// Erasing an empty store is a no-op.
    pub fn remove_all(&self, cancel: &Cancellation) -> Result<usize> {
        let mut deleted = 0;
        let mut batches = 0;

        for space in KeySpace::ALL {
            let prefix = space.prefix();
            loop {
                let entries = self
                    .store
                    .scan_prefix(&prefix, Some(self.config.erase_batch_limit))?;
                if entries.is_empty() {
                    break;
                }
                cancel.check(deleted)?;

                let mut batch = AtomicBatch::new();
                for (key, _) in &entries {
                    batch.delete(key);
                }

                let outcome = self.store.commit(batch).map_err(|e| {
                    warn!(space = %space, deleted, error = %e, "erase batch failed");
                    PlaceError::write(deleted, e.to_string())
                })?;

                match outcome {
                    CommitOutcome::Committed { version } => {
                        deleted += entries.len();
                        batches += 1;
                        debug!(space = %space, keys = entries.len(), version, "erased batch");
                    }
                    CommitOutcome::Conflict => {
                        warn!(space = %space, deleted, "erase batch rejected by store");
                        return Err(PlaceError::write(
                            deleted,
                            format!("erase batch in {} key space rejected by store", space),
                        ));
                    }
                }
            }
        }

        info!(keys = deleted, batches, "erased all places");
        Ok(deleted)
    }
}
