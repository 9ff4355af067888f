use bytes::Bytes;

/// Atomic batch for grouping multiple operations together.
///
/// A batch carries optimistic preconditions (`check`) and the writes to apply. A store
/// commits it all-or-nothing: if any check fails, nothing is written and the commit
/// reports [`CommitOutcome::Conflict`].
///
/// # Examples
///
/// ```rust
/// use placestore::{AtomicBatch, KvStore, MemoryStore};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let store = MemoryStore::new();
///
/// let mut batch = AtomicBatch::new();
/// batch
///     .check("user:123", None) // must not exist yet
///     .set("user:123", "John Doe")
///     .set("email:john@example.com", "user:123");
/// assert!(store.commit(batch)?.is_committed());
///
/// // The same precondition now fails and nothing is written
/// let mut batch = AtomicBatch::new();
/// batch.check("user:123", None).set("user:123", "Jane Doe");
/// assert!(!store.commit(batch)?.is_committed());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct AtomicBatch {
    checks: Vec<VersionCheck>,
    operations: Vec<BatchOperation>,
}

/// Precondition on the current version of a key. `None` means the key must be absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionCheck {
    pub key: Bytes,
    pub version: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOperation {
    Set { key: Bytes, value: Bytes },
    Delete { key: Bytes },
}

impl BatchOperation {
    pub fn key(&self) -> &Bytes {
        match self {
            BatchOperation::Set { key, .. } | BatchOperation::Delete { key } => key,
        }
    }
}

/// Result of committing a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Applied; every key written carries this version
    Committed { version: u64 },
    /// A check failed or the store refused the transaction; nothing was applied
    Conflict,
}

impl CommitOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, CommitOutcome::Committed { .. })
    }
}

impl AtomicBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `key` to be at `version` (or absent, for `None`) when the batch commits.
    pub fn check(&mut self, key: impl AsRef<[u8]>, version: Option<u64>) -> &mut Self {
        self.checks.push(VersionCheck {
            key: Bytes::copy_from_slice(key.as_ref()),
            version,
        });
        self
    }

    /// Queue a write. Operations apply in the order they were added.
    pub fn set(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> &mut Self {
        self.operations.push(BatchOperation::Set {
            key: Bytes::copy_from_slice(key.as_ref()),
            value: Bytes::copy_from_slice(value.as_ref()),
        });
        self
    }

    /// Queue a delete. Deleting a missing key is not an error.
    pub fn delete(&mut self, key: impl AsRef<[u8]>) -> &mut Self {
        self.operations.push(BatchOperation::Delete {
            key: Bytes::copy_from_slice(key.as_ref()),
        });
        self
    }

    /// Number of queued writes and deletes
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty() && self.checks.is_empty()
    }

    pub fn checks(&self) -> &[VersionCheck] {
        &self.checks
    }

    pub fn operations(&self) -> &[BatchOperation] {
        &self.operations
    }
}
