use crate::error::{PlaceError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Synchronization policy for persistence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPolicy {
    /// Never sync to disk (fastest, least safe)
    Never,
    /// Sync every second (recommended balance)
    #[default]
    EverySecond,
    /// Sync after every commit (slowest, safest)
    Always,
}

/// Repository configuration.
///
/// All thresholds are tunable; the defaults keep every transaction well under the
/// key-count limits of typical ordered key-value stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Geohash length used for the spatial and category indexes
    pub index_precision: usize,

    /// Places accumulated in one `save_all` transaction before it is committed
    pub batch_place_limit: usize,

    /// Estimated key writes in one `save_all` transaction before it is committed
    pub batch_op_limit: usize,

    /// Ceiling on covering cells consulted by a bounding-box query
    pub max_covering_cells: usize,

    /// Minimum number of index entries scanned by a text search
    pub search_overfetch: usize,

    /// Deletes per transaction during bulk erase
    pub erase_batch_limit: usize,

    /// How often the append-only log is synced to disk
    pub sync_policy: SyncPolicy,

    /// Compact the append-only log once it grows past this many bytes
    pub rewrite_size_threshold: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            index_precision: 4,
            batch_place_limit: 25,
            batch_op_limit: 500,
            max_covering_cells: 500,
            search_overfetch: 50,
            erase_batch_limit: 100,
            sync_policy: SyncPolicy::default(),
            rewrite_size_threshold: 64 * 1024 * 1024, // 64MB
        }
    }
}

impl Config {
    pub fn with_batch_limits(mut self, places: usize, ops: usize) -> Self {
        self.batch_place_limit = places;
        self.batch_op_limit = ops;
        self
    }

    pub fn with_max_covering_cells(mut self, cells: usize) -> Self {
        self.max_covering_cells = cells;
        self
    }

    pub fn with_erase_batch_limit(mut self, limit: usize) -> Self {
        self.erase_batch_limit = limit;
        self
    }

    pub fn with_sync_policy(mut self, policy: SyncPolicy) -> Self {
        self.sync_policy = policy;
        self
    }

    pub fn with_rewrite_size_threshold(mut self, bytes: u64) -> Self {
        self.rewrite_size_threshold = bytes;
        self
    }

    /// Over-fetch used by text search for a caller limit
    pub fn search_scan_limit(&self, limit: usize) -> usize {
        limit.saturating_mul(4).max(self.search_overfetch)
    }

    /// Check that every limit is usable
    pub fn validate(&self) -> Result<()> {
        if !(1..=12).contains(&self.index_precision) {
            return Err(PlaceError::Config(format!(
                "index_precision must be within 1..=12, got {}",
                self.index_precision
            )));
        }

        let limits = [
            ("batch_place_limit", self.batch_place_limit),
            ("batch_op_limit", self.batch_op_limit),
            ("max_covering_cells", self.max_covering_cells),
            ("erase_batch_limit", self.erase_batch_limit),
        ];
        for (name, value) in limits {
            if value == 0 {
                return Err(PlaceError::Config(format!("{name} must be greater than zero")));
            }
        }
        Ok(())
    }

    /// Parse a configuration from TOML; missing keys keep their defaults
    #[cfg(feature = "toml")]
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(input).map_err(|e| PlaceError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

/// Whether a bounding-box query consulted every covering cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coverage {
    /// All covering cells were scanned
    Complete,
    /// The covering set exceeded the ceiling; only `consulted` of `total` cells were scanned
    Partial { consulted: usize, total: u64 },
}

impl Coverage {
    pub fn is_complete(&self) -> bool {
        matches!(self, Coverage::Complete)
    }
}

/// Aggregate counts over the stored places
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceStats {
    pub total_places: usize,
    pub by_category: BTreeMap<String, usize>,
}

/// Statistics about a key-value store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of live keys
    pub key_count: usize,
    /// Transactions applied
    pub commits: u64,
    /// Transactions rejected by a failed check or injected fault
    pub conflicts: u64,
    /// Size of the append-only log in bytes, zero for memory stores
    pub log_size: u64,
}

/// Cooperative cancellation for multi-transaction operations.
///
/// Checked between commits only; a transaction that has started committing always finishes.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Cancellation {
    /// A token that never trips
    pub fn none() -> Self {
        Self::default()
    }

    /// A token that trips once `timeout` has elapsed from now
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            flag: Arc::default(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub(crate) fn check(&self, committed: usize) -> Result<()> {
        if self.is_cancelled() {
            return Err(PlaceError::Cancelled { committed });
        }
        Ok(())
    }
}
