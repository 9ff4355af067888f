//! Bounding-box and category queries over the geohash indexes

use crate::error::{PlaceError, Result};
use crate::keys;
use crate::record::Record;
use crate::spatial::{self, BoundingBox};
use crate::storage::KvStore;
use crate::types::{Config, Coverage};
use bytes::Bytes;
use rustc_hash::FxHashSet;
use tracing::{debug, warn};

/// Places found by a bounding-box query.
///
/// When the box needed more covering cells than the configured ceiling, `coverage` is
/// [`Coverage::Partial`] and `places` is a best-effort subset.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub places: Vec<Record>,
    pub coverage: Coverage,
}

impl QueryResult {
    pub fn is_complete(&self) -> bool {
        self.coverage.is_complete()
    }

    pub fn len(&self) -> usize {
        self.places.len()
    }

    pub fn is_empty(&self) -> bool {
        self.places.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.places.iter().map(|p| p.id.as_str())
    }
}

impl IntoIterator for QueryResult {
    type Item = Record;
    type IntoIter = std::vec::IntoIter<Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.places.into_iter()
    }
}

/// Fetch primary records for `ids`, dropping ids whose record is gone.
pub(crate) fn fetch_records(store: &dyn KvStore, ids: &[String]) -> Result<Vec<Record>> {
    let primary: Vec<Bytes> = ids.iter().map(|id| keys::primary_key(id)).collect();
    let mut records = Vec::with_capacity(ids.len());

    for (id, item) in ids.iter().zip(store.get_many(&primary)?) {
        match item {
            Some(item) => records.push(Record::from_bytes(&item.value)?),
            None => warn!(id = %id, "index entry points at a missing place"),
        }
    }
    Ok(records)
}

/// Id stored as the value of a secondary index entry
pub(crate) fn entry_id(key: &[u8], value: &[u8]) -> Option<String> {
    match std::str::from_utf8(value) {
        Ok(id) => Some(id.to_owned()),
        Err(_) => {
            warn!(key = ?key, "skipping index entry with a non-UTF-8 id");
            None
        }
    }
}

/// Answers "everything in this box", optionally restricted to one category
pub struct QueryEngine<'a> {
    store: &'a dyn KvStore,
    config: &'a Config,
}

impl<'a> QueryEngine<'a> {
    pub fn new(store: &'a dyn KvStore, config: &'a Config) -> Self {
        Self { store, config }
    }

    /// Places whose indexed cell intersects `bbox`, at most `limit` of them, in no
    /// particular order.
    pub fn find_in_bounds(&self, bbox: &BoundingBox, limit: usize) -> Result<QueryResult> {
        let precision = self.config.index_precision;
        self.run(bbox, limit, |cell| keys::spatial_prefix(precision, cell))
    }

    /// Same as [`find_in_bounds`](Self::find_in_bounds), scanning the category index.
    /// Categories match exactly after trimming surrounding whitespace.
    pub fn find_by_category(
        &self,
        category: &str,
        bbox: &BoundingBox,
        limit: usize,
    ) -> Result<QueryResult> {
        let category = category.trim();
        if category.is_empty() {
            return Err(PlaceError::validation("category must not be empty"));
        }
        self.run(bbox, limit, |cell| keys::category_prefix(category, cell))
    }

    fn run<F>(&self, bbox: &BoundingBox, limit: usize, prefix: F) -> Result<QueryResult>
    where
        F: Fn(&str) -> Bytes,
    {
        bbox.validate()?;

        let covering = spatial::covering_cells(
            bbox,
            self.config.index_precision,
            self.config.max_covering_cells,
        )?;
        let coverage = if covering.is_truncated() {
            warn!(
                consulted = covering.cells.len(),
                total = covering.total,
                "bounding box needs more cells than the ceiling; results are partial"
            );
            Coverage::Partial {
                consulted: covering.cells.len(),
                total: covering.total,
            }
        } else {
            Coverage::Complete
        };

        let mut seen = FxHashSet::default();
        let mut places = Vec::new();

        for cell in &covering.cells {
            let prefix = prefix(cell);
            // Entries whose record is gone do not count toward the limit; rescan the
            // cell further until it is exhausted or enough live places are found.
            let mut scanned: usize = 0;
            while places.len() < limit {
                let want = scanned.saturating_add(limit - places.len());
                let entries = self.store.scan_prefix(&prefix, Some(want))?;
                let exhausted = entries.len() < want;

                let fresh: Vec<String> = entries
                    .into_iter()
                    .skip(scanned)
                    .filter_map(|(key, item)| entry_id(&key, &item.value))
                    .filter(|id| seen.insert(id.clone()))
                    .collect();
                scanned = want;
                places.extend(fetch_records(self.store, &fresh)?);

                if exhausted {
                    break;
                }
            }
            if places.len() >= limit {
                break;
            }
        }

        debug!(
            cells = covering.cells.len(),
            candidates = seen.len(),
            places = places.len(),
            "bounding box query"
        );

        Ok(QueryResult { places, coverage })
    }
}
