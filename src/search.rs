//! Text search over the inverted token index
//!
//! Only the first query token drives the index scan. Further tokens filter the fetched
//! candidates, so a place lacking the first token is never found even when it matches the
//! rest of the query.

use crate::error::Result;
use crate::keys;
use crate::query::{entry_id, fetch_records};
use crate::record::Record;
use crate::storage::KvStore;
use crate::text;
use crate::types::Config;
use rustc_hash::FxHashSet;
use tracing::debug;

pub struct SearchEngine<'a> {
    store: &'a dyn KvStore,
    config: &'a Config,
}

impl<'a> SearchEngine<'a> {
    pub fn new(store: &'a dyn KvStore, config: &'a Config) -> Self {
        Self { store, config }
    }

    /// Places matching every token of `query`, at most `limit` of them.
    ///
    /// Never fails on bad input: a query with no token of three or more characters
    /// returns nothing.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<Record>> {
        let tokens = text::tokenize(query);
        let Some(first) = tokens.first() else {
            return Ok(Vec::new());
        };
        if limit == 0 {
            return Ok(Vec::new());
        }

        let scan_limit = self.config.search_scan_limit(limit);
        let mut seen = FxHashSet::default();
        let ids: Vec<String> = self
            .store
            .scan_prefix(&keys::search_prefix(first), Some(scan_limit))?
            .into_iter()
            .filter_map(|(key, item)| entry_id(&key, &item.value))
            .filter(|id| seen.insert(id.clone()))
            .collect();

        let candidates = ids.len();
        let mut places = fetch_records(self.store, &ids)?;

        if tokens.len() > 1 {
            places.retain(|place| {
                let indexed = place.tokens();
                tokens.iter().all(|token| indexed.contains(token))
            });
        }
        places.truncate(limit);

        debug!(token = %first, candidates, places = places.len(), "text search");
        Ok(places)
    }
}
