//! Evaluation memo keyed by graph signature.
//!
//! A search call owns exactly one [`EvalCache`]; the evaluator runs at most
//! once per distinct signature within that call. Entries are never invalidated
//! because evaluators are required to be pure in `(graph, params)` and the
//! parameters are fixed for the duration of a call.
//!
//! # References
//! - *Memoization*: Michie, "Memo functions and machine learning" (1968)

use crate::fingerprint::HashValue;
use crate::search::Metrics;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Hit/miss counters of an [`EvalCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Distinct signatures stored.
    pub entries: usize,
    /// Lookups answered from the memo.
    pub hits: u64,
    /// Lookups that ran the evaluator.
    pub misses: u64,
}

/// Memo table from graph signature to [`Metrics`].
#[derive(Debug, Default)]
pub struct EvalCache {
    entries: HashMap<HashValue, Metrics>,
    hits: u64,
    misses: u64,
}

impl EvalCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached metrics for `sig`, computing and storing them with
    /// `eval` on a miss.
    pub fn get_or_insert_with<F>(&mut self, sig: HashValue, eval: F) -> Metrics
    where
        F: FnOnce() -> Metrics,
    {
        if let Some(hit) = self.entries.get(&sig) {
            self.hits += 1;
            return hit.clone();
        }
        self.misses += 1;
        let metrics = eval();
        self.entries.insert(sig, metrics.clone());
        metrics
    }

    /// Looks up without counting.
    pub fn peek(&self, sig: &HashValue) -> Option<&Metrics> {
        self.entries.get(sig)
    }

    /// Number of stored signatures.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits,
            misses: self.misses,
        }
    }

    /// Drops every entry and resets the counters.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.hits = 0;
        self.misses = 0;
    }
}
