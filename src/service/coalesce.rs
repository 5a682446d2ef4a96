//! In-flight de-duplication of cache misses.
//!
//! Concurrent misses for the same key share one generation: the first
//! caller runs it, the others await its outcome (success or `None`). The
//! entry is dropped as soon as the run finishes, so later misses start a
//! fresh run. Built on moka's entry API, which already serializes
//! initialization per key.

use std::future::Future;
use std::sync::Arc;

use moka::future::Cache;

use crate::cache::CacheKey;

/// Upper bound on distinct keys being generated at once.
const MAX_IN_FLIGHT: u64 = 10_000;

pub(crate) struct InFlight {
    runs: Cache<CacheKey, Arc<Option<Vec<u8>>>>,
}

impl InFlight {
    pub(crate) fn new() -> Self {
        Self {
            runs: Cache::new(MAX_IN_FLIGHT),
        }
    }

    /// Run `generate` unless a run for `key` is already in flight, in which
    /// case wait for that one. Returns the outcome and whether this call
    /// was the one that ran it.
    pub(crate) async fn run<F>(&self, key: &CacheKey, generate: F) -> (Option<Vec<u8>>, bool)
    where
        F: Future<Output = Option<Vec<u8>>>,
    {
        let entry = self
            .runs
            .entry_by_ref(key)
            .or_insert_with(async { Arc::new(generate.await) })
            .await;
        let ran_here = entry.is_fresh();
        if ran_here {
            self.runs.invalidate(key).await;
        }
        (Option::clone(entry.value()), ran_here)
    }
}
