//! Request counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use super::quota::QuotaSnapshot;

/// Which slot a provider occupies in the fallback order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderRole {
    Primary,
    Fallback,
}

impl ProviderRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderRole::Primary => "primary",
            ProviderRole::Fallback => "fallback",
        }
    }
}

/// Process-wide counters. Observational only.
#[derive(Debug, Default)]
pub struct GenerationStats {
    total_requests: AtomicU64,
    cache_hits: AtomicU64,
    coalesced: AtomicU64,
    primary_success: AtomicU64,
    primary_failures: AtomicU64,
    fallback_success: AtomicU64,
    fallback_failures: AtomicU64,
    quota_skips: AtomicU64,
    cache_write_failures: AtomicU64,
}

impl GenerationStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_quota_skip(&self) {
        self.quota_skips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_write_failure(&self) {
        self.cache_write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_provider(&self, role: ProviderRole, success: bool) {
        let counter = match (role, success) {
            (ProviderRole::Primary, true) => &self.primary_success,
            (ProviderRole::Primary, false) => &self.primary_failures,
            (ProviderRole::Fallback, true) => &self.fallback_success,
            (ProviderRole::Fallback, false) => &self.fallback_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn counters(&self) -> GenerationCounters {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        GenerationCounters {
            total_requests: load(&self.total_requests),
            cache_hits: load(&self.cache_hits),
            coalesced: load(&self.coalesced),
            primary_success: load(&self.primary_success),
            primary_failures: load(&self.primary_failures),
            fallback_success: load(&self.fallback_success),
            fallback_failures: load(&self.fallback_failures),
            quota_skips: load(&self.quota_skips),
            cache_write_failures: load(&self.cache_write_failures),
        }
    }
}

/// Plain copy of [`GenerationStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GenerationCounters {
    pub total_requests: u64,
    pub cache_hits: u64,
    pub coalesced: u64,
    pub primary_success: u64,
    pub primary_failures: u64,
    pub fallback_success: u64,
    pub fallback_failures: u64,
    pub quota_skips: u64,
    pub cache_write_failures: u64,
}

/// Cache state as reported by `get_stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheSummary {
    pub enabled: bool,
    pub entries: usize,
    pub total_bytes: u64,
    pub size_mb: f64,
}

/// Everything `get_stats` reports.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    #[serde(flatten)]
    pub counters: GenerationCounters,
    pub quota: QuotaSnapshot,
    pub cache: CacheSummary,
}

impl StatsSnapshot {
    /// Share of requests served from the cache, 0.0 when idle.
    pub fn hit_rate(&self) -> f64 {
        if self.counters.total_requests == 0 {
            0.0
        } else {
            self.counters.cache_hits as f64 / self.counters.total_requests as f64
        }
    }
}
