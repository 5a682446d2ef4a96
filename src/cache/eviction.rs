//! Eviction planning.
//!
//! Planning is pure: given an index snapshot and the current time it
//! decides which keys go. [`ImageCache::evict`](super::ImageCache::evict)
//! applies the plan to disk.
//!
//! Two passes, always in this order:
//! 1. TTL: every entry strictly older than the TTL.
//! 2. Size: if the survivors exceed the size limit, drop the oldest ones
//!    until the total is at or below [`TARGET_PERCENT`] of the limit.

use chrono::{NaiveDateTime, TimeDelta};
use serde::Serialize;

use super::index::CacheIndex;
use super::key::CacheKey;
use crate::ImageConfig;

/// After a size pass the cache is shrunk to this share of its limit.
pub const TARGET_PERCENT: u64 = 80;

/// Eviction thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionPolicy {
    pub ttl: TimeDelta,
    pub max_bytes: u64,
}

impl EvictionPolicy {
    pub fn new(ttl: TimeDelta, max_bytes: u64) -> Self {
        Self { ttl, max_bytes }
    }

    pub fn from_config(config: &ImageConfig) -> Self {
        Self::new(config.cache_ttl(), config.max_cache_bytes())
    }

    /// Size the cache is shrunk to once it overflows.
    pub fn target_bytes(&self) -> u64 {
        (u128::from(self.max_bytes) * u128::from(TARGET_PERCENT) / 100) as u64
    }

    /// Decide which entries to remove.
    pub fn plan(&self, index: &CacheIndex, now: NaiveDateTime) -> EvictionPlan {
        let mut plan = EvictionPlan::default();
        let mut survivors = Vec::with_capacity(index.len());

        for (key, entry) in index.iter() {
            if entry.is_expired(now, self.ttl) {
                plan.expired.push(key.clone());
            } else {
                survivors.push((entry.created_at, entry.size_bytes, key));
            }
        }

        let mut total: u64 = survivors.iter().map(|(_, size, _)| size).sum();
        if total <= self.max_bytes {
            return plan;
        }

        // oldest first; key breaks ties so the plan is deterministic
        survivors.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.2.cmp(b.2)));
        let target = self.target_bytes();
        for (_, size, key) in survivors {
            if total <= target {
                break;
            }
            total -= size;
            plan.oversize.push(key.clone());
        }
        plan
    }
}

/// Keys selected for removal, grouped by the pass that selected them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionPlan {
    pub expired: Vec<CacheKey>,
    pub oversize: Vec<CacheKey>,
}

impl EvictionPlan {
    pub fn is_empty(&self) -> bool {
        self.expired.is_empty() && self.oversize.is_empty()
    }
}

/// What an eviction run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EvictionReport {
    /// Entries removed by the TTL pass.
    pub expired_removed: usize,
    /// Entries removed by the size pass.
    pub size_evicted: usize,
    /// Index entries dropped because their blob was gone.
    pub healed: usize,
    /// Blob or temp files on disk that no index entry referenced.
    pub orphans_swept: usize,
    pub freed_bytes: u64,
    pub remaining_entries: usize,
    pub remaining_bytes: u64,
    /// File removals that failed (the index entry is still dropped).
    pub errors: usize,
}

impl EvictionReport {
    pub fn removed(&self) -> usize {
        self.expired_removed + self.size_evicted + self.healed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheEntry;
    use chrono::NaiveDate;

    const MB: u64 = 1024 * 1024;

    fn day(d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn index_of(entries: &[(&str, u32, u64)]) -> (CacheIndex, Vec<CacheKey>) {
        let mut index = CacheIndex::new();
        let mut keys = Vec::new();
        for (name, created, size) in entries {
            let key = CacheKey::derive(name, None);
            index.insert(key.clone(), CacheEntry::new(name, None, *size, day(*created)));
            keys.push(key);
        }
        (index, keys)
    }

    #[test]
    fn target_is_eighty_percent() {
        let policy = EvictionPolicy::new(TimeDelta::days(30), 100);
        assert_eq!(policy.target_bytes(), 80);
        let policy = EvictionPolicy::new(TimeDelta::days(30), u64::MAX);
        assert!(policy.target_bytes() < u64::MAX);
    }

    #[test]
    fn ttl_pass_selects_only_strictly_older_entries() {
        let (index, keys) = index_of(&[("old", 1, 10), ("edge", 11, 10), ("new", 20, 10)]);
        let policy = EvictionPolicy::new(TimeDelta::days(10), 10 * MB);

        let plan = policy.plan(&index, day(21));
        assert_eq!(plan.expired, vec![keys[0].clone()]);
        assert!(plan.oversize.is_empty());
    }

    #[test]
    fn size_pass_removes_oldest_until_under_target() {
        // 5 x 3 MB = 15 MB against a 10 MB limit; target 8 MB
        let (index, keys) = index_of(&[
            ("e", 5, 3 * MB),
            ("a", 1, 3 * MB),
            ("c", 3, 3 * MB),
            ("b", 2, 3 * MB),
            ("d", 4, 3 * MB),
        ]);
        let policy = EvictionPolicy::new(TimeDelta::days(365), 10 * MB);

        let plan = policy.plan(&index, day(6));
        assert!(plan.expired.is_empty());
        // 15 -> 12 -> 9 -> 6: three oldest go
        assert_eq!(
            plan.oversize,
            vec![keys[1].clone(), keys[3].clone(), keys[2].clone()]
        );
    }

    #[test]
    fn size_pass_ignores_cache_within_limit() {
        let (index, _) = index_of(&[("a", 1, 5 * MB), ("b", 2, 5 * MB)]);
        let policy = EvictionPolicy::new(TimeDelta::days(365), 10 * MB);
        assert!(policy.plan(&index, day(3)).is_empty());
    }

    #[test]
    fn size_pass_only_counts_ttl_survivors() {
        // the expired 8 MB entry brings the rest under the limit
        let (index, keys) = index_of(&[("stale", 1, 8 * MB), ("a", 20, 3 * MB), ("b", 21, 3 * MB)]);
        let policy = EvictionPolicy::new(TimeDelta::days(7), 10 * MB);

        let plan = policy.plan(&index, day(22));
        assert_eq!(plan.expired, vec![keys[0].clone()]);
        assert!(plan.oversize.is_empty());
    }
}
