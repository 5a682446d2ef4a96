//! On-disk image cache.
//!
//! - [`CacheKey`] — content digest of the dish name and recipe prefix.
//! - [`CacheIndex`] — the persisted `index.json` document.
//! - [`ImageCache`] — blob storage plus the index, with lookup, put and
//!   eviction under one lock.
//! - [`EvictionPolicy`] — TTL and size-bound eviction planning.
//!
//! The directory layout is shared with earlier releases of the bot, so
//! existing cache directories keep working.

pub mod eviction;
pub mod index;
pub mod key;
pub mod store;

pub use eviction::{EvictionPlan, EvictionPolicy, EvictionReport};
pub use index::{CacheEntry, CacheIndex};
pub use key::{CacheKey, RECIPE_KEY_CHARS, recipe_digest};
pub use store::{CacheStats, ImageCache};
