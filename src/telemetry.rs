//! Telemetry metric name constants.
//!
//! Centralised metric names for plating operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `plating_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `provider` — provider name (e.g. "gemini", "replicate")
//! - `status` — outcome: "ok" or "error"
//! - `pass` — eviction pass: "ttl", "size", "healed" or "orphan"

/// Total calls to `generate_dish_image`.
pub const REQUESTS_TOTAL: &str = "plating_requests_total";

/// Requests answered from the on-disk cache.
pub const CACHE_HITS_TOTAL: &str = "plating_cache_hits_total";

/// Requests that found no usable cache entry (or ran with the cache off).
pub const CACHE_MISSES_TOTAL: &str = "plating_cache_misses_total";

/// Failed attempts to store a generated image.
pub const CACHE_WRITE_FAILURES_TOTAL: &str = "plating_cache_write_failures_total";

/// Requests that waited on another request's in-flight generation.
pub const COALESCED_TOTAL: &str = "plating_coalesced_total";

/// Provider invocations.
///
/// Labels: `provider`, `status` ("ok" | "error").
pub const PROVIDER_CALLS_TOTAL: &str = "plating_provider_calls_total";

/// Provider call duration in seconds, including normalization.
///
/// Labels: `provider`.
pub const PROVIDER_DURATION_SECONDS: &str = "plating_provider_duration_seconds";

/// Primary-provider attempts skipped because the daily quota was used up.
pub const QUOTA_SKIPS_TOTAL: &str = "plating_quota_skips_total";

/// Cache entries removed by eviction.
///
/// Labels: `pass`.
pub const EVICTED_TOTAL: &str = "plating_evicted_total";
