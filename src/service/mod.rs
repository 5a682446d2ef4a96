//! The generation orchestrator.
//!
//! [`ImageService`] is the one entry point the chat handlers use. Per
//! request it:
//!
//! 1. resets the primary quota if the calendar day changed,
//! 2. returns the cached image when there is a fresh one,
//! 3. otherwise tries the providers in configured order (one attempt
//!    each), caches the first success and returns it.
//!
//! Nothing escapes `generate_dish_image` as an error: provider failures,
//! timeouts and cache I/O problems are logged and end in `None` or a
//! skipped cache write.

mod builder;
mod coalesce;
mod janitor;
pub mod quota;
pub mod stats;

pub use builder::ImageServiceBuilder;
pub use quota::{QuotaCounter, QuotaSnapshot};
pub use stats::{CacheSummary, GenerationCounters, GenerationStats, ProviderRole, StatsSnapshot};

use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::NaiveDateTime;
use metrics::{counter, histogram};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use self::coalesce::InFlight;
use self::janitor::Janitor;
use crate::cache::{CacheKey, EvictionPolicy, EvictionReport, ImageCache};
use crate::clock::Clock;
use crate::providers::ImageProvider;
use crate::{DishRequest, ImageConfig, ProviderPriority, telemetry};

/// Why a cleanup request did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Scheduled cleanup is switched off (`IMAGE_CACHE_CLEANUP_ENABLED`).
    Disabled,
    /// The last cleanup ran less than one interval ago.
    IntervalNotReached,
    /// There is no cache to clean (`ENABLE_IMAGE_CACHE=false`).
    CacheDisabled,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Disabled => "cleanup disabled",
            SkipReason::IntervalNotReached => "cleanup interval not reached",
            SkipReason::CacheDisabled => "cache disabled",
        }
    }
}

/// Result of [`ImageService::cleanup`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupOutcome {
    Skipped(SkipReason),
    Completed(EvictionReport),
}

/// Reachability of the configured backends. `None` means not configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProviderHealth {
    pub primary: Option<bool>,
    pub fallback: Option<bool>,
    pub cache_writable: Option<bool>,
}

/// Cached, quota-aware dish image generation with provider fallback.
pub struct ImageService {
    config: ImageConfig,
    primary: Option<Arc<dyn ImageProvider>>,
    fallback: Option<Arc<dyn ImageProvider>>,
    cache: Option<ImageCache>,
    eviction: EvictionPolicy,
    quota: QuotaCounter,
    stats: GenerationStats,
    in_flight: Option<InFlight>,
    clock: Arc<dyn Clock>,
    last_cleanup: Mutex<NaiveDateTime>,
    janitor: Mutex<Option<Janitor>>,
}

impl ImageService {
    pub fn builder(config: ImageConfig) -> ImageServiceBuilder {
        ImageServiceBuilder::new(config)
    }

    pub fn config(&self) -> &ImageConfig {
        &self.config
    }

    /// Return image bytes for a dish, from the cache or a provider.
    ///
    /// `None` means every allowed provider failed or was skipped; the
    /// caller is expected to tell the user to try again.
    #[instrument(skip_all, fields(dish = %dish_name))]
    pub async fn generate_dish_image(
        &self,
        dish_name: &str,
        recipe_text: Option<&str>,
        visual_desc: Option<&str>,
    ) -> Option<Vec<u8>> {
        self.stats.record_request();
        counter!(telemetry::REQUESTS_TOTAL).increment(1);
        self.quota.roll_over(self.clock.today());

        let request = DishRequest::from_parts(dish_name, recipe_text, visual_desc);

        let Some(cache) = &self.cache else {
            counter!(telemetry::CACHE_MISSES_TOTAL).increment(1);
            return self.run_providers(&request).await;
        };

        let key = CacheKey::for_request(&request);
        if let Some(image) = cache.lookup(&key).await {
            debug!(key = %key, "cache hit");
            self.stats.record_cache_hit();
            counter!(telemetry::CACHE_HITS_TOTAL).increment(1);
            return Some(image);
        }
        counter!(telemetry::CACHE_MISSES_TOTAL).increment(1);

        match &self.in_flight {
            Some(in_flight) => {
                let (image, ran_here) = in_flight
                    .run(&key, self.generate_and_store(cache, &key, &request))
                    .await;
                if !ran_here {
                    debug!(key = %key, "joined in-flight generation");
                    self.stats.record_coalesced();
                    counter!(telemetry::COALESCED_TOTAL).increment(1);
                }
                image
            }
            None => self.generate_and_store(cache, &key, &request).await,
        }
    }

    /// Counters plus quota and cache state.
    pub async fn get_stats(&self) -> StatsSnapshot {
        let cache = match &self.cache {
            Some(cache) => {
                let stats = cache.stats().await;
                CacheSummary {
                    enabled: true,
                    entries: stats.entries,
                    total_bytes: stats.total_bytes,
                    size_mb: stats.total_bytes as f64 / (1024.0 * 1024.0),
                }
            }
            None => CacheSummary::default(),
        };
        StatsSnapshot {
            counters: self.stats.counters(),
            quota: self.quota.snapshot(),
            cache,
        }
    }

    /// Run eviction now.
    ///
    /// Unless `force` is set, this honours `IMAGE_CACHE_CLEANUP_ENABLED` and
    /// runs at most once per cleanup interval.
    pub async fn cleanup(&self, force: bool) -> CleanupOutcome {
        let Some(cache) = &self.cache else {
            return CleanupOutcome::Skipped(SkipReason::CacheDisabled);
        };
        if !force && !self.config.cleanup_enabled {
            return CleanupOutcome::Skipped(SkipReason::Disabled);
        }

        {
            let now = self.clock.now();
            let mut last = self.last_cleanup.lock().unwrap_or_else(|e| e.into_inner());
            let interval = chrono::TimeDelta::from_std(self.config.cleanup_interval())
                .unwrap_or(chrono::TimeDelta::MAX);
            if !force && now - *last < interval {
                return CleanupOutcome::Skipped(SkipReason::IntervalNotReached);
            }
            *last = now;
        }

        CleanupOutcome::Completed(cache.evict(&self.eviction).await)
    }

    /// Probe both providers and the cache directory.
    pub async fn check_providers(&self) -> ProviderHealth {
        let primary = match &self.primary {
            Some(p) => Some(p.health_check().await),
            None => None,
        };
        let fallback = match &self.fallback {
            Some(p) => Some(p.health_check().await),
            None => None,
        };
        let cache_writable = match &self.cache {
            Some(cache) => Some(cache.is_writable().await),
            None => None,
        };
        ProviderHealth {
            primary,
            fallback,
            cache_writable,
        }
    }

    /// Start the periodic cleanup loop (when enabled). Calling it again
    /// while the loop runs does nothing.
    pub fn start(self: &Arc<Self>) {
        if self.cache.is_none() || !self.config.cleanup_enabled {
            debug!("periodic cache cleanup not started");
            return;
        }
        let mut janitor = self.janitor.lock().unwrap_or_else(|e| e.into_inner());
        if janitor.is_none() {
            *janitor = Some(Janitor::spawn(
                Arc::downgrade(self),
                self.config.cleanup_interval(),
            ));
        }
    }

    /// Stop the cleanup loop, wait for it, then run one forced eviction
    /// bounded by the shutdown timeout.
    pub async fn shutdown(&self) -> Option<EvictionReport> {
        let janitor = self
            .janitor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(janitor) = janitor {
            janitor.stop().await;
        }

        let limit = self.config.shutdown_cleanup_timeout();
        match tokio::time::timeout(limit, self.cleanup(true)).await {
            Ok(CleanupOutcome::Completed(report)) => Some(report),
            Ok(CleanupOutcome::Skipped(_)) => None,
            Err(_) => {
                warn!(timeout = ?limit, "final cache cleanup did not finish in time");
                None
            }
        }
    }

    async fn generate_and_store(
        &self,
        cache: &ImageCache,
        key: &CacheKey,
        request: &DishRequest,
    ) -> Option<Vec<u8>> {
        let image = self.run_providers(request).await?;
        if !cache
            .put(key, &request.dish_name, request.recipe_text(), &image)
            .await
        {
            self.stats.record_cache_write_failure();
            counter!(telemetry::CACHE_WRITE_FAILURES_TOTAL).increment(1);
        }
        Some(image)
    }

    /// Try the providers in configured order, one attempt each.
    async fn run_providers(&self, request: &DishRequest) -> Option<Vec<u8>> {
        if self.config.provider_priority == ProviderPriority::PrimaryFirst {
            if let Some(primary) = &self.primary {
                if self.quota.has_remaining() {
                    if let Some(image) = self.call(primary, ProviderRole::Primary, request).await {
                        self.quota.record_success();
                        return Some(image);
                    }
                } else {
                    let quota = self.quota.snapshot();
                    info!(used = quota.used, limit = quota.limit, "primary daily quota exhausted, skipping");
                    self.stats.record_quota_skip();
                    counter!(telemetry::QUOTA_SKIPS_TOTAL).increment(1);
                }
            }
            if !self.config.fallback_enabled {
                return None;
            }
        }

        let fallback = self.fallback.as_ref()?;
        self.call(fallback, ProviderRole::Fallback, request).await
    }

    async fn call(
        &self,
        provider: &Arc<dyn ImageProvider>,
        role: ProviderRole,
        request: &DishRequest,
    ) -> Option<Vec<u8>> {
        let name = provider.name().to_owned();
        let start = Instant::now();
        let image = provider.generate(request).await.filter(|bytes| !bytes.is_empty());
        let success = image.is_some();

        histogram!(telemetry::PROVIDER_DURATION_SECONDS, "provider" => name.clone())
            .record(start.elapsed().as_secs_f64());
        counter!(telemetry::PROVIDER_CALLS_TOTAL,
            "provider" => name.clone(),
            "status" => if success { "ok" } else { "error" },
        )
        .increment(1);
        self.stats.record_provider(role, success);

        if success {
            debug!(provider = %name, role = role.as_str(), "provider succeeded");
        } else {
            warn!(provider = %name, role = role.as_str(), "provider returned no image");
        }
        image
    }
}
