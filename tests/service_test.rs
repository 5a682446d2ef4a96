//! Integration tests for the generation orchestrator.
//!
//! Providers are replaced by in-process mocks that count their calls, and
//! time is driven by a `ManualClock`.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use tempfile::TempDir;

use plating::cache::ImageCache;
use plating::{
    CacheKey, CleanupOutcome, Clock, DishRequest, ImageConfig, ImageProvider, ImageService,
    ManualClock, PlatingError, ProviderPriority, SkipReason,
};

// ============================================================================
// Helpers
// ============================================================================

struct MockProvider {
    name: &'static str,
    image: Option<Vec<u8>>,
    delay: Duration,
    calls: AtomicUsize,
}

impl MockProvider {
    fn ok(name: &'static str, image: &[u8]) -> Arc<Self> {
        Arc::new(Self {
            name,
            image: Some(image.to_vec()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        })
    }

    fn failing(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            image: None,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        })
    }

    fn slow(name: &'static str, image: &[u8], delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            name,
            image: Some(image.to_vec()),
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageProvider for MockProvider {
    fn name(&self) -> &str {
        self.name
    }

    async fn generate(&self, _request: &DishRequest) -> Option<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.image.clone()
    }
}

fn start() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 6, 1)
        .unwrap()
        .and_hms_opt(10, 0, 0)
        .unwrap()
}

fn config(dir: &TempDir) -> ImageConfig {
    ImageConfig {
        cache_dir: dir.path().join("cache"),
        ..ImageConfig::default()
    }
}

async fn service(
    config: ImageConfig,
    primary: &Arc<MockProvider>,
    fallback: &Arc<MockProvider>,
    clock: &Arc<ManualClock>,
) -> ImageService {
    ImageService::builder(config)
        .primary(primary.clone())
        .fallback(fallback.clone())
        .clock(clock.clone())
        .build()
        .await
        .unwrap()
}

// ============================================================================
// Generation paths
// ============================================================================

#[tokio::test]
async fn disabled_cache_generates_and_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(start()));
    let primary = MockProvider::ok("primary", b"IMG1");
    let fallback = MockProvider::ok("fallback", b"IMG2");
    let config = ImageConfig {
        cache_enabled: false,
        ..config(&dir)
    };
    let service = service(config, &primary, &fallback, &clock).await;

    let image = service.generate_dish_image("Okroshka", None, None).await;
    assert_eq!(image.as_deref(), Some(&b"IMG1"[..]));

    // a second call is another miss
    service.generate_dish_image("Okroshka", None, None).await;
    assert_eq!(primary.calls(), 2);
    assert!(!dir.path().join("cache").exists());

    let stats = service.get_stats().await;
    assert!(!stats.cache.enabled);
    assert_eq!(stats.counters.cache_hits, 0);
}

#[tokio::test]
async fn prepopulated_cache_skips_every_provider() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(start()));
    let recipe = "beets, cabbage, potatoes, carrots, onion";
    {
        let cache = ImageCache::open(
            dir.path().join("cache"),
            TimeDelta::days(30),
            clock.clone() as Arc<dyn Clock>,
        )
        .await
        .unwrap();
        let key = CacheKey::derive("Borscht", Some(recipe));
        assert!(cache.put(&key, "Borscht", Some(recipe), b"CACHED").await);
    }

    let primary = MockProvider::ok("primary", b"FRESH");
    let fallback = MockProvider::ok("fallback", b"FRESH");
    let service = service(config(&dir), &primary, &fallback, &clock).await;

    let image = service.generate_dish_image("Borscht", Some(recipe), None).await;
    assert_eq!(image.as_deref(), Some(&b"CACHED"[..]));
    assert_eq!(primary.calls(), 0);
    assert_eq!(fallback.calls(), 0);

    let stats = service.get_stats().await;
    assert_eq!(stats.counters.cache_hits, 1);
    assert_eq!(stats.hit_rate(), 1.0);
}

#[tokio::test]
async fn generated_image_is_served_from_cache_next_time() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(start()));
    let primary = MockProvider::ok("primary", b"PELMENI");
    let fallback = MockProvider::failing("fallback");
    let service = service(config(&dir), &primary, &fallback, &clock).await;

    let first = service.generate_dish_image("Pelmeni", Some("dough, beef"), None).await;
    let second = service.generate_dish_image("  PELMENI ", Some("dough, beef"), None).await;

    assert_eq!(first, second);
    assert_eq!(primary.calls(), 1);
    let stats = service.get_stats().await;
    assert_eq!(stats.counters.total_requests, 2);
    assert_eq!(stats.counters.cache_hits, 1);
    assert_eq!(stats.cache.entries, 1);
}

#[tokio::test]
async fn cache_write_failure_still_returns_the_image() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(start()));
    let primary = MockProvider::ok("primary", b"OMLT");
    let fallback = MockProvider::failing("fallback");
    let service = service(config(&dir), &primary, &fallback, &clock).await;

    // a directory in the blob's place makes the write fail
    let key = CacheKey::derive("Omelette", Some("eggs"));
    std::fs::create_dir(dir.path().join("cache").join(key.file_name())).unwrap();

    let image = service.generate_dish_image("Omelette", Some("eggs"), None).await;
    assert_eq!(image.as_deref(), Some(&b"OMLT"[..]));

    let stats = service.get_stats().await;
    assert_eq!(stats.counters.cache_write_failures, 1);
    assert_eq!(stats.cache.entries, 0);
}

#[tokio::test]
async fn failed_primary_falls_back_exactly_once() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(start()));
    let primary = MockProvider::failing("primary");
    let fallback = MockProvider::ok("fallback", b"FALLBACK");
    let service = service(config(&dir), &primary, &fallback, &clock).await;

    let image = service.generate_dish_image("Solyanka", None, None).await;
    assert_eq!(image.as_deref(), Some(&b"FALLBACK"[..]));
    assert_eq!(primary.calls(), 1);
    assert_eq!(fallback.calls(), 1);

    let stats = service.get_stats().await;
    assert_eq!(stats.counters.primary_failures, 1);
    assert_eq!(stats.counters.fallback_success, 1);
    // only primary successes count against the quota
    assert_eq!(stats.quota.used, 0);
}

#[tokio::test]
async fn empty_primary_output_counts_as_failure() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(start()));
    let primary = MockProvider::ok("primary", b"");
    let fallback = MockProvider::ok("fallback", b"FALLBACK");
    let service = service(config(&dir), &primary, &fallback, &clock).await;

    let image = service.generate_dish_image("Vinegret", None, None).await;
    assert_eq!(image.as_deref(), Some(&b"FALLBACK"[..]));
}

#[tokio::test]
async fn disabled_fallback_returns_none_when_primary_fails() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(start()));
    let primary = MockProvider::failing("primary");
    let fallback = MockProvider::ok("fallback", b"FALLBACK");
    let config = ImageConfig {
        fallback_enabled: false,
        ..config(&dir)
    };
    let service = service(config, &primary, &fallback, &clock).await;

    assert!(service.generate_dish_image("Ukha", None, None).await.is_none());
    assert_eq!(primary.calls(), 1);
    assert_eq!(fallback.calls(), 0);
    assert_eq!(service.get_stats().await.cache.entries, 0);
}

#[tokio::test]
async fn fallback_only_never_touches_primary() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(start()));
    let primary = MockProvider::ok("primary", b"PRIMARY");
    let fallback = MockProvider::ok("fallback", b"FALLBACK");
    let config = ImageConfig {
        provider_priority: ProviderPriority::FallbackOnly,
        fallback_enabled: false,
        ..config(&dir)
    };
    let service = service(config, &primary, &fallback, &clock).await;

    let image = service.generate_dish_image("Kholodets", None, None).await;
    assert_eq!(image.as_deref(), Some(&b"FALLBACK"[..]));
    assert_eq!(primary.calls(), 0);
    assert_eq!(fallback.calls(), 1);
}

#[tokio::test]
async fn all_providers_failing_yields_none_and_caches_nothing() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(start()));
    let primary = MockProvider::failing("primary");
    let fallback = MockProvider::failing("fallback");
    let service = service(config(&dir), &primary, &fallback, &clock).await;

    assert!(service.generate_dish_image("Kvass", None, None).await.is_none());
    assert!(service.generate_dish_image("Kvass", None, None).await.is_none());
    assert_eq!(primary.calls(), 2);
    assert_eq!(fallback.calls(), 2);
    assert_eq!(service.get_stats().await.cache.entries, 0);
}

// ============================================================================
// Quota
// ============================================================================

#[tokio::test]
async fn exhausted_quota_skips_primary_until_next_day() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(start()));
    let primary = MockProvider::ok("primary", b"PRIMARY");
    let fallback = MockProvider::ok("fallback", b"FALLBACK");
    let config = ImageConfig {
        gemini_daily_limit: 2,
        ..config(&dir)
    };
    let service = service(config, &primary, &fallback, &clock).await;

    for dish in ["Blini", "Syrniki"] {
        let image = service.generate_dish_image(dish, None, None).await;
        assert_eq!(image.as_deref(), Some(&b"PRIMARY"[..]));
    }

    let image = service.generate_dish_image("Pirozhki", None, None).await;
    assert_eq!(image.as_deref(), Some(&b"FALLBACK"[..]));
    assert_eq!(primary.calls(), 2);
    assert_eq!(fallback.calls(), 1);

    let stats = service.get_stats().await;
    assert_eq!(stats.quota.used, 2);
    assert_eq!(stats.quota.remaining(), 0);
    assert_eq!(stats.counters.quota_skips, 1);

    // past midnight the quota starts over
    clock.advance(TimeDelta::hours(14));
    let image = service.generate_dish_image("Vareniki", None, None).await;
    assert_eq!(image.as_deref(), Some(&b"PRIMARY"[..]));
    assert_eq!(primary.calls(), 3);

    let stats = service.get_stats().await;
    assert_eq!(stats.quota.used, 1);
    assert_eq!(stats.quota.reset_date, NaiveDate::from_ymd_opt(2024, 6, 2).unwrap());
}

#[tokio::test]
async fn exhausted_quota_without_fallback_returns_none() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(start()));
    let primary = MockProvider::ok("primary", b"PRIMARY");
    let fallback = MockProvider::ok("fallback", b"FALLBACK");
    let config = ImageConfig {
        gemini_daily_limit: 0,
        fallback_enabled: false,
        ..config(&dir)
    };
    let service = service(config, &primary, &fallback, &clock).await;

    assert!(service.generate_dish_image("Shashlik", None, None).await.is_none());
    assert_eq!(primary.calls(), 0);
    assert_eq!(fallback.calls(), 0);
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test]
async fn concurrent_misses_share_one_generation() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(start()));
    let primary = MockProvider::slow("primary", b"GOLUBTSY", Duration::from_millis(100));
    let fallback = MockProvider::failing("fallback");
    let service = service(config(&dir), &primary, &fallback, &clock).await;

    let (a, b, c) = tokio::join!(
        service.generate_dish_image("Golubtsy", Some("cabbage, rice, pork"), None),
        service.generate_dish_image("Golubtsy", Some("cabbage, rice, pork"), None),
        service.generate_dish_image("Golubtsy", Some("cabbage, rice, pork"), None),
    );

    assert_eq!(primary.calls(), 1);
    for image in [a, b, c] {
        assert_eq!(image.as_deref(), Some(&b"GOLUBTSY"[..]));
    }
    let stats = service.get_stats().await;
    assert_eq!(stats.counters.coalesced, 2);
    assert_eq!(stats.quota.used, 1);
}

#[tokio::test]
async fn coalescing_can_be_switched_off() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(start()));
    let primary = MockProvider::slow("primary", b"GOLUBTSY", Duration::from_millis(50));
    let fallback = MockProvider::failing("fallback");
    let config = ImageConfig {
        coalesce_in_flight: false,
        ..config(&dir)
    };
    let service = service(config, &primary, &fallback, &clock).await;

    let (a, b) = tokio::join!(
        service.generate_dish_image("Golubtsy", None, None),
        service.generate_dish_image("Golubtsy", None, None),
    );

    assert_eq!(a, b);
    assert_eq!(primary.calls(), 2);
    let stats = service.get_stats().await;
    assert_eq!(stats.counters.coalesced, 0);
    assert_eq!(stats.cache.entries, 1);
}

// ============================================================================
// Cleanup and lifecycle
// ============================================================================

#[tokio::test]
async fn cleanup_reports_why_it_skipped() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(start()));
    let primary = MockProvider::ok("primary", b"IMG");
    let fallback = MockProvider::failing("fallback");

    let no_cache = service(
        ImageConfig {
            cache_enabled: false,
            ..config(&dir)
        },
        &primary,
        &fallback,
        &clock,
    )
    .await;
    assert_eq!(
        no_cache.cleanup(true).await,
        CleanupOutcome::Skipped(SkipReason::CacheDisabled)
    );

    let disabled = service(
        ImageConfig {
            cleanup_enabled: false,
            ..config(&dir)
        },
        &primary,
        &fallback,
        &clock,
    )
    .await;
    assert_eq!(
        disabled.cleanup(false).await,
        CleanupOutcome::Skipped(SkipReason::Disabled)
    );
    assert!(matches!(
        disabled.cleanup(true).await,
        CleanupOutcome::Completed(_)
    ));

    let scheduled = service(config(&dir), &primary, &fallback, &clock).await;
    assert_eq!(
        scheduled.cleanup(false).await,
        CleanupOutcome::Skipped(SkipReason::IntervalNotReached)
    );
    clock.advance(TimeDelta::hours(24));
    assert!(matches!(
        scheduled.cleanup(false).await,
        CleanupOutcome::Completed(_)
    ));
    // the run just now restarts the interval
    assert_eq!(
        scheduled.cleanup(false).await,
        CleanupOutcome::Skipped(SkipReason::IntervalNotReached)
    );
}

#[tokio::test]
async fn cleanup_removes_expired_entries() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(start()));
    let primary = MockProvider::ok("primary", b"SHAWARMA");
    let fallback = MockProvider::failing("fallback");
    let service = service(config(&dir), &primary, &fallback, &clock).await;

    service.generate_dish_image("Shawarma", None, None).await;
    clock.advance(TimeDelta::days(31));

    let CleanupOutcome::Completed(report) = service.cleanup(false).await else {
        panic!("cleanup should run after the interval");
    };
    assert_eq!(report.expired_removed, 1);
    assert_eq!(report.remaining_entries, 0);
    assert_eq!(service.get_stats().await.cache.entries, 0);
}

#[tokio::test]
async fn shutdown_stops_janitor_and_runs_forced_cleanup() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(start()));
    let primary = MockProvider::ok("primary", b"PLOV");
    let fallback = MockProvider::failing("fallback");
    let service = Arc::new(service(config(&dir), &primary, &fallback, &clock).await);

    service.start();
    service.start();

    service.generate_dish_image("Plov", Some("rice, lamb, carrots"), None).await;
    clock.advance(TimeDelta::days(40));

    let report = service.shutdown().await.expect("forced cleanup should run");
    assert_eq!(report.expired_removed, 1);

    // a second shutdown has no janitor left to stop but still cleans
    assert!(service.shutdown().await.is_some());
}

#[tokio::test(start_paused = true)]
async fn janitor_evicts_expired_entries_on_its_tick() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(start()));
    let primary = MockProvider::ok("primary", b"KVAS");
    let fallback = MockProvider::failing("fallback");
    let config = ImageConfig {
        cleanup_interval_hours: 1,
        ..config(&dir)
    };
    let service = Arc::new(service(config, &primary, &fallback, &clock).await);

    service.start();
    service.generate_dish_image("Kvas", None, None).await;
    assert_eq!(service.get_stats().await.cache.entries, 1);

    clock.advance(TimeDelta::days(40));
    tokio::time::sleep(Duration::from_secs(3601)).await;

    let mut entries = service.get_stats().await.cache.entries;
    for _ in 0..50 {
        if entries == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        entries = service.get_stats().await.cache.entries;
    }
    assert_eq!(entries, 0);

    service.shutdown().await;
}

#[tokio::test]
async fn shutdown_without_cache_reports_nothing() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(start()));
    let primary = MockProvider::ok("primary", b"IMG");
    let fallback = MockProvider::failing("fallback");
    let config = ImageConfig {
        cache_enabled: false,
        ..config(&dir)
    };
    let service = Arc::new(service(config, &primary, &fallback, &clock).await);

    service.start();
    assert!(service.shutdown().await.is_none());
}

#[tokio::test]
async fn check_providers_reports_each_backend() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(start()));
    let primary = MockProvider::ok("primary", b"IMG");
    let fallback = MockProvider::ok("fallback", b"IMG");

    let both = service(config(&dir), &primary, &fallback, &clock).await;
    let health = both.check_providers().await;
    assert_eq!(health.primary, Some(true));
    assert_eq!(health.fallback, Some(true));
    assert_eq!(health.cache_writable, Some(true));

    let fallback_only = service(
        ImageConfig {
            provider_priority: ProviderPriority::FallbackOnly,
            cache_enabled: false,
            ..config(&dir)
        },
        &primary,
        &fallback,
        &clock,
    )
    .await;
    let health = fallback_only.check_providers().await;
    assert_eq!(health.primary, None);
    assert_eq!(health.fallback, Some(true));
    assert_eq!(health.cache_writable, None);
}

// ============================================================================
// Builder
// ============================================================================

#[tokio::test]
async fn builder_requires_keys_for_providers_it_must_build() {
    let dir = TempDir::new().unwrap();

    let err = ImageService::builder(config(&dir))
        .replicate("r8_test")
        .build()
        .await
        .err()
        .unwrap();
    assert!(matches!(err, PlatingError::Configuration(_)));

    let err = ImageService::builder(ImageConfig {
        provider_priority: ProviderPriority::FallbackOnly,
        ..config(&dir)
    })
    .build()
    .await
    .err()
    .unwrap();
    assert!(matches!(err, PlatingError::Configuration(_)));
}

#[tokio::test]
async fn builder_accepts_keys_for_both_providers() {
    let dir = TempDir::new().unwrap();
    let service = ImageService::builder(config(&dir))
        .gemini("AIza-test")
        .replicate("r8_test")
        .build()
        .await
        .unwrap();

    assert_eq!(service.config().provider_priority, ProviderPriority::PrimaryFirst);
    assert!(dir.path().join("cache").is_dir());
}

#[tokio::test]
async fn builder_rejects_invalid_config() {
    let dir = TempDir::new().unwrap();
    let err = ImageService::builder(ImageConfig {
        image_quality: 0,
        ..config(&dir)
    })
    .gemini("AIza-test")
    .replicate("r8_test")
    .build()
    .await
    .err()
    .unwrap();
    assert!(matches!(err, PlatingError::Configuration(_)));
}
