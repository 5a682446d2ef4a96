//! Assembly of [`ImageService`].

use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use super::coalesce::InFlight;
use super::quota::QuotaCounter;
use super::stats::GenerationStats;
use super::ImageService;
use crate::cache::{EvictionPolicy, ImageCache};
use crate::clock::{Clock, SystemClock};
use crate::providers::{GeminiProvider, ImageProvider, ReplicateProvider};
use crate::{ImageConfig, PlatingError, ProviderPriority, Result, Secrets};

/// Builder for [`ImageService`].
///
/// Providers are built from API keys unless one is injected directly with
/// [`primary`](Self::primary) / [`fallback`](Self::fallback). A provider
/// is only required when the configured priority will actually call it.
pub struct ImageServiceBuilder {
    config: ImageConfig,
    gemini_key: Option<String>,
    replicate_key: Option<String>,
    primary: Option<Arc<dyn ImageProvider>>,
    fallback: Option<Arc<dyn ImageProvider>>,
    clock: Option<Arc<dyn Clock>>,
}

impl ImageServiceBuilder {
    pub fn new(config: ImageConfig) -> Self {
        Self {
            config,
            gemini_key: None,
            replicate_key: None,
            primary: None,
            fallback: None,
            clock: None,
        }
    }

    /// Take whichever API keys are present.
    pub fn secrets(mut self, secrets: &Secrets) -> Self {
        if let Some(key) = &secrets.gemini_api_key {
            self.gemini_key = Some(key.clone());
        }
        if let Some(key) = &secrets.replicate_api_key {
            self.replicate_key = Some(key.clone());
        }
        self
    }

    pub fn gemini(mut self, api_key: impl Into<String>) -> Self {
        self.gemini_key = Some(api_key.into());
        self
    }

    pub fn replicate(mut self, api_key: impl Into<String>) -> Self {
        self.replicate_key = Some(api_key.into());
        self
    }

    /// Use a custom primary provider instead of building Gemini.
    pub fn primary(mut self, provider: Arc<dyn ImageProvider>) -> Self {
        self.primary = Some(provider);
        self
    }

    /// Use a custom fallback provider instead of building Replicate.
    pub fn fallback(mut self, provider: Arc<dyn ImageProvider>) -> Self {
        self.fallback = Some(provider);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Build the service. Opens (and creates) the cache directory when the
    /// cache is enabled.
    pub async fn build(self) -> Result<ImageService> {
        let config = self.config;
        config.validate()?;

        let wants_primary = config.provider_priority == ProviderPriority::PrimaryFirst;
        let wants_fallback =
            config.provider_priority == ProviderPriority::FallbackOnly || config.fallback_enabled;
        if !wants_primary && !wants_fallback {
            return Err(PlatingError::NoProvider);
        }

        let primary = match (wants_primary, self.primary) {
            (false, _) => None,
            (true, Some(provider)) => Some(provider),
            (true, None) => {
                let key = self.gemini_key.ok_or_else(|| {
                    PlatingError::Configuration(
                        "GEMINI_API_KEY is required with IMAGE_PROVIDER_PRIORITY=gemini_first"
                            .to_string(),
                    )
                })?;
                Some(Arc::new(GeminiProvider::new(key, &config)?) as Arc<dyn ImageProvider>)
            }
        };

        let fallback = match (wants_fallback, self.fallback) {
            (false, _) => None,
            (true, Some(provider)) => Some(provider),
            (true, None) => {
                let key = self.replicate_key.ok_or_else(|| {
                    PlatingError::Configuration(
                        "REPLICATE_API_KEY is required when the Replicate fallback is enabled"
                            .to_string(),
                    )
                })?;
                Some(Arc::new(ReplicateProvider::new(key, &config)?) as Arc<dyn ImageProvider>)
            }
        };

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let cache = if config.cache_enabled {
            Some(ImageCache::open(config.cache_dir.clone(), config.cache_ttl(), clock.clone()).await?)
        } else {
            debug!("image cache disabled");
            None
        };
        let in_flight = (cache.is_some() && config.coalesce_in_flight).then(InFlight::new);

        info!(
            priority = %config.provider_priority,
            primary = primary.as_ref().map(|p| p.name()).unwrap_or("none"),
            fallback = fallback.as_ref().map(|p| p.name()).unwrap_or("none"),
            cache = config.cache_enabled,
            daily_limit = config.gemini_daily_limit,
            "image service ready"
        );

        Ok(ImageService {
            eviction: EvictionPolicy::from_config(&config),
            quota: QuotaCounter::new(config.gemini_daily_limit, clock.today()),
            stats: GenerationStats::new(),
            last_cleanup: Mutex::new(clock.now()),
            janitor: Mutex::new(None),
            primary,
            fallback,
            cache,
            in_flight,
            clock,
            config,
        })
    }
}
