//! Configuration loading.
//!
//! Every option can come from the environment (the keys the chat bot has
//! always used, e.g. `ENABLE_IMAGE_CACHE`) or from a TOML file using the
//! same keys in lowercase. Resolution for [`ImageConfig::discover`]:
//! 1. `--config <path>` (explicit)
//! 2. `~/.plating/config.toml` (user)
//! 3. `/etc/plating/config.toml` (system)
//! 4. built-in defaults
//!
//! Environment variables are applied on top of whichever file was found.
//! API keys are only ever read from the environment (see [`Secrets`]).

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::{PlatingError, Result};

/// Order in which providers are tried on a cache miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum ProviderPriority {
    /// Try the primary (quota-limited) provider first, then the fallback.
    #[default]
    #[serde(rename = "gemini_first", alias = "primary_first")]
    PrimaryFirst,
    /// Never call the primary provider.
    #[serde(rename = "replicate_only", alias = "fallback_only")]
    FallbackOnly,
}

impl FromStr for ProviderPriority {
    type Err = PlatingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini_first" | "primary_first" => Ok(Self::PrimaryFirst),
            "replicate_only" | "fallback_only" => Ok(Self::FallbackOnly),
            other => Err(PlatingError::Configuration(format!(
                "unknown IMAGE_PROVIDER_PRIORITY '{other}' (expected gemini_first or replicate_only)"
            ))),
        }
    }
}

impl fmt::Display for ProviderPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PrimaryFirst => f.write_str("gemini_first"),
            Self::FallbackOnly => f.write_str("replicate_only"),
        }
    }
}

/// Image generation and cache configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    #[serde(rename = "image_provider_priority")]
    pub provider_priority: ProviderPriority,
    /// When false the cache is bypassed entirely: every request is a miss
    /// and nothing is written.
    #[serde(rename = "enable_image_cache")]
    pub cache_enabled: bool,
    #[serde(rename = "image_cache_dir")]
    pub cache_dir: PathBuf,
    /// Successful primary-provider generations allowed per calendar day.
    pub gemini_daily_limit: u32,
    #[serde(rename = "replicate_fallback_enabled")]
    pub fallback_enabled: bool,
    pub max_cache_size_mb: u64,
    pub cache_ttl_days: u64,
    #[serde(rename = "cache_cleanup_interval_hours")]
    pub cleanup_interval_hours: u64,
    #[serde(rename = "image_cache_cleanup_enabled")]
    pub cleanup_enabled: bool,
    /// JPEG quality used when normalizing provider output (1-100).
    pub image_quality: u8,
    pub max_image_size_mb: u64,
    #[serde(rename = "image_provider_timeout_secs")]
    pub provider_timeout_secs: u64,
    #[serde(rename = "image_coalesce_in_flight")]
    pub coalesce_in_flight: bool,
    #[serde(rename = "image_shutdown_cleanup_timeout_secs")]
    pub shutdown_cleanup_timeout_secs: u64,
    #[serde(rename = "gemini_image_model")]
    pub gemini_model: String,
    #[serde(rename = "replicate_image_model")]
    pub replicate_model: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            provider_priority: ProviderPriority::PrimaryFirst,
            cache_enabled: true,
            cache_dir: PathBuf::from("image_cache"),
            gemini_daily_limit: 50,
            fallback_enabled: true,
            max_cache_size_mb: 1000,
            cache_ttl_days: 30,
            cleanup_interval_hours: 24,
            cleanup_enabled: true,
            image_quality: 85,
            max_image_size_mb: 5,
            provider_timeout_secs: 60,
            coalesce_in_flight: true,
            shutdown_cleanup_timeout_secs: 10,
            gemini_model: "imagen-3-fast".to_string(),
            replicate_model: "flux-1.1-pro".to_string(),
        }
    }
}

impl ImageConfig {
    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse a TOML config file. Missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            PlatingError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            PlatingError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve a config file (see module docs), then apply the environment.
    pub fn discover(explicit_path: Option<&Path>) -> Result<Self> {
        let mut config = match Self::resolve_config_path(explicit_path)? {
            Some(path) => Self::load(&path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path.to_path_buf()));
            }
            return Err(PlatingError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".plating").join("config.toml");
            if user_config.exists() {
                return Ok(Some(user_config));
            }
        }

        let system_config = PathBuf::from("/etc/plating/config.toml");
        if system_config.exists() {
            return Ok(Some(system_config));
        }

        Ok(None)
    }

    /// Overlay values from a key lookup (normally `std::env::var`).
    ///
    /// Unset keys leave the current value alone; set-but-unparsable keys are
    /// a configuration error rather than a silent default.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("IMAGE_PROVIDER_PRIORITY") {
            self.provider_priority = v.parse()?;
        }
        if let Some(v) = lookup("ENABLE_IMAGE_CACHE") {
            self.cache_enabled = parse_bool("ENABLE_IMAGE_CACHE", &v)?;
        }
        if let Some(v) = lookup("IMAGE_CACHE_DIR") {
            self.cache_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("GEMINI_DAILY_LIMIT") {
            self.gemini_daily_limit = parse_num("GEMINI_DAILY_LIMIT", &v)?;
        }
        if let Some(v) = lookup("REPLICATE_FALLBACK_ENABLED") {
            self.fallback_enabled = parse_bool("REPLICATE_FALLBACK_ENABLED", &v)?;
        }
        if let Some(v) = lookup("MAX_CACHE_SIZE_MB") {
            self.max_cache_size_mb = parse_num("MAX_CACHE_SIZE_MB", &v)?;
        }
        if let Some(v) = lookup("CACHE_TTL_DAYS") {
            self.cache_ttl_days = parse_num("CACHE_TTL_DAYS", &v)?;
        }
        if let Some(v) = lookup("CACHE_CLEANUP_INTERVAL_HOURS") {
            self.cleanup_interval_hours = parse_num("CACHE_CLEANUP_INTERVAL_HOURS", &v)?;
        }
        if let Some(v) = lookup("IMAGE_CACHE_CLEANUP_ENABLED") {
            self.cleanup_enabled = parse_bool("IMAGE_CACHE_CLEANUP_ENABLED", &v)?;
        }
        if let Some(v) = lookup("IMAGE_QUALITY") {
            self.image_quality = parse_num("IMAGE_QUALITY", &v)?;
        }
        if let Some(v) = lookup("MAX_IMAGE_SIZE_MB") {
            self.max_image_size_mb = parse_num("MAX_IMAGE_SIZE_MB", &v)?;
        }
        if let Some(v) = lookup("IMAGE_PROVIDER_TIMEOUT_SECS") {
            self.provider_timeout_secs = parse_num("IMAGE_PROVIDER_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("IMAGE_COALESCE_IN_FLIGHT") {
            self.coalesce_in_flight = parse_bool("IMAGE_COALESCE_IN_FLIGHT", &v)?;
        }
        if let Some(v) = lookup("IMAGE_SHUTDOWN_CLEANUP_TIMEOUT_SECS") {
            self.shutdown_cleanup_timeout_secs =
                parse_num("IMAGE_SHUTDOWN_CLEANUP_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("GEMINI_IMAGE_MODEL") {
            self.gemini_model = v;
        }
        if let Some(v) = lookup("REPLICATE_IMAGE_MODEL") {
            self.replicate_model = v;
        }
        self.validate()
    }

    /// Reject values that would break the scheduler or the encoder.
    pub fn validate(&self) -> Result<()> {
        if self.cleanup_interval_hours == 0 {
            return Err(PlatingError::Configuration(
                "CACHE_CLEANUP_INTERVAL_HOURS must be at least 1".to_string(),
            ));
        }
        if !(1..=100).contains(&self.image_quality) {
            return Err(PlatingError::Configuration(format!(
                "IMAGE_QUALITY must be between 1 and 100, got {}",
                self.image_quality
            )));
        }
        if self.provider_timeout_secs == 0 {
            return Err(PlatingError::Configuration(
                "IMAGE_PROVIDER_TIMEOUT_SECS must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Maximum age of a cache entry.
    pub fn cache_ttl(&self) -> chrono::TimeDelta {
        i64::try_from(self.cache_ttl_days)
            .ok()
            .and_then(chrono::TimeDelta::try_days)
            .unwrap_or(chrono::TimeDelta::MAX)
    }

    pub fn max_cache_bytes(&self) -> u64 {
        self.max_cache_size_mb.saturating_mul(1024 * 1024)
    }

    pub fn max_image_bytes(&self) -> u64 {
        self.max_image_size_mb.saturating_mul(1024 * 1024)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_hours.saturating_mul(3600))
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn shutdown_cleanup_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_cleanup_timeout_secs)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(PlatingError::Configuration(format!(
            "{key} must be a boolean, got '{other}'"
        ))),
    }
}

fn parse_num<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        PlatingError::Configuration(format!("{key} must be a non-negative integer, got '{value}'"))
    })
}

/// Provider API keys.
#[derive(Clone, Default)]
pub struct Secrets {
    pub gemini_api_key: Option<String>,
    pub replicate_api_key: Option<String>,
}

/// Provider name → environment variable name mapping.
const PROVIDER_ENV_VARS: &[(&str, &str)] = &[
    ("gemini", "GEMINI_API_KEY"),
    ("replicate", "REPLICATE_API_KEY"),
];

impl Secrets {
    /// Read API keys from the environment. Blank values count as unset.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let key_for = |provider: &str| {
            PROVIDER_ENV_VARS
                .iter()
                .find(|(name, _)| *name == provider)
                .and_then(|(_, env_var)| lookup(env_var))
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
        };
        Self {
            gemini_api_key: key_for("gemini"),
            replicate_api_key: key_for("replicate"),
        }
    }
}

// Keys must never end up in logs.
impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secrets")
            .field("gemini_api_key", &self.gemini_api_key.as_ref().map(|_| "***"))
            .field(
                "replicate_api_key",
                &self.replicate_api_key.as_ref().map(|_| "***"),
            )
            .finish()
    }
}
