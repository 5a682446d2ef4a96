//! plating — admin CLI for the dish image cache
//!
//! Generate a photo by hand, inspect or clean the cache directory, and probe
//! the configured backends. Reads the same configuration as the bot.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use plating::cache::EvictionPolicy;
use plating::{ImageCache, ImageConfig, ImageService, Secrets, SystemClock};

/// Plating image cache CLI
#[derive(Parser)]
#[command(name = "plating")]
#[command(version = plating::PKG_VERSION)]
#[command(about = "Dish image generation and cache maintenance")]
struct Args {
    /// Config file (default: ~/.plating/config.toml, then /etc/plating/config.toml)
    #[arg(short, long, env = "PLATING_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate (or fetch from cache) a photo for one dish
    Generate {
        /// Dish name
        #[arg(short, long)]
        dish: String,
        /// File holding the recipe text
        #[arg(short, long)]
        recipe: Option<PathBuf>,
        /// Short visual description of the plated dish
        #[arg(short, long)]
        visual: Option<String>,
        /// Where to write the JPEG
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Show cache size and entry count
    Stats,

    /// Run TTL and size eviction on the cache directory
    Cleanup {
        /// Run even when IMAGE_CACHE_CLEANUP_ENABLED is off
        #[arg(long)]
        force: bool,
    },

    /// Check that the backends respond and the cache is writable
    Check,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    // Initialise tracing (default: warn for CLI; override with RUST_LOG).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    let config = ImageConfig::discover(args.config.as_deref())?;

    match args.command {
        Command::Generate {
            dish,
            recipe,
            visual,
            out,
        } => {
            let recipe = match recipe {
                Some(path) => Some(tokio::fs::read_to_string(&path).await?),
                None => None,
            };
            let service = ImageService::builder(config)
                .secrets(&Secrets::from_env())
                .build()
                .await?;

            let image = service
                .generate_dish_image(&dish, recipe.as_deref(), visual.as_deref())
                .await;
            let Some(image) = image else {
                eprintln!("no image generated for '{dish}'");
                return Ok(ExitCode::FAILURE);
            };
            tokio::fs::write(&out, &image).await?;
            println!("wrote {} bytes to {}", image.len(), out.display());

            let stats = service.get_stats().await;
            println!(
                "cache hits: {}, primary: {}/{}, fallback: {}/{}",
                stats.counters.cache_hits,
                stats.counters.primary_success,
                stats.counters.primary_success + stats.counters.primary_failures,
                stats.counters.fallback_success,
                stats.counters.fallback_success + stats.counters.fallback_failures,
            );
        }

        Command::Stats => {
            if !config.cache_enabled {
                println!("cache: disabled");
                return Ok(ExitCode::SUCCESS);
            }
            let cache = open_cache(&config).await?;
            let stats = cache.stats().await;
            println!("cache dir: {}", cache.dir().display());
            println!("entries: {}", stats.entries);
            println!(
                "size: {:.2} MB of {} MB",
                stats.total_bytes as f64 / (1024.0 * 1024.0),
                config.max_cache_size_mb
            );
            println!("ttl: {} days", config.cache_ttl_days);
        }

        Command::Cleanup { force } => {
            if !config.cache_enabled {
                println!("cache disabled, nothing to clean");
                return Ok(ExitCode::SUCCESS);
            }
            if !force && !config.cleanup_enabled {
                println!("cleanup disabled (IMAGE_CACHE_CLEANUP_ENABLED=false); use --force");
                return Ok(ExitCode::SUCCESS);
            }
            let cache = open_cache(&config).await?;
            let report = cache.evict(&EvictionPolicy::from_config(&config)).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.errors > 0 {
                return Ok(ExitCode::FAILURE);
            }
        }

        Command::Check => {
            println!("plating {}", plating::version_string());
            let service = ImageService::builder(config)
                .secrets(&Secrets::from_env())
                .build()
                .await?;
            let health = service.check_providers().await;

            let show = |state: Option<bool>| match state {
                Some(true) => "ok",
                Some(false) => "FAILED",
                None => "not configured",
            };
            println!("primary:  {}", show(health.primary));
            println!("fallback: {}", show(health.fallback));
            println!("cache:    {}", show(health.cache_writable));

            let failed = [health.primary, health.fallback, health.cache_writable]
                .contains(&Some(false));
            if failed {
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn open_cache(config: &ImageConfig) -> plating::Result<ImageCache> {
    ImageCache::open(
        config.cache_dir.clone(),
        config.cache_ttl(),
        Arc::new(SystemClock),
    )
    .await
}
