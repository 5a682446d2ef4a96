//! Plating - cached, quota-aware dish photo generation
//!
//! This crate sits between a recipe bot and two image generation
//! backends. It keeps generated photos in an on-disk cache keyed by the
//! dish and recipe, spends a daily quota on the primary backend (Gemini)
//! and falls back to Replicate when the primary fails or the quota is
//! gone.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use plating::{ImageConfig, ImageService, Secrets};
//!
//! #[tokio::main]
//! async fn main() -> plating::Result<()> {
//!     let config = ImageConfig::from_env()?;
//!     let service = Arc::new(
//!         ImageService::builder(config)
//!             .secrets(&Secrets::from_env())
//!             .build()
//!             .await?,
//!     );
//!     service.start();
//!
//!     let photo = service
//!         .generate_dish_image("Borscht", Some("beets, cabbage, potatoes"), None)
//!         .await;
//!     match photo {
//!         Some(jpeg) => println!("got {} bytes", jpeg.len()),
//!         None => println!("no image this time"),
//!     }
//!
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod providers;
pub mod request;
pub mod service;
pub mod telemetry;
pub mod version;

// Re-export main types at crate root
pub use cache::{CacheKey, EvictionReport, ImageCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ImageConfig, ProviderPriority, Secrets};
pub use error::{PlatingError, Result};
pub use providers::{GeminiProvider, ImageProvider, ReplicateProvider};
pub use request::DishRequest;
pub use service::{
    CleanupOutcome, ImageService, ImageServiceBuilder, ProviderHealth, SkipReason, StatsSnapshot,
};
pub use version::{PKG_VERSION, version_string};
