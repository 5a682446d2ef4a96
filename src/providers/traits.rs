//! The provider seam.
//!
//! The orchestrator only knows [`ImageProvider`]; the Gemini and Replicate
//! adapters are two implementations and tests plug in their own.
//!
//! # Failure semantics
//!
//! `generate` never returns an error. Adapters log whatever went wrong
//! (network, quota, timeout, malformed payload) and return `None`, which
//! the orchestrator treats as "try the next provider".
//!
//! # Example
//!
//! ```ignore
//! #[async_trait]
//! impl ImageProvider for StaticProvider {
//!     fn name(&self) -> &str { "static" }
//!
//!     async fn generate(&self, _request: &DishRequest) -> Option<Vec<u8>> {
//!         Some(self.bytes.clone())
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::DishRequest;

/// A text-to-image backend that turns a dish request into image bytes.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    /// Provider name for logging, metrics and stats.
    fn name(&self) -> &str;

    /// Generate a normalized JPEG for the request, or `None` on any failure.
    async fn generate(&self, request: &DishRequest) -> Option<Vec<u8>>;

    /// Whether the backend is reachable with the configured credentials.
    async fn health_check(&self) -> bool {
        true
    }
}
