//! Image generation backends.
//!
//! [`GeminiProvider`] is the primary, quota-limited backend and
//! [`ReplicateProvider`] the fallback. Both build their prompt with the pure
//! functions in [`prompt`], call the API under a fixed timeout and pass the
//! result through [`normalize`] before handing bytes back.

pub mod gemini;
pub mod normalize;
pub mod poll;
pub mod prompt;
pub mod replicate;
pub mod traits;

pub use gemini::GeminiProvider;
pub use normalize::NormalizeOptions;
pub use poll::PollConfig;
pub use replicate::ReplicateProvider;
pub use traits::ImageProvider;

use std::time::Duration;

use crate::{PlatingError, Result};

/// Longest error body excerpt kept in an `Api` error.
const ERROR_BODY_CHARS: usize = 200;

/// Map a non-success response to the matching [`PlatingError`].
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match status.as_u16() {
        401 | 403 => Err(PlatingError::AuthenticationFailed),
        429 => {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs);
            Err(PlatingError::RateLimited { retry_after })
        }
        code => {
            let body = response.text().await.unwrap_or_default();
            Err(PlatingError::Api {
                status: code,
                message: body.chars().take(ERROR_BODY_CHARS).collect(),
            })
        }
    }
}

/// Run a whole generate flow under `limit`.
pub(crate) async fn with_deadline<T>(
    limit: Duration,
    flow: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(limit, flow)
        .await
        .unwrap_or(Err(PlatingError::Timeout(limit)))
}

/// Shared HTTP client settings; the per-call timeout is applied by the
/// adapters around the whole generate flow.
pub(crate) fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| PlatingError::Configuration(format!("failed to build HTTP client: {e}")))
}
