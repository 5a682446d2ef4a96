//! Plating error types

use std::time::Duration;

/// Plating error types
#[derive(Debug, thiserror::Error)]
pub enum PlatingError {
    // Provider/network errors
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("prediction failed: {0}")]
    PredictionFailed(String),

    // Soft errors
    #[error("empty response from provider")]
    EmptyResponse,

    // Data errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("image error: {0}")]
    Image(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Configuration errors
    #[error("no image provider configured")]
    NoProvider,

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl PlatingError {
    /// Whether a later attempt could plausibly succeed.
    ///
    /// Timeouts, transport failures, rate limiting and 5xx responses are
    /// transient. Everything else (bad credentials, malformed payloads,
    /// undecodable images, misconfiguration) is permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            PlatingError::Http(_) | PlatingError::Timeout(_) => true,
            PlatingError::RateLimited { .. } => true,
            PlatingError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Provider-supplied backoff hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            PlatingError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            PlatingError::Http(_) => "http",
            PlatingError::Api { .. } => "api",
            PlatingError::RateLimited { .. } => "rate_limited",
            PlatingError::AuthenticationFailed => "auth",
            PlatingError::Timeout(_) => "timeout",
            PlatingError::PredictionFailed(_) => "prediction",
            PlatingError::EmptyResponse => "empty",
            PlatingError::Json(_) => "json",
            PlatingError::Image(_) => "image",
            PlatingError::Io(_) => "io",
            PlatingError::NoProvider => "no_provider",
            PlatingError::Configuration(_) => "configuration",
        }
    }
}

impl From<reqwest::Error> for PlatingError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_status() && err.status().map(|s| s.as_u16()) == Some(429) {
            PlatingError::RateLimited { retry_after: None }
        } else {
            // request URLs can carry API keys
            PlatingError::Http(err.without_url().to_string())
        }
    }
}

impl From<image::ImageError> for PlatingError {
    fn from(err: image::ImageError) -> Self {
        PlatingError::Image(err.to_string())
    }
}

/// Result type alias for Plating operations
pub type Result<T> = std::result::Result<T, PlatingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_transient() {
        let err = PlatingError::Api {
            status: 503,
            message: "overloaded".into(),
        };
        assert!(err.is_transient());
    }

    #[test]
    fn client_errors_are_permanent() {
        let err = PlatingError::Api {
            status: 400,
            message: "bad prompt".into(),
        };
        assert!(!err.is_transient());
        assert!(!PlatingError::AuthenticationFailed.is_transient());
        assert!(!PlatingError::Image("truncated".into()).is_transient());
    }

    #[test]
    fn rate_limit_carries_retry_hint() {
        let err = PlatingError::RateLimited {
            retry_after: Some(Duration::from_secs(7)),
        };
        assert!(err.is_transient());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
        assert_eq!(PlatingError::EmptyResponse.retry_after(), None);
    }
}
