//! Primary provider: Google Imagen through the Gemini REST API.
//!
//! See: <https://ai.google.dev/api/generate-content>

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::normalize::{NormalizeOptions, normalize_blocking};
use super::prompt::primary_prompt;
use super::traits::ImageProvider;
use super::{check_status, http_client, with_deadline};
use crate::{DishRequest, ImageConfig, PlatingError, Result};

/// Default base URL for the Gemini API.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Model used when the configured alias is unknown.
pub const DEFAULT_MODEL: &str = "imagen-3-fast";

const MODELS: &[(&str, &str)] = &[
    ("imagen-3", "imagen-3.0-generate-001"),
    ("imagen-3-fast", "imagen-3.0-fast-generate-001"),
    ("imagen-2", "imagen-2.0-generate-001"),
];

/// Longest side of normalized output.
const MAX_SIDE: u32 = 1024;

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

const SAFETY_SETTINGS: [SafetySetting; 4] = [
    SafetySetting::block_none("HARM_CATEGORY_HARASSMENT"),
    SafetySetting::block_none("HARM_CATEGORY_HATE_SPEECH"),
    SafetySetting::block_none("HARM_CATEGORY_SEXUALLY_EXPLICIT"),
    SafetySetting::block_none("HARM_CATEGORY_DANGEROUS_CONTENT"),
];

/// Resolve a model alias (`imagen-3`, `imagen-3-fast`, `imagen-2`) to the
/// API model id. Unknown aliases resolve to [`DEFAULT_MODEL`].
pub fn resolve_model(alias: &str) -> &'static str {
    let lookup = |name: &str| MODELS.iter().find(|(a, _)| *a == name).map(|(_, id)| *id);
    lookup(alias)
        .or_else(|| lookup(DEFAULT_MODEL))
        .unwrap_or("imagen-3.0-fast-generate-001")
}

/// Client for image generation through Gemini.
#[derive(Clone)]
pub struct GeminiProvider {
    api_key: String,
    http: Client,
    base_url: String,
    model_id: &'static str,
    timeout: Duration,
    normalize: NormalizeOptions,
}

impl GeminiProvider {
    /// Create a provider for the configured model. An empty API key is a
    /// configuration error.
    pub fn new(api_key: impl Into<String>, config: &ImageConfig) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(PlatingError::Configuration(
                "GEMINI_API_KEY is not set".to_string(),
            ));
        }
        let model_id = resolve_model(&config.gemini_model);
        if !MODELS.iter().any(|(alias, _)| *alias == config.gemini_model) {
            warn!(model = %config.gemini_model, fallback = DEFAULT_MODEL, "unknown Gemini image model");
        }

        Ok(Self {
            api_key,
            http: http_client()?,
            base_url: DEFAULT_BASE_URL.to_string(),
            model_id,
            timeout: config.provider_timeout(),
            normalize: NormalizeOptions::new(MAX_SIDE, config),
        })
    }

    /// Point the client at a different endpoint (for testing with wiremock).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn model_id(&self) -> &str {
        self.model_id
    }

    async fn try_generate(&self, request: &DishRequest) -> Result<Vec<u8>> {
        let prompt = primary_prompt(request);
        debug!(dish = %request.dish_name, prompt_chars = prompt.chars().count(), "Gemini prompt built");
        let raw = self.request_image(&prompt).await?;
        normalize_blocking(raw, self.normalize).await
    }

    /// POST the prompt and return the first inline image of the first
    /// candidate.
    async fn request_image(&self, prompt: &str) -> Result<Vec<u8>> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model_id, self.api_key
        );
        let body = GenerateContentRequest {
            contents: [RequestContent {
                parts: [TextPart { text: prompt }],
            }],
            generation_config: GenerationConfig {
                candidate_count: 1,
                aspect_ratio: "1:1",
                add_watermark: false,
                safety_settings: &SAFETY_SETTINGS,
            },
        };

        let response = self.http.post(&url).json(&body).send().await?;
        let response = check_status(response).await?;
        let parsed: GenerateContentResponse = serde_json::from_slice(&response.bytes().await?)?;

        let data = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|content| content.parts.into_iter().find_map(|p| p.inline_data))
            .ok_or(PlatingError::EmptyResponse)?
            .data;

        BASE64
            .decode(data.as_bytes())
            .map_err(|e| PlatingError::Image(format!("invalid base64 image data: {e}")))
    }
}

#[async_trait]
impl ImageProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, request: &DishRequest) -> Option<Vec<u8>> {
        let start = Instant::now();
        match with_deadline(self.timeout, self.try_generate(request)).await {
            Ok(image) => {
                info!(
                    dish = %request.dish_name,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    kb = image.len() / 1024,
                    "Gemini generated image"
                );
                Some(image)
            }
            Err(e) => {
                warn!(dish = %request.dish_name, error = %e, kind = e.kind(), "Gemini generation failed");
                None
            }
        }
    }

    /// Lists models with the configured key.
    async fn health_check(&self) -> bool {
        let url = format!("{}/models?key={}", self.base_url, self.api_key);
        match self.http.get(&url).timeout(HEALTH_CHECK_TIMEOUT).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                warn!(error = %e.without_url(), "Gemini health check failed");
                false
            }
        }
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: [RequestContent<'a>; 1],
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct RequestContent<'a> {
    parts: [TextPart<'a>; 1],
}

#[derive(Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GenerationConfig {
    candidate_count: u32,
    aspect_ratio: &'static str,
    add_watermark: bool,
    safety_settings: &'static [SafetySetting],
}

#[derive(Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

impl SafetySetting {
    const fn block_none(category: &'static str) -> Self {
        Self {
            category,
            threshold: "BLOCK_NONE",
        }
    }
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    inline_data: Option<InlineData>,
}

#[derive(Deserialize)]
struct InlineData {
    data: String,
}
