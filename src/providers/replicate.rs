//! Fallback provider: Replicate predictions API.
//!
//! A prediction is created with `Prefer: wait`, which usually returns the
//! finished result directly. Predictions still running after that are
//! polled at their `urls.get` link until they reach a terminal state.
//! The output is a URL (or list of URLs) that we download.
//!
//! See: <https://replicate.com/docs/reference/http>

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::normalize::{NormalizeOptions, normalize_blocking};
use super::poll::PollConfig;
use super::prompt::fallback_prompt;
use super::traits::ImageProvider;
use super::{check_status, http_client, with_deadline};
use crate::{DishRequest, ImageConfig, PlatingError, Result};

/// Default base URL for the Replicate API.
pub const DEFAULT_BASE_URL: &str = "https://api.replicate.com";

/// Model used when the configured alias is unknown.
pub const DEFAULT_MODEL: &str = "flux-1.1-pro";

/// Longest side of normalized output.
const MAX_SIDE: u32 = 2048;

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

const FLUX_NEGATIVE: &str =
    "text, watermark, logo, people, hands, blurry, cartoon, 3d render, drawing, bad quality, ugly";
const KONTEXT_NEGATIVE: &str =
    "text, watermark, logo, people, hands, blurry, cartoon, 3d render, drawing";
const SDXL_NEGATIVE: &str = "text, watermark, logo, people, hands, blurry";

/// A Replicate model and the input parameters we send it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplicateModel {
    pub alias: &'static str,
    /// `owner/name` on Replicate.
    pub id: &'static str,
    pub guidance_scale: f32,
    pub num_inference_steps: u32,
    pub aspect_ratio: Option<&'static str>,
    pub negative_prompt: &'static str,
}

impl ReplicateModel {
    fn is_flux(&self) -> bool {
        self.id.contains("flux")
    }
}

pub const MODELS: &[ReplicateModel] = &[
    ReplicateModel {
        alias: "flux-1.1-pro",
        id: "black-forest-labs/flux-1.1-pro",
        guidance_scale: 7.5,
        num_inference_steps: 30,
        aspect_ratio: Some("1:1"),
        negative_prompt: FLUX_NEGATIVE,
    },
    ReplicateModel {
        alias: "flux-kontext-pro",
        id: "black-forest-labs/flux-kontext-pro",
        guidance_scale: 7.0,
        num_inference_steps: 28,
        aspect_ratio: Some("1:1"),
        negative_prompt: KONTEXT_NEGATIVE,
    },
    ReplicateModel {
        alias: "sdxl",
        id: "stability-ai/sdxl",
        guidance_scale: 7.5,
        num_inference_steps: 25,
        aspect_ratio: None,
        negative_prompt: SDXL_NEGATIVE,
    },
    ReplicateModel {
        alias: "realvisxl",
        id: "sgriebel/realvisxl-v4.0",
        guidance_scale: 7.0,
        num_inference_steps: 30,
        aspect_ratio: None,
        negative_prompt: SDXL_NEGATIVE,
    },
];

/// Resolve a model alias; unknown aliases resolve to [`DEFAULT_MODEL`].
pub fn resolve_model(alias: &str) -> ReplicateModel {
    MODELS
        .iter()
        .find(|m| m.alias == alias)
        .or_else(|| MODELS.iter().find(|m| m.alias == DEFAULT_MODEL))
        .copied()
        .unwrap_or(MODELS[0])
}

/// Client for image generation through Replicate.
#[derive(Clone)]
pub struct ReplicateProvider {
    api_key: String,
    http: Client,
    base_url: String,
    model: ReplicateModel,
    timeout: Duration,
    poll: PollConfig,
    normalize: NormalizeOptions,
}

impl ReplicateProvider {
    /// Create a provider for the configured model. An empty API key is a
    /// configuration error.
    pub fn new(api_key: impl Into<String>, config: &ImageConfig) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(PlatingError::Configuration(
                "REPLICATE_API_KEY is not set".to_string(),
            ));
        }
        if !MODELS.iter().any(|m| m.alias == config.replicate_model) {
            warn!(model = %config.replicate_model, fallback = DEFAULT_MODEL, "unknown Replicate image model");
        }

        Ok(Self {
            api_key,
            http: http_client()?,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: resolve_model(&config.replicate_model),
            timeout: config.provider_timeout(),
            poll: PollConfig::default(),
            normalize: NormalizeOptions::new(MAX_SIDE, config),
        })
    }

    /// Point the client at a different endpoint (for testing with wiremock).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_poll_config(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    pub fn model(&self) -> &ReplicateModel {
        &self.model
    }

    /// Input parameters for a prompt.
    fn prediction_input<'a>(&self, prompt: &'a str) -> PredictionInput<'a> {
        let flux = self.model.is_flux();
        PredictionInput {
            prompt,
            num_outputs: 1,
            guidance_scale: self.model.guidance_scale,
            num_inference_steps: self.model.num_inference_steps,
            aspect_ratio: self.model.aspect_ratio,
            negative_prompt: self.model.negative_prompt,
            output_format: flux.then_some("jpg"),
            output_quality: flux.then_some(90),
        }
    }

    async fn try_generate(&self, request: &DishRequest) -> Result<Vec<u8>> {
        let prompt = fallback_prompt(request);
        debug!(dish = %request.dish_name, prompt_chars = prompt.chars().count(), "Replicate prompt built");
        let prediction = self.create_prediction(&prompt).await?;
        let prediction = self.wait_for(prediction).await?;
        let url = prediction.output_url().ok_or(PlatingError::EmptyResponse)?;
        let raw = self.download(&url).await?;
        normalize_blocking(raw, self.normalize).await
    }

    async fn create_prediction(&self, prompt: &str) -> Result<Prediction> {
        let url = format!("{}/v1/models/{}/predictions", self.base_url, self.model.id);
        let body = CreatePrediction {
            input: self.prediction_input(prompt),
        };
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("Prefer", "wait")
            .json(&body)
            .send()
            .await?;
        let response = check_status(response).await?;
        Ok(serde_json::from_slice(&response.bytes().await?)?)
    }

    /// Poll until the prediction reaches a terminal state.
    ///
    /// Transient poll failures are retried on the same schedule; anything
    /// else ends the wait.
    async fn wait_for(&self, mut prediction: Prediction) -> Result<Prediction> {
        let mut attempt = 0;
        loop {
            match prediction.status.as_str() {
                "succeeded" => return Ok(prediction),
                "failed" | "canceled" => {
                    return Err(PlatingError::PredictionFailed(prediction.error_message()));
                }
                status => debug!(id = %prediction.id, status, attempt, "prediction still running"),
            }

            if attempt >= self.poll.max_attempts {
                return Err(PlatingError::PredictionFailed(format!(
                    "prediction {} not finished after {attempt} polls",
                    prediction.id
                )));
            }
            let poll_url = prediction
                .urls
                .as_ref()
                .and_then(|u| u.get.clone())
                .ok_or_else(|| PlatingError::PredictionFailed("prediction has no status URL".to_string()))?;

            let mut delay = self.poll.delay_for_attempt(attempt);
            loop {
                tokio::time::sleep(delay).await;
                attempt += 1;
                match self.fetch_prediction(&poll_url).await {
                    Ok(next) => {
                        prediction = next;
                        break;
                    }
                    Err(e) if e.is_transient() && attempt < self.poll.max_attempts => {
                        debug!(error = %e, attempt, "transient error polling prediction");
                        delay = e
                            .retry_after()
                            .unwrap_or_else(|| self.poll.delay_for_attempt(attempt));
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    }

    async fn fetch_prediction(&self, url: &str) -> Result<Prediction> {
        let response = self.http.get(url).bearer_auth(&self.api_key).send().await?;
        let response = check_status(response).await?;
        Ok(serde_json::from_slice(&response.bytes().await?)?)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = check_status(self.http.get(url).send().await?).await?;
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(PlatingError::EmptyResponse);
        }
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl ImageProvider for ReplicateProvider {
    fn name(&self) -> &str {
        "replicate"
    }

    async fn generate(&self, request: &DishRequest) -> Option<Vec<u8>> {
        let start = Instant::now();
        match with_deadline(self.timeout, self.try_generate(request)).await {
            Ok(image) => {
                info!(
                    dish = %request.dish_name,
                    model = self.model.alias,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    kb = image.len() / 1024,
                    "Replicate generated image"
                );
                Some(image)
            }
            Err(e) => {
                warn!(dish = %request.dish_name, error = %e, kind = e.kind(), "Replicate generation failed");
                None
            }
        }
    }

    /// Fetches the configured model's record.
    async fn health_check(&self) -> bool {
        let url = format!("{}/v1/models/{}", self.base_url, self.model.id);
        let result = self
            .http
            .get(&url)
            .bearer_auth(&self.api_key)
            .timeout(HEALTH_CHECK_TIMEOUT)
            .send()
            .await;
        match result {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                warn!(error = %e.without_url(), "Replicate health check failed");
                false
            }
        }
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Serialize)]
struct CreatePrediction<'a> {
    input: PredictionInput<'a>,
}

#[derive(Debug, Serialize)]
struct PredictionInput<'a> {
    prompt: &'a str,
    num_outputs: u32,
    guidance_scale: f32,
    num_inference_steps: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    aspect_ratio: Option<&'static str>,
    negative_prompt: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_format: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_quality: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    #[serde(default)]
    id: String,
    status: String,
    #[serde(default)]
    output: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<serde_json::Value>,
    #[serde(default)]
    urls: Option<PredictionUrls>,
}

#[derive(Debug, Deserialize)]
struct PredictionUrls {
    get: Option<String>,
}

impl Prediction {
    /// First output URL; models return either a string or a list.
    fn output_url(&self) -> Option<String> {
        match self.output.as_ref()? {
            serde_json::Value::String(url) => Some(url.clone()),
            serde_json::Value::Array(items) => items.first()?.as_str().map(str::to_string),
            _ => None,
        }
    }

    fn error_message(&self) -> String {
        match &self.error {
            Some(serde_json::Value::String(msg)) => msg.clone(),
            Some(other) => other.to_string(),
            None => format!("prediction {} ended with status {}", self.id, self.status),
        }
    }
}
