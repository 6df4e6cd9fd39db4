//! Image Request Client
//!
//! Talks to an OpenAI-compatible `/images/generations` endpoint and turns each
//! returned entry (fetchable URL or inline base64) into a decoded bitmap.

use crate::llm::RetryPolicy;
use crate::{PostError, Result};
use async_trait::async_trait;
use image::DynamicImage;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::decode::{decode_bytes, decode_inline, encode_png};

/// Number of images produced in batch mode
pub const BATCH_SIZE: usize = 3;

/// Configuration for ImageClient loaded from environment variables
#[derive(Debug, Clone)]
pub struct ImageClientConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    /// Model for single-image mode
    pub model: String,
    /// Model for the 3-image batch mode
    pub batch_model: String,
    /// Style flag sent in single-image mode
    pub style: Option<String>,
    pub quality: String,
    pub request_timeout_ms: u64,
    pub retry: RetryPolicy,
}

impl Default for ImageClientConfig {
    fn default() -> Self {
        Self {
            base_url: std::env::var("OPENAI_BASE_URL")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            api_key: std::env::var("OPENAI_API_KEY").ok().filter(|s| !s.is_empty()),
            model: std::env::var("IMAGE_MODEL")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "dall-e-3".to_string()),
            batch_model: std::env::var("IMAGE_BATCH_MODEL")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "dall-e-2".to_string()),
            style: Some(
                std::env::var("IMAGE_STYLE")
                    .ok()
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| "natural".to_string()),
            ),
            quality: "standard".to_string(),
            request_timeout_ms: std::env::var("REQUEST_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(120_000),
            retry: RetryPolicy::default(),
        }
    }
}

/// Output aspect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageSize {
    /// 1024x1024, feed posts
    Square,
    /// 1024x1792, stories
    Story,
}

impl ImageSize {
    pub fn as_str(self) -> &'static str {
        match self {
            ImageSize::Square => "1024x1024",
            ImageSize::Story => "1024x1792",
        }
    }
}

impl FromStr for ImageSize {
    type Err = PostError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "square" | "1024x1024" => Ok(ImageSize::Square),
            "story" | "stories" | "1024x1792" => Ok(ImageSize::Story),
            other => Err(PostError::Validation(format!(
                "Unknown image size '{other}' (expected square or stories)"
            ))),
        }
    }
}

/// How the endpoint should hand back image data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseEncoding {
    Url,
    InlineBase64,
}

impl ResponseEncoding {
    fn wire_name(self) -> &'static str {
        match self {
            ResponseEncoding::Url => "url",
            ResponseEncoding::InlineBase64 => "b64_json",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum ImageMode {
    /// One image at the requested size, with the style flag
    Single { encoding: ResponseEncoding },
    /// Exactly `BATCH_SIZE` square images, inline encoded
    Batch,
}

impl Default for ImageMode {
    fn default() -> Self {
        ImageMode::Single {
            encoding: ResponseEncoding::InlineBase64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub prompt: String,
    pub size: ImageSize,
    pub mode: ImageMode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Url(String),
    InlineBase64,
}

/// One decoded image
#[derive(Debug, Clone)]
pub struct ImageResult {
    pub image: DynamicImage,
    pub source: ImageSource,
    pub revised_prompt: Option<String>,
}

impl ImageResult {
    pub fn to_png_bytes(&self) -> Result<Vec<u8>> {
        encode_png(&self.image)
    }

    pub fn save_png(&self, path: impl AsRef<Path>) -> Result<()> {
        let bytes = self.to_png_bytes()?;
        std::fs::write(path, bytes)?;
        Ok(())
    }
}

/// Seam between the orchestrator and the image endpoint
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageApi: Send + Sync {
    async fn generate(&self, request: &ImageRequest) -> Result<Vec<ImageResult>>;
}

/// HTTP client for image generation
#[derive(Clone)]
pub struct ImageClient {
    http: Client,
    cfg: ImageClientConfig,
}

impl ImageClient {
    pub fn new(cfg: ImageClientConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(cfg.request_timeout_ms))
            .build()
            .map_err(|e| PostError::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { http, cfg })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(ImageClientConfig::default())
    }

    pub fn config(&self) -> &ImageClientConfig {
        &self.cfg
    }

    pub fn request_body(&self, request: &ImageRequest) -> Value {
        match request.mode {
            ImageMode::Single { encoding } => {
                let mut body = json!({
                    "model": self.cfg.model,
                    "prompt": request.prompt,
                    "n": 1,
                    "size": request.size.as_str(),
                    "quality": self.cfg.quality,
                    "response_format": encoding.wire_name(),
                });
                if let Some(style) = &self.cfg.style {
                    body["style"] = json!(style);
                }
                body
            }
            ImageMode::Batch => json!({
                "model": self.cfg.batch_model,
                "prompt": request.prompt,
                "n": BATCH_SIZE,
                "size": ImageSize::Square.as_str(),
                "response_format": ResponseEncoding::InlineBase64.wire_name(),
            }),
        }
    }

    /// Generate and decode images for a prompt
    /// Contract:
    /// - Single mode yields exactly one image
    /// - Batch mode yields exactly `BATCH_SIZE` images or fails with `BatchIncomplete`
    /// - Transport, rejection and decode failures are retried under the shared policy
    pub async fn generate(&self, request: &ImageRequest) -> Result<Vec<ImageResult>> {
        if request.prompt.trim().is_empty() {
            return Err(PostError::Validation("Image prompt is empty".into()));
        }
        let body = self.request_body(request);
        let url = format!(
            "{}/images/generations",
            self.cfg.base_url.trim_end_matches('/')
        );

        let (images, retry) = self
            .cfg
            .retry
            .run("image_client", |attempt| {
                let body = &body;
                let url = &url;
                async move {
                    debug!(target = "image_client", attempt, mode = ?request.mode, "POST {}", url);
                    let val = self.post_generation(url, body).await?;
                    self.decode_entries(&val, request.mode).await
                }
            })
            .await?;

        info!(
            target = "image_client",
            images = images.len(),
            attempts = retry.attempts_made,
            size = request.size.as_str(),
            "Images generated"
        );
        Ok(images)
    }

    async fn post_generation(&self, url: &str, body: &Value) -> Result<Value> {
        let mut req = self
            .http
            .post(url)
            .header("content-type", "application/json");
        if let Some(key) = &self.cfg.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req
            .json(body)
            .send()
            .await
            .map_err(|e| PostError::Transport(format!("Image generation HTTP error: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            warn!(target = "image_client", %status, body = %text, "Image generation error");
            return Err(PostError::Rejected {
                status: status.as_u16(),
                body: text,
            });
        }
        resp.json().await.map_err(|e| {
            PostError::MalformedResponse(format!("Failed to parse image generation JSON: {e}"))
        })
    }

    async fn decode_entries(&self, val: &Value, mode: ImageMode) -> Result<Vec<ImageResult>> {
        let entries = val
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| PostError::MalformedResponse("missing 'data' array".into()))?;

        let mut images = Vec::with_capacity(entries.len());
        let mut last_error = None;
        for entry in entries {
            match self.decode_entry(entry).await {
                Ok(img) => images.push(img),
                Err(e) => {
                    warn!(target = "image_client", error = %e, "Skipping undecodable image entry");
                    last_error = Some(e);
                }
            }
        }

        match mode {
            ImageMode::Batch => {
                if images.len() != BATCH_SIZE {
                    return Err(PostError::BatchIncomplete {
                        expected: BATCH_SIZE,
                        decoded: images.len(),
                    });
                }
            }
            ImageMode::Single { .. } => {
                if images.is_empty() {
                    return Err(last_error.unwrap_or_else(|| {
                        PostError::ImageDecode("response contained no images".into())
                    }));
                }
                images.truncate(1);
            }
        }
        Ok(images)
    }

    async fn decode_entry(&self, entry: &Value) -> Result<ImageResult> {
        let revised_prompt = entry
            .get("revised_prompt")
            .and_then(Value::as_str)
            .map(str::to_string);

        if let Some(b64) = entry.get("b64_json").and_then(Value::as_str) {
            return Ok(ImageResult {
                image: decode_inline(b64)?,
                source: ImageSource::InlineBase64,
                revised_prompt,
            });
        }
        if let Some(url) = entry.get("url").and_then(Value::as_str) {
            let bytes = self.fetch(url).await?;
            return Ok(ImageResult {
                image: decode_bytes(&bytes)?,
                source: ImageSource::Url(url.to_string()),
                revised_prompt,
            });
        }
        Err(PostError::MalformedResponse(
            "image entry has neither 'b64_json' nor 'url'".into(),
        ))
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        debug!(target = "image_client", url = %url, "Fetching generated image");
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| PostError::Transport(format!("Image download failed: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            return Err(PostError::Rejected {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| PostError::Transport(format!("Image download interrupted: {e}")))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl ImageApi for ImageClient {
    async fn generate(&self, request: &ImageRequest) -> Result<Vec<ImageResult>> {
        ImageClient::generate(self, request).await
    }
}
