use crate::prompt::{Endpoint, PromptPayload, ReplyShape};
use crate::{PostError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, info};

use super::response::{
    extract_text_from_chat_completions, finish_reason, parse_image_prompt_content,
    parse_post_content, PostResult,
};
use super::retry::{RetryFailure, RetryPolicy, RetryState};

/// Configuration for CompletionClient loaded from environment variables
#[derive(Debug, Clone)]
pub struct CompletionClientConfig {
    pub base_url: String, // e.g., https://api.openai.com/v1
    pub api_key: Option<String>,
    pub text_model: String,
    pub vision_model: String,
    pub request_timeout_ms: u64,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens_text: u32,
    pub max_tokens_vision: u32,
    pub retry: RetryPolicy,
}

impl Default for CompletionClientConfig {
    fn default() -> Self {
        Self {
            base_url: std::env::var("OPENAI_BASE_URL")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            api_key: std::env::var("OPENAI_API_KEY").ok().filter(|s| !s.is_empty()),
            text_model: std::env::var("POST_TEXT_MODEL")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "gpt-3.5-turbo-1106".to_string()),
            vision_model: std::env::var("POST_VISION_MODEL")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "gpt-4o".to_string()),
            request_timeout_ms: std::env::var("REQUEST_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60_000),
            temperature: std::env::var("POST_TEMPERATURE")
                .ok()
                .and_then(|v| v.parse::<f32>().ok())
                .unwrap_or(0.75),
            top_p: 1.0,
            max_tokens_text: 750,
            max_tokens_vision: 250,
            retry: RetryPolicy::default(),
        }
    }
}

/// A parsed post together with the attempts it took
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub post: PostResult,
    pub retry: RetryState,
}

/// Image prompt read from a reference photo
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagePromptCompletion {
    pub image_prompt: String,
    pub retry: RetryState,
}

/// Seam between the orchestrator and the completion endpoint
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionApi: Send + Sync {
    /// Post text and hashtags (plus an image prompt when the payload asks for one)
    async fn complete(&self, payload: &PromptPayload) -> Result<Completion>;

    /// Image prompt alone, for an `ImagePromptOnly` payload
    async fn complete_image_prompt(&self, payload: &PromptPayload)
        -> Result<ImagePromptCompletion>;
}

/// HTTP client for OpenAI-compatible chat completions in JSON-object mode
#[derive(Clone)]
pub struct CompletionClient {
    pub(crate) http: Client,
    pub(crate) cfg: CompletionClientConfig,
}

impl CompletionClient {
    pub fn new(cfg: CompletionClientConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(cfg.request_timeout_ms))
            .build()
            .map_err(|e| PostError::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { http, cfg })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(CompletionClientConfig::default())
    }

    pub fn config(&self) -> &CompletionClientConfig {
        &self.cfg
    }

    /// Request body for a payload; identical across retries
    pub fn request_body(&self, payload: &PromptPayload) -> Value {
        let model = match payload.endpoint {
            Endpoint::Text => &self.cfg.text_model,
            Endpoint::Vision => &self.cfg.vision_model,
        };
        let max_tokens = self.max_tokens(payload.endpoint);
        json!({
            "model": model,
            "messages": payload.messages,
            "temperature": self.cfg.temperature,
            "top_p": self.cfg.top_p,
            "max_tokens": max_tokens,
            "response_format": { "type": "json_object" },
        })
    }

    fn max_tokens(&self, endpoint: Endpoint) -> u32 {
        match endpoint {
            Endpoint::Text => self.cfg.max_tokens_text,
            Endpoint::Vision => self.cfg.max_tokens_vision,
        }
    }

    /// Generate a post for the given payload
    /// Contract:
    /// - Input: a post payload from `build_prompt`
    /// - Output: PostResult plus the RetryState of this call
    /// - Error: GenerationUnavailable once retries are spent; non-retryable errors as-is
    pub async fn complete(&self, payload: &PromptPayload) -> Result<Completion> {
        if payload.reply == ReplyShape::ImagePromptOnly {
            return Err(PostError::Validation(
                "image-prompt payloads go through complete_image_prompt".into(),
            ));
        }
        let expects_image_prompt = payload.expects_image_prompt();
        let (post, retry) = self
            .run_chat(payload, |content| parse_post_content(content, expects_image_prompt))
            .await?;
        info!(
            target = "llm_client",
            attempts = retry.attempts_made,
            hashtags = post.hashtags.len(),
            has_image_prompt = post.image_prompt.is_some(),
            "Post generated"
        );
        Ok(Completion { post, retry })
    }

    /// Read an image prompt from a reference photo payload (`build_image_prompt`)
    pub async fn complete_image_prompt(
        &self,
        payload: &PromptPayload,
    ) -> Result<ImagePromptCompletion> {
        if payload.reply != ReplyShape::ImagePromptOnly {
            return Err(PostError::Validation(
                "post payloads go through complete".into(),
            ));
        }
        let (image_prompt, retry) = self.run_chat(payload, parse_image_prompt_content).await?;
        info!(
            target = "llm_client",
            attempts = retry.attempts_made,
            chars = image_prompt.chars().count(),
            "Image prompt generated"
        );
        Ok(ImagePromptCompletion {
            image_prompt,
            retry,
        })
    }

    /// POST the payload under the retry policy and parse each reply with `parse`.
    /// Retryable exhaustion becomes `GenerationUnavailable`.
    async fn run_chat<T, P>(&self, payload: &PromptPayload, parse: P) -> Result<(T, RetryState)>
    where
        P: Fn(&str) -> Result<T>,
    {
        let body = self.request_body(payload);
        let max_tokens = self.max_tokens(payload.endpoint);
        let url = format!(
            "{}/chat/completions",
            self.cfg.base_url.trim_end_matches('/')
        );

        let outcome = self
            .cfg
            .retry
            .run("llm_client", |attempt| {
                let body = &body;
                let url = &url;
                let parse = &parse;
                async move {
                    debug!(target = "llm_client", attempt, reply = ?payload.reply, "POST {} via Chat Completions", url);
                    let content = self.send_once(url, body, max_tokens).await?;
                    parse(content.as_str())
                }
            })
            .await;

        match outcome {
            Ok(done) => Ok(done),
            Err(RetryFailure { error, state }) if error.is_retryable() => {
                error!(
                    target = "llm_client",
                    attempts = state.attempts_made,
                    error = %error,
                    "Generation unavailable"
                );
                Err(PostError::GenerationUnavailable {
                    attempts: state.attempts_made,
                    last_error: error.to_string(),
                })
            }
            Err(RetryFailure { error, .. }) => Err(error),
        }
    }

    async fn send_once(&self, url: &str, body: &Value, max_tokens: u32) -> Result<String> {
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
            .map_err(|e| PostError::Transport(format!("Chat Completions HTTP error: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            error!(target = "llm_client", %status, body = %text, "Chat Completions error");
            return Err(PostError::Rejected {
                status: status.as_u16(),
                body: text,
            });
        }
        let val: Value = resp.json().await.map_err(|e| {
            PostError::MalformedResponse(format!("Failed to parse Chat Completions JSON: {e}"))
        })?;
        // A length stop means the JSON object was cut off mid-way
        if finish_reason(&val) == Some("length") {
            return Err(PostError::Truncated { max_tokens });
        }
        extract_text_from_chat_completions(&val).ok_or_else(|| {
            PostError::MalformedResponse(
                "Missing choices[0].message.content in chat completions".into(),
            )
        })
    }
}

#[async_trait]
impl CompletionApi for CompletionClient {
    async fn complete(&self, payload: &PromptPayload) -> Result<Completion> {
        CompletionClient::complete(self, payload).await
    }

    async fn complete_image_prompt(
        &self,
        payload: &PromptPayload,
    ) -> Result<ImagePromptCompletion> {
        CompletionClient::complete_image_prompt(self, payload).await
    }
}
