//! LLM module: chat-completion client, retry policy, and reply parsing
//!
//! This module provides:
//! - `CompletionClientConfig`, `CompletionClient` for OpenAI-compatible chat completions
//! - `RetryPolicy` / `RetryState`, the bounded retry loop shared with the image client
//! - `PostResult`, `parse_post_content` and `parse_image_prompt_content` for turning JSON
//!   replies into typed results

mod client;
mod response;
mod retry;

pub use client::{
    Completion, CompletionApi, CompletionClient, CompletionClientConfig, ImagePromptCompletion,
};
#[cfg(test)]
pub use client::MockCompletionApi;
pub use response::{normalize_hashtags, parse_image_prompt_content, parse_post_content, PostResult};
pub use retry::{RetryFailure, RetryPolicy, RetryState, DEFAULT_MAX_ATTEMPTS};
