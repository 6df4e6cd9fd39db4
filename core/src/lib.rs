// Instalicious Core Library
// Prompt building, completion and image clients, post orchestration

pub mod images;
pub mod llm;
pub mod orchestrator;
pub mod prompt;
pub mod telemetry;

// Export core types
pub use images::{
    ImageApi, ImageClient, ImageClientConfig, ImageMode, ImageRequest, ImageResult, ImageSize,
    ImageSource, ResponseEncoding,
};
pub use llm::{
    Completion, CompletionApi, CompletionClient, CompletionClientConfig, ImagePromptCompletion,
    PostResult, RetryFailure, RetryPolicy, RetryState,
};
pub use orchestrator::{OrchestratorOptions, PostOrchestrator, PostStage, SessionContext};
pub use prompt::{
    build_image_prompt, build_prompt, ChatMessage, ContentPart, Endpoint, MessageContent,
    PostRequest, PostVariant, PromptPayload, ReferenceImage, ReplyShape, Role,
};

// Error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PostError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request rejected: status={status} body={body}")]
    Rejected { status: u16, body: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Reply truncated at the {max_tokens}-token output limit")]
    Truncated { max_tokens: u32 },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Generation unavailable after {attempts} attempt(s): {last_error}")]
    GenerationUnavailable { attempts: u32, last_error: String },

    #[error("Image decode error: {0}")]
    ImageDecode(String),

    #[error("Incomplete image batch: expected {expected}, decoded {decoded}")]
    BatchIncomplete { expected: usize, decoded: usize },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl PostError {
    /// Whether a client may re-issue the same request after this error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PostError::Transport(_)
                | PostError::Rejected { .. }
                | PostError::MalformedResponse(_)
                | PostError::Truncated { .. }
                | PostError::ImageDecode(_)
                | PostError::BatchIncomplete { .. }
        )
    }

    /// Short message suitable for showing to the end user
    pub fn user_message(&self) -> String {
        match self {
            PostError::Validation(msg) => msg.clone(),
            PostError::GenerationUnavailable { .. } => {
                "We couldn't generate your post right now. Please try again.".to_string()
            }
            PostError::BatchIncomplete { .. } | PostError::ImageDecode(_) => {
                "We couldn't generate your images right now. Please try again.".to_string()
            }
            other => format!("Something went wrong: {other}"),
        }
    }
}

pub type Result<T> = std::result::Result<T, PostError>;
