// Post Orchestrator
//
// AwaitingInput -> GeneratingPost -> PostReady, with Failed reachable from the
// generating stage. All per-user state lives in an explicit SessionContext.
use crate::images::{ImageApi, ImageClient, ImageMode, ImageRequest, ImageResult, ImageSize};
use crate::llm::{CompletionApi, CompletionClient, PostResult};
use crate::prompt::{build_image_prompt, build_prompt, PostRequest};
use crate::{PostError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostStage {
    AwaitingInput,
    GeneratingPost,
    PostReady,
    Failed,
}

impl PostStage {
    /// Allowed edges of the session state machine; `reset` is handled separately
    pub fn can_transition_to(self, next: PostStage) -> bool {
        use PostStage::*;
        matches!(
            (self, next),
            (AwaitingInput, GeneratingPost)
                | (GeneratingPost, PostReady)
                | (GeneratingPost, Failed)
                | (PostReady, GeneratingPost)
        )
    }
}

/// Per-session state handed to every orchestrator call
#[derive(Debug, Clone)]
pub struct SessionContext {
    id: String,
    stage: PostStage,
    request: Option<PostRequest>,
    post: Option<PostResult>,
    images: Vec<ImageResult>,
    completion_attempts: Option<u32>,
    last_error: Option<String>,
    updated_at: DateTime<Utc>,
}

impl SessionContext {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            stage: PostStage::AwaitingInput,
            request: None,
            post: None,
            images: Vec::new(),
            completion_attempts: None,
            last_error: None,
            updated_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn stage(&self) -> PostStage {
        self.stage
    }

    pub fn request(&self) -> Option<&PostRequest> {
        self.request.as_ref()
    }

    pub fn post(&self) -> Option<&PostResult> {
        self.post.as_ref()
    }

    pub fn images(&self) -> &[ImageResult] {
        &self.images
    }

    /// Attempts the completion client needed for the stored post
    pub fn completion_attempts(&self) -> Option<u32> {
        self.completion_attempts
    }

    /// User-facing warning from the last failed call, if any
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Back to AwaitingInput, discarding all stored results
    pub fn reset(&mut self) {
        debug!(target = "orchestrator", session = %self.id, from = ?self.stage, "Resetting session");
        self.stage = PostStage::AwaitingInput;
        self.request = None;
        self.clear_results();
        self.last_error = None;
        self.touch();
    }

    fn transition(&mut self, next: PostStage) -> Result<()> {
        if !self.stage.can_transition_to(next) {
            return Err(PostError::InvalidState(format!(
                "cannot move from {:?} to {:?}",
                self.stage, next
            )));
        }
        debug!(target = "orchestrator", session = %self.id, from = ?self.stage, to = ?next, "Stage transition");
        self.stage = next;
        self.touch();
        Ok(())
    }

    fn clear_results(&mut self) {
        self.post = None;
        self.images.clear();
        self.completion_attempts = None;
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorOptions {
    pub image_mode: ImageMode,
    pub image_size: ImageSize,
    /// When false the image stage is skipped even if an image prompt is returned
    pub generate_images: bool,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            image_mode: ImageMode::default(),
            image_size: ImageSize::Square,
            generate_images: true,
        }
    }
}

/// Sequences prompt building, completion and image generation for one session
pub struct PostOrchestrator {
    completion: Arc<dyn CompletionApi>,
    images: Arc<dyn ImageApi>,
    options: OrchestratorOptions,
}

impl PostOrchestrator {
    pub fn new(
        completion: Arc<dyn CompletionApi>,
        images: Arc<dyn ImageApi>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            completion,
            images,
            options,
        }
    }

    /// Build with HTTP clients configured from the environment
    pub fn from_env(options: OrchestratorOptions) -> Result<Self> {
        Ok(Self::new(
            Arc::new(CompletionClient::from_env()?),
            Arc::new(ImageClient::from_env()?),
            options,
        ))
    }

    pub fn options(&self) -> &OrchestratorOptions {
        &self.options
    }

    /// Run one request through the pipeline, storing the outcome in `session`.
    ///
    /// Validation problems are reported before any remote call and leave the
    /// session in `AwaitingInput`. Remote failures move it to `Failed` with no
    /// partial results kept.
    pub async fn generate(&self, session: &mut SessionContext, request: PostRequest) -> Result<()> {
        if session.stage != PostStage::AwaitingInput {
            return Err(PostError::InvalidState(format!(
                "session is {:?}; reset it before generating a new post",
                session.stage
            )));
        }

        let payloads =
            build_prompt(&request).and_then(|post| Ok((post, build_image_prompt(&request)?)));
        let (post_payload, photo_payload) = match payloads {
            Ok(p) => p,
            Err(e) => {
                warn!(target = "orchestrator", session = %session.id, error = %e, "Rejected input");
                session.last_error = Some(e.user_message());
                session.touch();
                return Err(e);
            }
        };

        session.last_error = None;
        session.transition(PostStage::GeneratingPost)?;
        info!(
            target = "orchestrator",
            session = %session.id,
            variant = ?request.variant,
            reply = ?post_payload.reply,
            photo = photo_payload.is_some(),
            "Generating post"
        );
        session.request = Some(request);

        let completion = match self.completion.complete(&post_payload).await {
            Ok(c) => c,
            Err(e) => return Err(fail(session, e)),
        };
        session.completion_attempts = Some(completion.retry.attempts_made);
        let mut post = completion.post;

        // The photo call runs after the post call and supplies the image prompt
        if let Some(photo) = &photo_payload {
            match self.completion.complete_image_prompt(photo).await {
                Ok(c) => post.image_prompt = Some(c.image_prompt),
                Err(e) => return Err(fail(session, e)),
            }
        }
        let image_prompt = post.image_prompt.clone();
        session.post = Some(post);

        if let Some(prompt) = image_prompt.filter(|_| self.options.generate_images) {
            match self.run_image_stage(&prompt).await {
                Ok(images) => session.images = images,
                Err(e) => return Err(fail(session, e)),
            }
        }

        session.transition(PostStage::PostReady)?;
        info!(
            target = "orchestrator",
            session = %session.id,
            images = session.images.len(),
            "Post ready"
        );
        Ok(())
    }

    /// Rerun only the image step for a ready post, replacing its images.
    ///
    /// On failure the previous post and images are kept and the session stays
    /// `PostReady`.
    pub async fn regenerate_images(&self, session: &mut SessionContext) -> Result<()> {
        if session.stage != PostStage::PostReady {
            return Err(PostError::InvalidState(format!(
                "images can only be regenerated for a ready post (session is {:?})",
                session.stage
            )));
        }
        let prompt = session
            .post
            .as_ref()
            .and_then(|p| p.image_prompt.clone())
            .ok_or_else(|| PostError::InvalidState("post has no image prompt".into()))?;

        session.transition(PostStage::GeneratingPost)?;
        let outcome = self.run_image_stage(&prompt).await;
        session.transition(PostStage::PostReady)?;

        match outcome {
            Ok(images) => {
                session.images = images;
                session.last_error = None;
                Ok(())
            }
            Err(e) => {
                warn!(target = "orchestrator", session = %session.id, error = %e, "Image regeneration failed");
                session.last_error = Some(e.user_message());
                Err(e)
            }
        }
    }

    async fn run_image_stage(&self, prompt: &str) -> Result<Vec<ImageResult>> {
        let request = ImageRequest {
            prompt: prompt.to_string(),
            size: self.options.image_size,
            mode: self.options.image_mode,
        };
        self.images.generate(&request).await
    }
}

fn fail(session: &mut SessionContext, err: PostError) -> PostError {
    warn!(target = "orchestrator", session = %session.id, error = %err, "Generation failed");
    session.clear_results();
    session.last_error = Some(err.user_message());
    // GeneratingPost -> Failed is always a legal edge here
    if let Err(e) = session.transition(PostStage::Failed) {
        warn!(target = "orchestrator", error = %e, "Unexpected stage while failing");
        session.stage = PostStage::Failed;
    }
    err
}
