//! Prompt Builder: turns a `PostRequest` into the ordered chat messages sent to the
//! completion endpoint.
//!
//! The builder is pure. It validates the user text at the boundary and keeps the
//! sanitized text next to the templated messages instead of only inside them.

use crate::{PostError, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

/// Longest user description accepted, in characters
pub const MAX_PROMPT_CHARS: usize = 4000;

/// Persona shared by every variant
pub const PERSONA_PROMPT: &str = "You are a helpful assistant helping a user optimize and create posts for Instagram centered around food and cooking. The goal is to help the user generate amazing posts and images for existing recipes, existing images, new recipes, new images, new restaurant experiences, or some combination of those things.";

const RECIPE_TASK: &str = "The user has a recipe that they would like to generate an Instagram post for. Generate a post and hashtags optimized to generate the most viral post possible, and an image prompt for a photo-realistic picture of the finished dish. If it is a recipe, you do not need to return the recipe itself.";

const DESCRIPTION_TASK: &str = "The user has a description that they would like to generate an Instagram post for. This will either be a description of a dish or an experience that they had at a restaurant or both. Generate a post and hashtags optimized to generate the most viral post possible, and an image prompt for a photo-realistic picture of the dish.";

const NO_IMAGE_TASK: &str = "The user would like an Instagram post optimized for engagement and virality based on the prompt they have given. This could be a recipe, a description of a dish, a description of a restaurant experience, etc. Generate a post and hashtags. Make sure the post is presented in a clear and organized manner.";

const WITH_IMAGE_TASK: &str = "The user has taken a photo of their meal and given a prompt about it. Generate a post and hashtags optimized to generate the most viral post possible.";

const PHOTO_TASK: &str = "The user has taken a photo of their meal and given a description of it. Write a prompt for an image generation model that recreates the pictured dish as a stunning, photo-realistic food photograph.";

const REFERENCE_IMAGE_TASK: &str = "Here is the photo of the dish. Use what you see (the food, plating, colors and setting) together with the description to write the image_prompt. Keep the image_prompt under 600 characters.";

const SHAPE_POST_ONLY: &str = r#"Return ONLY a JSON object with exactly these lowercase keys:
post: string = The post to be generated.
hashtags: array of strings = The hashtags to be generated, without the leading '#'."#;

const SHAPE_WITH_IMAGE_PROMPT: &str = r#"Return ONLY a JSON object with exactly these lowercase keys:
post: string = The post to be generated.
hashtags: array of strings = The hashtags to be generated, without the leading '#'.
image_prompt: string = A photo-realistic image prompt showing the dish."#;

const SHAPE_IMAGE_PROMPT_ONLY: &str = r#"Return ONLY a JSON object with exactly this lowercase key:
image_prompt: string = A photo-realistic image prompt showing the dish."#;

const EXAMPLE_POST_ONLY: &str = r#"Example Response:
{
    "post": "This is the post that was generated.",
    "hashtags": ["hashtag1", "hashtag2", "hashtag3"]
}"#;

const EXAMPLE_WITH_IMAGE_PROMPT: &str = r#"Example Response:
{
    "post": "This is the post that was generated.",
    "hashtags": ["hashtag1", "hashtag2", "hashtag3"],
    "image_prompt": "This is the image prompt that was generated."
}"#;

const EXAMPLE_IMAGE_PROMPT_ONLY: &str = r#"Example Response:
{
    "image_prompt": "This is the image prompt that was generated."
}"#;

/// Which post-generation mode is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostVariant {
    /// A pasted recipe
    Recipe,
    /// A free description of a dish or restaurant experience
    Description,
    /// A description plus a reference photo; the photo drives the image prompt
    WithImage,
    /// Post text and hashtags only
    NoImage,
}

impl PostVariant {
    /// Every variant except `NoImage` ends with a generated image
    pub fn wants_image_prompt(self) -> bool {
        !matches!(self, PostVariant::NoImage)
    }

    pub fn requires_reference_image(self) -> bool {
        matches!(self, PostVariant::WithImage)
    }

    /// Shape of the post call's reply. `WithImage` gets its image prompt from a
    /// separate vision call, so its post call asks for text only.
    pub fn post_reply(self) -> ReplyShape {
        match self {
            PostVariant::Recipe | PostVariant::Description => ReplyShape::PostWithImagePrompt,
            PostVariant::WithImage | PostVariant::NoImage => ReplyShape::Post,
        }
    }

    fn task(self) -> &'static str {
        match self {
            PostVariant::Recipe => RECIPE_TASK,
            PostVariant::Description => DESCRIPTION_TASK,
            PostVariant::WithImage => WITH_IMAGE_TASK,
            PostVariant::NoImage => NO_IMAGE_TASK,
        }
    }

    fn input_label(self) -> &'static str {
        match self {
            PostVariant::Recipe => "Recipe",
            PostVariant::Description => "Description",
            PostVariant::WithImage | PostVariant::NoImage => "Prompt",
        }
    }
}

impl FromStr for PostVariant {
    type Err = PostError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "recipe" => Ok(PostVariant::Recipe),
            "description" => Ok(PostVariant::Description),
            "with_image" => Ok(PostVariant::WithImage),
            "no_image" => Ok(PostVariant::NoImage),
            other => Err(PostError::Validation(format!(
                "Unknown post variant '{other}' (expected recipe, description, with_image or no_image)"
            ))),
        }
    }
}

/// Which completion endpoint a payload targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    Text,
    Vision,
}

/// Keys the model is asked to return
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyShape {
    /// `post` and `hashtags`
    Post,
    /// `post`, `hashtags` and `image_prompt`
    PostWithImagePrompt,
    /// `image_prompt` alone, read from a reference photo
    ImagePromptOnly,
}

impl ReplyShape {
    fn templates(self) -> (&'static str, &'static str) {
        match self {
            ReplyShape::Post => (SHAPE_POST_ONLY, EXAMPLE_POST_ONLY),
            ReplyShape::PostWithImagePrompt => (SHAPE_WITH_IMAGE_PROMPT, EXAMPLE_WITH_IMAGE_PROMPT),
            ReplyShape::ImagePromptOnly => (SHAPE_IMAGE_PROMPT_ONLY, EXAMPLE_IMAGE_PROMPT_ONLY),
        }
    }
}

/// User-supplied photo, already encoded (PNG, JPEG, WebP or GIF)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceImage {
    pub bytes: Vec<u8>,
    pub mime: String,
}

impl ReferenceImage {
    /// Wrap encoded bytes, detecting the format from magic bytes
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if bytes.is_empty() {
            return Err(PostError::Validation("Reference image is empty".into()));
        }
        let format = image::guess_format(&bytes).map_err(|e| {
            PostError::Validation(format!("Unsupported reference image format: {e}"))
        })?;
        let mime = match format {
            image::ImageFormat::Png => "image/png",
            image::ImageFormat::Jpeg => "image/jpeg",
            image::ImageFormat::WebP => "image/webp",
            image::ImageFormat::Gif => "image/gif",
            other => {
                return Err(PostError::Validation(format!(
                    "Unsupported reference image format: {other:?}; please upload a PNG or JPEG"
                )))
            }
        };
        Ok(Self {
            bytes,
            mime: mime.to_string(),
        })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        Self::from_bytes(bytes)
    }

    /// `data:` URL accepted by vision-capable chat endpoints
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, BASE64.encode(&self.bytes))
    }
}

/// Immutable description of one generation request
#[derive(Debug, Clone)]
pub struct PostRequest {
    pub user_prompt: String,
    pub variant: PostVariant,
    pub reference_image: Option<ReferenceImage>,
}

impl PostRequest {
    pub fn new(user_prompt: impl Into<String>, variant: PostVariant) -> Self {
        Self {
            user_prompt: user_prompt.into(),
            variant,
            reference_image: None,
        }
    }

    pub fn with_reference_image(mut self, image: ReferenceImage) -> Self {
        self.reference_image = Some(image);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrlPart {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrlPart },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// One chat message in OpenAI wire shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Parts(parts),
        }
    }

    pub fn has_image(&self) -> bool {
        match &self.content {
            MessageContent::Text(_) => false,
            MessageContent::Parts(parts) => parts
                .iter()
                .any(|p| matches!(p, ContentPart::ImageUrl { .. })),
        }
    }
}

/// Output of the builder: messages plus the endpoint they are meant for
#[derive(Debug, Clone)]
pub struct PromptPayload {
    pub endpoint: Endpoint,
    pub messages: Vec<ChatMessage>,
    /// Sanitized user text that was interpolated into the task message
    pub user_text: String,
    pub reply: ReplyShape,
}

impl PromptPayload {
    pub fn expects_image_prompt(&self) -> bool {
        self.reply != ReplyShape::Post
    }
}

/// Validate user text before it is embedded into an instruction
pub fn sanitize_user_text(raw: &str) -> Result<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return Err(PostError::Validation(
            "Please enter a prompt describing your recipe or meal.".into(),
        ));
    }
    let len = cleaned.chars().count();
    if len > MAX_PROMPT_CHARS {
        return Err(PostError::Validation(format!(
            "Prompt is too long ({len} characters, limit {MAX_PROMPT_CHARS})."
        )));
    }
    Ok(cleaned.to_string())
}

/// The reference photo a request may carry; only `WithImage` accepts one
fn reference_for(request: &PostRequest) -> Result<Option<&ReferenceImage>> {
    match (&request.reference_image, request.variant.requires_reference_image()) {
        (Some(img), true) => Ok(Some(img)),
        (None, true) => Err(PostError::Validation(
            "Please add a photo of your meal for this post type.".into(),
        )),
        (Some(_), false) => Err(PostError::Validation(
            "A photo can only be used with the with_image post type.".into(),
        )),
        (None, false) => Ok(None),
    }
}

fn system_messages(task: &str, label: &str, user_text: &str, reply: ReplyShape) -> Vec<ChatMessage> {
    let (shape, example) = reply.templates();
    let task = format!("{task}\n\n{label}: \"\"\"{user_text}\"\"\"\n\n{shape}");
    vec![
        ChatMessage::system(PERSONA_PROMPT),
        ChatMessage::system(task),
        ChatMessage::system(example),
    ]
}

/// Build the text-endpoint call that produces the post and hashtags.
///
/// `Recipe` and `Description` also ask for an image prompt here. `WithImage`
/// does not; see [`build_image_prompt`].
pub fn build_prompt(request: &PostRequest) -> Result<PromptPayload> {
    let variant = request.variant;
    let user_text = sanitize_user_text(&request.user_prompt)?;
    reference_for(request)?;

    let reply = variant.post_reply();
    let messages = system_messages(variant.task(), variant.input_label(), &user_text, reply);

    debug!(
        target = "prompt",
        ?variant,
        ?reply,
        messages = messages.len(),
        chars = user_text.chars().count(),
        "Built post payload"
    );

    Ok(PromptPayload {
        endpoint: Endpoint::Text,
        messages,
        user_text,
        reply,
    })
}

/// Build the vision call that turns the reference photo into an image prompt.
///
/// Returns `None` for requests without a reference photo. The reply carries
/// `image_prompt` only, so it fits the smaller vision token ceiling.
pub fn build_image_prompt(request: &PostRequest) -> Result<Option<PromptPayload>> {
    let user_text = sanitize_user_text(&request.user_prompt)?;
    let Some(img) = reference_for(request)? else {
        return Ok(None);
    };

    let reply = ReplyShape::ImagePromptOnly;
    let mut messages = system_messages(PHOTO_TASK, "Description", &user_text, reply);
    messages.push(ChatMessage::user_parts(vec![
        ContentPart::Text {
            text: REFERENCE_IMAGE_TASK.to_string(),
        },
        ContentPart::ImageUrl {
            image_url: ImageUrlPart {
                url: img.to_data_url(),
            },
        },
    ]));

    debug!(
        target = "prompt",
        mime = %img.mime,
        bytes = img.bytes.len(),
        "Built reference photo payload"
    );

    Ok(Some(PromptPayload {
        endpoint: Endpoint::Vision,
        messages,
        user_text,
        reply,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_png() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(2, 2, image::Rgb([200, 30, 30]));
        let mut buf = std::io::Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn every_variant_starts_with_one_system_message() {
        for variant in [
            PostVariant::Recipe,
            PostVariant::Description,
            PostVariant::NoImage,
        ] {
            let payload = build_prompt(&PostRequest::new("tomato soup", variant)).unwrap();
            assert_eq!(payload.messages[0].role, Role::System);
            assert_eq!(
                payload.messages[0].content,
                MessageContent::Text(PERSONA_PROMPT.to_string())
            );
            assert_eq!(
                payload
                    .messages
                    .iter()
                    .filter(|m| m.content == MessageContent::Text(PERSONA_PROMPT.to_string()))
                    .count(),
                1
            );
            assert_eq!(payload.endpoint, Endpoint::Text);
        }
    }

    #[test]
    fn text_variants_other_than_no_image_ask_for_an_image_prompt() {
        for variant in [PostVariant::Recipe, PostVariant::Description] {
            let payload = build_prompt(&PostRequest::new("tomato soup", variant)).unwrap();
            assert!(variant.wants_image_prompt());
            assert_eq!(payload.reply, ReplyShape::PostWithImagePrompt);
            match &payload.messages[1].content {
                MessageContent::Text(t) => assert!(t.contains("image_prompt")),
                other => panic!("unexpected content {other:?}"),
            }
            assert!(build_image_prompt(&PostRequest::new("tomato soup", variant))
                .unwrap()
                .is_none());
        }
        let payload = build_prompt(&PostRequest::new("tomato soup", PostVariant::NoImage)).unwrap();
        assert!(!payload.expects_image_prompt());
        assert!(!PostVariant::NoImage.wants_image_prompt());
    }

    #[test]
    fn user_text_is_interpolated_and_kept_separately() {
        let payload = build_prompt(&PostRequest::new(
            "  fresh strawberries, pie \u{7}",
            PostVariant::NoImage,
        ))
        .unwrap();
        assert_eq!(payload.user_text, "fresh strawberries, pie");
        match &payload.messages[1].content {
            MessageContent::Text(t) => {
                assert!(t.contains("\"\"\"fresh strawberries, pie\"\"\""));
                assert!(!t.contains("image_prompt"));
            }
            other => panic!("unexpected content {other:?}"),
        }
    }

    #[test]
    fn with_image_post_call_is_text_only() {
        let img = ReferenceImage::from_bytes(tiny_png()).unwrap();
        let req = PostRequest::new("my lasagna", PostVariant::WithImage).with_reference_image(img);
        let payload = build_prompt(&req).unwrap();

        assert_eq!(payload.endpoint, Endpoint::Text);
        assert_eq!(payload.reply, ReplyShape::Post);
        assert!(payload.messages.iter().all(|m| !m.has_image()));
    }

    #[test]
    fn photo_call_carries_data_url_and_targets_vision() {
        let img = ReferenceImage::from_bytes(tiny_png()).unwrap();
        assert_eq!(img.mime, "image/png");
        let req = PostRequest::new("my lasagna", PostVariant::WithImage).with_reference_image(img);
        let payload = build_image_prompt(&req).unwrap().unwrap();

        assert_eq!(payload.endpoint, Endpoint::Vision);
        assert_eq!(payload.reply, ReplyShape::ImagePromptOnly);
        assert_eq!(payload.messages[0].role, Role::System);
        match &payload.messages[1].content {
            MessageContent::Text(t) => {
                assert!(t.contains("\"\"\"my lasagna\"\"\""));
                assert!(t.contains("image_prompt"));
                assert!(!t.contains("hashtags"));
            }
            other => panic!("unexpected content {other:?}"),
        }
        let last = payload.messages.last().unwrap();
        assert_eq!(last.role, Role::User);
        assert!(last.has_image());

        let wire = serde_json::to_value(last).unwrap();
        let url = wire["content"][1]["image_url"]["url"].as_str().unwrap();
        assert!(url.starts_with("data:image/png;base64,"));
        assert_eq!(wire["content"][0]["type"], "text");
    }

    #[test]
    fn with_image_without_photo_is_rejected() {
        let req = PostRequest::new("my lasagna", PostVariant::WithImage);
        assert!(matches!(build_prompt(&req), Err(PostError::Validation(_))));
        assert!(matches!(build_image_prompt(&req), Err(PostError::Validation(_))));
    }

    #[test]
    fn photo_on_a_text_variant_is_rejected() {
        let img = ReferenceImage::from_bytes(tiny_png()).unwrap();
        for variant in [
            PostVariant::Recipe,
            PostVariant::Description,
            PostVariant::NoImage,
        ] {
            let req = PostRequest::new("my lasagna", variant).with_reference_image(img.clone());
            assert!(matches!(build_prompt(&req), Err(PostError::Validation(_))));
            assert!(matches!(build_image_prompt(&req), Err(PostError::Validation(_))));
        }
    }

    #[test]
    fn empty_and_oversized_prompts_are_rejected() {
        assert!(matches!(
            sanitize_user_text("   \n "),
            Err(PostError::Validation(_))
        ));
        let long = "a".repeat(MAX_PROMPT_CHARS + 1);
        assert!(matches!(
            sanitize_user_text(&long),
            Err(PostError::Validation(_))
        ));
    }

    #[test]
    fn unknown_image_bytes_are_rejected() {
        let err = ReferenceImage::from_bytes(b"not an image at all".to_vec()).unwrap_err();
        assert!(matches!(err, PostError::Validation(_)));
    }

    #[test]
    fn variant_parses_from_cli_spellings() {
        assert_eq!("no-image".parse::<PostVariant>().unwrap(), PostVariant::NoImage);
        assert_eq!("WITH_IMAGE".parse::<PostVariant>().unwrap(), PostVariant::WithImage);
        assert!("poem".parse::<PostVariant>().is_err());
    }
}
