use crate::{PostError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Post text, hashtags and (for image-bearing variants) an image prompt.
///
/// Hashtags are stored without a leading `#`; it is added only when rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostResult {
    pub post: String,
    pub hashtags: Vec<String>,
    pub image_prompt: Option<String>,
}

impl PostResult {
    /// `#tag` tokens joined by spaces
    pub fn rendered_hashtags(&self) -> String {
        self.hashtags
            .iter()
            .map(|h| format!("#{h}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Text ready to paste into a post: body, blank line, hashtags
    pub fn caption(&self) -> String {
        if self.hashtags.is_empty() {
            return self.post.clone();
        }
        format!("{}\n\n{}", self.post, self.rendered_hashtags())
    }
}

/// Strip `#`, whitespace and empties from raw model hashtags
pub fn normalize_hashtags<I, S>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw.into_iter()
        .map(|s| s.as_ref().trim().trim_start_matches('#').trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

pub(crate) fn extract_text_from_chat_completions(v: &Value) -> Option<String> {
    v.get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()
        .map(|s| s.to_string())
}

/// `choices[0].finish_reason`, when the endpoint reports one
pub(crate) fn finish_reason(v: &Value) -> Option<&str> {
    v.get("choices")?.get(0)?.get("finish_reason")?.as_str()
}

/// Outermost `{...}` span, tolerating code fences or prose around the object
fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if start >= end {
        return None;
    }
    Some(&raw[start..=end])
}

fn reply_object(content: &str) -> Result<Map<String, Value>> {
    let json = extract_json_object(content).ok_or_else(|| {
        PostError::MalformedResponse("assistant reply contains no JSON object".into())
    })?;
    let val: Value = serde_json::from_str(json)
        .map_err(|e| PostError::MalformedResponse(format!("invalid JSON in reply: {e}")))?;
    match val {
        Value::Object(obj) => Ok(obj),
        _ => Err(PostError::MalformedResponse("reply is not a JSON object".into())),
    }
}

fn non_empty_str<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Parse the assistant's JSON reply into a `PostResult`
pub fn parse_post_content(content: &str, expects_image_prompt: bool) -> Result<PostResult> {
    let obj = reply_object(content)?;

    let post = non_empty_str(&obj, "post")
        .ok_or_else(|| PostError::MalformedResponse("missing or empty 'post'".into()))?
        .to_string();

    let hashtags = match obj.get("hashtags") {
        Some(Value::Array(items)) => {
            normalize_hashtags(items.iter().filter_map(Value::as_str))
        }
        // Older prompts sometimes yield "#a #b" or "a, b"
        Some(Value::String(s)) => normalize_hashtags(
            s.split(|c: char| c.is_whitespace() || c == ',')
                .filter(|t| !t.is_empty()),
        ),
        Some(_) => {
            return Err(PostError::MalformedResponse(
                "'hashtags' is neither a list nor a string".into(),
            ))
        }
        None => return Err(PostError::MalformedResponse("missing 'hashtags'".into())),
    };

    let image_prompt = if expects_image_prompt {
        non_empty_str(&obj, "image_prompt").map(str::to_string)
    } else {
        None
    };

    Ok(PostResult {
        post,
        hashtags,
        image_prompt,
    })
}

/// Parse a reply that carries only `image_prompt`; here the key is required
pub fn parse_image_prompt_content(content: &str) -> Result<String> {
    let obj = reply_object(content)?;
    non_empty_str(&obj, "image_prompt")
        .map(str::to_string)
        .ok_or_else(|| PostError::MalformedResponse("missing or empty 'image_prompt'".into()))
}
