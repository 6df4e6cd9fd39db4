use std::fs;
use std::path::{Path, PathBuf};

use instalicious_core::images::{ImageClientConfig, ImageMode, ImageSize, ResponseEncoding};
use instalicious_core::llm::{CompletionClientConfig, RetryPolicy};

/// High-level configuration for the Post Studio front end
#[derive(Clone, Debug)]
pub struct StudioConfig {
    pub completion: CompletionClientConfig,
    pub images: ImageClientConfig,
    pub studio: StudioSettings,
}

/// Front-end preferences that do not belong to either client
#[derive(Clone, Debug)]
pub struct StudioSettings {
    /// Passphrase required before generating; None disables the gate
    pub access_code: Option<String>,
    /// Where generated images are written
    pub output_dir: PathBuf,
    pub image_size: ImageSize,
    pub image_mode: ImageMode,
}

impl Default for StudioSettings {
    fn default() -> Self {
        Self {
            access_code: std::env::var("POST_STUDIO_ACCESS_CODE")
                .ok()
                .filter(|s| !s.is_empty()),
            output_dir: std::env::var("POST_STUDIO_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".")),
            image_size: ImageSize::Square,
            image_mode: ImageMode::default(),
        }
    }
}

impl Default for StudioConfig {
    fn default() -> Self {
        // Client defaults already consider env vars
        Self {
            completion: CompletionClientConfig::default(),
            images: ImageClientConfig::default(),
            studio: StudioSettings::default(),
        }
    }
}

impl StudioConfig {
    /// Load configuration from a TOML file (path via POST_STUDIO_CONFIG or ./post_studio.toml),
    /// overlaying values onto env-driven defaults.
    pub fn load() -> Self {
        let default = Self::default();
        let path =
            std::env::var("POST_STUDIO_CONFIG").unwrap_or_else(|_| "post_studio.toml".into());
        let p = Path::new(&path);
        if !p.exists() {
            tracing::info!(target = "post_studio", path = %path, "No TOML config found; using defaults/env");
            return default;
        }
        match fs::read_to_string(p) {
            Ok(s) => match Self::from_toml_str(&s, default.clone()) {
                Ok(cfg) => cfg,
                Err(e) => {
                    tracing::warn!(target = "post_studio", error = %e, "Failed to parse TOML; using defaults");
                    default
                }
            },
            Err(e) => {
                tracing::warn!(target = "post_studio", error = %e, "Failed to read TOML; using defaults");
                default
            }
        }
    }

    pub fn from_toml_str(s: &str, base: StudioConfig) -> Result<Self, toml::de::Error> {
        let t = toml::from_str::<StudioToml>(s)?;
        Ok(t.overlay(base))
    }
}

// =========================
// TOML overlay definitions
// =========================

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct StudioToml {
    pub access_code: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub llm: Option<LlmToml>,
    pub image: Option<ImageToml>,
    pub retry: Option<RetryToml>,
}

impl StudioToml {
    fn overlay(self, mut base: StudioConfig) -> StudioConfig {
        if let Some(x) = self.access_code {
            base.studio.access_code = Some(x).filter(|s| !s.is_empty());
        }
        if let Some(x) = self.output_dir {
            base.studio.output_dir = x;
        }
        if let Some(l) = self.llm {
            l.apply(&mut base.completion);
        }
        if let Some(i) = self.image {
            i.apply(&mut base.images, &mut base.studio);
        }
        if let Some(r) = self.retry {
            // One policy for both clients
            r.apply(&mut base.completion.retry);
            r.apply(&mut base.images.retry);
        }
        base
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct LlmToml {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub text_model: Option<String>,
    pub vision_model: Option<String>,
    pub request_timeout_ms: Option<u64>,
    pub temperature: Option<f32>,
}
impl LlmToml {
    fn apply(self, l: &mut CompletionClientConfig) {
        if let Some(x) = self.base_url {
            l.base_url = x;
        }
        if let Some(x) = self.api_key {
            l.api_key = Some(x);
        }
        if let Some(x) = self.text_model {
            l.text_model = x;
        }
        if let Some(x) = self.vision_model {
            l.vision_model = x;
        }
        if let Some(x) = self.request_timeout_ms {
            l.request_timeout_ms = x;
        }
        if let Some(x) = self.temperature {
            l.temperature = x.clamp(0.0, 2.0);
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct ImageToml {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub batch_model: Option<String>,
    pub style: Option<String>,
    pub size: Option<ImageSize>,
    pub batch: Option<bool>,
    pub encoding: Option<ResponseEncoding>,
    pub request_timeout_ms: Option<u64>,
}
impl ImageToml {
    fn apply(self, i: &mut ImageClientConfig, s: &mut StudioSettings) {
        if let Some(x) = self.base_url {
            i.base_url = x;
        }
        if let Some(x) = self.api_key {
            i.api_key = Some(x);
        }
        if let Some(x) = self.model {
            i.model = x;
        }
        if let Some(x) = self.batch_model {
            i.batch_model = x;
        }
        if let Some(x) = self.style {
            // An empty style disables the flag
            i.style = Some(x).filter(|s| !s.is_empty());
        }
        if let Some(x) = self.request_timeout_ms {
            i.request_timeout_ms = x;
        }
        if let Some(x) = self.size {
            s.image_size = x;
        }
        match (self.batch, self.encoding) {
            (Some(true), _) => s.image_mode = ImageMode::Batch,
            (_, Some(encoding)) => s.image_mode = ImageMode::Single { encoding },
            (Some(false), None) => s.image_mode = ImageMode::default(),
            (None, None) => {}
        }
    }
}

#[derive(Debug, Clone, Copy, Default, serde::Deserialize)]
struct RetryToml {
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
}
impl RetryToml {
    fn apply(self, r: &mut RetryPolicy) {
        if let Some(x) = self.max_attempts {
            r.max_attempts = x.max(1);
        }
        if let Some(x) = self.base_delay_ms {
            r.base_delay_ms = x;
        }
        if let Some(x) = self.max_delay_ms {
            r.max_delay_ms = x;
        }
    }
}
