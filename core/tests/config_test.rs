use instalicious_core::images::{ImageClient, ImageClientConfig};
use instalicious_core::llm::{CompletionClient, CompletionClientConfig, RetryPolicy};
use instalicious_core::Result;
use serial_test::serial;

const VARS: &[&str] = &[
    "OPENAI_BASE_URL",
    "OPENAI_API_KEY",
    "POST_TEXT_MODEL",
    "POST_VISION_MODEL",
    "POST_TEMPERATURE",
    "REQUEST_TIMEOUT_MS",
    "RETRY_MAX_ATTEMPTS",
    "RETRY_BASE_DELAY_MS",
    "IMAGE_MODEL",
    "IMAGE_BATCH_MODEL",
    "IMAGE_STYLE",
];

fn clear_env() {
    for v in VARS {
        std::env::remove_var(v);
    }
}

#[test]
#[serial]
fn completion_config_defaults() {
    clear_env();

    let cfg = CompletionClientConfig::default();
    assert_eq!(cfg.base_url, "https://api.openai.com/v1");
    assert_eq!(cfg.api_key, None);
    assert_eq!(cfg.text_model, "gpt-3.5-turbo-1106");
    assert_eq!(cfg.temperature, 0.75);
    assert_eq!(cfg.top_p, 1.0);
    assert_eq!(cfg.max_tokens_text, 750);
    assert_eq!(cfg.max_tokens_vision, 250);
    assert_eq!(cfg.retry.max_attempts, 3);
}

#[test]
#[serial]
fn completion_config_reads_env() {
    clear_env();
    std::env::set_var("OPENAI_BASE_URL", "http://test:9000/v1");
    std::env::set_var("OPENAI_API_KEY", "sk-env");
    std::env::set_var("POST_TEXT_MODEL", "gpt-4-1106-preview");
    std::env::set_var("REQUEST_TIMEOUT_MS", "5000");
    std::env::set_var("RETRY_MAX_ATTEMPTS", "5");
    std::env::set_var("RETRY_BASE_DELAY_MS", "0");

    let cfg = CompletionClientConfig::default();
    assert_eq!(cfg.base_url, "http://test:9000/v1");
    assert_eq!(cfg.api_key.as_deref(), Some("sk-env"));
    assert_eq!(cfg.text_model, "gpt-4-1106-preview");
    assert_eq!(cfg.request_timeout_ms, 5000);
    assert_eq!(
        cfg.retry,
        RetryPolicy {
            max_attempts: 5,
            base_delay_ms: 0,
            max_delay_ms: 2_000
        }
    );

    clear_env();
}

#[test]
#[serial]
fn zero_attempts_in_env_falls_back_to_default() {
    clear_env();
    std::env::set_var("RETRY_MAX_ATTEMPTS", "0");
    assert_eq!(RetryPolicy::default().max_attempts, 3);
    clear_env();
}

#[test]
#[serial]
fn image_config_defaults() {
    clear_env();
    let cfg = ImageClientConfig::default();
    assert_eq!(cfg.model, "dall-e-3");
    assert_eq!(cfg.batch_model, "dall-e-2");
    assert_eq!(cfg.style.as_deref(), Some("natural"));
    assert_eq!(cfg.quality, "standard");
}

#[test]
#[serial]
fn clients_build_from_env() -> Result<()> {
    clear_env();
    let _completion = CompletionClient::from_env()?;
    let _images = ImageClient::from_env()?;
    Ok(())
}
