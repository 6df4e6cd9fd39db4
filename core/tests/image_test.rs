use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use instalicious_core::images::{
    ImageClient, ImageClientConfig, ImageMode, ImageRequest, ImageSize, ImageSource,
    ResponseEncoding, BATCH_SIZE,
};
use instalicious_core::llm::RetryPolicy;
use instalicious_core::prompt::ReferenceImage;
use instalicious_core::{PostError, Result};
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn encoded(format: ImageFormat) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([220, 40, 60])));
    let mut buf = std::io::Cursor::new(Vec::new());
    img.write_to(&mut buf, format).expect("encode test image");
    buf.into_inner()
}

fn b64_png() -> String {
    BASE64.encode(encoded(ImageFormat::Png))
}

fn client_for(server: &MockServer, retry: RetryPolicy) -> Result<ImageClient> {
    ImageClient::new(ImageClientConfig {
        base_url: server.uri(),
        api_key: Some("sk-test".to_string()),
        model: "dall-e-3".to_string(),
        batch_model: "dall-e-2".to_string(),
        style: Some("natural".to_string()),
        quality: "standard".to_string(),
        request_timeout_ms: 5_000,
        retry,
    })
}

fn request(mode: ImageMode, size: ImageSize) -> ImageRequest {
    ImageRequest {
        prompt: "A rustic strawberry pie on a wooden table".to_string(),
        size,
        mode,
    }
}

#[tokio::test]
async fn single_inline_image_is_decoded() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/images/generations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "created": 1,
            "data": [{ "b64_json": b64_png(), "revised_prompt": "A pie" }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, RetryPolicy::immediate(3))?;
    let images = client
        .generate(&request(
            ImageMode::Single {
                encoding: ResponseEncoding::InlineBase64,
            },
            ImageSize::Story,
        ))
        .await?;

    assert_eq!(images.len(), 1);
    assert_eq!(images[0].source, ImageSource::InlineBase64);
    assert_eq!(images[0].revised_prompt.as_deref(), Some("A pie"));
    assert_eq!((images[0].image.width(), images[0].image.height()), (8, 8));

    let requests = server.received_requests().await.unwrap_or_default();
    let body: Value = serde_json::from_slice(&requests[0].body)?;
    assert_eq!(body["n"], 1);
    assert_eq!(body["size"], "1024x1792");
    assert_eq!(body["style"], "natural");
    assert_eq!(body["response_format"], "b64_json");
    Ok(())
}

#[tokio::test]
async fn single_url_image_is_fetched_then_decoded() -> Result<()> {
    let server = MockServer::start().await;
    let image_url = format!("{}/files/pie.png", server.uri());
    Mock::given(method("POST"))
        .and(path("/images/generations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "url": image_url }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/pie.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(encoded(ImageFormat::Png))
                .insert_header("content-type", "image/png"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, RetryPolicy::immediate(3))?;
    let images = client
        .generate(&request(
            ImageMode::Single {
                encoding: ResponseEncoding::Url,
            },
            ImageSize::Square,
        ))
        .await?;

    assert_eq!(images.len(), 1);
    assert_eq!(images[0].source, ImageSource::Url(image_url));
    Ok(())
}

#[tokio::test]
async fn batch_returns_exactly_three_images() -> Result<()> {
    let server = MockServer::start().await;
    let entries: Vec<Value> = (0..BATCH_SIZE)
        .map(|_| json!({ "b64_json": b64_png() }))
        .collect();
    Mock::given(method("POST"))
        .and(path("/images/generations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": entries })))
        .mount(&server)
        .await;

    let client = client_for(&server, RetryPolicy::immediate(3))?;
    // Batch ignores the story size and always asks for squares
    let images = client
        .generate(&request(ImageMode::Batch, ImageSize::Story))
        .await?;
    assert_eq!(images.len(), 3);

    let requests = server.received_requests().await.unwrap_or_default();
    let body: Value = serde_json::from_slice(&requests[0].body)?;
    assert_eq!(body["model"], "dall-e-2");
    assert_eq!(body["n"], 3);
    assert_eq!(body["size"], "1024x1024");
    assert!(body.get("style").is_none());
    Ok(())
}

#[tokio::test]
async fn batch_with_two_decodable_entries_fails() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/images/generations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                { "b64_json": b64_png() },
                { "b64_json": b64_png() },
                { "b64_json": "bm90IGFuIGltYWdl" }
            ]
        })))
        .expect(3)
        .mount(&server)
        .await;

    let client = client_for(&server, RetryPolicy::immediate(3))?;
    let err = client
        .generate(&request(ImageMode::Batch, ImageSize::Square))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PostError::BatchIncomplete {
            expected: 3,
            decoded: 2
        }
    ));
    Ok(())
}

#[tokio::test]
async fn rejected_image_call_carries_underlying_error() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/images/generations"))
        .respond_with(ResponseTemplate::new(400).set_body_string("content_policy_violation"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, RetryPolicy::immediate(1))?;
    let err = client
        .generate(&request(ImageMode::default(), ImageSize::Square))
        .await
        .unwrap_err();
    match err {
        PostError::Rejected { status, body } => {
            assert_eq!(status, 400);
            assert!(body.contains("content_policy_violation"));
        }
        other => panic!("expected Rejected, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn empty_prompt_is_rejected_without_a_call() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = client_for(&server, RetryPolicy::immediate(3))?;
    let mut req = request(ImageMode::default(), ImageSize::Square);
    req.prompt = "   ".to_string();
    let err = client.generate(&req).await.unwrap_err();
    assert!(matches!(err, PostError::Validation(_)));
    Ok(())
}

#[tokio::test]
async fn jpeg_reference_round_trips_through_inline_response() -> Result<()> {
    // The reference goes out as a data URL; the service answers with PNG bytes
    let reference = ReferenceImage::from_bytes(encoded(ImageFormat::Jpeg))?;
    assert_eq!(reference.mime, "image/jpeg");
    let data_url = reference.to_data_url();
    assert!(data_url.starts_with("data:image/jpeg;base64,"));

    let echoed = instalicious_core::images::decode::decode_inline(&data_url)?;
    let server = MockServer::start().await;
    let png = instalicious_core::images::decode::encode_png(&echoed)?;
    Mock::given(method("POST"))
        .and(path("/images/generations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "b64_json": BASE64.encode(png) }]
        })))
        .mount(&server)
        .await;

    let client = client_for(&server, RetryPolicy::immediate(1))?;
    let images = client
        .generate(&request(ImageMode::default(), ImageSize::Square))
        .await?;
    assert_eq!((images[0].image.width(), images[0].image.height()), (8, 8));

    let dir = std::env::temp_dir().join(format!("instalicious-{}", std::process::id()));
    std::fs::create_dir_all(&dir)?;
    let out = dir.join("round_trip.png");
    images[0].save_png(&out)?;
    let reloaded = image::open(&out).expect("saved PNG opens");
    assert_eq!(reloaded.width(), 8);
    std::fs::remove_dir_all(&dir)?;
    Ok(())
}
