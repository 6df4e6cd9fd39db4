use crate::{PostError, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::DynamicImage;

/// Decode encoded image bytes (PNG, JPEG, WebP...) into a bitmap
pub fn decode_bytes(bytes: &[u8]) -> Result<DynamicImage> {
    if bytes.is_empty() {
        return Err(PostError::ImageDecode("empty image payload".into()));
    }
    image::load_from_memory(bytes)
        .map_err(|e| PostError::ImageDecode(format!("unreadable image data: {e}")))
}

/// Decode an inline base64 payload, with or without a `data:` URL prefix
pub fn decode_inline(payload: &str) -> Result<DynamicImage> {
    let trimmed = payload.trim();
    let b64 = match trimmed.strip_prefix("data:") {
        Some(rest) => rest
            .split_once(',')
            .map(|(_, data)| data)
            .ok_or_else(|| PostError::ImageDecode("data URL without payload".into()))?,
        None => trimmed,
    };
    let bytes = BASE64
        .decode(b64.as_bytes())
        .map_err(|e| PostError::ImageDecode(format!("invalid base64 image: {e}")))?;
    decode_bytes(&bytes)
}

/// Encode a bitmap as PNG bytes
pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut buf = std::io::Cursor::new(Vec::new());
    image
        .write_to(&mut buf, image::ImageFormat::Png)
        .map_err(|e| PostError::ImageDecode(format!("PNG encoding failed: {e}")))?;
    Ok(buf.into_inner())
}
