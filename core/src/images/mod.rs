//! Image module: image-generation client and payload decoding
//!
//! - `ImageClient` requests single images (URL or inline base64) or a fixed batch of three
//! - `decode` turns returned payloads into bitmaps and bitmaps back into PNG bytes

mod client;
pub mod decode;

pub use client::{
    ImageApi, ImageClient, ImageClientConfig, ImageMode, ImageRequest, ImageResult, ImageSize,
    ImageSource, ResponseEncoding, BATCH_SIZE,
};
#[cfg(test)]
pub use client::MockImageApi;
