//! Image payloads as carried in request bodies: data-URLs or bare base64.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Decode the image bytes out of a data-URL such as
/// `data:image/jpeg;base64,/9j/...`.
///
/// Everything up to and including the first comma is treated as the header
/// and discarded; a string without a comma is taken as bare base64. ASCII
/// whitespace (line-wrapped base64) is ignored.
pub fn decode_image_payload(payload: &str) -> Result<Vec<u8>> {
    let encoded = match payload.split_once(',') {
        Some((_, data)) => data,
        None => payload,
    };
    let compact: String = encoded
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    if compact.is_empty() {
        return Err(anyhow!("image payload is empty"));
    }
    STANDARD
        .decode(compact.as_bytes())
        .context("image payload is not valid base64")
}

/// Wrap encoded image bytes as a base64 data-URL.
pub fn encode_data_url(bytes: &[u8], mime: &str) -> String {
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

/// MIME type from a file extension. Unknown extensions fall back to jpeg.
pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("bmp") => "image/bmp",
        _ => "image/jpeg",
    }
}
