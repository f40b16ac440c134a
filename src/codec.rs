//! Media codec: raw uploads in, base64 + media type out, and back again for downloads.

use std::io::Cursor;

use base64::Engine;
use image::{ImageFormat, ImageReader};

use crate::{error::EncodingError, models::EncodedImage};

const SUPPORTED: [ImageFormat; 4] = [ImageFormat::Png, ImageFormat::Jpeg, ImageFormat::WebP, ImageFormat::Gif];

/// Sniffs the format from magic bytes and checks that the header can actually be read.
pub fn detect_media_type(raw: &[u8]) -> Result<String, EncodingError> {
    if raw.is_empty() {
        return Err(EncodingError::Empty);
    }
    let format = image::guess_format(raw).map_err(|_| EncodingError::UnknownFormat)?;
    if !SUPPORTED.contains(&format) {
        return Err(EncodingError::Unsupported(format!("{format:?}")));
    }
    ImageReader::with_format(Cursor::new(raw), format)
        .into_dimensions()
        .map_err(|e| EncodingError::Unreadable(e.to_string()))?;
    Ok(format.to_mime_type().to_string())
}

pub fn encode(raw: &[u8]) -> Result<EncodedImage, EncodingError> {
    let media_type = detect_media_type(raw)?;
    Ok(EncodedImage {
        data: base64::engine::general_purpose::STANDARD.encode(raw),
        media_type,
    })
}

pub fn decode(image: &EncodedImage) -> Result<Vec<u8>, EncodingError> {
    base64::engine::general_purpose::STANDARD
        .decode(image.data.trim())
        .map_err(|e| EncodingError::InvalidBase64(e.to_string()))
}

pub fn data_url(image: &EncodedImage) -> String {
    format!("data:{};base64,{}", image.media_type, image.data)
}

pub fn parse_data_url(url: &str) -> Result<EncodedImage, EncodingError> {
    let rest = url.strip_prefix("data:").ok_or(EncodingError::InvalidDataUrl)?;
    let (media_type, data) = rest.split_once(";base64,").ok_or(EncodingError::InvalidDataUrl)?;
    if media_type.is_empty() {
        return Err(EncodingError::InvalidDataUrl);
    }
    Ok(EncodedImage::new(data, media_type))
}

/// Longest prefix of `s` that is at most `max` bytes and ends on a char boundary.
pub fn truncate_str(s: &str, max: usize) -> &str {
    let mut end = max.min(s.len());
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Short log-friendly description of a base64 payload, same shape the Gemini logs use.
pub fn preview(data: &str) -> String {
    if data.len() > 50 {
        format!("{}...[{} chars total]", truncate_str(data, 50), data.len())
    } else {
        data.to_string()
    }
}
