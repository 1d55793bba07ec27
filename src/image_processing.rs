use std::io::Cursor;

use image::{DynamicImage, ImageFormat};

use crate::error::{Result, StudioError};

/// Extensions the gallery treats as images. Anything else in a gallery
/// directory (sidecars included) is ignored.
pub const GALLERY_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "webp"];

pub fn is_gallery_extension(ext: &str) -> bool {
    let ext = ext.to_ascii_lowercase();
    GALLERY_EXTENSIONS.contains(&ext.as_str())
}

/// Maps a user-facing format name ("PNG", "jpg", "webp", ...) to the encoder
/// the image crate should use. "jpg" and "jpeg" share the JPEG encoder.
pub fn format_from_name(name: &str) -> Result<ImageFormat> {
    match name.trim().to_ascii_lowercase().as_str() {
        "png" => Ok(ImageFormat::Png),
        "jpg" | "jpeg" => Ok(ImageFormat::Jpeg),
        "webp" => Ok(ImageFormat::WebP),
        other => Err(StudioError::validation(format!(
            "unsupported image format: {other}"
        ))),
    }
}

pub fn detect_mime_type(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some("image/png");
    }
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("image/jpeg");
    }
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    None
}

/// Format name for an upload, taken from its magic bytes.
pub fn detect_format_name(bytes: &[u8]) -> Option<&'static str> {
    match detect_mime_type(bytes)? {
        "image/png" => Some("png"),
        "image/jpeg" => Some("jpeg"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

pub fn mime_for_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

pub fn decode_image(bytes: &[u8]) -> std::result::Result<DynamicImage, image::ImageError> {
    image::load_from_memory(bytes)
}

/// Encodes `image` in `format`. JPEG has no alpha channel, so the image is
/// flattened to RGB first.
pub fn encode_image(image: &DynamicImage, format: ImageFormat) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    let result = match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8())
            .write_to(&mut Cursor::new(&mut output), format),
        ImageFormat::WebP => DynamicImage::ImageRgba8(image.to_rgba8())
            .write_to(&mut Cursor::new(&mut output), format),
        _ => image.write_to(&mut Cursor::new(&mut output), format),
    };
    result.map_err(|err| StudioError::io(format!("encode image failed: {err}")))?;
    Ok(output)
}
