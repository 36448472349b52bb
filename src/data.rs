use anyhow::{Context, Result};
use std::path::Path;

pub const PNG_MIME: &str = "image/png";
pub const JPEG_MIME: &str = "image/jpeg";

/// Binary payload handed to a vision provider alongside a prompt.
#[derive(Debug, Clone)]
pub struct DataAttachment {
    pub bytes: Vec<u8>,
    pub mime: String,
    pub name: Option<String>,
}

/// Reads an image file and tags it with a mime type inferred from its name.
pub fn load_image(path: &Path) -> Result<DataAttachment> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read image file: {}", path.display()))?;
    let name = path
        .file_name()
        .and_then(|value| value.to_str())
        .map(|value| value.to_string());
    Ok(image_from_bytes(bytes, name.as_deref()))
}

/// The filename is only a mime hint. Unknown names fall back to sniffing the
/// bytes, then to PNG.
pub fn image_from_bytes(bytes: Vec<u8>, name: Option<&str>) -> DataAttachment {
    let mime = image_mime(&bytes, name).to_string();
    DataAttachment {
        bytes,
        mime,
        name: name.map(|value| value.to_string()),
    }
}

pub fn image_mime(bytes: &[u8], name: Option<&str>) -> &'static str {
    if let Some(mime) = name
        .and_then(|value| Path::new(value).extension())
        .and_then(|ext| ext.to_str())
        .and_then(|ext| mime_from_extension(&ext.to_lowercase()))
    {
        return mime;
    }
    sniff_image_mime(bytes).unwrap_or(PNG_MIME)
}

fn sniff_image_mime(bytes: &[u8]) -> Option<&'static str> {
    let kind = infer::get(bytes)?;
    let detected = kind.mime_type();
    if detected.starts_with("image/") {
        Some(detected)
    } else {
        None
    }
}

fn mime_from_extension(ext: &str) -> Option<&'static str> {
    match ext {
        "png" => Some(PNG_MIME),
        "jpg" | "jpeg" => Some(JPEG_MIME),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "bmp" => Some("image/bmp"),
        "tiff" | "tif" => Some("image/tiff"),
        "heic" => Some("image/heic"),
        _ => None,
    }
}

/// Extensions accepted as note pages.
pub fn is_supported_page_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| matches!(ext.to_lowercase().as_str(), "png" | "jpg" | "jpeg"))
        .unwrap_or(false)
}
