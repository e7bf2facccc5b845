//! Decoder registry: maps content to typed payloads.
//!
//! A [`Decoder`] turns a byte stream into a [`ReadValue`]. The
//! registry selects a decoder by, in order: content sniff (magic
//! bytes), file extension of the URL path with the query string
//! stripped, then MIME type. There is no default decoder; a miss maps
//! to `NO_READER` at the client layer.

use crate::result::ReadValue;
use std::io::Cursor;
use std::sync::Arc;
use thiserror::Error;

/// Errors produced by decoders and the image encode helper.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("decode failed: {0}")]
    Failed(String),

    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),
}

/// Decodes one content type family into a typed payload.
pub trait Decoder: Send + Sync {
    /// Short name for logging.
    fn name(&self) -> &str;

    /// Returns true if the content's leading bytes identify this
    /// decoder's format.
    fn sniff(&self, bytes: &[u8]) -> bool {
        let _ = bytes;
        false
    }

    /// Lowercase file extensions this decoder claims.
    fn extensions(&self) -> &[&str] {
        &[]
    }

    /// MIME types this decoder claims (compared case-insensitively
    /// against the base type, parameters stripped).
    fn mime_types(&self) -> &[&str] {
        &[]
    }

    fn decode(&self, bytes: &[u8]) -> Result<ReadValue, DecodeError>;
}

/// Ordered decoder lookup.
pub struct DecoderRegistry {
    decoders: Vec<Arc<dyn Decoder>>,
}

impl DecoderRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            decoders: Vec::new(),
        }
    }

    /// Creates a registry with the built-in image and text decoders.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ImageDecoder));
        registry.register(Arc::new(TextDecoder));
        registry
    }

    pub fn register(&mut self, decoder: Arc<dyn Decoder>) {
        self.decoders.push(decoder);
    }

    /// Finds a decoder for the given content. Order: sniff, URL
    /// extension (query stripped), MIME type.
    pub fn find(&self, url: &str, mime: &str, bytes: &[u8]) -> Option<Arc<dyn Decoder>> {
        if !bytes.is_empty() {
            if let Some(d) = self.decoders.iter().find(|d| d.sniff(bytes)) {
                return Some(d.clone());
            }
        }

        if let Some(ext) = url_extension(url) {
            if let Some(d) = self
                .decoders
                .iter()
                .find(|d| d.extensions().iter().any(|e| *e == ext))
            {
                return Some(d.clone());
            }
        }

        let base_mime = mime.split(';').next().unwrap_or("").trim();
        if !base_mime.is_empty() {
            if let Some(d) = self.decoders.iter().find(|d| {
                d.mime_types()
                    .iter()
                    .any(|m| m.eq_ignore_ascii_case(base_mime))
            }) {
                return Some(d.clone());
            }
        }

        None
    }
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Extracts the lowercase extension from a URL path, stripping query
/// string and fragment first.
pub(crate) fn url_extension(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let segment = path.rsplit('/').next().unwrap_or(path);
    let (_, ext) = segment.rsplit_once('.')?;
    if ext.is_empty() {
        None
    } else {
        Some(ext.to_ascii_lowercase())
    }
}

/// Built-in raster image decoder over the common web formats.
pub struct ImageDecoder;

impl Decoder for ImageDecoder {
    fn name(&self) -> &str {
        "image"
    }

    fn sniff(&self, bytes: &[u8]) -> bool {
        bytes.starts_with(b"\x89PNG")
            || bytes.starts_with(b"\xff\xd8\xff")
            || bytes.starts_with(b"GIF8")
            || bytes.starts_with(b"BM")
            || bytes.starts_with(b"II*\x00")
            || bytes.starts_with(b"MM\x00*")
    }

    fn extensions(&self) -> &[&str] {
        &["png", "jpg", "jpeg", "gif", "bmp", "tif", "tiff"]
    }

    fn mime_types(&self) -> &[&str] {
        &[
            "image/png",
            "image/jpeg",
            "image/jpg",
            "image/gif",
            "image/bmp",
            "image/tiff",
        ]
    }

    fn decode(&self, bytes: &[u8]) -> Result<ReadValue, DecodeError> {
        image::load_from_memory(bytes)
            .map(ReadValue::Image)
            .map_err(|e| DecodeError::Failed(e.to_string()))
    }
}

/// Built-in text decoder.
pub struct TextDecoder;

impl Decoder for TextDecoder {
    fn name(&self) -> &str {
        "text"
    }

    fn extensions(&self) -> &[&str] {
        &["txt", "json", "xml", "html", "csv"]
    }

    fn mime_types(&self) -> &[&str] {
        &[
            "text/plain",
            "text/html",
            "text/xml",
            "text/csv",
            "application/json",
            "application/xml",
        ]
    }

    fn decode(&self, bytes: &[u8]) -> Result<ReadValue, DecodeError> {
        Ok(ReadValue::Text(String::from_utf8_lossy(bytes).into_owned()))
    }
}

/// Encodes an image into the named format (`png`, `jpg`, ... or an
/// `image/*` MIME type). Used by the local tile store's write path.
pub fn encode_image(image: &image::DynamicImage, format: &str) -> Result<Vec<u8>, DecodeError> {
    let format = format.rsplit('/').next().unwrap_or(format).to_ascii_lowercase();
    let target = match format.as_str() {
        "png" => image::ImageFormat::Png,
        "jpg" | "jpeg" => image::ImageFormat::Jpeg,
        "gif" => image::ImageFormat::Gif,
        "bmp" => image::ImageFormat::Bmp,
        "tif" | "tiff" => image::ImageFormat::Tiff,
        other => return Err(DecodeError::UnsupportedFormat(other.to_string())),
    };
    let mut out = Cursor::new(Vec::new());
    // JPEG cannot carry an alpha channel
    if target == image::ImageFormat::Jpeg {
        image::DynamicImage::ImageRgb8(image.to_rgb8())
            .write_to(&mut out, target)
            .map_err(|e| DecodeError::Failed(e.to_string()))?;
    } else {
        image
            .write_to(&mut out, target)
            .map_err(|e| DecodeError::Failed(e.to_string()))?;
    }
    Ok(out.into_inner())
}
