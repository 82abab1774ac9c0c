/// Self-describing encoded images
///
/// Every image the session layer handles carries its own format tag, so a
/// decoder can validate it without outside metadata. On the wire (and in
/// storage) an image is a data URL: `data:image/<format>;base64,<payload>`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::{imageops::FilterType, DynamicImage, ImageFormat};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::sync::OnceLock;

/// Formats accepted inside a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageKind {
    Png,
    Jpeg,
    Webp,
    Gif,
}

impl ImageKind {
    pub fn mime(self) -> &'static str {
        match self {
            ImageKind::Png => "image/png",
            ImageKind::Jpeg => "image/jpeg",
            ImageKind::Webp => "image/webp",
            ImageKind::Gif => "image/gif",
        }
    }

    /// Subtype as it appears after `image/` (`jpg` is accepted as an alias)
    pub fn from_subtype(subtype: &str) -> Option<Self> {
        match subtype {
            "png" => Some(ImageKind::Png),
            "jpeg" | "jpg" => Some(ImageKind::Jpeg),
            "webp" => Some(ImageKind::Webp),
            "gif" => Some(ImageKind::Gif),
            _ => None,
        }
    }

    pub fn image_format(self) -> ImageFormat {
        match self {
            ImageKind::Png => ImageFormat::Png,
            ImageKind::Jpeg => ImageFormat::Jpeg,
            ImageKind::Webp => ImageFormat::WebP,
            ImageKind::Gif => ImageFormat::Gif,
        }
    }
}

/// Why a string is not an acceptable encoded image
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImageDataError {
    #[error("not an image data URL with a supported format")]
    Signature,

    #[error("image payload is not valid base64")]
    Payload,

    #[error("image payload is empty")]
    Empty,
}

/// An image in a known format, held as its encoded bytes
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EncodedImage {
    kind: ImageKind,
    bytes: Vec<u8>,
}

fn data_url_signature() -> &'static Regex {
    static SIGNATURE: OnceLock<Regex> = OnceLock::new();
    SIGNATURE.get_or_init(|| {
        Regex::new(r"^data:image/(png|jpeg|jpg|webp|gif);base64,([A-Za-z0-9+/]+={0,2})$")
            .expect("data URL signature is a valid regex")
    })
}

impl EncodedImage {
    pub fn new(kind: ImageKind, bytes: Vec<u8>) -> Self {
        Self { kind, bytes }
    }

    /// Encode a decoded image losslessly in `kind` (PNG is the safe choice
    /// for images with alpha)
    pub fn from_image(image: &DynamicImage, kind: ImageKind) -> Result<Self, image::ImageError> {
        let mut bytes = Vec::new();
        image.write_to(&mut Cursor::new(&mut bytes), kind.image_format())?;
        Ok(Self::new(kind, bytes))
    }

    /// Parse a data URL, enforcing the strict signature
    pub fn from_data_url(url: &str) -> Result<Self, ImageDataError> {
        let captures = data_url_signature()
            .captures(url.trim())
            .ok_or(ImageDataError::Signature)?;

        let kind = ImageKind::from_subtype(&captures[1]).ok_or(ImageDataError::Signature)?;
        let bytes = STANDARD
            .decode(&captures[2])
            .map_err(|_| ImageDataError::Payload)?;

        if bytes.is_empty() {
            return Err(ImageDataError::Empty);
        }
        Ok(Self { kind, bytes })
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.kind.mime(), STANDARD.encode(&self.bytes))
    }

    pub fn kind(&self) -> ImageKind {
        self.kind
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn decode(&self) -> Result<DynamicImage, image::ImageError> {
        image::load_from_memory_with_format(&self.bytes, self.kind.image_format())
    }

    /// Downscale so neither side exceeds `max_dimension` and re-encode as
    /// JPEG at `quality` (0.0 - 1.0).
    ///
    /// Never upscales. Alpha is flattened since JPEG has none. CPU-bound:
    /// call from a blocking context.
    pub fn recompress(&self, max_dimension: u32, quality: f32) -> Result<Self, image::ImageError> {
        let decoded = self.decode()?;

        let fitted = if decoded.width() > max_dimension || decoded.height() > max_dimension {
            decoded.resize(max_dimension, max_dimension, FilterType::Lanczos3)
        } else {
            decoded
        };

        let rgb = DynamicImage::ImageRgb8(fitted.to_rgb8());
        let quality = (quality.clamp(0.01, 1.0) * 100.0).round() as u8;

        let mut bytes = Vec::new();
        rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut bytes, quality))?;

        Ok(Self::new(ImageKind::Jpeg, bytes))
    }
}

impl TryFrom<String> for EncodedImage {
    type Error = ImageDataError;

    fn try_from(url: String) -> Result<Self, Self::Error> {
        Self::from_data_url(&url)
    }
}

impl From<EncodedImage> for String {
    fn from(image: EncodedImage) -> String {
        image.to_data_url()
    }
}

// Payloads are megabytes of base64; keep them out of logs
impl std::fmt::Debug for EncodedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodedImage")
            .field("kind", &self.kind)
            .field("len", &self.bytes.len())
            .finish()
    }
}
