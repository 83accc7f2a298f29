// SPDX-License-Identifier: MIT OR Apache-2.0
use serde::{Deserialize, Serialize};

use crate::envelope::Reference;

/// Allowed image formats (invariant 10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// PNG.
    Png,
    /// JPEG, written with extension `.jpeg`.
    Jpeg,
    /// JPEG, written with extension `.jpg`.
    Jpg,
}

impl ImageFormat {
    /// Recognize a format from a URL/file extension (case-insensitive).
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpeg" => Some(Self::Jpeg),
            "jpg" => Some(Self::Jpg),
            _ => None,
        }
    }

    /// Detect a format from the base-64 prefix of the encoded payload
    /// (§4.4): `iVBORw0KGgo` ⇒ png, `/9j/` ⇒ jpeg, else default png.
    #[must_use]
    pub fn from_base64_prefix(encoded: &str) -> Self {
        if encoded.starts_with("iVBORw0KGgo") {
            Self::Png
        } else if encoded.starts_with("/9j/") {
            Self::Jpeg
        } else {
            Self::Png
        }
    }

    /// Detect a format from the raw magic-byte prefix of a downloaded image
    /// (invariant 10): the 8-byte PNG signature, or the JPEG `FF D8 FF`
    /// marker. Returns `None` when neither is recognized, so callers can
    /// reject the object instead of guessing a format for it.
    #[must_use]
    pub fn from_magic_bytes(bytes: &[u8]) -> Option<Self> {
        const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        if bytes.starts_with(&PNG_SIGNATURE) {
            Some(Self::Png)
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(Self::Jpeg)
        } else {
            None
        }
    }

    /// Whether `self` and `other` name the same wire format — `Jpeg` and
    /// `Jpg` are the same format under two extensions.
    #[must_use]
    pub fn matches(self, other: Self) -> bool {
        self.wire_tag() == other.wire_tag()
    }

    /// The wire format tag used in Converse-style requests (`"png"`/`"jpeg"`).
    #[must_use]
    pub fn wire_tag(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg | Self::Jpg => "jpeg",
        }
    }
}

/// Maximum size, in bytes, of a base-64-encoded image payload (§4.9).
pub const MAX_BASE64_SIZE_BYTES: u64 = 20 * 1024 * 1024;

/// Per-image validation flags (§3).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ImageValidation {
    /// The image passed all format/size checks.
    pub is_valid: bool,
    /// The image is acceptable to the model endpoint.
    pub bedrock_compatible: bool,
    /// The base-64 payload is within [`MAX_BASE64_SIZE_BYTES`].
    pub size_within_limits: bool,
}

/// Per-image metadata captured by FetchImages (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageData {
    /// Source URL the image was downloaded from.
    pub source_url: String,
    /// Bucket segment parsed from `source_url`.
    pub source_bucket: String,
    /// Key segment parsed from `source_url`.
    pub source_key: String,
    /// HTTP/object-store content type.
    pub content_type: String,
    /// Raw byte size before base-64 encoding.
    pub size_bytes: u64,
    /// Pixel width.
    pub width: u32,
    /// Pixel height.
    pub height: u32,
    /// Detected/declared format.
    pub format: ImageFormat,
    /// Size, in bytes, of the base-64-encoded payload.
    pub encoded_size_bytes: u64,
    /// Reference to the stored base-64 blob.
    pub base64_reference: Reference,
    /// Validation flags.
    pub validation: ImageValidation,
}

impl ImageData {
    /// `width / height`, or `0.0` if height is zero.
    #[must_use]
    pub fn aspect_ratio(&self) -> f64 {
        if self.height == 0 {
            0.0
        } else {
            f64::from(self.width) / f64::from(self.height)
        }
    }
}

/// The full `images/metadata.json` object (§4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhancedImageMetadata {
    /// Reference image metadata.
    pub reference: ImageData,
    /// Checking image metadata.
    pub checking: ImageData,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_from_extension_is_case_insensitive() {
        assert_eq!(ImageFormat::from_extension("PNG"), Some(ImageFormat::Png));
        assert_eq!(ImageFormat::from_extension("JpG"), Some(ImageFormat::Jpg));
        assert_eq!(ImageFormat::from_extension("gif"), None);
    }

    #[test]
    fn format_from_base64_prefix_detects_png_and_jpeg() {
        assert_eq!(
            ImageFormat::from_base64_prefix("iVBORw0KGgoAAAA"),
            ImageFormat::Png
        );
        assert_eq!(ImageFormat::from_base64_prefix("/9j/4AAQSkZ"), ImageFormat::Jpeg);
        assert_eq!(ImageFormat::from_base64_prefix("garbage"), ImageFormat::Png);
    }

    #[test]
    fn format_from_magic_bytes_detects_png_and_jpeg() {
        const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        assert_eq!(ImageFormat::from_magic_bytes(&PNG_SIGNATURE), Some(ImageFormat::Png));
        assert_eq!(
            ImageFormat::from_magic_bytes(&[0xFF, 0xD8, 0xFF, 0xE0]),
            Some(ImageFormat::Jpeg)
        );
        assert_eq!(ImageFormat::from_magic_bytes(b"GIF89a"), None);
    }

    #[test]
    fn format_matches_treats_jpg_and_jpeg_as_the_same_format() {
        assert!(ImageFormat::Jpg.matches(ImageFormat::Jpeg));
        assert!(!ImageFormat::Jpg.matches(ImageFormat::Png));
    }

    #[test]
    fn aspect_ratio_handles_zero_height() {
        let img = ImageData {
            source_url: "s3://b/k.png".into(),
            source_bucket: "b".into(),
            source_key: "k.png".into(),
            content_type: "image/png".into(),
            size_bytes: 100,
            width: 10,
            height: 0,
            format: ImageFormat::Png,
            encoded_size_bytes: 140,
            base64_reference: Reference {
                bucket: "b".into(),
                key: "k".into(),
                size: 140,
            },
            validation: ImageValidation::default(),
        };
        assert_eq!(img.aspect_ratio(), 0.0);
    }
}
