//! Domain model: image records, variant key layout, and id generation.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Source format of an uploaded image.
///
/// Stored lowercase in records and object keys. Unrecognized payloads are
/// treated as JPEG, matching the detection fallback in
/// [`crate::transcode::detect_format`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Png,
    Gif,
    Webp,
    Avif,
}

impl ImageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Png => "png",
            ImageFormat::Gif => "gif",
            ImageFormat::Webp => "webp",
            ImageFormat::Avif => "avif",
        }
    }

    /// File extension used in object keys. JPEG keeps the conventional
    /// three-letter form.
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Png => "png",
            ImageFormat::Gif => "gif",
            ImageFormat::Webp => "webp",
            ImageFormat::Avif => "avif",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
            ImageFormat::Gif => "image/gif",
            ImageFormat::Webp => "image/webp",
            ImageFormat::Avif => "image/avif",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Some(ImageFormat::Jpeg),
            "png" => Some(ImageFormat::Png),
            "gif" => Some(ImageFormat::Gif),
            "webp" => Some(ImageFormat::Webp),
            "avif" => Some(ImageFormat::Avif),
            _ => None,
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Orientation bucket an image is filed under. Square images count as
/// landscape.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Landscape,
    Portrait,
}

impl Orientation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Orientation::Landscape => "landscape",
            Orientation::Portrait => "portrait",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "landscape" => Some(Orientation::Landscape),
            "portrait" => Some(Orientation::Portrait),
            _ => None,
        }
    }

    /// Classify from pixel dimensions: width >= height is landscape.
    pub fn from_dimensions(width: u32, height: u32) -> Self {
        if width >= height {
            Orientation::Landscape
        } else {
            Orientation::Portrait
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relative object-store keys for the three variants of one image.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ImagePaths {
    pub original: String,
    pub webp: String,
    pub avif: String,
}

/// Known byte sizes per variant. A missing entry means the variant has not
/// been materialized (yet, or ever after a transcode failure).
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ImageSizes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webp: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avif: Option<u64>,
}

/// Metadata entry for one stored image. The metadata index is the source of
/// truth for existence, tags, and expiry; the object store owns the bytes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: String,
    pub file_name: String,
    /// Unix seconds of the upload.
    pub uploaded_at: i64,
    /// Unix seconds after which the sweeper removes the image. Zero means
    /// never.
    #[serde(default)]
    pub expires_at: i64,
    pub format: ImageFormat,
    pub orientation: Orientation,
    /// Unique, ordered, case-sensitive, comma-free.
    #[serde(default)]
    pub tags: Vec<String>,
    pub paths: ImagePaths,
    #[serde(default)]
    pub sizes: ImageSizes,
}

impl ImageRecord {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Listing row returned by the paging API, flattened for clients.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub id: String,
    #[serde(rename = "fileName")]
    pub file_name: String,
    pub url: String,
    #[serde(rename = "urlWebp", skip_serializing_if = "Option::is_none")]
    pub url_webp: Option<String>,
    #[serde(rename = "urlAvif", skip_serializing_if = "Option::is_none")]
    pub url_avif: Option<String>,
    pub orientation: Orientation,
    pub format: ImageFormat,
    pub tags: Vec<String>,
    #[serde(rename = "uploadedAt")]
    pub uploaded_at: i64,
    #[serde(rename = "expiresAt")]
    pub expires_at: i64,
    pub sizes: ImageSizes,
}

/// Variant directories an image's blobs may live under. Deletion must
/// enumerate all of them.
pub const VARIANT_DIRS: [&str; 7] = [
    "original/landscape",
    "original/portrait",
    "landscape/webp",
    "landscape/avif",
    "portrait/webp",
    "portrait/avif",
    "gif",
];

/// Key of the original blob: `original/<orientation>/<id>.<ext>`, or
/// `gif/<id>.gif` for GIFs which are stored exactly once.
pub fn original_key(id: &str, orientation: Orientation, format: ImageFormat) -> String {
    if format == ImageFormat::Gif {
        format!("gif/{id}.gif")
    } else {
        format!("original/{}/{}.{}", orientation.as_str(), id, format.extension())
    }
}

/// Key of an encoded variant: `<orientation>/<target>/<id>.<target>`.
pub fn variant_key(id: &str, orientation: Orientation, target: ImageFormat) -> String {
    format!("{}/{}/{}.{}", orientation.as_str(), target.as_str(), id, target.extension())
}

/// Build the paths triple for a record. GIF variants alias the original.
pub fn paths_for(id: &str, orientation: Orientation, format: ImageFormat) -> ImagePaths {
    let original = original_key(id, orientation, format);
    if format == ImageFormat::Gif {
        ImagePaths {
            webp: original.clone(),
            avif: original.clone(),
            original,
        }
    } else {
        ImagePaths {
            original,
            webp: variant_key(id, orientation, ImageFormat::Webp),
            avif: variant_key(id, orientation, ImageFormat::Avif),
        }
    }
}

/// The stem of an object key's filename, i.e. everything before the first
/// `.`. Deletion matches blobs by stem across all variant directories.
pub fn key_stem(key: &str) -> &str {
    let name = key.rsplit('/').next().unwrap_or(key);
    name.split('.').next().unwrap_or(name)
}

const ID_BYTES: usize = 9;

/// Generate a URL-safe random image id. Nine random bytes encode to twelve
/// base64url characters, comfortably above the 11-char floor the key layout
/// assumes for uniqueness.
pub fn generate_id() -> String {
    let mut buf = [0u8; ID_BYTES];
    rand::rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orientation_classification_counts_square_as_landscape() {
        assert_eq!(Orientation::from_dimensions(100, 100), Orientation::Landscape);
        assert_eq!(Orientation::from_dimensions(1920, 1080), Orientation::Landscape);
        assert_eq!(Orientation::from_dimensions(800, 1200), Orientation::Portrait);
    }

    #[test]
    fn key_layout_matches_wire_contract() {
        assert_eq!(
            original_key("abc123def456", Orientation::Landscape, ImageFormat::Jpeg),
            "original/landscape/abc123def456.jpg"
        );
        assert_eq!(
            variant_key("abc123def456", Orientation::Portrait, ImageFormat::Avif),
            "portrait/avif/abc123def456.avif"
        );
        assert_eq!(
            original_key("abc123def456", Orientation::Landscape, ImageFormat::Gif),
            "gif/abc123def456.gif"
        );
    }

    #[test]
    fn gif_paths_alias_the_original() {
        let paths = paths_for("xyz", Orientation::Portrait, ImageFormat::Gif);
        assert_eq!(paths.original, "gif/xyz.gif");
        assert_eq!(paths.webp, paths.original);
        assert_eq!(paths.avif, paths.original);
    }

    #[test]
    fn key_stem_strips_directory_and_extensions() {
        assert_eq!(key_stem("original/landscape/abc.jpg"), "abc");
        assert_eq!(key_stem("gif/abc.gif"), "abc");
        assert_eq!(key_stem("abc.tar.gz"), "abc");
    }

    #[test]
    fn generated_ids_are_url_safe_and_long_enough() {
        let id = generate_id();
        assert!(id.len() >= 11, "id too short: {id}");
        assert!(
            id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
            "id not url-safe: {id}"
        );
        assert_ne!(generate_id(), generate_id());
    }
}
