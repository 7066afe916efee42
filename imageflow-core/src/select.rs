//! Read-path selection: content negotiation, candidate filtering, random
//! pick, and variant streaming with fallback.

use crate::error::{ImageFlowError, Result};
use crate::index::MetadataIndex;
use crate::model::{ImageFormat, ImageRecord, Orientation};
use crate::storage::ObjectStore;
use rand::seq::IndexedRandom;
use std::sync::Arc;
use tracing::{debug, warn};

/// Mobile user-agent fragments that imply a portrait screen.
const MOBILE_UA_HINTS: [&str; 7] = [
    "android",
    "webos",
    "iphone",
    "ipad",
    "ipod",
    "blackberry",
    "windows phone",
];

/// Format the client will render most efficiently.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NegotiatedFormat {
    Avif,
    Webp,
    Original,
}

impl NegotiatedFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "avif" => Some(NegotiatedFormat::Avif),
            "webp" => Some(NegotiatedFormat::Webp),
            "original" => Some(NegotiatedFormat::Original),
            _ => None,
        }
    }
}

/// Resolve the orientation for a request. An explicit parameter wins;
/// otherwise mobile user-agents get portrait, everything else landscape.
pub fn resolve_orientation(explicit: Option<Orientation>, user_agent: Option<&str>) -> Orientation {
    if let Some(orientation) = explicit {
        return orientation;
    }
    let ua = user_agent.unwrap_or("").to_ascii_lowercase();
    if MOBILE_UA_HINTS.iter().any(|hint| ua.contains(hint)) {
        Orientation::Portrait
    } else {
        Orientation::Landscape
    }
}

/// Pick the best format from an `Accept` header. The searched strings are
/// exactly `image/avif` and `image/webp`; an absent or empty header means
/// the original format.
pub fn negotiate_format(accept: Option<&str>) -> NegotiatedFormat {
    let accept = accept.unwrap_or("");
    if accept.contains("image/avif") {
        NegotiatedFormat::Avif
    } else if accept.contains("image/webp") {
        NegotiatedFormat::Webp
    } else {
        NegotiatedFormat::Original
    }
}

/// Resolved selection parameters for one random-image request.
#[derive(Clone, Debug)]
pub struct Selection {
    pub orientation: Orientation,
    pub format: NegotiatedFormat,
    /// AND-combined tag filter.
    pub tags: Vec<String>,
    /// Candidates whose tag set intersects this list are removed.
    pub exclude: Vec<String>,
}

/// A chosen image ready to be written to the response.
#[derive(Clone, Debug)]
pub struct ServedImage {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
}

pub struct Selector {
    store: Arc<dyn ObjectStore>,
    index: Arc<dyn MetadataIndex>,
}

impl std::fmt::Debug for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Selector").finish()
    }
}

impl Selector {
    pub fn new(store: Arc<dyn ObjectStore>, index: Arc<dyn MetadataIndex>) -> Self {
        Self { store, index }
    }

    /// Pick one matching image uniformly at random and fetch the variant
    /// the client negotiated, falling back to the original when the
    /// variant blob is missing.
    pub async fn pick(&self, selection: &Selection) -> Result<ServedImage> {
        let candidates = self.candidates(selection).await?;
        let Some(record) = candidates.choose(&mut rand::rng()) else {
            return Err(ImageFlowError::NotFound("no matching images".to_string()));
        };
        debug!(id = %record.id, format = ?selection.format, "serving random image");
        self.serve(record, selection.format).await
    }

    async fn candidates(&self, selection: &Selection) -> Result<Vec<ImageRecord>> {
        let ids = if selection.tags.is_empty() {
            self.index.all_ids().await?
        } else {
            self.index.ids_with_tags(&selection.tags).await?
        };
        let mut records = self.index.get_many(&ids).await?;
        records.retain(|r| r.orientation == selection.orientation);
        if !selection.exclude.is_empty() {
            records.retain(|r| !r.tags.iter().any(|t| selection.exclude.contains(t)));
        }
        Ok(records)
    }

    async fn serve(&self, record: &ImageRecord, format: NegotiatedFormat) -> Result<ServedImage> {
        // GIFs (and any record whose variant paths alias the original)
        // always serve the original bytes with the original content type.
        let (key, content_type) = match format {
            NegotiatedFormat::Avif if record.paths.avif != record.paths.original => {
                (record.paths.avif.as_str(), ImageFormat::Avif.content_type())
            }
            NegotiatedFormat::Webp if record.paths.webp != record.paths.original => {
                (record.paths.webp.as_str(), ImageFormat::Webp.content_type())
            }
            _ => (record.paths.original.as_str(), record.format.content_type()),
        };

        match self.store.get(key).await {
            Ok(bytes) => Ok(ServedImage { bytes, content_type }),
            Err(err) if err.is_not_found() && key != record.paths.original => {
                // Variant not materialized (pending transcode or a logged
                // failure); the original covers it.
                warn!(id = %record.id, key, "variant missing, falling back to original");
                let bytes = self.store.get(&record.paths.original).await?;
                Ok(ServedImage {
                    bytes,
                    content_type: record.format.content_type(),
                })
            }
            Err(err) => Err(err),
        }
    }
}
