//! Blob storage behind a single capability set: store, get, delete, list.
//!
//! Two interchangeable backends exist (local filesystem, S3-compatible).
//! Callers hold an `Arc<dyn ObjectStore>` and never see backend-specific
//! options. Errors collapse to two kinds: `not-found` and `io`.

mod local;
mod s3_store;

pub use local::LocalStore;
pub use s3_store::S3Store;

use crate::config::StorageConfig;
use crate::error::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;

/// One listed blob: relative key plus byte size.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectMeta {
    pub key: String,
    pub size: u64,
}

/// Byte-addressable blob storage keyed by relative path.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn store(&self, key: &str, bytes: &[u8]) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// All blobs whose key starts with `prefix`, as one lazy stream. The
    /// backends paginate internally.
    fn list<'a>(&'a self, prefix: &'a str) -> BoxStream<'a, Result<ObjectMeta>>;
}

/// Content type derived from a key's extension. Unknown extensions fall
/// back to a generic binary type.
pub fn content_type_for_key(key: &str) -> &'static str {
    match key.rsplit('.').next().map(|ext| ext.to_ascii_lowercase()).as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("avif") => "image/avif",
        _ => "application/octet-stream",
    }
}

/// Construct the configured backend.
pub async fn open_store(config: &StorageConfig) -> Result<Arc<dyn ObjectStore>> {
    match config {
        StorageConfig::Local { root } => Ok(Arc::new(LocalStore::open(root).await?)),
        StorageConfig::S3(s3) => Ok(Arc::new(S3Store::open(s3)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_types_cover_the_image_formats() {
        assert_eq!(content_type_for_key("original/landscape/a.jpg"), "image/jpeg");
        assert_eq!(content_type_for_key("a.JPEG"), "image/jpeg");
        assert_eq!(content_type_for_key("landscape/webp/a.webp"), "image/webp");
        assert_eq!(content_type_for_key("portrait/avif/a.avif"), "image/avif");
        assert_eq!(content_type_for_key("gif/a.gif"), "image/gif");
        assert_eq!(content_type_for_key("a.png"), "image/png");
        assert_eq!(content_type_for_key("no-extension"), "application/octet-stream");
    }
}
