//! S3-compatible object store.

use super::{ObjectMeta, ObjectStore, content_type_for_key};
use crate::config::S3Config;
use crate::error::{ImageFlowError, Result};
use async_stream::try_stream;
use async_trait::async_trait;
use futures::stream::BoxStream;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::{Bucket, Region};
use tracing::debug;

/// Blob storage on any S3-compatible endpoint (AWS, MinIO, R2, ...).
///
/// Uploaded objects are immutable and publicly readable, so every PUT
/// carries a year-long `Cache-Control` and a `public-read` ACL; the
/// `Content-Type` is derived from the key's extension.
pub struct S3Store {
    bucket: Box<Bucket>,
}

impl std::fmt::Debug for S3Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Store").field("bucket", &self.bucket.name()).finish()
    }
}

impl S3Store {
    pub fn open(config: &S3Config) -> Result<Self> {
        let region = Region::Custom {
            region: config.region.clone(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
        };
        let credentials = Credentials::new(
            Some(&config.access_key),
            Some(&config.secret_key),
            None,
            None,
            None,
        )
        .map_err(|e| ImageFlowError::Storage(format!("invalid S3 credentials: {e}")))?;

        let mut bucket = Bucket::new(&config.bucket, region, credentials)
            .map_err(map_s3_error)?
            .with_path_style();
        bucket.add_header("x-amz-acl", "public-read");
        bucket.add_header("cache-control", "public, max-age=31536000");

        Ok(Self { bucket })
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn store(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let content_type = content_type_for_key(key);
        self.bucket
            .put_object_with_content_type(key, bytes, content_type)
            .await
            .map_err(map_s3_error)?;
        debug!(key, bytes = bytes.len(), content_type, "stored S3 object");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let response = self.bucket.get_object(key).await.map_err(|e| map_s3_key_error(key, e))?;
        Ok(response.to_vec())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.bucket
            .delete_object(key)
            .await
            .map_err(|e| map_s3_key_error(key, e))?;
        debug!(key, "deleted S3 object");
        Ok(())
    }

    fn list<'a>(&'a self, prefix: &'a str) -> BoxStream<'a, Result<ObjectMeta>> {
        Box::pin(try_stream! {
            let mut continuation_token: Option<String> = None;
            loop {
                let (page, _status) = self
                    .bucket
                    .list_page(prefix.to_string(), None, continuation_token.take(), None, None)
                    .await
                    .map_err(map_s3_error)?;
                for object in page.contents {
                    yield ObjectMeta { key: object.key, size: object.size };
                }
                continuation_token = page.next_continuation_token;
                if continuation_token.is_none() {
                    break;
                }
            }
        })
    }
}

fn map_s3_error(err: S3Error) -> ImageFlowError {
    ImageFlowError::Storage(format!("S3 request failed: {err}"))
}

fn map_s3_key_error(key: &str, err: S3Error) -> ImageFlowError {
    match err {
        S3Error::HttpFailWithBody(404, _) => {
            ImageFlowError::NotFound(format!("object {key} does not exist"))
        }
        other => map_s3_error(other),
    }
}
