//! Upload orchestration: classify, persist, transcode, record.

use crate::error::{ImageFlowError, Result};
use crate::index::MetadataIndex;
use crate::model::{
    ImageFormat, ImageRecord, ImageSizes, Orientation, generate_id, paths_for,
};
use crate::storage::ObjectStore;
use crate::transcode::{EncodeTarget, Transcoder, decode_dimensions, pool::WorkerPool, try_detect};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// One file of a multi-image submission.
#[derive(Clone, Debug)]
pub struct UploadFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Submission-wide options.
#[derive(Clone, Debug, Default)]
pub struct UploadOptions {
    pub tags: Vec<String>,
    /// Minutes until expiry; zero or negative means never.
    pub expiry_minutes: i64,
}

/// Public URLs of the three variants of a stored image.
#[derive(Clone, Debug, Serialize)]
pub struct VariantUrls {
    pub original: String,
    pub webp: String,
    pub avif: String,
}

/// Per-image result of a submission. A batch response may mix successes
/// and errors.
#[derive(Clone, Debug, Serialize)]
pub struct UploadOutcome {
    #[serde(rename = "fileName")]
    pub file_name: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub urls: Option<VariantUrls>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orientation: Option<Orientation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<ImageFormat>,
    #[serde(rename = "expiresAt", skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl UploadOutcome {
    fn failure(file_name: String, err: &ImageFlowError) -> Self {
        Self {
            file_name,
            status: "error",
            message: Some(err.to_string()),
            id: None,
            urls: None,
            orientation: None,
            format: None,
            expires_at: None,
            tags: None,
        }
    }
}

/// Parse a comma-separated tag list: trimmed, deduplicated, first
/// occurrence wins, empty entries dropped. Tags are case-sensitive.
pub fn normalize_tags(raw: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for tag in raw.split(',') {
        let tag = tag.trim();
        if !tag.is_empty() && !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
        }
    }
    tags
}

pub struct Uploader {
    store: Arc<dyn ObjectStore>,
    index: Arc<dyn MetadataIndex>,
    pool: Arc<WorkerPool>,
    transcoder: Transcoder,
    url_base: String,
    max_upload_count: usize,
}

impl std::fmt::Debug for Uploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Uploader")
            .field("max_upload_count", &self.max_upload_count)
            .finish()
    }
}

impl Uploader {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        index: Arc<dyn MetadataIndex>,
        pool: Arc<WorkerPool>,
        transcoder: Transcoder,
        url_base: String,
        max_upload_count: usize,
    ) -> Self {
        Self { store, index, pool, transcoder, url_base, max_upload_count }
    }

    /// Process one submission. The count limit is enforced before any
    /// write; afterwards each file succeeds or fails on its own.
    pub async fn upload_batch(
        &self,
        files: Vec<UploadFile>,
        options: &UploadOptions,
    ) -> Result<Vec<UploadOutcome>> {
        if files.is_empty() {
            return Err(ImageFlowError::InvalidInput("no images in submission".to_string()));
        }
        if files.len() > self.max_upload_count {
            return Err(ImageFlowError::InvalidInput(format!(
                "submission of {} files exceeds the limit of {}",
                files.len(),
                self.max_upload_count
            )));
        }

        let mut outcomes = Vec::with_capacity(files.len());
        for file in files {
            let file_name = file.file_name.clone();
            match self.upload_one(file, options).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => {
                    warn!(file_name, error = %err, "image upload failed");
                    outcomes.push(UploadOutcome::failure(file_name, &err));
                }
            }
        }
        Ok(outcomes)
    }

    async fn upload_one(&self, file: UploadFile, options: &UploadOptions) -> Result<UploadOutcome> {
        let format = try_detect(&file.bytes).ok_or_else(|| {
            ImageFlowError::InvalidInput(format!("{} is not a supported image", file.file_name))
        })?;

        let (width, height) = decode_dimensions(&file.bytes)?;
        let orientation = Orientation::from_dimensions(width, height);

        let id = generate_id();
        let paths = paths_for(&id, orientation, format);

        self.store.store(&paths.original, &file.bytes).await?;
        let mut sizes = ImageSizes {
            original: Some(file.bytes.len() as u64),
            ..Default::default()
        };

        if format == ImageFormat::Gif {
            // GIFs are stored once; the variant paths alias the original.
            sizes.webp = sizes.original;
            sizes.avif = sizes.original;
        } else {
            let (webp, avif) = futures::join!(
                self.encode_variant(&file.bytes, EncodeTarget::Webp, &paths.webp),
                self.encode_variant(&file.bytes, EncodeTarget::Avif, &paths.avif),
            );
            sizes.webp = webp;
            sizes.avif = avif;
        }

        let now = Utc::now().timestamp();
        let expires_at = if options.expiry_minutes > 0 {
            now + options.expiry_minutes * 60
        } else {
            0
        };

        let record = ImageRecord {
            id: id.clone(),
            file_name: file.file_name.clone(),
            uploaded_at: now,
            expires_at,
            format,
            orientation,
            tags: options.tags.clone(),
            paths: paths.clone(),
            sizes,
        };
        // Index failures fail this image; the original blob is left behind
        // as an orphan for the reconciliation pass.
        self.index.save(&record).await?;

        info!(id, file_name = %file.file_name, %orientation, %format, "image uploaded");

        let url = |key: &str| format!("{}/{}", self.url_base.trim_end_matches('/'), key);
        Ok(UploadOutcome {
            file_name: file.file_name,
            status: "success",
            message: None,
            id: Some(id),
            urls: Some(VariantUrls {
                original: url(&paths.original),
                webp: url(&paths.webp),
                avif: url(&paths.avif),
            }),
            orientation: Some(orientation),
            format: Some(format),
            expires_at: Some(expires_at),
            tags: Some(options.tags.clone()),
        })
    }

    /// Encode one variant through the worker pool and store it. Failures
    /// are logged and reported as an absent size; they never fail the
    /// upload.
    async fn encode_variant(
        &self,
        bytes: &[u8],
        target: EncodeTarget,
        key: &str,
    ) -> Option<u64> {
        let transcoder = self.transcoder;
        let input = bytes.to_vec();
        let encoded = match self.pool.process(move || transcoder.encode(&input, target)).await {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(key, target = target.as_str(), error = %err, "variant transcode failed");
                return None;
            }
        };
        let size = encoded.len() as u64;
        match self.store.store(key, &encoded).await {
            Ok(()) => Some(size),
            Err(err) => {
                warn!(key, target = target.as_str(), error = %err, "variant write failed");
                None
            }
        }
    }
}
