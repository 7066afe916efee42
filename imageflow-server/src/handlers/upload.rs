use crate::errors::{AppError, AppResult};
use crate::state::AppState;
use axum::{
    Json,
    extract::{Multipart, State},
};
use imageflow_core::upload::{UploadFile, UploadOptions, UploadOutcome, normalize_tags};
use tracing::debug;

/// Multipart upload: `images[]` file parts plus optional `tags` and
/// `expiryMinutes` fields. Responds with one outcome per file; a 200 may
/// contain per-item errors.
pub async fn upload_images(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<Json<Vec<UploadOutcome>>> {
    let mut files = Vec::new();
    let mut options = UploadOptions::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "images[]" | "images" => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::bad_request(format!("failed to read {file_name}: {e}")))?;
                debug!(file_name, size = bytes.len(), "received upload part");
                files.push(UploadFile { file_name, bytes: bytes.to_vec() });
            }
            "tags" => {
                let raw = field
                    .text()
                    .await
                    .map_err(|e| AppError::bad_request(format!("unreadable tags field: {e}")))?;
                options.tags = normalize_tags(&raw);
            }
            "expiryMinutes" => {
                let raw = field
                    .text()
                    .await
                    .map_err(|e| AppError::bad_request(format!("unreadable expiryMinutes field: {e}")))?;
                let minutes: i64 = raw
                    .trim()
                    .parse()
                    .map_err(|_| AppError::bad_request(format!("expiryMinutes must be an integer, got {raw:?}")))?;
                if minutes < 0 {
                    return Err(AppError::bad_request("expiryMinutes must not be negative"));
                }
                options.expiry_minutes = minutes;
            }
            other => debug!(field = other, "ignoring unknown multipart field"),
        }
    }

    let outcomes = state.uploader.upload_batch(files, &options).await?;
    Ok(Json(outcomes))
}
