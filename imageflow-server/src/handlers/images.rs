use crate::errors::AppResult;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Query, State},
};
use imageflow_core::admin::purge_image;
use imageflow_core::index::{PageFilter, PageResult};
use imageflow_core::model::{ImageFormat, Orientation};
use serde::Deserialize;
use serde_json::{Value, json};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    page: Option<i64>,
    limit: Option<i64>,
    orientation: Option<String>,
    format: Option<String>,
    tag: Option<String>,
}

/// Paginated listing over the metadata index. Limits are clamped to 50;
/// missing or nonsensical paging falls back to defaults.
pub async fn list_images(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<PageResult>> {
    let filter = PageFilter {
        page: query.page.unwrap_or(1),
        limit: query.limit.unwrap_or(12),
        orientation: query.orientation.as_deref().and_then(Orientation::parse),
        format: query.format.as_deref().and_then(ImageFormat::parse),
        tag: query.tag.filter(|t| !t.is_empty()),
    }
    .normalized();

    let page = state.index.page(&filter).await?;
    Ok(Json(page))
}

#[derive(Debug, Deserialize)]
pub struct DeleteRequest {
    id: String,
}

/// Remove every blob whose stem matches the id, plus the record and its
/// index entries. An unknown id is not an error: the response says so and
/// stays 200.
pub async fn delete_image(
    State(state): State<AppState>,
    Json(request): Json<DeleteRequest>,
) -> AppResult<Json<Value>> {
    let outcome = purge_image(&state.store, &state.index, &request.id).await?;
    if outcome.found_nothing() {
        return Ok(Json(json!({
            "success": false,
            "message": "no matching image files found",
        })));
    }
    Ok(Json(json!({
        "success": true,
        "deletedCount": outcome.deleted_count,
        "errors": outcome.errors,
    })))
}
