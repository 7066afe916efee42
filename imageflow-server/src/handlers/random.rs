use crate::errors::{AppError, AppResult};
use crate::state::AppState;
use axum::{
    extract::{Query, State},
    http::{HeaderMap, header},
    response::{IntoResponse, Response},
};
use imageflow_core::model::Orientation;
use imageflow_core::select::{NegotiatedFormat, Selection, negotiate_format, resolve_orientation};
use imageflow_core::upload::normalize_tags;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct RandomQuery {
    tag: Option<String>,
    /// Comma-separated list, AND-combined with `tag`.
    tags: Option<String>,
    /// Comma-separated list; candidates sharing any of these tags are
    /// dropped.
    exclude: Option<String>,
    orientation: Option<String>,
    format: Option<String>,
}

/// Serve one random image matching the query, in the variant the client
/// negotiates via `Accept` (or forces via `format=`).
pub async fn random_image(
    State(state): State<AppState>,
    Query(query): Query<RandomQuery>,
    headers: HeaderMap,
) -> AppResult<Response> {
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok());
    let accept = headers.get(header::ACCEPT).and_then(|v| v.to_str().ok());

    let explicit = query.orientation.as_deref().and_then(Orientation::parse);
    let orientation = resolve_orientation(explicit, user_agent);

    let format = query
        .format
        .as_deref()
        .and_then(NegotiatedFormat::parse)
        .unwrap_or_else(|| negotiate_format(accept));

    let mut tags = normalize_tags(query.tags.as_deref().unwrap_or(""));
    if let Some(tag) = query.tag.as_deref().map(str::trim).filter(|t| !t.is_empty())
        && !tags.iter().any(|t| t == tag)
    {
        tags.push(tag.to_string());
    }
    let exclude = normalize_tags(query.exclude.as_deref().unwrap_or(""));

    let served = state
        .selector
        .pick(&Selection { orientation, format, tags, exclude })
        .await
        .map_err(|e| {
            if e.is_not_found() {
                AppError::not_found("no matching images found")
            } else {
                e.into()
            }
        })?;

    // Random responses must never be cached; negotiation varies on both
    // headers.
    let response_headers = [
        (header::CONTENT_TYPE, served.content_type),
        (
            header::CACHE_CONTROL,
            "no-store, no-cache, must-revalidate, max-age=0",
        ),
        (header::VARY, "Accept, User-Agent"),
    ];
    Ok((response_headers, served.bytes).into_response())
}
