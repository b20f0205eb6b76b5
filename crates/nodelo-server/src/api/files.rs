use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;

use super::AppState;
use crate::error::ServerError;

pub(super) fn routes() -> Router<AppState> {
    Router::new().route("/api/files/{id}", get(download))
}

/// Serve a stored attachment with the mimetype it was uploaded with.
async fn download(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ServerError> {
    let blob = state.blobs.fetch(&id).await?;
    Ok((
        [
            (header::CONTENT_TYPE, blob.mimetype),
            (header::CACHE_CONTROL, "private, max-age=86400".to_string()),
        ],
        blob.data,
    )
        .into_response())
}
