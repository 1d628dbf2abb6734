//! Cached audio retrieval

use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};

use super::ApiState;

/// Build audio router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/audio/{name}", get(audio))
        .with_state(state)
}

/// Serve one cached file; evicted or invalid names are 404
async fn audio(State(state): State<Arc<ApiState>>, Path(name): Path<String>) -> Response {
    let Some(path) = state.pipeline.synthesis().cache().resolve(&name) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match tokio::fs::read(&path).await {
        Ok(bytes) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "audio/mpeg"),
                (header::CACHE_CONTROL, "no-store"),
            ],
            bytes,
        )
            .into_response(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            tracing::warn!(name = %name, error = %e, "failed to read cached audio");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
