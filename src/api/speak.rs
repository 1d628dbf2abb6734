//! Inbound trigger and device listing endpoints

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;

use super::ApiState;
use crate::broadcast::DeviceRecord;
use crate::dispatch::{SpeakOutcome, SpeakRequest};

/// Build speech router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/speak", post(speak))
        .route("/devices", get(devices))
        .with_state(state)
}

/// Speak a reply to the given conversation
///
/// Always answers with the settled outcome; pipeline failures degrade to an
/// apology rather than an error status.
async fn speak(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<SpeakRequest>,
) -> Result<Json<SpeakOutcome>, SpeakError> {
    if request.messages.is_empty() {
        return Err(SpeakError::BadRequest("messages must not be empty"));
    }
    if request.session_key.trim().is_empty() {
        return Err(SpeakError::BadRequest("session_key must not be empty"));
    }

    Ok(Json(state.pipeline.respond(request).await))
}

/// Registered display devices
#[derive(Debug, Serialize)]
pub struct DevicesResponse {
    pub devices: Vec<DeviceRecord>,
    pub clients: usize,
}

async fn devices(State(state): State<Arc<ApiState>>) -> Json<DevicesResponse> {
    let router = state.pipeline.router();
    Json(DevicesResponse {
        devices: router.devices().await,
        clients: router.client_count().await,
    })
}

/// Speech API errors
#[derive(Debug)]
pub enum SpeakError {
    BadRequest(&'static str),
}

impl IntoResponse for SpeakError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: ErrorBody,
        }

        #[derive(Serialize)]
        struct ErrorBody {
            code: &'static str,
            message: String,
        }

        let (status, code, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.to_string()),
        };

        (status, Json(ErrorResponse { error: ErrorBody { code, message } })).into_response()
    }
}
