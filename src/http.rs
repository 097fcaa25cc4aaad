//! HTTP facade over the bridge.
//!
//! ```text
//! GET /                      -> 500, "No command specified"
//! GET /read?command=<id>     -> read transaction, data = response payload
//! GET /write?command=<id>    -> write transaction, data = null
//! ```
//!
//! Every response is JSON of the form
//! `{"status":"success"|"error","data":...,"message":...}`; failures use
//! status code 500.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::bridge::{Bridge, BridgeError};

/// Outcome marker of an API response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiStatus {
    Success,
    Error,
}

/// Body of every API response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status: ApiStatus,
    pub data: Option<Value>,
    pub message: Option<String>,
}

impl ApiResponse {
    pub fn success(data: Option<Value>) -> Self {
        Self {
            status: ApiStatus::Success,
            data,
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ApiStatus::Error,
            data: None,
            message: Some(message.into()),
        }
    }
}

impl From<BridgeError> for ApiResponse {
    fn from(err: BridgeError) -> Self {
        Self::error(err.to_string())
    }
}

impl IntoResponse for ApiResponse {
    fn into_response(self) -> Response {
        let status = match self.status {
            ApiStatus::Success => StatusCode::OK,
            ApiStatus::Error => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

/// Build the API router for `bridge`.
pub fn router(bridge: Arc<Bridge>) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/read", get(read))
        .route("/write", get(write))
        .with_state(bridge)
}

async fn home() -> ApiResponse {
    ApiResponse::error("No command specified")
}

async fn read(
    State(bridge): State<Arc<Bridge>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResponse {
    let command_id = match parse_command(params.get("command")) {
        Ok(id) => id,
        Err(e) => return e.into(),
    };

    match bridge.read(command_id).await {
        Ok(payload) => ApiResponse::success(payload.map(payload_value)),
        Err(e) => {
            warn!("Failed reading command {} from guest: {}", command_id, e);
            e.into()
        }
    }
}

async fn write(
    State(bridge): State<Arc<Bridge>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResponse {
    let command_id = match parse_command(params.get("command")) {
        Ok(id) => id,
        Err(e) => return e.into(),
    };

    match bridge.write(command_id).await {
        Ok(()) => ApiResponse::success(None),
        Err(e) => {
            warn!("Failed sending command {} to guest: {}", command_id, e);
            e.into()
        }
    }
}

/// Parse the `command` query value; ids start at 1.
fn parse_command(raw: Option<&String>) -> Result<u32, BridgeError> {
    let raw = raw.map(|s| s.trim()).unwrap_or_default();
    match raw.parse::<u32>() {
        Ok(id) if id >= 1 => Ok(id),
        _ => {
            warn!("Failed parsing command {:?}", raw);
            Err(BridgeError::InvalidCommand)
        }
    }
}

/// JSON payloads are embedded as-is, anything else as a string.
fn payload_value(payload: String) -> Value {
    match serde_json::from_str(&payload) {
        Ok(value) => value,
        Err(_) => Value::String(payload),
    }
}
