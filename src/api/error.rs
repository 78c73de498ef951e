use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::array::ArrayError;
use crate::chunk::ChunkError;
use crate::device::DeviceError;
use crate::heal::HealError;
use crate::physical::PhysicalError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Array(#[from] ArrayError),

    #[error(transparent)]
    Chunk(#[from] ChunkError),

    #[error(transparent)]
    Heal(#[from] HealError),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

fn array_status(e: &ArrayError) -> (StatusCode, &'static str) {
    match e {
        ArrayError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION"),
        ArrayError::NotConfigured => (StatusCode::NOT_FOUND, "NOT_CONFIGURED"),
        ArrayError::DeviceNotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        ArrayError::HasChunks => (StatusCode::CONFLICT, "CONFLICT"),
        ArrayError::NoEligibleDevices | ArrayError::TooFewDevices { .. } => {
            (StatusCode::INSUFFICIENT_STORAGE, "INSUFFICIENT_DEVICES")
        }
        ArrayError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
    }
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Device(e) => match e {
                DeviceError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                DeviceError::HasChunks(_) => (StatusCode::CONFLICT, "CONFLICT"),
                DeviceError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            },
            ApiError::Array(e) => array_status(e),
            ApiError::Chunk(e) => match e {
                ChunkError::FileNotFound(_)
                | ChunkError::ChunkNotFound(_)
                | ChunkError::DeviceNotFound(_)
                | ChunkError::LocationNotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                ChunkError::HashMismatch { .. } => (StatusCode::BAD_GATEWAY, "INTEGRITY_FAILURE"),
                ChunkError::DeviceOffline(_) => (StatusCode::SERVICE_UNAVAILABLE, "DEVICE_OFFLINE"),
                ChunkError::TransferTimeout(_) => (StatusCode::GATEWAY_TIMEOUT, "TRANSFER_TIMEOUT"),
                ChunkError::Array(e) => array_status(e),
                ChunkError::Physical(PhysicalError::NotFound { .. }) => {
                    (StatusCode::NOT_FOUND, "NOT_FOUND")
                }
                ChunkError::Physical(_) | ChunkError::Database(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
                }
            },
            ApiError::Heal(e) => match e {
                HealError::NotConfigured => (StatusCode::NOT_FOUND, "NOT_CONFIGURED"),
                HealError::FileNotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                HealError::Unrecoverable(_) => (StatusCode::GONE, "UNRECOVERABLE"),
                HealError::Physical(_) | HealError::Database(_) | HealError::Serialization(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
                }
            },
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            ApiError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = Json(json!({
            "error": self.to_string(),
            "code": code,
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// The calling owner, taken from the `x-owner-id` header.
///
/// Stands in for a real authentication layer; every data route is scoped to
/// this value and a missing header is a 401.
pub struct Owner(pub String);

#[axum::async_trait]
impl<S> FromRequestParts<S> for Owner
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get("x-owner-id")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(|v| Owner(v.to_string()))
            .ok_or_else(|| ApiError::Unauthorized("missing x-owner-id header".to_string()))
    }
}
