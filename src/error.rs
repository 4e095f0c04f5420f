//! ==============================================================================
//! error.rs - error taxonomy for the control engine
//! ==============================================================================
//!
//! none of these are fatal to the process:
//!     - SensorReadError: tick skipped, logged
//!     - HardwareWriteError: decision dropped for this tick, retried next tick
//!     - InvalidModeError: request rejected, state untouched
//!
//! ==============================================================================

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum SensorReadError {
    #[error("sensor read timed out")]
    Timeout,

    #[error("sensor checksum mismatch")]
    Checksum,

    #[error("sensor driver error: {0}")]
    Driver(String),
}

#[derive(Debug, thiserror::Error)]
#[error("relay write on gpio {pin} failed: {message}")]
pub struct HardwareWriteError {
    pub pin: u8,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("mode must be 'auto' or 'manual', got '{0}'")]
pub struct InvalidModeError(pub String);

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    InvalidMode(#[from] InvalidModeError),

    #[error("no reading accepted yet")]
    NoReading,
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidMode(_) => StatusCode::BAD_REQUEST,
            ApiError::NoReading => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": {
                "code": status.as_u16(),
                "message": self.to_string(),
            }
        }));
        (status, body).into_response()
    }
}
