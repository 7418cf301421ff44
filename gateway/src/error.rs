//! HTTP-facing error mapping for the Gateway Adapter (§4.9, §7).
//!
//! Distinct from [`agentd_core::GatewayError`]: that type only covers
//! kernel-side failures (routing, store, driver); this one also carries the
//! request-shape failures that never reach the kernel (missing user
//! message, malformed session id).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use agentd_core::{DriverError, GatewayError, SelectorError, StoreError};

#[derive(Debug)]
pub enum ApiError {
    ModelNotFound,
    MissingUserMessage,
    Store(StoreError),
    Driver(DriverError),
    Selector(SelectorError),
}

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::ModelNotFound => ApiError::ModelNotFound,
            GatewayError::Store(e) => ApiError::Store(e),
            GatewayError::Driver(e) => ApiError::Driver(e),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Store(e)
    }
}

impl From<DriverError> for ApiError {
    fn from(e: DriverError) -> Self {
        ApiError::Driver(e)
    }
}

impl From<SelectorError> for ApiError {
    fn from(e: SelectorError) -> Self {
        ApiError::Selector(e)
    }
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self {
            ApiError::ModelNotFound => "model_not_found",
            ApiError::MissingUserMessage => "missing_user_message",
            ApiError::Store(StoreError::NotFound(_)) => "not_found",
            ApiError::Store(StoreError::StaleSession) => "stale_session",
            ApiError::Store(_) => "store_error",
            ApiError::Driver(_) => "driver_error",
            ApiError::Selector(_) => "selector_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::ModelNotFound => StatusCode::NOT_FOUND,
            ApiError::MissingUserMessage => StatusCode::BAD_REQUEST,
            ApiError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Store(StoreError::StaleSession) => StatusCode::CONFLICT,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Driver(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Selector(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::ModelNotFound => write!(f, "model_not_found"),
            ApiError::MissingUserMessage => write!(f, "request carries no user message"),
            ApiError::Store(e) => write!(f, "{e}"),
            ApiError::Driver(e) => write!(f, "{e}"),
            ApiError::Selector(e) => write!(f, "{e}"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "code": code,
            }
        }));
        (status, body).into_response()
    }
}
