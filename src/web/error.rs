use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use log::error;
use serde_json::json;
use thiserror::Error;

use crate::backend::BackendError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Backend(BackendError::Timeout) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Backend(_) => StatusCode::BAD_GATEWAY,
            ApiError::Store(StoreError::NotFound) => StatusCode::NOT_FOUND,
            ApiError::Store(StoreError::Validation(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Store(StoreError::Database(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            error!("{}", self);
        }

        let body = match self {
            ApiError::Backend(BackendError::Rejected { status, .. }) => json!({
                "error": "upstream rejected request",
                "upstream_status": status,
            }),
            // Don't leak database internals to clients.
            ApiError::Store(StoreError::Database(_)) => json!({ "error": "internal server error" }),
            other => json!({ "error": other.to_string() }),
        };

        HttpResponse::build(status).json(body)
    }
}
