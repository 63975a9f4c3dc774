use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::http::StatusCode;
use axum::{
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tracing::error;
use warden_core::{AuthzError, StoreError};

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Authz(#[from] AuthzError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Internal server error: {0}")]
    InternalServerError(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Authz(AuthzError::NotFound { .. }) => StatusCode::NOT_FOUND,
            AppError::Authz(AuthzError::Conflict(_)) => StatusCode::CONFLICT,
            AppError::Authz(AuthzError::Validation(_)) => StatusCode::BAD_REQUEST,
            AppError::Authz(AuthzError::Storage {
                source: StoreError::Unavailable(_),
                ..
            }) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Authz(AuthzError::Storage { .. }) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Authz(AuthzError::Cancelled) => StatusCode::REQUEST_TIMEOUT,
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError::InternalServerError(e.to_string())
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::InvalidInput(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::InvalidInput(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        let body = serde_json::json!({ "error": true, "message": self.to_string() });
        (status, Json(body)).into_response()
    }
}
