use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use ts_rs::TS;
use utoipa::ToSchema;

use crate::repository::RepoError;

/// MessageResponse
///
/// The single body shape used for every error (and for generic acknowledgements).
#[derive(Debug, Clone, Serialize, serde::Deserialize, PartialEq, Eq, TS, ToSchema)]
#[ts(export)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// AppError
///
/// Every failure a handler can produce. Authentication and recovery failures
/// carry no detail: their messages are fixed so responses never reveal whether
/// an account exists or how close a code guess was.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("unauthenticated")]
    Unauthenticated,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("invalid or expired recovery code")]
    InvalidOrExpiredCode,
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("forbidden")]
    Forbidden,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[source] RepoError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthenticated | AppError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AppError::InvalidOrExpiredCode | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn public_message(&self) -> String {
        match self {
            AppError::Unauthenticated => "Unauthorized".into(),
            AppError::InvalidCredentials => "Invalid email or password".into(),
            AppError::InvalidOrExpiredCode => "Invalid or expired code".into(),
            AppError::Validation(message) => message.clone(),
            AppError::Forbidden => "Forbidden".into(),
            AppError::NotFound(resource) => format!("{resource} not found"),
            AppError::StoreUnavailable(_) => "Service unavailable".into(),
            AppError::Internal(_) => "Internal server error".into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::StoreUnavailable(e) => tracing::error!(error = %e, "store unavailable"),
            AppError::Internal(detail) => tracing::error!(%detail, "internal error"),
            _ => {}
        }

        let body = MessageResponse::new(self.public_message());
        (self.status(), Json(body)).into_response()
    }
}

impl From<RepoError> for AppError {
    fn from(e: RepoError) -> Self {
        AppError::StoreUnavailable(e)
    }
}
