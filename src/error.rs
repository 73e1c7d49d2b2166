use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Sesión requerida")]
    Unauthorized,

    #[error("Credenciales inválidas")]
    InvalidCredentials,

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Conflict(String),

    /// A referenced collaborator resource is required but missing
    /// (receiver account, payment method).
    #[error("{0}")]
    Dependency(String),

    /// The mutation would break the participant-sum or amount invariants.
    #[error("{0}")]
    BalanceInvariant(String),

    /// Generated-movement mutation without a usable scope parameter.
    #[error("{0}")]
    Scope(String),

    /// Best-effort sink failure. Logged, never surfaced to the caller.
    #[error("External sink: {0}")]
    External(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            AppError::InvalidCredentials => (StatusCode::UNAUTHORIZED, self.to_string()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Dependency(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::BalanceInvariant(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Scope(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::External(msg) => {
                tracing::warn!("External sink failure: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Error interno".to_string(),
                )
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Error de base de datos".to_string(),
                )
            }
            AppError::Jwt(e) => {
                tracing::error!("JWT error: {:?}", e);
                (StatusCode::UNAUTHORIZED, "Token inválido".to_string())
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Error interno".to_string(),
                )
            }
        };

        let body = Json(json!({ "error": message }));
        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
