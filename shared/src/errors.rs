use axum::{Json, http::StatusCode, response::IntoResponse, response::Response};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0} environment variable not set error")]
    EnvironmentVariableNotSetError(String),
    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),
    #[error("Redis unavailable")]
    RedisUnavailable,
    #[error("Kube error")]
    KubeError(#[from] kube::Error),
    #[error("InClusterError, {0}")]
    InClusterError(#[from] kube_client::config::InClusterError),
    #[error("KubeconfigError, {0}")]
    KubeconfigError(#[from] kube_client::config::KubeconfigError),
    #[error("InferConfigError, {0}")]
    InferConfigError(#[from] kube_client::config::InferConfigError),
    #[error("Serde json error")]
    SerdejsonError(#[from] serde_json::Error),
    #[error("Invalid uuid format: {0}")]
    UuidParseError(#[from] uuid::Error),
    #[error("Validation error, {0}")]
    ValidationError(String),
    #[error("Validation errors, {0}")]
    ValidatorValidationErrors(#[from] validator::ValidationErrors),
    #[error("Lock unavailable for resource {0}")]
    LockUnavailable(String),
    #[error("Invalid state transition: {from} -> {to}")]
    StateTransitionError { from: String, to: String },
    #[error("Unknown challenge type: {0}")]
    UnknownChallengeType(String),
    #[error("Missing CTD for challenge type: {0}")]
    MissingCtd(String),
    #[error("{0}")]
    NotFoundError(String),
    #[error("Rate limited, retry after {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: f64 },
    #[error("Internal error, {0}")]
    InternalError(String),
    #[error("IO error, {0}")]
    IoError(#[from] std::io::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            Self::EnvironmentVariableNotSetError(field) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("{field} environment variable not set error"),
            ),
            Self::RedisError(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
            Self::RedisUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Redis unavailable".to_string(),
            ),
            Self::KubeError(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            Self::InClusterError(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            Self::KubeconfigError(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            Self::InferConfigError(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            Self::SerdejsonError(e) => (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
            Self::UuidParseError(e) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                format!("Invalid uuid format, {e}"),
            ),
            Self::ValidationError(e) => (StatusCode::BAD_REQUEST, e),
            Self::ValidatorValidationErrors(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            Self::LockUnavailable(resource) => (
                StatusCode::SERVICE_UNAVAILABLE,
                format!("Lock unavailable for resource {resource}"),
            ),
            Self::StateTransitionError { from, to } => (
                StatusCode::CONFLICT,
                format!("Invalid state transition: {from} -> {to}"),
            ),
            Self::UnknownChallengeType(t) => (
                StatusCode::BAD_REQUEST,
                format!("Unknown challenge type: {t}"),
            ),
            Self::MissingCtd(t) => (
                StatusCode::BAD_REQUEST,
                format!("Missing CTD for challenge type: {t}"),
            ),
            Self::NotFoundError(e) => (StatusCode::NOT_FOUND, e),
            Self::RateLimited {
                retry_after_seconds,
            } => (
                StatusCode::TOO_MANY_REQUESTS,
                format!("Rate limited, retry after {retry_after_seconds}s"),
            ),
            Self::InternalError(e) => (StatusCode::INTERNAL_SERVER_ERROR, e),
            Self::IoError(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };

        let body = Json(json!({"error": error_message}));

        (status, body).into_response()
    }
}
