use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use aws_smithy_types::error::operation::BuildError as SmithyBuildError;
use thiserror::Error; // Use thiserror for cleaner error definitions

// --- Infrastructure Errors ---

#[derive(Error, Debug)]
pub enum RepoError {
    #[error("Meme not found with ID: {0}")]
    NotFound(u64),

    #[error("Meme already exists with ID: {0}")]
    Conflict(u64),

    #[error("Stored data could not be decoded: {0}")]
    DataCorruption(String),

    #[error("Database backend error: {0}")]
    BackendError(#[from] anyhow::Error), // Wrap Anyhow errors from DB layer
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Cache backend error: {0}")]
    Backend(String),

    #[error("Invalid cache URL: {0}")]
    InvalidUrl(String),
}

#[derive(Error, Debug)]
pub enum OriginError {
    #[error("Origin has no image at {0}")]
    NotFound(String),

    // Network failures, timeouts and 5xx responses.
    #[error("Origin unavailable: {0}")]
    Unavailable(String),

    #[error("Origin rejected request with status {status}: {url}")]
    Rejected { status: u16, url: String },

    #[error("Origin returned a malformed payload: {0}")]
    Malformed(String),
}

// --- Service Errors ---

/// Outcome taxonomy of the caching and voting core.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{0} not found")]
    NotFound(String),

    /// Retryable. Nothing was cached or recorded.
    #[error("Temporarily unavailable: {0}")]
    Transient(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Operation aborted: {0}")]
    Fatal(String),

    #[error("Invalid administrative credential")]
    Unauthorized,

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<RepoError> for ServiceError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::NotFound(id) => ServiceError::NotFound(format!("Meme {}", id)),
            RepoError::Conflict(id) => ServiceError::Conflict(format!("meme id {} is already taken", id)),
            e => {
                tracing::error!(error.source = ?e, "Durable store operation failed");
                ServiceError::Fatal(e.to_string())
            }
        }
    }
}

impl From<CacheError> for ServiceError {
    fn from(err: CacheError) -> Self {
        ServiceError::Transient(err.to_string())
    }
}

impl From<OriginError> for ServiceError {
    fn from(err: OriginError) -> Self {
        match err {
            OriginError::NotFound(what) => ServiceError::NotFound(what),
            e @ OriginError::Unavailable(_) => ServiceError::Transient(e.to_string()),
            e => {
                tracing::error!(error.source = ?e, "Origin returned an unusable response");
                ServiceError::Fatal(e.to_string())
            }
        }
    }
}

// --- Web Layer Error ---

#[derive(Error, Debug)]
pub enum AppError {
    // Input validation / request parsing errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Missing field: {0}")]
    MissingField(String),
    #[error("Invalid meme ID format: {0}")]
    InvalidId(#[from] std::num::ParseIntError),
    #[error("Unauthorized")]
    Unauthorized,

    // Domain/Service level errors (mapped from ServiceError)
    #[error("{0} not found")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Service temporarily unavailable")]
    Unavailable(#[source] ServiceError),

    // Configuration / Startup errors
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Initialization error: {0}")]
    InitError(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    // Generic Internal Server Error
    #[error("Internal server error: {0}")]
    InternalServerError(String),
}

// --- Conversions from Domain Errors to AppError ---

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::NotFound(what) => AppError::NotFound(what),
            ServiceError::Conflict(msg) => AppError::Conflict(msg),
            ServiceError::Unauthorized => AppError::Unauthorized,
            ServiceError::InvalidInput(msg) => AppError::InvalidInput(msg),
            e @ ServiceError::Transient(_) => AppError::Unavailable(e),
            ServiceError::Fatal(msg) => AppError::InternalServerError(msg),
        }
    }
}

impl From<crate::config::ConfigError> for AppError {
    fn from(err: crate::config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<SmithyBuildError> for AppError {
    fn from(err: SmithyBuildError) -> Self {
        AppError::InitError(format!("Failed to build DynamoDB request: {}", err))
    }
}

// --- Axum Response Implementation ---

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            // 4xx Client Errors
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::MissingField(field) => (StatusCode::BAD_REQUEST, format!("Missing field: {}", field)),
            AppError::InvalidId(e) => (StatusCode::BAD_REQUEST, format!("Invalid ID format: {}", e)),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Invalid admin key".to_string()),
            AppError::NotFound(what) => (StatusCode::NOT_FOUND, format!("{} not found", what)),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),

            // 5xx Server Errors
            AppError::Unavailable(e) => {
                tracing::warn!(error.source = ?e, "Dependency temporarily unavailable");
                (StatusCode::SERVICE_UNAVAILABLE, "Service temporarily unavailable, try again".to_string())
            }
            AppError::ConfigError(msg) => {
                tracing::error!("Configuration error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Server configuration error".to_string())
            }
            AppError::InitError(msg) => {
                tracing::error!("Initialization error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Server initialization error".to_string())
            }
            AppError::IoError(e) => {
                tracing::error!("IO error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "An internal server error occurred".to_string())
            }
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal server error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "An internal server error occurred".to_string())
            }
        };

        tracing::debug!(error.message = %error_message, error.status = %status, "Responding with error");

        let body = Json(serde_json::json!({ "error": error_message }));
        (status, body).into_response()
    }
}
