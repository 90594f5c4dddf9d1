use axum::http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid API key")]
    InvalidApiKey,
    #[error("Missing API key")]
    MissingApiKey,
    #[error("API key has expired")]
    KeyExpired,
    #[error("API key is suspended")]
    KeySuspended,
    #[error("Insufficient permissions")]
    InsufficientPermissions,
    #[error("Rate limit exceeded")]
    RateLimitExceeded,
    #[error("API key not found")]
    KeyNotFound,
    #[error("Storage error: {0}")]
    StorageError(String),
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::MissingApiKey | AuthError::InvalidApiKey => StatusCode::UNAUTHORIZED,
            AuthError::KeyExpired | AuthError::KeySuspended | AuthError::InsufficientPermissions => {
                StatusCode::FORBIDDEN
            }
            AuthError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            AuthError::KeyNotFound => StatusCode::NOT_FOUND,
            AuthError::StorageError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<String> for AuthError {
    fn from(error: String) -> Self {
        AuthError::StorageError(error)
    }
}
