use crypto_core::CryptoError;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// Message shown to clients in place of upstream failure details
const UPSTREAM_CLIENT_MESSAGE: &str = "service temporarily unavailable, please try again";

#[derive(Debug, Error, Clone)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    /// Missing or malformed input; nothing was written
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0} not found")]
    NotFound(String),

    /// The connection is not bound to any account
    #[error("sender not found: connection is not bound to an account")]
    SenderUnresolved,

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Expired(String),

    /// Storage or email dispatch failure
    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<tokio_postgres::Error> for AppError {
    fn from(e: tokio_postgres::Error) -> Self {
        AppError::Upstream(format!("database: {e}"))
    }
}

impl From<deadpool_postgres::PoolError> for AppError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        AppError::Upstream(format!("database pool: {e}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Validation(format!("malformed event: {e}"))
    }
}

impl From<CryptoError> for AppError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::TokenExpired => AppError::Expired("session token has expired".into()),
            CryptoError::InvalidToken(_) => AppError::Unauthorized("invalid session token".into()),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl AppError {
    /// Taxonomy tag carried in error events
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_error",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::NotFound(_) | AppError::SenderUnresolved => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::Expired(_) => "expired",
            AppError::Upstream(_) => "upstream_error",
            AppError::Config(_) | AppError::StartServer(_) | AppError::Internal(_) => {
                "internal_error"
            }
        }
    }

    /// Human-readable message safe to send to a client
    pub fn client_message(&self) -> String {
        match self {
            AppError::Upstream(_) | AppError::Internal(_) => UPSTREAM_CLIENT_MESSAGE.to_string(),
            AppError::Config(_) | AppError::StartServer(_) => UPSTREAM_CLIENT_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }

    /// Whether the caller may usefully retry the same request
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Upstream(_))
    }

    /// Whether the failure should be logged at error level
    pub fn is_server_fault(&self) -> bool {
        matches!(
            self,
            AppError::Upstream(_)
                | AppError::Internal(_)
                | AppError::Config(_)
                | AppError::StartServer(_)
        )
    }
}
