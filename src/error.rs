use thiserror::Error;
use uuid::Uuid;

/// Errors produced by the credit, payment and generation pipeline.
///
/// Variants line up with the HTTP semantics the endpoints expose, see
/// [`BustError::status_code`].
#[derive(Error, Debug)]
pub enum BustError {
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Insufficient credits: {available} available, {requested} requested")]
    InsufficientCredits { available: u64, requested: u64 },
    #[error("User not found: {0}")]
    UserNotFound(Uuid),
    #[error("Project not found: {0}")]
    ProjectNotFound(Uuid),
    #[error("Payment not found: {0}")]
    PaymentNotFound(String),
    #[error("Invalid webhook signature")]
    InvalidSignature,
    #[error("Authentication error: {0}")]
    AuthenticationError(String),
    #[error("Provider error: {0}")]
    ProviderError(String),
    #[error("Consistency conflict: {0}")]
    ConsistencyConflict(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("RocksDB error: {0}")]
    RocksDbError(#[from] rocksdb::Error),
    #[error("Internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
}

impl BustError {
    /// HTTP status code the endpoint layer answers with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::ValidationError(_) => 400,
            Self::InvalidSignature | Self::AuthenticationError(_) => 401,
            Self::InsufficientCredits { .. } => 403,
            Self::UserNotFound(_) | Self::ProjectNotFound(_) | Self::PaymentNotFound(_) => 404,
            Self::ConsistencyConflict(_) => 409,
            Self::ProviderError(_) | Self::HttpError(_) => 502,
            _ => 500,
        }
    }

    /// Stable machine-readable code for API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ValidationError(_) => "ValidationError",
            Self::InsufficientCredits { .. } => "InsufficientCredits",
            Self::UserNotFound(_) | Self::ProjectNotFound(_) | Self::PaymentNotFound(_) => {
                "NotFound"
            }
            Self::InvalidSignature | Self::AuthenticationError(_) => "AuthenticationError",
            Self::ProviderError(_) | Self::HttpError(_) => "ProviderError",
            Self::ConsistencyConflict(_) => "ConsistencyConflict",
            _ => "InternalError",
        }
    }

    /// A lost compare-and-set race. The winner's effect already satisfies the
    /// caller, so this is never surfaced.
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::ConsistencyConflict(_))
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::InternalError(Box::new(std::io::Error::other(message.into())))
    }
}

pub type Result<T> = std::result::Result<T, BustError>;
