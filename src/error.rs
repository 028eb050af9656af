/// Centralized error types for the quote ingestion pipeline
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    // Provider Errors
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Provider API error: status {status} - {message}")]
    ProviderApiError { status: u16, message: String },

    // Data Errors
    #[error("Mapping failed: {0}")]
    MappingError(String),

    #[error("Deserialization failed: {0}")]
    DeserializationError(#[from] serde_json::Error),

    // Storage Errors
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    #[error("File I/O error: {0}")]
    FileError(#[from] std::io::Error),

    #[error("Unsupported token: {0}")]
    UnsupportedToken(String),

    // Configuration Errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Lifecycle Errors
    #[error("Scheduler already running")]
    AlreadyRunning,

    #[error("Cancelled: {0}")]
    Cancelled(String),
}

pub type Result<T> = std::result::Result<T, IngestError>;

impl IngestError {
    /// Transport failure or non-success response from the market-data provider
    pub fn is_provider_error(&self) -> bool {
        matches!(
            self,
            IngestError::HttpError(_) | IngestError::ProviderApiError { .. }
        )
    }

    /// Errors worth waiting out until the next tick or chunk
    pub fn is_recoverable(&self) -> bool {
        match self {
            IngestError::HttpError(_) => true,
            IngestError::ProviderApiError { status, .. } => *status == 429 || *status >= 500,
            IngestError::PersistenceError(_) | IngestError::FileError(_) => true,
            _ => false,
        }
    }

    /// Get error code for logging
    pub fn error_code(&self) -> &str {
        match self {
            IngestError::HttpError(_) => "PROV_001",
            IngestError::ProviderApiError { .. } => "PROV_002",
            IngestError::MappingError(_) => "DATA_001",
            IngestError::DeserializationError(_) => "DATA_002",
            IngestError::PersistenceError(_) => "STORE_001",
            IngestError::FileError(_) => "STORE_002",
            IngestError::UnsupportedToken(_) => "STORE_003",
            IngestError::ConfigError(_) => "CFG_001",
            IngestError::AlreadyRunning => "SYS_001",
            IngestError::Cancelled(_) => "SYS_002",
        }
    }
}
