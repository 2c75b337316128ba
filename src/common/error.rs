//! Error types for the application.

use thiserror::Error;

/// Top-level application error.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {message}")]
    ParseError { message: String },

    #[error("Config validation failed: {message}")]
    ValidationError { message: String },
}

/// Errors returned by the Mattermost and Matrix clients.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// The server answered with an error body.
    ///
    /// `code` is the platform's machine-readable identifier: the `id` field
    /// of a Mattermost app error or the `errcode` of a Matrix error.
    #[error("API error {status} ({code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Websocket error: {0}")]
    Websocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Failed to decode response: {message}")]
    Decode { message: String },
}

impl PlatformError {
    /// Returns true if this is an API error carrying the given code.
    pub fn is_code(&self, code: &str) -> bool {
        matches!(self, PlatformError::Api { code: c, .. } if c == code)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        PlatformError::Decode {
            message: message.into(),
        }
    }
}

/// Persistence errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Record already exists: {what}")]
    Duplicate { what: String },

    #[error("Database lock poisoned")]
    Poisoned,

    #[error("Unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
}

/// Result type alias for platform client operations.
pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
