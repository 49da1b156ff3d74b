//! Knowbase error types.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, KnowbaseError>;

#[derive(Error, Debug)]
pub enum KnowbaseError {
    /// Missing credentials or endpoint, or an otherwise unusable setup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection failures, timeouts, and other conditions worth retrying.
    #[error("Transient network error: {0}")]
    Transient(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Remote service answered but rejected the operation.
    #[error("Backend error: {0}")]
    Backend(String),

    /// Missing remote resource (index, collection, document).
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed record or payload.
    #[error("Data error: {0}")]
    Data(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Timed out after {attempts} attempts: {context}")]
    Timeout { attempts: u32, context: String },

    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl KnowbaseError {
    /// Map a non-success HTTP status to the error taxonomy.
    ///
    /// 404 becomes `NotFound`, 408/429/5xx become retryable `Http` errors.
    pub fn from_status(status: u16, context: &str, body: &str) -> Self {
        if status == 404 {
            return Self::NotFound(context.to_string());
        }
        let body = body.trim();
        let message = if body.is_empty() {
            context.to_string()
        } else {
            // Remote error bodies can be large; keep the log line readable.
            let snippet: String = body.chars().take(300).collect();
            format!("{context}: {snippet}")
        };
        Self::Http { status, message }
    }

    /// Whether the retry combinator should try again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transient(_) => true,
            Self::Http { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<rusqlite::Error> for KnowbaseError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<toml::de::Error> for KnowbaseError {
    fn from(e: toml::de::Error) -> Self {
        Self::Config(format!("Failed to parse config: {e}"))
    }
}
