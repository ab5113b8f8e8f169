//! Error types for credential storage

/// Errors from credential storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("credential parse error: {0}")]
    Parse(String),
}

/// Result alias for credential storage operations.
pub type Result<T> = std::result::Result<T, Error>;
