//! Error types for cbcc-engine

use thiserror::Error;

/// Main error type for cbcc-engine operations
#[derive(Error, Debug)]
pub enum CbccError {
    #[error("Unsupported language for extension: {extension}")]
    UnsupportedLanguage { extension: String },

    #[error("Failed to parse file: {message}")]
    ParseFailure { message: String },

    #[error("Analysis engine reported a fatal condition: {message}")]
    EngineFatal { message: String },

    #[error("Token database stream is corrupt: {message}")]
    DatabaseCorrupt { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for cbcc-engine operations
pub type Result<T> = std::result::Result<T, CbccError>;
