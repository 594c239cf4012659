use std::io;

/// Custom error type for vanatu operations
#[derive(Debug, thiserror::Error)]
pub enum VanatuError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid webhook payload: {0}")]
    PayloadInvalid(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParseError(#[from] toml::de::Error),
}

/// Helper type for Results that use VanatuError
pub type Result<T> = std::result::Result<T, VanatuError>;
