//! Common error types for Tandem

use thiserror::Error;

/// Common result type for Tandem operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the Tandem crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Sample rate outside the supported set (fatal: there is no fallback rate)
    #[error("Unsupported sample rate: {0} Hz")]
    UnsupportedRate(u32),
}
