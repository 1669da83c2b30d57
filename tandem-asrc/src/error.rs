//! Error types for tandem-asrc
//!
//! Steady-state anomalies (buffer overflow/underflow, clock outliers, ratio
//! clamping) are absorbed where they happen and never surface here. What does
//! surface ends the stream.

use crate::audio::types::Direction;
use thiserror::Error;

/// Main error type for the bridge engine
#[derive(Error, Debug)]
pub enum Error {
    /// Errors from the shared crate (config files, unsupported rate codes)
    #[error(transparent)]
    Common(#[from] tandem_common::Error),

    /// Invalid configuration values
    #[error("Configuration error: {0}")]
    Config(String),

    /// Resampler core construction or processing failure
    #[error("Resampler error: {0}")]
    Resampler(String),

    /// A worker reported a failure for its channel group
    #[error("{direction} worker {index} failed: {message}")]
    Worker {
        direction: Direction,
        index: usize,
        message: String,
    },

    /// A worker thread is gone (panicked or exited)
    #[error("{direction} worker {index} disconnected")]
    WorkerDisconnected { direction: Direction, index: usize },

    /// Message sequence or block shape violated the hand-off protocol
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// The named endpoint hung up
    #[error("{0} endpoint disconnected")]
    Disconnected(&'static str),

    /// Thread spawn and other I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Unsupported rate code, routed through the shared error type
    pub fn unsupported_rate(&self) -> Option<u32> {
        match self {
            Error::Common(tandem_common::Error::UnsupportedRate(hz)) => Some(*hz),
            _ => None,
        }
    }
}

/// Convenience Result type using tandem-asrc Error
pub type Result<T> = std::result::Result<T, Error>;
