//! # Tandem Common Library
//!
//! Shared code for the Tandem clock-bridge crates:
//! - Sample-rate codes (the closed set of rates the bridge runs at)
//! - Configuration file resolution and TOML loading
//! - Common error type

pub mod config;
pub mod error;
pub mod rates;

pub use error::{Error, Result};
pub use rates::RateCode;
