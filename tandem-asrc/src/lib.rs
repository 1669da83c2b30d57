//! Tandem adaptive sample-rate bridge
//!
//! Streams audio between a host-driven data source and a hardware interface
//! running on its own crystal, compensating continuously for the drift between
//! the two clocks.
//!
//! Layout:
//! - [`audio`]: sample types, elastic ring buffers, Q60 ratios, resampler cores
//! - [`pipeline`]: worker pools, clock recovery, endpoints, the stream manager
//! - [`sim`]: simulated-time driver used by the integration tests and `drift-sim`

pub mod audio;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod sim;

pub use config::AsrcConfig;
pub use error::{Error, Result};
pub use pipeline::manager::{run, EpochSummary, StreamManager};
pub use tandem_common::RateCode;
