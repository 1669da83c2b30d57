//! Audio primitives
//!
//! Sample format, elastic buffering, ratio encoding and the resampler cores.

pub mod dither;
pub mod ratio;
pub mod resampler;
pub mod ring_buffer;
pub mod types;

pub use ratio::FixedPointRatio;
pub use resampler::{
    CoreFactory, ResamplerCore, ResamplerMode, ResamplerQuality, StandardCoreFactory,
};
pub use ring_buffer::{ElasticRingBuffer, FrameFifo, RingBufferStats};
pub use types::{Direction, Sample, SRC_N_IN_SAMPLES};
