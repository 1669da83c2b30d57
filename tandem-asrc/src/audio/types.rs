//! Core audio data types
//!
//! **Format:**
//! - Samples are 32-bit signed integers (full scale ±2^31)
//! - Multi-channel blocks are interleaved: [c0, c1, c0, c1, ...]
//! - The resampler cores work in `f64`, normalized to ±1.0

use serde::{Deserialize, Serialize};
use std::fmt;

/// One sample as carried across both endpoints
pub type Sample = i32;

/// Frames per resampler invocation (input block size)
pub const SRC_N_IN_SAMPLES: usize = 4;

/// Scale between integer samples and normalized floats
pub const FULL_SCALE: f64 = 2_147_483_648.0;

/// Which way audio flows through a pool or FIFO
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Host input resampled to the hardware rate and rendered
    Playback,
    /// Hardware input resampled to the host rate and returned to the host
    Capture,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Playback => "playback",
            Direction::Capture => "capture",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Convert an integer sample to a normalized float
#[inline]
pub fn sample_to_f64(sample: Sample) -> f64 {
    sample as f64 / FULL_SCALE
}

/// Convert a normalized float back to an integer sample, saturating at full scale
#[inline]
pub fn f64_to_sample(value: f64) -> Sample {
    // `as` saturates on overflow and maps NaN to 0
    (value * FULL_SCALE).round() as Sample
}
