//! TPDF dither for the float-to-integer conversion
//!
//! Output words are 32 bits but converters downstream resolve 24, so the
//! quantization step is the 24-bit LSB (256 in 32-bit units). Noise comes from
//! a seeded PRNG: two workers built with the same seed produce identical output.

use crate::audio::types::{f64_to_sample, Sample, FULL_SCALE};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// 24-bit LSB expressed in 32-bit sample units
pub const DITHER_LSB: f64 = 256.0;

/// Triangular-PDF dither generator
#[derive(Debug, Clone)]
pub struct Dither {
    rng: StdRng,
}

impl Dither {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Quantize a normalized sample to the 24-bit grid with ±1 LSB triangular noise
    pub fn quantize(&mut self, value: f64) -> Sample {
        let noise = self.rng.gen::<f64>() - self.rng.gen::<f64>();
        let scaled = value * FULL_SCALE / DITHER_LSB + noise;
        f64_to_sample(scaled.round() * DITHER_LSB / FULL_SCALE)
    }
}
