//! Q60 fixed-point resampling ratio
//!
//! Unsigned, 60 fractional bits over a 64-bit word: the integer part has four
//! bits, which covers the largest supported ratio (44.1 kHz to 192 kHz, ~4.35).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of fractional bits
pub const Q60_FRAC_BITS: u32 = 60;

const Q60_ONE: f64 = (1u64 << Q60_FRAC_BITS) as f64;

/// Output samples per input sample, as handed to the worker pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FixedPointRatio(u64);

impl FixedPointRatio {
    /// Exactly 1.0
    pub const UNITY: FixedPointRatio = FixedPointRatio(1u64 << Q60_FRAC_BITS);

    /// Encode a floating ratio; negative values encode as 0, values beyond 16.0 saturate
    pub fn from_f64(ratio: f64) -> Self {
        Self((ratio * Q60_ONE) as u64)
    }

    /// Ideal ratio for converting `input_hz` to `output_hz`
    pub fn from_rates(input_hz: u32, output_hz: u32) -> Self {
        Self::from_f64(output_hz as f64 / input_hz as f64)
    }

    pub fn to_f64(self) -> f64 {
        self.0 as f64 / Q60_ONE
    }

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn to_bits(self) -> u64 {
        self.0
    }
}

impl Default for FixedPointRatio {
    fn default() -> Self {
        Self::UNITY
    }
}

impl fmt::Display for FixedPointRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.9}", self.to_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unity() {
        assert_eq!(FixedPointRatio::from_f64(1.0), FixedPointRatio::UNITY);
        assert_eq!(FixedPointRatio::UNITY.to_bits(), 1u64 << 60);
        assert_eq!(FixedPointRatio::from_bits(1u64 << 60), FixedPointRatio::UNITY);
    }

    #[test]
    fn test_precision_well_below_one_ppb() {
        let ideal = 48_000.0 / 44_100.0;
        let encoded = FixedPointRatio::from_f64(ideal);
        assert!((encoded.to_f64() - ideal).abs() < 1e-15);
    }

    #[test]
    fn test_largest_supported_ratio_fits() {
        let r = FixedPointRatio::from_rates(44_100, 192_000);
        assert!((r.to_f64() - 192_000.0 / 44_100.0).abs() < 1e-12);
    }

    #[test]
    fn test_out_of_range_saturates() {
        assert_eq!(FixedPointRatio::from_f64(-0.5).to_bits(), 0);
        assert_eq!(FixedPointRatio::from_f64(1e6).to_bits(), u64::MAX);
    }
}
