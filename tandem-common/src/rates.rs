//! Sample-rate codes
//!
//! Every rate the bridge can run at, on either side, is a member of [`RateCode`].
//! Rates arrive from the host as plain integers; anything outside the set is a
//! configuration error and is never rounded to a neighbouring rate.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported sample rates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum RateCode {
    Hz44100,
    Hz48000,
    Hz88200,
    Hz96000,
    Hz176400,
    Hz192000,
}

impl RateCode {
    /// All supported rates, ascending
    pub const ALL: [RateCode; 6] = [
        RateCode::Hz44100,
        RateCode::Hz48000,
        RateCode::Hz88200,
        RateCode::Hz96000,
        RateCode::Hz176400,
        RateCode::Hz192000,
    ];

    /// Rate in Hz
    pub const fn hz(self) -> u32 {
        match self {
            RateCode::Hz44100 => 44_100,
            RateCode::Hz48000 => 48_000,
            RateCode::Hz88200 => 88_200,
            RateCode::Hz96000 => 96_000,
            RateCode::Hz176400 => 176_400,
            RateCode::Hz192000 => 192_000,
        }
    }

    /// Output samples per input sample when converting from `self` to `output`
    pub fn ratio_to(self, output: RateCode) -> f64 {
        output.hz() as f64 / self.hz() as f64
    }

    /// Largest conversion ratio between any two supported rates (44.1 kHz → 192 kHz)
    pub fn max_ratio() -> f64 {
        RateCode::Hz44100.ratio_to(RateCode::Hz192000)
    }
}

impl TryFrom<u32> for RateCode {
    type Error = Error;

    fn try_from(hz: u32) -> Result<Self> {
        RateCode::ALL
            .into_iter()
            .find(|code| code.hz() == hz)
            .ok_or(Error::UnsupportedRate(hz))
    }
}

impl From<RateCode> for u32 {
    fn from(code: RateCode) -> u32 {
        code.hz()
    }
}

impl fmt::Display for RateCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Hz", self.hz())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_supported_rates() {
        for code in RateCode::ALL {
            assert_eq!(RateCode::try_from(code.hz()).unwrap(), code);
        }
    }

    #[test]
    fn test_unknown_rate_rejected() {
        let err = RateCode::try_from(22_050).unwrap_err();
        assert!(matches!(err, Error::UnsupportedRate(22_050)));
    }

    #[test]
    fn test_ratio_direction() {
        let up = RateCode::Hz44100.ratio_to(RateCode::Hz48000);
        let down = RateCode::Hz48000.ratio_to(RateCode::Hz44100);
        assert!((up - 48_000.0 / 44_100.0).abs() < 1e-12);
        assert!((up * down - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_max_ratio_bounds_every_pair() {
        for a in RateCode::ALL {
            for b in RateCode::ALL {
                assert!(a.ratio_to(b) <= RateCode::max_ratio());
            }
        }
        assert!(RateCode::max_ratio() < 5.0);
    }

    #[test]
    fn test_serde_as_integer() {
        #[derive(Deserialize)]
        struct Wrapper {
            rate: RateCode,
        }

        let parsed: Wrapper = toml::from_str("rate = 96000").unwrap();
        assert_eq!(parsed.rate, RateCode::Hz96000);
        assert!(toml::from_str::<Wrapper>("rate = 11025").is_err());
    }
}
