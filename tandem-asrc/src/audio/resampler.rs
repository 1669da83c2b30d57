//! Resampler cores using rubato
//!
//! A core converts fixed-size planar input blocks to variable-size output
//! blocks. Two modes, chosen when the stream is configured:
//!
//! - **Fixed**: converts between two rate codes at their exact rational ratio;
//!   the per-block ratio is ignored.
//! - **Adaptive**: the ratio may change every block. Requests are clamped to
//!   ±[`MAX_DEVIATION_PPM`] around the ideal ratio without reporting an error.
//!
//! Cores are stateful (filter history carries across blocks) and are rebuilt
//! from scratch whenever the rate pair changes.

use crate::audio::dither::Dither;
use crate::audio::ratio::FixedPointRatio;
use crate::audio::types::{f64_to_sample, sample_to_f64, Sample};
use crate::error::{Error, Result};
use rubato::{
    FastFixedIn, PolynomialDegree, Resampler as RubatoResampler, SincFixedIn,
    SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use serde::{Deserialize, Serialize};
use tandem_common::RateCode;
use tracing::{debug, trace};

/// Widest deviation from the ideal ratio an adaptive core will follow
pub const MAX_DEVIATION_PPM: f64 = 1000.0;

/// Relative ratio range the adaptive rubato resamplers are built with
const ADAPTIVE_HEADROOM: f64 = 1.01;

/// Core selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResamplerMode {
    /// Exact rational conversion, no runtime ratio control
    Fixed,
    /// Ratio updated every block by clock recovery
    #[default]
    Adaptive,
}

/// Filter quality for adaptive cores
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResamplerQuality {
    /// Septic polynomial interpolation
    Fast,
    /// 256-tap sinc interpolation
    #[default]
    High,
}

/// One resampler instance serving a group of channels
pub trait ResamplerCore: Send {
    /// Convert one input block (`input[ch].len() == input_frames()`).
    ///
    /// Writes into `output[ch][..n]` and returns `n`. Each output channel must
    /// hold at least `output_frames_max()` samples.
    fn process(
        &mut self,
        ratio: FixedPointRatio,
        input: &[Vec<f64>],
        output: &mut [Vec<f64>],
    ) -> Result<usize>;

    /// Frames per input block
    fn input_frames(&self) -> usize;

    /// Upper bound on frames produced by one `process` call
    fn output_frames_max(&self) -> usize;

    /// Ratio the last block was actually converted with
    fn effective_ratio(&self) -> f64;

    /// (input, output) rate pair this core was built for
    fn rates(&self) -> (RateCode, RateCode);
}

/// Builds cores for a worker when it is (re)configured
pub trait CoreFactory: Send + Sync {
    fn build(
        &self,
        input: RateCode,
        output: RateCode,
        channels: usize,
        block_frames: usize,
    ) -> Result<Box<dyn ResamplerCore>>;
}

/// Factory for the rubato-backed cores
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardCoreFactory {
    pub mode: ResamplerMode,
    pub quality: ResamplerQuality,
}

impl StandardCoreFactory {
    pub fn new(mode: ResamplerMode, quality: ResamplerQuality) -> Self {
        Self { mode, quality }
    }
}

impl CoreFactory for StandardCoreFactory {
    fn build(
        &self,
        input: RateCode,
        output: RateCode,
        channels: usize,
        block_frames: usize,
    ) -> Result<Box<dyn ResamplerCore>> {
        Ok(Box::new(RubatoCore::new(
            self.mode,
            self.quality,
            input,
            output,
            channels,
            block_frames,
        )?))
    }
}

/// Enum wrapper for rubato resamplers (trait is not object-safe)
enum RubatoKind {
    Poly(FastFixedIn<f64>),
    Sinc(SincFixedIn<f64>),
}

impl RubatoKind {
    fn process_into_buffer(
        &mut self,
        input: &[Vec<f64>],
        output: &mut [Vec<f64>],
    ) -> std::result::Result<(usize, usize), rubato::ResampleError> {
        match self {
            Self::Poly(r) => r.process_into_buffer(input, output, None),
            Self::Sinc(r) => r.process_into_buffer(input, output, None),
        }
    }

    fn set_resample_ratio(&mut self, ratio: f64) -> std::result::Result<(), rubato::ResampleError> {
        match self {
            Self::Poly(r) => r.set_resample_ratio(ratio, false),
            Self::Sinc(r) => r.set_resample_ratio(ratio, false),
        }
    }

    fn output_frames_max(&self) -> usize {
        match self {
            Self::Poly(r) => r.output_frames_max(),
            Self::Sinc(r) => r.output_frames_max(),
        }
    }
}

/// rubato-backed core
pub struct RubatoCore {
    kind: RubatoKind,
    mode: ResamplerMode,
    input: RateCode,
    output: RateCode,
    channels: usize,
    block_frames: usize,

    /// Output/input at the nominal rates
    ideal: f64,

    /// Ratio currently programmed into the resampler
    current: f64,
}

impl RubatoCore {
    pub fn new(
        mode: ResamplerMode,
        quality: ResamplerQuality,
        input: RateCode,
        output: RateCode,
        channels: usize,
        block_frames: usize,
    ) -> Result<Self> {
        if channels == 0 || block_frames == 0 {
            return Err(Error::Resampler(format!(
                "Invalid core shape: {} channels, {} frames",
                channels, block_frames
            )));
        }

        let ideal = input.ratio_to(output);
        let kind = match (mode, quality) {
            (ResamplerMode::Fixed, _) => RubatoKind::Poly(
                FastFixedIn::<f64>::new(
                    ideal,
                    1.0, // max_relative_ratio (no runtime changes)
                    PolynomialDegree::Septic,
                    block_frames,
                    channels,
                )
                .map_err(|e| Error::Resampler(format!("Failed to create resampler: {}", e)))?,
            ),
            (ResamplerMode::Adaptive, ResamplerQuality::Fast) => RubatoKind::Poly(
                FastFixedIn::<f64>::new(
                    ideal,
                    ADAPTIVE_HEADROOM,
                    PolynomialDegree::Septic,
                    block_frames,
                    channels,
                )
                .map_err(|e| Error::Resampler(format!("Failed to create resampler: {}", e)))?,
            ),
            (ResamplerMode::Adaptive, ResamplerQuality::High) => {
                let params = SincInterpolationParameters {
                    sinc_len: 256,
                    f_cutoff: 0.95,
                    interpolation: SincInterpolationType::Linear,
                    oversampling_factor: 256,
                    window: WindowFunction::BlackmanHarris2,
                };
                RubatoKind::Sinc(
                    SincFixedIn::<f64>::new(ideal, ADAPTIVE_HEADROOM, params, block_frames, channels)
                        .map_err(|e| {
                            Error::Resampler(format!("Failed to create sinc resampler: {}", e))
                        })?,
                )
            }
        };

        debug!(
            "Built {:?}/{:?} core {} -> {} ({} channels, {} frames per block)",
            mode, quality, input, output, channels, block_frames
        );

        Ok(Self {
            kind,
            mode,
            input,
            output,
            channels,
            block_frames,
            ideal,
            current: ideal,
        })
    }
}

impl ResamplerCore for RubatoCore {
    fn process(
        &mut self,
        ratio: FixedPointRatio,
        input: &[Vec<f64>],
        output: &mut [Vec<f64>],
    ) -> Result<usize> {
        if input.len() != self.channels || output.len() != self.channels {
            return Err(Error::Resampler(format!(
                "Expected {} channels, got {} in / {} out",
                self.channels,
                input.len(),
                output.len()
            )));
        }
        if input.iter().any(|ch| ch.len() != self.block_frames) {
            return Err(Error::Resampler(format!(
                "Input block must be {} frames",
                self.block_frames
            )));
        }

        if self.mode == ResamplerMode::Adaptive {
            let target = clamp_ratio(ratio.to_f64(), self.ideal);
            if target != self.current {
                self.kind
                    .set_resample_ratio(target)
                    .map_err(|e| Error::Resampler(format!("Failed to set ratio: {}", e)))?;
                trace!("Core ratio {:.9} -> {:.9}", self.current, target);
                self.current = target;
            }
        }

        let (_, frames) = self
            .kind
            .process_into_buffer(input, output)
            .map_err(|e| Error::Resampler(format!("Resampling failed: {}", e)))?;

        Ok(frames)
    }

    fn input_frames(&self) -> usize {
        self.block_frames
    }

    fn output_frames_max(&self) -> usize {
        self.kind.output_frames_max()
    }

    fn effective_ratio(&self) -> f64 {
        self.current
    }

    fn rates(&self) -> (RateCode, RateCode) {
        (self.input, self.output)
    }
}

/// Clamp a requested ratio to ±[`MAX_DEVIATION_PPM`] of `ideal`
pub fn clamp_ratio(requested: f64, ideal: f64) -> f64 {
    let band = ideal * MAX_DEVIATION_PPM * 1e-6;
    if requested.is_nan() {
        return ideal;
    }
    requested.clamp(ideal - band, ideal + band)
}

/// Split interleaved integer samples into planar floats.
///
/// Input:  [L, R, L, R, L, R, ...]
/// Output: [[L, L, L, ...], [R, R, R, ...]]
///
/// Every planar channel is cleared first; pushes stay within existing capacity
/// once the vectors have been sized for a block.
pub(crate) fn deinterleave_into(samples: &[Sample], planar: &mut [Vec<f64>]) {
    for channel in planar.iter_mut() {
        channel.clear();
    }
    let width = planar.len();
    if width == 0 {
        return;
    }
    for frame in samples.chunks_exact(width) {
        for (channel, &sample) in planar.iter_mut().zip(frame) {
            channel.push(sample_to_f64(sample));
        }
    }
}

/// Merge the first `frames` planar floats back into interleaved integer samples.
///
/// Input:  [[L, L, L, ...], [R, R, R, ...]]
/// Output: [L, R, L, R, L, R, ...]
pub(crate) fn interleave_into(
    planar: &[Vec<f64>],
    frames: usize,
    out: &mut Vec<Sample>,
    mut dither: Option<&mut Dither>,
) {
    out.clear();
    for frame_idx in 0..frames {
        for channel in planar {
            let value = channel[frame_idx];
            out.push(match dither.as_deref_mut() {
                Some(d) => d.quantize(value),
                None => f64_to_sample(value),
            });
        }
    }
}
