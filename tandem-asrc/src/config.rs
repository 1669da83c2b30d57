//! Bridge configuration
//!
//! Every field has a default, so an empty (or absent) file yields a working
//! 48 kHz stereo bridge. Loaded from TOML; see
//! [`tandem_common::config::resolve_config_path`] for the file lookup order.
//!
//! Example:
//!
//! ```toml
//! hardware_rate = 48000
//! host_rate = 44100
//! playback_channels = 2
//! capture_channels = 2
//! resampler = "adaptive"
//! quality = "high"
//! handoff = "rendezvous"
//!
//! [controller]
//! kp = -2.0e-6
//! ki = 1.0e-3
//! ```

use crate::audio::resampler::{ResamplerMode, ResamplerQuality};
use crate::audio::types::SRC_N_IN_SAMPLES;
use crate::error::{Error, Result};
use crate::pipeline::controller::ControllerSettings;
use crate::pipeline::endpoint::HandoffMode;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tandem_common::config::{load_toml, parse_toml, resolve_config_path};
use tandem_common::RateCode;

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "TANDEM_CONFIG";

/// File looked up in the platform config directory
pub const CONFIG_FILE_NAME: &str = "asrc.toml";

/// FIFO capacity, in worst-case output blocks, when not set explicitly
const DEFAULT_FIFO_BLOCKS: usize = 8;

const DEFAULT_MAX_HOST_BLOCK_FRAMES: usize = 1024;

/// Bridge configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AsrcConfig {
    /// Fixed rate of the audio interface
    pub hardware_rate: RateCode,

    /// Host rate for the first epoch (later epochs follow rate changes)
    pub host_rate: RateCode,

    /// Channels rendered by the hardware (host → hardware)
    pub playback_channels: usize,

    /// Channels captured by the hardware (hardware → host)
    pub capture_channels: usize,

    /// Resampler threads per direction (clamped to the channel count)
    pub workers_per_direction: usize,

    /// Input frames per resampler invocation
    pub block_frames: usize,

    /// Largest host block accepted; sizes the playback staging buffer
    pub max_host_block_frames: usize,

    /// FIFO capacity in frames; 0 derives it from the worst-case ratio
    pub fifo_frames: usize,

    pub resampler: ResamplerMode,
    pub quality: ResamplerQuality,

    /// TPDF dither to 24 bits on resampler output
    pub dither: bool,

    pub handoff: HandoffMode,
    pub controller: ControllerSettings,

    /// Log an auxiliary drift estimate alongside the controller
    pub estimate_rate: bool,
}

impl Default for AsrcConfig {
    fn default() -> Self {
        Self {
            hardware_rate: RateCode::Hz48000,
            host_rate: RateCode::Hz48000,
            playback_channels: 2,
            capture_channels: 2,
            workers_per_direction: 1,
            block_frames: SRC_N_IN_SAMPLES,
            max_host_block_frames: DEFAULT_MAX_HOST_BLOCK_FRAMES,
            fifo_frames: 0,
            resampler: ResamplerMode::default(),
            quality: ResamplerQuality::default(),
            dither: false,
            handoff: HandoffMode::default(),
            controller: ControllerSettings::default(),
            estimate_rate: false,
        }
    }
}

impl AsrcConfig {
    /// Resolve, load and validate the configuration file
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = resolve_config_path(explicit, CONFIG_ENV_VAR, CONFIG_FILE_NAME);
        let config: Self = load_toml(path.as_deref())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = parse_toml(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Most frames one invocation can produce at any supported ratio
    pub fn max_output_block(&self) -> usize {
        (self.block_frames as f64 * RateCode::max_ratio()).ceil() as usize
    }

    /// FIFO capacity in frames (always even)
    pub fn fifo_capacity(&self) -> usize {
        let frames = match self.fifo_frames {
            0 => DEFAULT_FIFO_BLOCKS * self.max_output_block(),
            n => n,
        };
        frames.next_multiple_of(2)
    }

    /// Playback staging size in samples: one full host block on top of the
    /// partial resampler block left from the previous one
    pub fn playback_staging_samples(&self) -> usize {
        (self.max_host_block_frames + self.block_frames) * self.playback_channels
    }

    pub fn validate(&self) -> Result<()> {
        if self.playback_channels == 0 || self.capture_channels == 0 {
            return Err(Error::Config("channel counts must be at least 1".to_string()));
        }
        if self.workers_per_direction == 0 {
            return Err(Error::Config(
                "workers_per_direction must be at least 1".to_string(),
            ));
        }
        if self.block_frames == 0 {
            return Err(Error::Config("block_frames must be at least 1".to_string()));
        }
        if self.max_host_block_frames == 0 {
            return Err(Error::Config(
                "max_host_block_frames must be at least 1".to_string(),
            ));
        }
        if self.fifo_frames != 0 && self.fifo_frames < 2 * self.max_output_block() {
            return Err(Error::Config(format!(
                "fifo_frames = {} cannot hold two output blocks ({} frames)",
                self.fifo_frames,
                2 * self.max_output_block()
            )));
        }

        let c = &self.controller;
        if c.ticks_per_frame == 0 || c.cycle_base == 0 {
            return Err(Error::Config(
                "controller ticks_per_frame and cycle_base must be at least 1".to_string(),
            ));
        }
        if !c.kp.is_finite() || !c.ki.is_finite() {
            return Err(Error::Config("controller gains must be finite".to_string()));
        }

        Ok(())
    }
}
