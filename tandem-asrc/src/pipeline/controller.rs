//! Clock recovery controller
//!
//! Closes a PI loop over the hardware crystal. Once per control cycle it
//! compares the frames the playback path produced against the hardware ticks
//! that elapsed, integrates the difference as phase error, and derives one
//! ratio per direction:
//!
//! ```text
//! error    = frames × ticks_per_frame − measured_ticks
//! phase   += error
//! P        = kp × phase
//! I(dir)   = ki × (C/2 − occupancy) / (C/2)
//! playback = ideal_playback × (1 + P + I(playback))
//! capture  = ideal_capture  × (1 − P + I(capture))
//! ```
//!
//! `kp` is negative: positive phase error means the playback path is running
//! ahead of the hardware, so its ratio must come down. The capture path runs
//! the other way across the clock boundary and takes the opposite sign on P;
//! both occupancy terms pull toward half full. `ki` is the relative ratio
//! offset at an empty (or full) FIFO, so the occupancy term never leaves the
//! ±`ki` band whatever the capacity.
//!
//! A cycle closes only between host blocks, once at least `cycle_length`
//! invocations have run: the frames counted and the hardware timestamp must
//! describe the same instant.

use crate::audio::ratio::FixedPointRatio;
use crate::audio::ring_buffer::FrameFifo;
use crate::pipeline::clock::tick_delta;
use serde::{Deserialize, Serialize};
use tandem_common::RateCode;
use tracing::debug;

/// Loop tuning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    /// Hardware counter ticks per hardware frame
    pub ticks_per_frame: u32,

    /// Cycles whose |error| exceeds this many ticks are discarded
    pub outlier_ticks: u32,

    /// Cycle length is `cycle_base × host / hardware + 1` pool invocations
    pub cycle_base: u32,

    /// Proportional gain on accumulated phase error (relative ratio per tick)
    pub kp: f64,

    /// Relative ratio offset for a half-capacity occupancy deviation
    pub ki: f64,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            ticks_per_frame: 64,
            outlier_ticks: 300,
            cycle_base: 25,
            // 128 ppm per frame of phase
            kp: -2.0e-6,
            ki: 1.0e-3,
        }
    }
}

/// Playback pool invocations per control cycle
pub fn cycle_length(cycle_base: u32, host: RateCode, hardware: RateCode) -> u32 {
    (cycle_base as u64 * host.hz() as u64 / hardware.hz() as u64) as u32 + 1
}

/// Fill level of one direction's FIFO, in frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occupancy {
    pub level: usize,
    pub capacity: usize,
}

impl Occupancy {
    pub fn new(level: usize, capacity: usize) -> Self {
        Self { level, capacity }
    }

    /// Frames below half full (negative when above)
    pub fn deficit(&self) -> f64 {
        (self.capacity / 2) as f64 - self.level as f64
    }

    /// Deficit as a fraction of half the capacity: 1 when empty, −1 when full
    pub fn relative_deficit(&self) -> f64 {
        self.deficit() / (self.capacity / 2).max(1) as f64
    }
}

impl From<&FrameFifo> for Occupancy {
    fn from(fifo: &FrameFifo) -> Self {
        Self::new(fifo.occupancy(), fifo.capacity())
    }
}

/// Per-direction ratio state
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ControllerState {
    /// Nominal output/input ratio for this direction
    pub ideal: f64,

    /// Ratio handed to the next pool invocation
    pub ratio: f64,
}

impl ControllerState {
    fn new(ideal: f64) -> Self {
        Self {
            ideal,
            ratio: ideal,
        }
    }

    pub fn encoded(&self) -> FixedPointRatio {
        FixedPointRatio::from_f64(self.ratio)
    }
}

/// Result of one control cycle
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcome {
    /// First cycle of the epoch: timestamp recorded, ratios untouched
    Primed,

    /// Ratios recomputed
    Updated {
        error: i64,
        playback: FixedPointRatio,
        capture: FixedPointRatio,
    },

    /// Error beyond the outlier threshold; sample discarded, ratios untouched
    Rejected { error: i64 },
}

/// Controller for one epoch
#[derive(Debug, Clone)]
pub struct ClockRecovery {
    settings: ControllerSettings,
    cycle_length: u32,
    playback: ControllerState,
    capture: ControllerState,

    /// Accumulated error, ticks
    phase: i64,

    last_ticks: Option<u32>,

    // Per-cycle counters
    invocations: u32,
    frames: u64,

    cycles: u64,
    rejected: u64,
}

impl ClockRecovery {
    pub fn new(settings: ControllerSettings, host: RateCode, hardware: RateCode) -> Self {
        let cycle_length = cycle_length(settings.cycle_base, host, hardware);
        debug!(
            "Clock recovery for {} host / {} hardware: {} invocations per cycle",
            host, hardware, cycle_length
        );

        Self {
            settings,
            cycle_length,
            playback: ControllerState::new(host.ratio_to(hardware)),
            capture: ControllerState::new(hardware.ratio_to(host)),
            phase: 0,
            last_ticks: None,
            invocations: 0,
            frames: 0,
            cycles: 0,
            rejected: 0,
        }
    }

    /// Count one playback pool invocation that produced `frames`
    pub fn record_invocation(&mut self, frames: usize) {
        self.invocations += 1;
        self.frames += frames as u64;
    }

    /// At least `cycle_length` invocations since the last cycle.
    /// Checked once the current host block is fully drained.
    pub fn cycle_due(&self) -> bool {
        self.invocations >= self.cycle_length
    }

    /// Run one control cycle at hardware time `now`
    pub fn run_cycle(&mut self, now: u32, playback: Occupancy, capture: Occupancy) -> CycleOutcome {
        let frames = self.frames;
        self.invocations = 0;
        self.frames = 0;

        let Some(last) = self.last_ticks.replace(now) else {
            debug!("Clock recovery primed at tick {}", now);
            return CycleOutcome::Primed;
        };

        let measured = tick_delta(now, last) as i64;
        let expected = frames as i64 * self.settings.ticks_per_frame as i64;
        let error = expected - measured;

        if error.unsigned_abs() > self.settings.outlier_ticks as u64 {
            self.rejected += 1;
            debug!(
                "Discarding clock sample: error {} ticks (expected {}, measured {})",
                error, expected, measured
            );
            return CycleOutcome::Rejected { error };
        }

        self.phase += error;
        let p = self.settings.kp * self.phase as f64;

        let ki = self.settings.ki;
        self.playback.ratio = self.playback.ideal * (1.0 + p + ki * playback.relative_deficit());
        self.capture.ratio = self.capture.ideal * (1.0 - p + ki * capture.relative_deficit());
        self.cycles += 1;

        debug!(
            "Cycle {}: error {} phase {} -> playback {:.9} capture {:.9}",
            self.cycles, error, self.phase, self.playback.ratio, self.capture.ratio
        );

        CycleOutcome::Updated {
            error,
            playback: self.playback.encoded(),
            capture: self.capture.encoded(),
        }
    }

    pub fn playback_ratio(&self) -> FixedPointRatio {
        self.playback.encoded()
    }

    pub fn capture_ratio(&self) -> FixedPointRatio {
        self.capture.encoded()
    }

    pub fn playback_state(&self) -> ControllerState {
        self.playback
    }

    pub fn capture_state(&self) -> ControllerState {
        self.capture
    }

    pub fn phase_error(&self) -> i64 {
        self.phase
    }

    pub fn cycle_length(&self) -> u32 {
        self.cycle_length
    }

    /// Cycles that updated the ratios
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Cycles discarded as outliers
    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }
}
