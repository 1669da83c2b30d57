//! Simulated-time driver
//!
//! Runs a real [`StreamManager`] (with real worker threads) against a host and
//! a hardware interface whose clocks are simulated. The hardware clock can be
//! offset from nominal by a configurable number of ppm, and the host can
//! renegotiate its rate between segments.
//!
//! The driver is a single thread that interleaves host block exchanges and
//! hardware frame transfers in simulated-time order. Because every exchange
//! waits for the manager, the schedule is deterministic.

use crate::audio::resampler::CoreFactory;
use crate::audio::types::{Sample, FULL_SCALE};
use crate::config::AsrcConfig;
use crate::error::{Error, Result};
use crate::pipeline::clock::TickCounter;
use crate::pipeline::endpoint::{hardware_channel, host_channel};
use crate::pipeline::manager::{CycleReport, EpochSummary, StreamManager};
use crate::pipeline::CycleOutcome;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use tracing::{debug, info};

/// A stretch of host blocks at one negotiated rate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimSegment {
    /// Host rate in Hz (not validated here: unsupported rates reach the manager)
    pub host_rate: u32,
    pub host_blocks: u64,
}

/// Simulation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    /// Hardware clock error; positive runs fast
    pub hardware_drift_ppm: f64,

    /// Frames per host exchange
    pub host_block_frames: usize,

    /// Run in order; a rate change is sent whenever the rate differs from the
    /// current one
    pub segments: Vec<SimSegment>,

    /// Test tone frequency for both directions
    pub tone_hz: f64,
}

impl SimConfig {
    /// One segment at `host_rate`
    pub fn steady(host_rate: u32, host_blocks: u64, hardware_drift_ppm: f64) -> Self {
        Self {
            hardware_drift_ppm,
            host_block_frames: 4,
            segments: vec![SimSegment {
                host_rate,
                host_blocks,
            }],
            tone_hz: 997.0,
        }
    }
}

/// Buffer occupancy metrics
///
/// Occupancy sampled at every control cycle.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct OccupancyMetrics {
    /// Minimum occupancy observed (frames)
    pub min_frames: usize,

    /// Maximum occupancy observed (frames)
    pub max_frames: usize,

    /// Mean occupancy (frames)
    pub mean_frames: f64,
}

impl OccupancyMetrics {
    pub fn from_samples(samples: &[usize]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let min = samples.iter().copied().min().unwrap_or(0);
        let max = samples.iter().copied().max().unwrap_or(0);
        let mean = samples.iter().map(|&x| x as f64).sum::<f64>() / samples.len() as f64;

        Self {
            min_frames: min,
            max_frames: max,
            mean_frames: mean,
        }
    }
}

/// Everything a simulation run produced
#[derive(Debug, Clone, Serialize)]
pub struct SimReport {
    pub sim: SimConfig,
    pub epochs: Vec<EpochSummary>,
    pub cycles: Vec<CycleReport>,
    pub host_blocks_sent: u64,
    pub hardware_frames_sent: u64,
}

impl SimReport {
    /// Control cycles of one epoch, in order
    pub fn epoch_cycles(&self, epoch: usize) -> impl Iterator<Item = &CycleReport> {
        self.cycles.iter().filter(move |c| c.epoch == epoch)
    }

    /// Playback occupancy over the updated cycles of `epoch` after skipping `warmup`
    pub fn playback_occupancy(&self, epoch: usize, warmup: usize) -> OccupancyMetrics {
        let samples: Vec<usize> = self
            .epoch_cycles(epoch)
            .filter(|c| matches!(c.outcome, CycleOutcome::Updated { .. }))
            .skip(warmup)
            .map(|c| c.playback.occupied)
            .collect();
        OccupancyMetrics::from_samples(&samples)
    }

    /// Export report to JSON file
    pub fn export_json<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

/// Run `sim` against a manager built from `config`.
///
/// With `factory` unset the manager uses the rubato cores `config` selects.
pub fn run_simulation(
    config: &AsrcConfig,
    sim: &SimConfig,
    factory: Option<Arc<dyn CoreFactory>>,
) -> Result<SimReport> {
    config.validate()?;
    if sim.host_block_frames == 0 {
        return Err(Error::Config("host_block_frames must be at least 1".to_string()));
    }
    if sim.host_block_frames > config.max_host_block_frames {
        return Err(Error::Config(format!(
            "host_block_frames = {} exceeds max_host_block_frames = {}",
            sim.host_block_frames, config.max_host_block_frames
        )));
    }

    let counter = TickCounter::new();
    let (mut host, host_link) = host_channel(
        config.handoff,
        config.playback_channels,
        config.capture_channels,
        sim.host_block_frames,
    );
    let (mut hardware, hardware_link) = hardware_channel(
        config.playback_channels,
        config.capture_channels,
        config.controller.ticks_per_frame,
        counter.clone(),
    );
    let (telemetry_tx, telemetry_rx) = crossbeam_channel::unbounded();

    let manager_config = config.clone();
    let manager = thread::Builder::new()
        .name("stream-manager".to_string())
        .spawn(move || -> Result<Vec<EpochSummary>> {
            let clock = Box::new(counter);
            let mut manager = match factory {
                Some(factory) => {
                    StreamManager::with_factory(manager_config, host_link, hardware_link, clock, factory)?
                }
                None => StreamManager::new(manager_config, host_link, hardware_link, clock)?,
            };
            manager.set_telemetry(telemetry_tx);
            manager.run()
        })?;

    let hardware_hz = config.hardware_rate.hz() as f64 * (1.0 + sim.hardware_drift_ppm * 1e-6);
    let hardware_period = 1.0 / hardware_hz;

    let mut host_input = vec![0 as Sample; sim.host_block_frames * config.playback_channels];
    let mut host_output = vec![0 as Sample; sim.host_block_frames * config.capture_channels];
    let mut captured = vec![0 as Sample; config.capture_channels];
    let mut render = vec![0 as Sample; config.playback_channels];

    let mut current_rate = config.host_rate.hz();
    let mut now = 0.0_f64;
    let mut next_hardware = 0.0_f64;
    let mut host_frame_index = 0u64;
    let mut hardware_frame_index = 0u64;
    let mut host_blocks_sent = 0u64;

    info!(
        "Simulating {} segment(s), hardware {} {:+.1} ppm",
        sim.segments.len(),
        config.hardware_rate,
        sim.hardware_drift_ppm
    );

    // An error from a port means the manager stopped; its own result says why
    let driven: Result<()> = (|| {
        for segment in &sim.segments {
            if segment.host_rate != current_rate {
                debug!("Requesting rate change {} -> {} Hz", current_rate, segment.host_rate);
                host.change_rate(segment.host_rate)?;
                current_rate = segment.host_rate;
            }
            let host_period = sim.host_block_frames as f64 / segment.host_rate as f64;

            for _ in 0..segment.host_blocks {
                let host_due = now + host_period;

                // Hardware frames that fall before this host block
                while next_hardware < host_due {
                    let t = hardware_frame_index as f64 / config.hardware_rate.hz() as f64;
                    captured.fill(tone(sim.tone_hz, t));
                    hardware.transfer(&captured, &mut render)?;
                    hardware_frame_index += 1;
                    next_hardware += hardware_period;
                }

                for frame in host_input.chunks_exact_mut(config.playback_channels) {
                    let t = host_frame_index as f64 / segment.host_rate as f64;
                    frame.fill(tone(sim.tone_hz, t));
                    host_frame_index += 1;
                }
                host.exchange(&host_input, &mut host_output)?;
                host_blocks_sent += 1;
                now = host_due;
            }
        }
        Ok(())
    })();

    // The host hangs up first; the hardware stays connected until the manager
    // has stopped so the run always ends on the host side
    drop(host);
    let joined = manager.join();
    drop(hardware);

    let epochs =
        joined.map_err(|_| Error::Protocol("stream manager thread panicked".to_string()))??;
    driven?;

    let cycles: Vec<CycleReport> = telemetry_rx.try_iter().collect();
    info!(
        "Simulation finished: {} host blocks, {} hardware frames, {} epochs, {} control cycles",
        host_blocks_sent,
        hardware_frame_index,
        epochs.len(),
        cycles.len()
    );

    Ok(SimReport {
        sim: sim.clone(),
        epochs,
        cycles,
        host_blocks_sent,
        hardware_frames_sent: hardware_frame_index,
    })
}

/// Half-scale sine
fn tone(freq: f64, t: f64) -> Sample {
    ((TAU * freq * t).sin() * 0.5 * FULL_SCALE) as Sample
}
