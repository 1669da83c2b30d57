//! Stream manager
//!
//! Single-threaded event loop that owns every buffer and all controller state
//! for the current epoch. It blocks on whichever endpoint is ready first:
//!
//! - **Host block**: capture output is popped from the capture FIFO into the
//!   block, the input is staged, and every complete staged block goes through
//!   the playback pool into the playback FIFO. Once the block is drained and
//!   at least `cycle_length` invocations have run, the clock recovery
//!   controller runs.
//! - **Hardware frame**: one frame is popped from the playback FIFO to render,
//!   the captured frame is staged, and every complete staged block goes through
//!   the capture pool into the capture FIFO.
//! - **Rate change**: the epoch ends. [`StreamManager::run`] reconfigures the
//!   worker pools and starts the next epoch at the new rate.
//!
//! Epoch lifecycle: `STARTUP → RUNNING → RATE_CHANGE → STARTUP`. The loop ends
//! when either endpoint hangs up.

use crate::audio::resampler::{CoreFactory, StandardCoreFactory};
use crate::audio::ring_buffer::{FrameFifo, RingBufferStats};
use crate::audio::types::{Direction, Sample};
use crate::config::AsrcConfig;
use crate::error::{Error, Result};
use crate::pipeline::clock::{HardwareClock, RateEstimator};
use crate::pipeline::controller::{ClockRecovery, CycleOutcome, Occupancy};
use crate::pipeline::endpoint::{HardwareFrame, HardwareLink, HostBlock, HostLink, HostMessage};
use crate::pipeline::pool::WorkerPool;
use crossbeam_channel::{select, Sender};
use serde::Serialize;
use std::sync::Arc;
use tandem_common::RateCode;
use tracing::{debug, info, trace};

/// Seed for playback-side dither; capture workers use a disjoint range
const DITHER_SEED: u64 = 0x7a6e_de00;

/// Control cycles between rate-estimate log lines
const ESTIMATE_LOG_INTERVAL: u64 = 100;

/// Why an epoch ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EpochEnd {
    /// Host renegotiated to this rate
    RateChange(RateCode),

    /// The named endpoint hung up
    Disconnected(&'static str),
}

/// Per-epoch statistics, logged when the epoch ends
#[derive(Debug, Clone, Serialize)]
pub struct EpochSummary {
    pub index: usize,
    pub host_rate: RateCode,
    pub hardware_rate: RateCode,

    pub host_blocks: u64,
    pub host_frames: u64,
    pub hardware_frames: u64,

    /// Frames produced by each pool
    pub playback_frames_out: u64,
    pub capture_frames_out: u64,

    /// Frames zero-filled because a FIFO was underflowing
    pub silent_render_frames: u64,
    pub silent_host_frames: u64,

    /// Controller cycles that updated the ratios / that were discarded
    pub cycles: u64,
    pub rejected_cycles: u64,

    pub playback_ratio: f64,
    pub capture_ratio: f64,
    pub playback: RingBufferStats,
    pub capture: RingBufferStats,

    /// Pool invocations with unequal worker output lengths
    pub divergences: u64,

    pub estimated_drift_ppm: Option<f64>,
    pub ended_by: Option<EpochEnd>,
}

impl EpochSummary {
    fn new(index: usize, host_rate: RateCode, hardware_rate: RateCode) -> Self {
        Self {
            index,
            host_rate,
            hardware_rate,
            host_blocks: 0,
            host_frames: 0,
            hardware_frames: 0,
            playback_frames_out: 0,
            capture_frames_out: 0,
            silent_render_frames: 0,
            silent_host_frames: 0,
            cycles: 0,
            rejected_cycles: 0,
            playback_ratio: 0.0,
            capture_ratio: 0.0,
            playback: RingBufferStats::default(),
            capture: RingBufferStats::default(),
            divergences: 0,
            estimated_drift_ppm: None,
            ended_by: None,
        }
    }
}

/// One control cycle as seen from outside (opt-in telemetry)
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub epoch: usize,
    pub ticks: u32,
    pub outcome: CycleOutcome,
    pub playback_ratio: f64,
    pub capture_ratio: f64,
    pub playback: RingBufferStats,
    pub capture: RingBufferStats,
}

/// State owned by one epoch
struct Epoch {
    controller: ClockRecovery,
    playback: FrameFifo,
    capture: FrameFifo,
    playback_staging: Vec<Sample>,
    staging_capacity: usize,
    capture_staging: Vec<Sample>,
    estimator: Option<RateEstimator>,
    cycle_frames: u64,
    divergences_at_start: u64,
    summary: EpochSummary,
}

/// What the loop woke up for
enum Event {
    Host(HostMessage),
    Hardware(HardwareFrame),
    Closed(&'static str),
}

/// The bridge's event loop and everything it owns
pub struct StreamManager {
    config: AsrcConfig,
    host: HostLink,
    hardware: HardwareLink,
    clock: Box<dyn HardwareClock>,
    playback_pool: WorkerPool,
    capture_pool: WorkerPool,
    telemetry: Option<Sender<CycleReport>>,
    epochs: usize,
}

impl StreamManager {
    /// Manager with the rubato cores selected by `config`
    pub fn new(
        config: AsrcConfig,
        host: HostLink,
        hardware: HardwareLink,
        clock: Box<dyn HardwareClock>,
    ) -> Result<Self> {
        let factory = Arc::new(StandardCoreFactory::new(config.resampler, config.quality));
        Self::with_factory(config, host, hardware, clock, factory)
    }

    /// Manager with a caller-supplied core factory
    pub fn with_factory(
        config: AsrcConfig,
        host: HostLink,
        hardware: HardwareLink,
        clock: Box<dyn HardwareClock>,
        factory: Arc<dyn CoreFactory>,
    ) -> Result<Self> {
        config.validate()?;

        let (playback_seed, capture_seed) = if config.dither {
            (Some(DITHER_SEED), Some(DITHER_SEED ^ 0xffff_0000))
        } else {
            (None, None)
        };

        let playback_pool = WorkerPool::spawn(
            Direction::Playback,
            config.playback_channels,
            config.workers_per_direction,
            Arc::clone(&factory),
            playback_seed,
        )?;
        let capture_pool = WorkerPool::spawn(
            Direction::Capture,
            config.capture_channels,
            config.workers_per_direction,
            factory,
            capture_seed,
        )?;

        Ok(Self {
            config,
            host,
            hardware,
            clock,
            playback_pool,
            capture_pool,
            telemetry: None,
            epochs: 0,
        })
    }

    /// Receive one [`CycleReport`] per control cycle
    pub fn set_telemetry(&mut self, sender: Sender<CycleReport>) {
        self.telemetry = Some(sender);
    }

    /// Run epochs until an endpoint hangs up.
    ///
    /// Each rate change ends the current epoch and starts a new one at the new
    /// rate. A rate outside the supported set is fatal.
    pub fn run(&mut self) -> Result<Vec<EpochSummary>> {
        let mut summaries = Vec::new();
        let mut host_rate = self.config.host_rate;

        loop {
            let summary = self.run_epoch(host_rate)?;
            let ended_by = summary.ended_by;
            summaries.push(summary);

            match ended_by {
                Some(EpochEnd::RateChange(rate)) => {
                    info!("Host rate changed {} -> {}, restarting", host_rate, rate);
                    host_rate = rate;
                }
                Some(EpochEnd::Disconnected(endpoint)) => {
                    info!("{} endpoint disconnected, stopping", endpoint);
                    return Ok(summaries);
                }
                None => return Ok(summaries),
            }
        }
    }

    /// STARTUP → RUNNING → (rate change | disconnect)
    fn run_epoch(&mut self, host_rate: RateCode) -> Result<EpochSummary> {
        let hardware_rate = self.config.hardware_rate;
        let block_frames = self.config.block_frames;
        let index = self.epochs;
        self.epochs += 1;

        // STARTUP: reconfigure workers (handshaked), fresh buffers and controller
        self.playback_pool
            .configure(host_rate, hardware_rate, block_frames)?;
        self.capture_pool
            .configure(hardware_rate, host_rate, block_frames)?;

        let capacity = self.config.fifo_capacity();
        let playback_staging = Vec::with_capacity(self.config.playback_staging_samples());
        let mut epoch = Epoch {
            controller: ClockRecovery::new(self.config.controller, host_rate, hardware_rate),
            playback: FrameFifo::new(Direction::Playback, self.config.playback_channels, capacity),
            capture: FrameFifo::new(Direction::Capture, self.config.capture_channels, capacity),
            staging_capacity: playback_staging.capacity(),
            playback_staging,
            capture_staging: Vec::with_capacity(block_frames * self.config.capture_channels),
            estimator: self
                .config
                .estimate_rate
                .then(|| RateEstimator::new(64, self.config.controller.ticks_per_frame)),
            cycle_frames: 0,
            divergences_at_start: self.playback_pool.divergences() + self.capture_pool.divergences(),
            summary: EpochSummary::new(index, host_rate, hardware_rate),
        };

        info!(
            "Epoch {} started: host {} -> hardware {} ({} frame FIFOs, {:?} resampler)",
            index, host_rate, hardware_rate, capacity, self.config.resampler
        );

        // RUNNING
        let ended_by = loop {
            let event = select! {
                recv(self.host.messages) -> message => match message {
                    Ok(message) => Event::Host(message),
                    Err(_) => Event::Closed("host"),
                },
                recv(self.hardware.frames) -> frame => match frame {
                    Ok(frame) => Event::Hardware(frame),
                    Err(_) => Event::Closed("hardware"),
                },
            };

            let end = match event {
                Event::Host(HostMessage::RateChange(hz)) => {
                    Some(EpochEnd::RateChange(RateCode::try_from(hz)?))
                }
                Event::Host(HostMessage::Block(block)) => self.on_host_block(&mut epoch, block)?,
                Event::Hardware(frame) => self.on_hardware_frame(&mut epoch, frame)?,
                Event::Closed(endpoint) => Some(EpochEnd::Disconnected(endpoint)),
            };

            if let Some(end) = end {
                break end;
            }
        };

        Ok(self.finish_epoch(epoch, ended_by))
    }

    fn on_host_block(&mut self, epoch: &mut Epoch, mut block: HostBlock) -> Result<Option<EpochEnd>> {
        let playback_channels = self.config.playback_channels;
        if block.input.len() % playback_channels != 0
            || block.output.len() % self.config.capture_channels != 0
        {
            return Err(Error::Protocol(format!(
                "host block of {} in / {} out samples is not whole frames",
                block.input.len(),
                block.output.len()
            )));
        }
        if block.input.len() / playback_channels > self.config.max_host_block_frames {
            return Err(Error::Protocol(format!(
                "host block of {} frames exceeds max_host_block_frames = {}",
                block.input.len() / playback_channels,
                self.config.max_host_block_frames
            )));
        }

        epoch.summary.host_blocks += 1;
        epoch.summary.host_frames += (block.input.len() / playback_channels) as u64;

        // Output request: resampled capture audio, silence while underflowing
        let silent = epoch.capture.pop_interleaved(&mut block.output);
        epoch.summary.silent_host_frames += silent as u64;

        epoch.playback_staging.extend_from_slice(&block.input);
        debug_assert_eq!(epoch.playback_staging.capacity(), epoch.staging_capacity);
        self.drain_playback(epoch)?;

        if self.host.returns.send(block).is_err() {
            return Ok(Some(EpochEnd::Disconnected("host")));
        }
        Ok(None)
    }

    fn on_hardware_frame(
        &mut self,
        epoch: &mut Epoch,
        mut frame: HardwareFrame,
    ) -> Result<Option<EpochEnd>> {
        if frame.captured.len() != self.config.capture_channels
            || frame.render.len() != self.config.playback_channels
        {
            return Err(Error::Protocol(format!(
                "hardware frame of {} captured / {} render samples",
                frame.captured.len(),
                frame.render.len()
            )));
        }

        epoch.summary.hardware_frames += 1;

        if epoch.playback.pop_frame(&mut frame.render) {
            epoch.summary.silent_render_frames += 1;
        }

        epoch.capture_staging.extend_from_slice(&frame.captured);
        self.drain_capture(epoch)?;

        if self.hardware.returns.send(frame).is_err() {
            return Ok(Some(EpochEnd::Disconnected("hardware")));
        }
        Ok(None)
    }

    /// Run every complete staged resampler block through the playback pool,
    /// then close a control cycle if one is due
    fn drain_playback(&mut self, epoch: &mut Epoch) -> Result<()> {
        let width = self.config.playback_channels;
        let block_samples = width * self.config.block_frames;

        let mut offset = 0;
        while epoch.playback_staging.len() - offset >= block_samples {
            let ratio = epoch.controller.playback_ratio();
            let output = self
                .playback_pool
                .process(ratio, &epoch.playback_staging[offset..offset + block_samples])?;
            epoch.playback.push_interleaved(output);

            let frames = output.len() / width;
            epoch.summary.playback_frames_out += frames as u64;
            epoch.cycle_frames += frames as u64;
            offset += block_samples;
            epoch.controller.record_invocation(frames);
        }
        epoch.playback_staging.drain(..offset);

        if epoch.controller.cycle_due() {
            self.control_cycle(epoch);
        }

        Ok(())
    }

    /// Run the staged hardware frames through the capture pool once a block is complete
    fn drain_capture(&mut self, epoch: &mut Epoch) -> Result<()> {
        let width = self.config.capture_channels;
        let block_samples = width * self.config.block_frames;
        if epoch.capture_staging.len() < block_samples {
            return Ok(());
        }

        let ratio = epoch.controller.capture_ratio();
        let output = self
            .capture_pool
            .process(ratio, &epoch.capture_staging[..block_samples])?;
        epoch.capture.push_interleaved(output);
        epoch.summary.capture_frames_out += (output.len() / width) as u64;
        epoch.capture_staging.drain(..block_samples);

        Ok(())
    }

    fn control_cycle(&mut self, epoch: &mut Epoch) {
        let now = self.clock.ticks();
        let outcome = epoch.controller.run_cycle(
            now,
            Occupancy::from(&epoch.playback),
            Occupancy::from(&epoch.capture),
        );

        match outcome {
            CycleOutcome::Primed => trace!("Epoch {} controller primed", epoch.summary.index),
            CycleOutcome::Updated { .. } => epoch.summary.cycles += 1,
            CycleOutcome::Rejected { .. } => epoch.summary.rejected_cycles += 1,
        }

        if let Some(estimator) = epoch.estimator.as_mut() {
            estimator.record(now, epoch.cycle_frames);
            if epoch.summary.cycles > 0 && epoch.summary.cycles % ESTIMATE_LOG_INTERVAL == 0 {
                if let Some(ppm) = estimator.drift_ppm() {
                    debug!("Estimated playback drift {:+.1} ppm", ppm);
                }
            }
        }
        epoch.cycle_frames = 0;

        if let Some(telemetry) = &self.telemetry {
            let report = CycleReport {
                epoch: epoch.summary.index,
                ticks: now,
                outcome,
                playback_ratio: epoch.controller.playback_state().ratio,
                capture_ratio: epoch.controller.capture_state().ratio,
                playback: epoch.playback.stats(),
                capture: epoch.capture.stats(),
            };
            if telemetry.send(report).is_err() {
                self.telemetry = None;
            }
        }
    }

    fn finish_epoch(&self, epoch: Epoch, ended_by: EpochEnd) -> EpochSummary {
        let mut summary = epoch.summary;
        summary.playback_ratio = epoch.controller.playback_state().ratio;
        summary.capture_ratio = epoch.controller.capture_state().ratio;
        summary.playback = epoch.playback.stats();
        summary.capture = epoch.capture.stats();
        summary.divergences = self.playback_pool.divergences() + self.capture_pool.divergences()
            - epoch.divergences_at_start;
        summary.estimated_drift_ppm = epoch.estimator.as_ref().and_then(RateEstimator::drift_ppm);
        summary.ended_by = Some(ended_by);

        info!(
            "Epoch {} ended ({:?}): {} host blocks, {} hardware frames, {} cycles ({} rejected), \
             playback overflows {} underflows {}, capture overflows {} underflows {}",
            summary.index,
            ended_by,
            summary.host_blocks,
            summary.hardware_frames,
            summary.cycles,
            summary.rejected_cycles,
            summary.playback.overflows,
            summary.playback.underflows,
            summary.capture.overflows,
            summary.capture.underflows
        );

        summary
    }

    pub fn config(&self) -> &AsrcConfig {
        &self.config
    }
}

/// Build a manager from `config` and run it to completion
pub fn run(
    config: AsrcConfig,
    host: HostLink,
    hardware: HardwareLink,
    clock: Box<dyn HardwareClock>,
) -> Result<Vec<EpochSummary>> {
    StreamManager::new(config, host, hardware, clock)?.run()
}
