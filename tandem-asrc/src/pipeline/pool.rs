//! Resampler worker pool
//!
//! N worker threads per direction, each owning a contiguous slice of the
//! channels and one resampler core. The manager talks to every worker over a
//! pair of rendezvous channels (capacity 0), so a send only completes when the
//! worker is actually waiting for it.
//!
//! One invocation scatters the interleaved input block across the workers,
//! lets them run in parallel, then gathers their outputs in worker order.
//!
//! Threads are spawned once and survive reconfiguration; they exit when the
//! pool is dropped.

use crate::audio::ratio::FixedPointRatio;
use crate::audio::resampler::CoreFactory;
use crate::audio::types::{Direction, Sample};
use crate::error::{Error, Result};
use crate::pipeline::worker::{WorkBlock, Worker, WorkerReply, WorkerRequest};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::ops::Range;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tandem_common::RateCode;
use tracing::{debug, error, info, trace, warn};

/// Manager-side ends of one worker's channels
struct WorkerHandle {
    requests: Option<Sender<WorkerRequest>>,
    replies: Receiver<WorkerReply>,
    thread: Option<JoinHandle<()>>,
}

/// Worker pool for one direction
pub struct WorkerPool {
    direction: Direction,
    channels: usize,
    groups: Vec<Range<usize>>,
    workers: Vec<WorkerHandle>,

    /// Circulating blocks, one per worker; `None` while the worker holds it
    blocks: Vec<Option<WorkBlock>>,

    /// Gathered interleaved output of the last invocation
    output: Vec<Sample>,

    frame_counts: Vec<usize>,
    block_frames: usize,
    output_frames_max: usize,
    configured: Option<(RateCode, RateCode)>,
    last_rates: Option<(RateCode, RateCode)>,
    divergences: u64,
}

impl WorkerPool {
    /// Spawn `workers` threads (clamped to the channel count) for `channels` channels.
    ///
    /// With `dither_seed` set, worker `i` dithers with seed `dither_seed + i`.
    pub fn spawn(
        direction: Direction,
        channels: usize,
        workers: usize,
        factory: Arc<dyn CoreFactory>,
        dither_seed: Option<u64>,
    ) -> Result<Self> {
        if channels == 0 {
            return Err(Error::Config(format!("{} pool needs at least one channel", direction)));
        }

        let groups = partition_channels(channels, workers);
        let mut handles = Vec::with_capacity(groups.len());

        for (index, group) in groups.iter().enumerate() {
            let (request_tx, request_rx) = bounded::<WorkerRequest>(0);
            let (reply_tx, reply_rx) = bounded::<WorkerReply>(0);

            let worker = Worker::new(
                direction,
                index,
                group.len(),
                Arc::clone(&factory),
                dither_seed.map(|seed| seed.wrapping_add(index as u64)),
            );

            let thread = thread::Builder::new()
                .name(format!("{}-src-{}", direction, index))
                .spawn(move || worker.run(request_rx, reply_tx))?;

            handles.push(WorkerHandle {
                requests: Some(request_tx),
                replies: reply_rx,
                thread: Some(thread),
            });
        }

        info!(
            "{} pool started with {} worker threads for {} channels",
            direction,
            handles.len(),
            channels
        );

        Ok(Self {
            direction,
            channels,
            blocks: groups.iter().map(|_| Some(WorkBlock::default())).collect(),
            frame_counts: vec![0; groups.len()],
            groups,
            workers: handles,
            output: Vec::new(),
            block_frames: 0,
            output_frames_max: 0,
            configured: None,
            last_rates: None,
            divergences: 0,
        })
    }

    /// Reinitialize every worker for a new rate pair.
    ///
    /// Returns only after every worker has acknowledged, so the next
    /// [`process`](Self::process) runs on the new configuration.
    pub fn configure(&mut self, input: RateCode, output: RateCode, block_frames: usize) -> Result<()> {
        if block_frames == 0 {
            return Err(Error::Config("block_frames must be at least 1".to_string()));
        }

        self.configured = None;
        self.last_rates = None;

        for index in 0..self.workers.len() {
            self.send(
                index,
                WorkerRequest::Configure {
                    input,
                    output,
                    block_frames,
                },
            )?;
        }

        // Collect every acknowledgement before reporting a failure, keeping
        // every worker back in its idle state
        let mut first_error = None;
        let mut output_frames_max = 0;
        for index in 0..self.workers.len() {
            match self.recv(index)? {
                WorkerReply::Configured {
                    input: acked_in,
                    output: acked_out,
                    output_frames_max: frames,
                } if (acked_in, acked_out) == (input, output) => {
                    output_frames_max = output_frames_max.max(frames);
                }
                WorkerReply::Failed { error, .. } => {
                    first_error.get_or_insert(Error::Worker {
                        direction: self.direction,
                        index,
                        message: error,
                    });
                }
                other => {
                    first_error.get_or_insert(Error::Protocol(format!(
                        "{} worker {} answered configure with {:?}",
                        self.direction, index, other
                    )));
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        self.blocks = self
            .groups
            .iter()
            .map(|group| Some(WorkBlock::with_capacity(group.len(), block_frames, output_frames_max)))
            .collect();
        self.output = Vec::with_capacity(self.channels * output_frames_max);
        self.block_frames = block_frames;
        self.output_frames_max = output_frames_max;
        self.configured = Some((input, output));

        debug!(
            "{} pool configured {} -> {} ({} frames in, up to {} out)",
            self.direction, input, output, block_frames, output_frames_max
        );
        Ok(())
    }

    /// Run one block through every worker and return the gathered interleaved output.
    ///
    /// `input` must hold exactly `block_frames` interleaved frames.
    pub fn process(&mut self, ratio: FixedPointRatio, input: &[Sample]) -> Result<&[Sample]> {
        if self.configured.is_none() {
            return Err(Error::Protocol(format!(
                "{} pool invoked before configuration",
                self.direction
            )));
        }
        if input.len() != self.channels * self.block_frames {
            return Err(Error::Protocol(format!(
                "{} pool expected {} samples, got {}",
                self.direction,
                self.channels * self.block_frames,
                input.len()
            )));
        }

        // Scatter
        for index in 0..self.workers.len() {
            let Some(mut block) = self.blocks[index].take() else {
                return Err(Error::Protocol(format!(
                    "{} worker {} still holds its block",
                    self.direction, index
                )));
            };
            let group = self.groups[index].clone();
            block.input.clear();
            for frame in input.chunks_exact(self.channels) {
                block.input.extend_from_slice(&frame[group.clone()]);
            }
            self.send(index, WorkerRequest::Process { ratio, block })?;
        }

        // Gather replies in worker order
        let mut first_error = None;
        for index in 0..self.workers.len() {
            match self.recv(index)? {
                WorkerReply::Processed {
                    frames,
                    block,
                    rates,
                } => {
                    self.frame_counts[index] = frames;
                    self.blocks[index] = Some(block);
                    self.last_rates = Some(rates);
                }
                WorkerReply::Failed { error, block } => {
                    self.blocks[index] = block;
                    first_error.get_or_insert(Error::Worker {
                        direction: self.direction,
                        index,
                        message: error,
                    });
                }
                other => {
                    first_error.get_or_insert(Error::Protocol(format!(
                        "{} worker {} answered data with {:?}",
                        self.direction, index, other
                    )));
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        let frames = self.frame_counts.iter().copied().min().unwrap_or(0);
        let longest = self.frame_counts.iter().copied().max().unwrap_or(0);
        if longest != frames {
            self.divergences += 1;
            if self.divergences == 1 || self.divergences % 1000 == 0 {
                warn!(
                    "{} workers produced unequal block lengths ({} vs {}), truncating (total: {})",
                    self.direction, frames, longest, self.divergences
                );
            }
        }

        self.output.clear();
        for frame_idx in 0..frames {
            for (group, block) in self.groups.iter().zip(&self.blocks) {
                if let Some(block) = block {
                    let width = group.len();
                    self.output
                        .extend_from_slice(&block.output[frame_idx * width..(frame_idx + 1) * width]);
                }
            }
        }

        trace!("{} pool produced {} frames at {}", self.direction, frames, ratio);
        Ok(self.output.as_slice())
    }

    fn send(&self, index: usize, request: WorkerRequest) -> Result<()> {
        let disconnected = Error::WorkerDisconnected {
            direction: self.direction,
            index,
        };
        match &self.workers[index].requests {
            Some(tx) => tx.send(request).map_err(|_| disconnected),
            None => Err(disconnected),
        }
    }

    fn recv(&self, index: usize) -> Result<WorkerReply> {
        self.workers[index]
            .replies
            .recv()
            .map_err(|_| Error::WorkerDisconnected {
                direction: self.direction,
                index,
            })
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Channel ranges owned by each worker
    pub fn groups(&self) -> &[Range<usize>] {
        &self.groups
    }

    /// Rate pair the most recent reply was processed with
    pub fn last_rates(&self) -> Option<(RateCode, RateCode)> {
        self.last_rates
    }

    pub fn configured_rates(&self) -> Option<(RateCode, RateCode)> {
        self.configured
    }

    pub fn output_frames_max(&self) -> usize {
        self.output_frames_max
    }

    /// Invocations where workers disagreed on the output length
    pub fn divergences(&self) -> u64 {
        self.divergences
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Hanging up the request channels ends every worker loop
        for worker in &mut self.workers {
            worker.requests.take();
        }

        for (index, worker) in self.workers.iter_mut().enumerate() {
            if let Some(thread) = worker.thread.take() {
                match thread.join() {
                    Ok(()) => debug!("{} worker {} joined successfully", self.direction, index),
                    Err(e) => error!("{} worker {} join failed: {:?}", self.direction, index, e),
                }
            }
        }
    }
}

/// Split `channels` into contiguous ranges, as even as possible.
///
/// The worker count is clamped to `1..=channels`; earlier workers take the
/// extra channel when the split is uneven.
pub fn partition_channels(channels: usize, workers: usize) -> Vec<Range<usize>> {
    let workers = workers.clamp(1, channels.max(1));
    let base = channels / workers;
    let extra = channels % workers;

    let mut start = 0;
    (0..workers)
        .map(|index| {
            let len = base + usize::from(index < extra);
            let range = start..start + len;
            start += len;
            range
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_even() {
        assert_eq!(partition_channels(8, 4), vec![0..2, 2..4, 4..6, 6..8]);
    }

    #[test]
    fn test_partition_uneven() {
        assert_eq!(partition_channels(5, 2), vec![0..3, 3..5]);
        assert_eq!(partition_channels(7, 3), vec![0..3, 3..5, 5..7]);
    }

    #[test]
    fn test_partition_clamps_worker_count() {
        assert_eq!(partition_channels(2, 8), vec![0..1, 1..2]);
        assert_eq!(partition_channels(3, 0), vec![0..3]);
    }
}
