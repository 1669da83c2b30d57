//! Resampler worker
//!
//! One worker owns one resampler core serving a contiguous group of channels.
//! It is purely reactive: it waits on its request channel and answers every
//! request with exactly one reply, in order. It never initiates communication.
//!
//! Blocks travel by value: the manager moves a [`WorkBlock`] in with the
//! request and gets the same allocation back in the reply.

use crate::audio::dither::Dither;
use crate::audio::ratio::FixedPointRatio;
use crate::audio::resampler::{deinterleave_into, interleave_into, CoreFactory, ResamplerCore};
use crate::audio::types::{Direction, Sample};
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use tandem_common::RateCode;
use tracing::{debug, trace, warn};

/// Input and output storage for one worker invocation (interleaved, this worker's channels only)
#[derive(Debug, Default)]
pub struct WorkBlock {
    pub input: Vec<Sample>,
    pub output: Vec<Sample>,
}

impl WorkBlock {
    pub fn with_capacity(channels: usize, input_frames: usize, output_frames: usize) -> Self {
        Self {
            input: Vec::with_capacity(channels * input_frames),
            output: Vec::with_capacity(channels * output_frames),
        }
    }
}

/// Manager → worker
#[derive(Debug)]
pub enum WorkerRequest {
    /// Control: discard filter state and rebuild for a new rate pair
    Configure {
        input: RateCode,
        output: RateCode,
        block_frames: usize,
    },

    /// Data: convert one block at the given ratio
    Process {
        ratio: FixedPointRatio,
        block: WorkBlock,
    },
}

/// Worker → manager
#[derive(Debug)]
pub enum WorkerReply {
    /// Acknowledges a Configure
    Configured {
        input: RateCode,
        output: RateCode,
        output_frames_max: usize,
    },

    /// Output frame count, then the block carrying them
    Processed {
        frames: usize,
        block: WorkBlock,
        rates: (RateCode, RateCode),
    },

    /// The request could not be served; the block is returned when there was one
    Failed {
        error: String,
        block: Option<WorkBlock>,
    },
}

/// Worker state, owned by the worker thread
pub struct Worker {
    direction: Direction,
    index: usize,
    channels: usize,
    factory: Arc<dyn CoreFactory>,
    dither: Option<Dither>,
    core: Option<Box<dyn ResamplerCore>>,
    planar_in: Vec<Vec<f64>>,
    planar_out: Vec<Vec<f64>>,
}

impl Worker {
    pub fn new(
        direction: Direction,
        index: usize,
        channels: usize,
        factory: Arc<dyn CoreFactory>,
        dither_seed: Option<u64>,
    ) -> Self {
        Self {
            direction,
            index,
            channels,
            factory,
            dither: dither_seed.map(Dither::new),
            core: None,
            planar_in: vec![Vec::new(); channels],
            planar_out: vec![Vec::new(); channels],
        }
    }

    /// Serve requests until the manager drops its sender
    pub fn run(mut self, requests: Receiver<WorkerRequest>, replies: Sender<WorkerReply>) {
        debug!("{} worker {} started", self.direction, self.index);

        for request in requests.iter() {
            let reply = self.handle(request);
            if replies.send(reply).is_err() {
                break;
            }
        }

        debug!("{} worker {} exiting", self.direction, self.index);
    }

    /// Serve one request
    pub fn handle(&mut self, request: WorkerRequest) -> WorkerReply {
        match request {
            WorkerRequest::Configure {
                input,
                output,
                block_frames,
            } => self.configure(input, output, block_frames),
            WorkerRequest::Process { ratio, block } => self.process(ratio, block),
        }
    }

    fn configure(&mut self, input: RateCode, output: RateCode, block_frames: usize) -> WorkerReply {
        // Old filter history must never leak into the new configuration
        self.core = None;

        match self
            .factory
            .build(input, output, self.channels, block_frames)
        {
            Ok(core) => {
                let output_frames_max = core.output_frames_max();
                for channel in &mut self.planar_in {
                    *channel = Vec::with_capacity(block_frames);
                }
                for channel in &mut self.planar_out {
                    *channel = vec![0.0; output_frames_max];
                }
                self.core = Some(core);

                debug!(
                    "{} worker {} configured {} -> {} (max {} frames out)",
                    self.direction, self.index, input, output, output_frames_max
                );
                WorkerReply::Configured {
                    input,
                    output,
                    output_frames_max,
                }
            }
            Err(e) => {
                warn!(
                    "{} worker {} failed to configure: {}",
                    self.direction, self.index, e
                );
                WorkerReply::Failed {
                    error: e.to_string(),
                    block: None,
                }
            }
        }
    }

    fn process(&mut self, ratio: FixedPointRatio, mut block: WorkBlock) -> WorkerReply {
        let Some(core) = self.core.as_mut() else {
            return WorkerReply::Failed {
                error: "data received before configuration".to_string(),
                block: Some(block),
            };
        };

        if block.input.len() != self.channels * core.input_frames() {
            return WorkerReply::Failed {
                error: format!(
                    "input block holds {} samples, expected {}",
                    block.input.len(),
                    self.channels * core.input_frames()
                ),
                block: Some(block),
            };
        }

        deinterleave_into(&block.input, &mut self.planar_in);

        match core.process(ratio, &self.planar_in, &mut self.planar_out) {
            Ok(frames) => {
                interleave_into(&self.planar_out, frames, &mut block.output, self.dither.as_mut());
                trace!(
                    "{} worker {} produced {} frames at {}",
                    self.direction,
                    self.index,
                    frames,
                    ratio
                );
                WorkerReply::Processed {
                    frames,
                    block,
                    rates: core.rates(),
                }
            }
            Err(e) => WorkerReply::Failed {
                error: e.to_string(),
                block: Some(block),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::resampler::{ResamplerMode, ResamplerQuality, StandardCoreFactory};

    fn worker(channels: usize) -> Worker {
        Worker::new(
            Direction::Playback,
            0,
            channels,
            Arc::new(StandardCoreFactory::new(
                ResamplerMode::Adaptive,
                ResamplerQuality::Fast,
            )),
            None,
        )
    }

    #[test]
    fn test_data_before_configure_fails_and_returns_block() {
        let mut worker = worker(2);
        let reply = worker.handle(WorkerRequest::Process {
            ratio: FixedPointRatio::UNITY,
            block: WorkBlock::with_capacity(2, 4, 8),
        });

        assert!(matches!(reply, WorkerReply::Failed { block: Some(_), .. }));
    }

    #[test]
    fn test_configure_then_process() {
        let mut worker = worker(2);
        let reply = worker.handle(WorkerRequest::Configure {
            input: RateCode::Hz48000,
            output: RateCode::Hz96000,
            block_frames: 4,
        });
        let output_frames_max = match reply {
            WorkerReply::Configured {
                output_frames_max, ..
            } => output_frames_max,
            other => panic!("expected Configured, got {:?}", other),
        };
        assert!(output_frames_max >= 8);

        // Reference: a core built directly from the same factory
        let factory = StandardCoreFactory::new(ResamplerMode::Adaptive, ResamplerQuality::Fast);
        let mut reference = factory
            .build(RateCode::Hz48000, RateCode::Hz96000, 2, 4)
            .unwrap();
        let planar = vec![vec![0.01; 4]; 2];
        let mut planar_out = vec![vec![0.0; reference.output_frames_max()]; 2];

        let mut counts = Vec::new();
        let mut block = WorkBlock::with_capacity(2, 4, output_frames_max);
        for _ in 0..100 {
            block.input.clear();
            block.input.extend_from_slice(&[1000, -1000, 2000, -2000, 3000, -3000, 4000, -4000]);
            match worker.handle(WorkerRequest::Process {
                ratio: FixedPointRatio::from_rates(48_000, 96_000),
                block,
            }) {
                WorkerReply::Processed {
                    frames,
                    block: returned,
                    rates,
                } => {
                    assert_eq!(returned.output.len(), frames * 2);
                    assert_eq!(rates, (RateCode::Hz48000, RateCode::Hz96000));
                    counts.push(frames);
                    block = returned;
                }
                other => panic!("unexpected reply {:?}", other),
            }
        }

        let expected: Vec<usize> = (0..100)
            .map(|_| {
                let ratio = FixedPointRatio::from_rates(48_000, 96_000);
                reference.process(ratio, &planar, &mut planar_out).unwrap()
            })
            .collect();
        assert_eq!(counts, expected);

        // Startup holds back the filter delay; after that every block doubles
        let total: usize = counts.iter().sum();
        assert!(total <= 800, "total = {}", total);
        assert_eq!(counts[50..].iter().sum::<usize>(), 400);
    }

    #[test]
    fn test_wrong_block_size_rejected() {
        let mut worker = worker(1);
        worker.handle(WorkerRequest::Configure {
            input: RateCode::Hz48000,
            output: RateCode::Hz48000,
            block_frames: 4,
        });

        let mut block = WorkBlock::default();
        block.input.extend_from_slice(&[1, 2, 3]);
        let reply = worker.handle(WorkerRequest::Process {
            ratio: FixedPointRatio::UNITY,
            block,
        });
        assert!(matches!(reply, WorkerReply::Failed { .. }));
    }
}
