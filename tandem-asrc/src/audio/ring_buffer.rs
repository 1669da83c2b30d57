//! Elastic ring buffer
//!
//! Occupancy-tracked circular buffer that absorbs the rate mismatch between a
//! producer and a consumer on different clocks. Neither side ever blocks:
//!
//! - Overflow (push into a full buffer): forced rebalance. The read cursor jumps
//!   to half a buffer behind the write cursor, dropping the oldest half along
//!   with the pushed sample.
//! - Underflow: once occupancy reaches zero, pops yield silence without
//!   consuming until the buffer refills past half capacity.
//!
//! Storage is allocated once at construction; push and pop never allocate.

use crate::audio::types::{Direction, Sample};
use serde::Serialize;
use tracing::{trace, warn};

/// Single-channel elastic buffer
#[derive(Debug)]
pub struct ElasticRingBuffer<T = Sample> {
    storage: Box<[T]>,

    /// Next slot to write
    write: usize,

    /// Next slot to read
    read: usize,

    /// Samples currently held
    occupancy: usize,

    /// Set on reaching empty, cleared once occupancy exceeds half capacity
    underflow: bool,

    /// Forced rebalances since construction
    overflows: u64,

    /// Entries into the underflow state since construction
    underflows: u64,
}

impl<T: Copy + Default> ElasticRingBuffer<T> {
    /// Create an empty buffer. Capacity is rounded up to an even number of at least 2.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2).next_multiple_of(2);
        Self {
            storage: vec![T::default(); capacity].into_boxed_slice(),
            write: 0,
            read: 0,
            occupancy: 0,
            underflow: true,
            overflows: 0,
            underflows: 0,
        }
    }

    /// Empty the buffer and re-enter the underflow state. Counters are kept.
    pub fn reset(&mut self) {
        self.write = 0;
        self.read = 0;
        self.occupancy = 0;
        self.underflow = true;
    }

    /// Append one sample. Returns `false` if the push triggered a rebalance.
    pub fn push(&mut self, sample: T) -> bool {
        let capacity = self.storage.len();

        if self.occupancy == capacity {
            self.read = (self.write + capacity - capacity / 2) % capacity;
            self.occupancy = capacity / 2;
            self.overflows += 1;
            trace!(
                "Elastic buffer overflow, rebalanced to {} (total: {})",
                self.occupancy,
                self.overflows
            );
            return false;
        }

        self.storage[self.write] = sample;
        self.write = (self.write + 1) % capacity;
        self.occupancy += 1;
        true
    }

    /// Take one sample. Yields `(T::default(), true)` while in the underflow state.
    pub fn pop(&mut self) -> (T, bool) {
        let capacity = self.storage.len();

        if self.underflow {
            if self.occupancy > capacity / 2 {
                self.underflow = false;
            } else {
                return (T::default(), true);
            }
        }

        let sample = self.storage[self.read];
        self.read = (self.read + 1) % capacity;
        self.occupancy -= 1;

        if self.occupancy == 0 {
            self.underflow = true;
            self.underflows += 1;
            trace!("Elastic buffer ran dry (total: {})", self.underflows);
        }

        (sample, false)
    }

    pub fn occupancy(&self) -> usize {
        self.occupancy
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    pub fn is_underflowing(&self) -> bool {
        self.underflow
    }

    pub fn read_cursor(&self) -> usize {
        self.read
    }

    pub fn write_cursor(&self) -> usize {
        self.write
    }

    pub fn stats(&self) -> RingBufferStats {
        RingBufferStats {
            capacity: self.storage.len(),
            occupied: self.occupancy,
            overflows: self.overflows,
            underflows: self.underflows,
        }
    }
}

/// Ring buffer statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RingBufferStats {
    /// Buffer capacity in samples (frames, for a FIFO)
    pub capacity: usize,

    /// Current occupancy
    pub occupied: usize,

    /// Forced rebalances (buffer was full)
    pub overflows: u64,

    /// Underflow entries (buffer ran dry)
    pub underflows: u64,
}

impl RingBufferStats {
    /// Get buffer fill percentage (0.0 to 1.0)
    pub fn fill_percent(&self) -> f32 {
        self.occupied as f32 / self.capacity as f32
    }
}

/// Multi-channel FIFO: one elastic buffer per channel, driven in lockstep
///
/// Every channel sees the same push/pop sequence, so rebalances and underflow
/// transitions happen at the same frame on every channel and alignment is
/// never lost.
#[derive(Debug)]
pub struct FrameFifo {
    direction: Direction,
    channels: Vec<ElasticRingBuffer<Sample>>,
}

impl FrameFifo {
    pub fn new(direction: Direction, channels: usize, capacity_frames: usize) -> Self {
        Self {
            direction,
            channels: (0..channels.max(1))
                .map(|_| ElasticRingBuffer::new(capacity_frames))
                .collect(),
        }
    }

    /// Append one frame (`frame.len()` must equal the channel count)
    pub fn push_frame(&mut self, frame: &[Sample]) {
        debug_assert_eq!(frame.len(), self.channels.len());

        let mut rebalanced = false;
        for (buffer, &sample) in self.channels.iter_mut().zip(frame) {
            rebalanced |= !buffer.push(sample);
        }

        if rebalanced {
            let count = self.channels[0].overflows;
            if count == 1 || count % 1000 == 0 {
                warn!(
                    "{} FIFO overflow, rebalanced to half full (total: {})",
                    self.direction, count
                );
            }
        }
    }

    /// Append every frame of an interleaved block
    pub fn push_interleaved(&mut self, samples: &[Sample]) {
        let width = self.channels.len();
        for frame in samples.chunks_exact(width) {
            self.push_frame(frame);
        }
    }

    /// Fill `frame` with the next frame. Returns `true` if the FIFO was
    /// underflowing and `frame` was zero-filled.
    pub fn pop_frame(&mut self, frame: &mut [Sample]) -> bool {
        debug_assert_eq!(frame.len(), self.channels.len());

        let before = self.channels[0].underflows;
        let mut was_underflow = false;
        for (buffer, out) in self.channels.iter_mut().zip(frame.iter_mut()) {
            let (sample, underflow) = buffer.pop();
            *out = sample;
            was_underflow |= underflow;
        }

        let count = self.channels[0].underflows;
        if count != before && (count == 1 || count % 1000 == 0) {
            warn!(
                "{} FIFO underflow, emitting silence until half full (total: {})",
                self.direction, count
            );
        }

        was_underflow
    }

    /// Fill an interleaved block frame by frame. Returns the number of silent frames.
    pub fn pop_interleaved(&mut self, samples: &mut [Sample]) -> usize {
        let width = self.channels.len();
        let mut silent = 0;
        for frame in samples.chunks_exact_mut(width) {
            if self.pop_frame(frame) {
                silent += 1;
            }
        }
        silent
    }

    /// Empty every channel
    pub fn reset(&mut self) {
        for buffer in &mut self.channels {
            buffer.reset();
        }
    }

    pub fn channels(&self) -> usize {
        self.channels.len()
    }

    /// Occupancy in frames
    pub fn occupancy(&self) -> usize {
        self.channels[0].occupancy()
    }

    /// Capacity in frames
    pub fn capacity(&self) -> usize {
        self.channels[0].capacity()
    }

    pub fn is_underflowing(&self) -> bool {
        self.channels[0].is_underflowing()
    }

    pub fn stats(&self) -> RingBufferStats {
        self.channels[0].stats()
    }
}
