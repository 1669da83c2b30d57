//! Hardware timestamp counter
//!
//! The hardware side exposes a free-running 32-bit tick counter clocked from
//! the interface's crystal. It wraps, so intervals are always taken with
//! wrapping subtraction reinterpreted as signed.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Anything that can be sampled for the current hardware tick
pub trait HardwareClock: Send {
    fn ticks(&self) -> u32;
}

/// Signed ticks from `earlier` to `later`, correct across one counter wrap
#[inline]
pub fn tick_delta(later: u32, earlier: u32) -> i32 {
    later.wrapping_sub(earlier) as i32
}

/// Shared tick counter, advanced by the hardware endpoint and sampled by the manager
#[derive(Debug, Clone, Default)]
pub struct TickCounter(Arc<AtomicU32>);

impl TickCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter starting at `initial` (lets tests start close to the wrap)
    pub fn starting_at(initial: u32) -> Self {
        Self(Arc::new(AtomicU32::new(initial)))
    }

    /// Advance by `ticks`, wrapping
    pub fn advance(&self, ticks: u32) {
        self.0.fetch_add(ticks, Ordering::Release);
    }

    pub fn get(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }
}

impl HardwareClock for TickCounter {
    fn ticks(&self) -> u32 {
        self.get()
    }
}

/// Sliding-window estimate of the hardware clock against the frame count
///
/// Instrumentation only: the estimate is logged, never fed into the ratio.
#[derive(Debug)]
pub struct RateEstimator {
    window: usize,
    ticks_per_frame: f64,
    samples: VecDeque<(u32, u64)>,
    frames_total: u64,
}

impl RateEstimator {
    pub fn new(window: usize, ticks_per_frame: u32) -> Self {
        let window = window.max(2);
        Self {
            window,
            ticks_per_frame: ticks_per_frame as f64,
            samples: VecDeque::with_capacity(window),
            frames_total: 0,
        }
    }

    /// Record `frames` produced since the previous record, observed at `ticks`
    pub fn record(&mut self, ticks: u32, frames: u64) {
        self.frames_total += frames;
        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back((ticks, self.frames_total));
    }

    /// Estimated drift in ppm: positive when more frames were produced than the
    /// hardware clock accounts for
    pub fn drift_ppm(&self) -> Option<f64> {
        let (first_ticks, first_frames) = *self.samples.front()?;
        let (last_ticks, last_frames) = *self.samples.back()?;

        let elapsed = last_ticks.wrapping_sub(first_ticks) as f64;
        if self.samples.len() < 2 || elapsed <= 0.0 {
            return None;
        }

        let expected = (last_frames - first_frames) as f64 * self.ticks_per_frame;
        Some((expected / elapsed - 1.0) * 1e6)
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.frames_total = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_across_wrap() {
        let earlier = u32::MAX - 99;
        let later = earlier.wrapping_add(250);
        assert_eq!(later, 150);
        assert_eq!(tick_delta(later, earlier), 250);
        assert_eq!(tick_delta(earlier, later), -250);
    }

    #[test]
    fn test_counter_wraps() {
        let counter = TickCounter::starting_at(u32::MAX - 10);
        let before = counter.ticks();
        counter.advance(64);
        assert_eq!(counter.get(), 53);
        assert_eq!(tick_delta(counter.ticks(), before), 64);
    }

    #[test]
    fn test_clones_share_state() {
        let counter = TickCounter::new();
        let view = counter.clone();
        counter.advance(5);
        assert_eq!(view.ticks(), 5);
    }

    #[test]
    fn test_estimator_reports_drift() {
        let mut estimator = RateEstimator::new(8, 64);
        let mut ticks = 0u32;
        estimator.record(ticks, 0);
        for _ in 0..10 {
            // 100 frames per 6400 ticks would be nominal; the clock runs 1% slow
            ticks = ticks.wrapping_add(6336);
            estimator.record(ticks, 100);
        }

        let ppm = estimator.drift_ppm().unwrap();
        assert!((ppm - 10_101.0).abs() < 5.0, "ppm = {}", ppm);
    }

    #[test]
    fn test_estimator_needs_two_points() {
        let mut estimator = RateEstimator::new(4, 64);
        assert!(estimator.drift_ppm().is_none());
        estimator.record(100, 10);
        assert!(estimator.drift_ppm().is_none());
    }
}
