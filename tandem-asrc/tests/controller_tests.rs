//! Clock recovery loop against a simulated playback plant
//!
//! The plant produces `frames = ratio × 92` per cycle (fractional frames carried
//! over), while the hardware consumes a fixed number of ticks that is 150 ticks
//! short of what the nominal ratio would produce. The loop must pull the error
//! to zero and settle the FIFO near half full.
//!
//! A 150-tick offset is a 2.3% ratio error, far outside the ±1000 ppm the
//! rubato cores accept, so the plant runs a stiffer loop than the default.

use tandem_asrc::pipeline::{ClockRecovery, ControllerSettings, CycleOutcome, Occupancy};
use tandem_asrc::RateCode;

const CAPACITY: usize = 1024;
const TICKS_PER_FRAME: u32 = 64;

struct Plant {
    controller: ClockRecovery,
    ticks: u32,
    measured: u32,
    occupancy: f64,
    carry: f64,
}

/// 2560 ppm per frame of phase
fn plant_settings() -> ControllerSettings {
    ControllerSettings {
        kp: -4.0e-5,
        ..ControllerSettings::default()
    }
}

impl Plant {
    fn new(start_ticks: u32, tick_offset: i64) -> Self {
        let controller = ClockRecovery::new(plant_settings(), RateCode::Hz44100, RateCode::Hz48000);
        let ideal = controller.playback_state().ideal;
        let nominal = (input_frames(&controller) as f64 * ideal * TICKS_PER_FRAME as f64).round();

        Self {
            controller,
            ticks: start_ticks,
            measured: (nominal as i64 + tick_offset) as u32,
            occupancy: (CAPACITY / 2) as f64,
            carry: 0.0,
        }
    }

    /// Run one control cycle: produce with the current ratio, consume with the
    /// hardware, then let the controller look at the result
    fn step(&mut self) -> CycleOutcome {
        let ratio = self.controller.playback_state().ratio;
        let exact = input_frames(&self.controller) as f64 * ratio + self.carry;
        let frames = exact.floor();
        self.carry = exact - frames;

        let invocations = self.controller.cycle_length();
        for _ in 1..invocations {
            self.controller.record_invocation(0);
            assert!(!self.controller.cycle_due());
        }
        self.controller.record_invocation(frames as usize);
        assert!(self.controller.cycle_due());

        self.ticks = self.ticks.wrapping_add(self.measured);
        self.occupancy += frames - self.measured as f64 / TICKS_PER_FRAME as f64;

        let level = self.occupancy.round().clamp(0.0, CAPACITY as f64) as usize;
        self.controller.run_cycle(
            self.ticks,
            Occupancy::new(level, CAPACITY),
            Occupancy::new(CAPACITY / 2, CAPACITY),
        )
    }
}

/// 4-frame pool invocations per cycle
fn input_frames(controller: &ClockRecovery) -> u32 {
    controller.cycle_length() * 4
}

#[test]
fn test_first_cycle_primes_without_touching_ratios() {
    let mut plant = Plant::new(1_000, 0);
    let before = plant.controller.playback_ratio();

    assert_eq!(plant.step(), CycleOutcome::Primed);
    assert_eq!(plant.controller.playback_ratio(), before);
    assert_eq!(plant.controller.phase_error(), 0);
    assert_eq!(plant.controller.cycles(), 0);
}

#[test]
fn test_constant_offset_converges() {
    // Start near the top of the counter so it wraps during the run
    let mut plant = Plant::new(u32::MAX - 20_000, -150);
    assert_eq!(plant.step(), CycleOutcome::Primed);

    let mut errors = Vec::new();
    for _ in 0..400 {
        match plant.step() {
            CycleOutcome::Updated { error, .. } => errors.push(error),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    assert_eq!(plant.controller.rejected(), 0);
    assert_eq!(plant.controller.cycles(), 400);

    // Starts near +150 and decays geometrically, by about 0.74 per cycle
    // (1 + 6408 × kp); quantization to whole frames leaves up to one frame
    // (64 ticks) of jitter
    assert!(errors[0] > 100, "first error {}", errors[0]);
    for (k, &error) in errors.iter().enumerate() {
        let envelope = 150.0 * 0.8_f64.powi(k as i32) + 65.0;
        assert!(
            (error as f64).abs() <= envelope,
            "cycle {}: error {} outside envelope {:.1}",
            k,
            error,
            envelope
        );
    }

    let tail = &errors[200..];
    let mean = tail.iter().sum::<i64>() as f64 / tail.len() as f64;
    assert!(mean.abs() < 5.0, "mean error {:.2}", mean);

    // The phase term carries the 2.3% correction: 0.0234 / (64 × 4e-5) is about
    // 9 frames of phase, plus the 2.3 frames gained while priming
    let deviation = (plant.occupancy - (CAPACITY / 2) as f64).abs();
    assert!(
        deviation < 0.03 * (CAPACITY / 2) as f64,
        "occupancy {:.1} too far from half full",
        plant.occupancy
    );
}

#[test]
fn test_outlier_is_rejected_and_loop_recovers() {
    let mut plant = Plant::new(0, -150);
    plant.step();
    for _ in 0..50 {
        plant.step();
    }
    let ratio = plant.controller.playback_ratio();
    let phase = plant.controller.phase_error();

    // A scheduling hiccup: the hardware counter jumps 1000 ticks extra
    plant.ticks = plant.ticks.wrapping_add(1_000);
    match plant.step() {
        CycleOutcome::Rejected { error } => assert!(error < -300, "error {}", error),
        other => panic!("expected rejection, got {:?}", other),
    }
    assert_eq!(plant.controller.rejected(), 1);
    assert_eq!(plant.controller.playback_ratio(), ratio);
    assert_eq!(plant.controller.phase_error(), phase);

    // The rejected timestamp becomes the new reference
    assert!(matches!(plant.step(), CycleOutcome::Updated { .. }));
}

#[test]
fn test_counter_wrap_is_not_an_outlier() {
    let mut controller =
        ClockRecovery::new(ControllerSettings::default(), RateCode::Hz48000, RateCode::Hz48000);
    let half = Occupancy::new(512, 1024);
    let length = controller.cycle_length();

    for _ in 0..length {
        controller.record_invocation(4);
    }
    let start = u32::MAX - 100;
    assert_eq!(controller.run_cycle(start, half, half), CycleOutcome::Primed);

    for _ in 0..length {
        controller.record_invocation(4);
    }
    let now = start.wrapping_add(length * 4 * TICKS_PER_FRAME);
    assert!(now < start);

    match controller.run_cycle(now, half, half) {
        CycleOutcome::Updated { error, .. } => assert_eq!(error, 0),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!((controller.playback_state().ratio - 1.0).abs() < 1e-12);
    assert!((controller.capture_state().ratio - 1.0).abs() < 1e-12);
}

#[test]
fn test_directions_move_in_opposite_senses() {
    let mut controller =
        ClockRecovery::new(ControllerSettings::default(), RateCode::Hz48000, RateCode::Hz48000);
    let half = Occupancy::new(512, 1024);
    let length = controller.cycle_length();

    for _ in 0..length {
        controller.record_invocation(4);
    }
    controller.run_cycle(0, half, half);

    // Playback produced 2 frames more than the hardware consumed
    for _ in 0..length {
        controller.record_invocation(4);
    }
    let measured = (length * 4 - 2) * TICKS_PER_FRAME;
    controller.run_cycle(measured, half, half);

    assert!(controller.phase_error() > 0);
    assert!(controller.playback_state().ratio < 1.0);
    assert!(controller.capture_state().ratio > 1.0);
}

#[test]
fn test_occupancy_term_pulls_toward_half_full() {
    let mut controller =
        ClockRecovery::new(ControllerSettings::default(), RateCode::Hz48000, RateCode::Hz48000);
    let length = controller.cycle_length();

    for _ in 0..length {
        controller.record_invocation(4);
    }
    controller.run_cycle(0, Occupancy::new(512, 1024), Occupancy::new(512, 1024));

    for _ in 0..length {
        controller.record_invocation(4);
    }
    let measured = length * 4 * TICKS_PER_FRAME;
    controller.run_cycle(measured, Occupancy::new(400, 1024), Occupancy::new(600, 1024));

    // Zero phase error: only the occupancy terms act, scaled to half capacity
    let ki = ControllerSettings::default().ki;
    assert_eq!(controller.phase_error(), 0);
    assert!((controller.playback_state().ratio - (1.0 + ki * 112.0 / 512.0)).abs() < 1e-12);
    assert!((controller.capture_state().ratio - (1.0 - ki * 88.0 / 512.0)).abs() < 1e-12);
}

#[test]
fn test_occupancy_term_is_bounded_by_ki() {
    let settings = ControllerSettings::default();
    for capacity in [100usize, 144, 1024] {
        let mut controller = ClockRecovery::new(settings, RateCode::Hz48000, RateCode::Hz48000);
        let length = controller.cycle_length();
        let half = Occupancy::new(capacity / 2, capacity);

        for _ in 0..length {
            controller.record_invocation(4);
        }
        controller.run_cycle(0, half, half);

        for _ in 0..length {
            controller.record_invocation(4);
        }
        let measured = length * 4 * TICKS_PER_FRAME;
        controller.run_cycle(
            measured,
            Occupancy::new(0, capacity),
            Occupancy::new(capacity, capacity),
        );

        // Empty playback / full capture: exactly ±ki whatever the capacity
        let playback = controller.playback_state().ratio - 1.0;
        let capture = controller.capture_state().ratio - 1.0;
        assert!((playback - settings.ki).abs() < 1e-12, "capacity {}", capacity);
        assert!((capture + settings.ki).abs() < 1e-12, "capacity {}", capacity);
    }
}

#[test]
fn test_one_frame_of_jitter_stays_inside_core_band() {
    // Default gains: a frame of phase plus a frame of occupancy away from half
    // full moves the ratio far less than the ±1000 ppm the cores accept
    let mut controller =
        ClockRecovery::new(ControllerSettings::default(), RateCode::Hz44100, RateCode::Hz48000);
    let length = controller.cycle_length();
    let half = Occupancy::new(72, 144);

    for _ in 0..length {
        controller.record_invocation(4);
    }
    controller.run_cycle(0, half, half);

    for _ in 0..length {
        controller.record_invocation(4);
    }
    let measured = (length * 4 + 1) * TICKS_PER_FRAME;
    controller.run_cycle(measured, Occupancy::new(71, 144), half);

    let ideal = controller.playback_state().ideal;
    let ppm = (controller.playback_state().ratio / ideal - 1.0) * 1e6;
    assert!(ppm > 0.0 && ppm < 200.0, "{:.1} ppm", ppm);
}
