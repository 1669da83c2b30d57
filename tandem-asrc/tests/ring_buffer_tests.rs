//! Elastic ring buffer behaviour: occupancy bounds, underflow hysteresis and
//! overflow rebalancing

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tandem_asrc::audio::ElasticRingBuffer;

#[test]
fn test_occupancy_stays_within_bounds_under_random_traffic() {
    let mut rng = StdRng::seed_from_u64(0x5eed);

    for capacity in [2usize, 10, 64, 100, 1024] {
        let mut buffer = ElasticRingBuffer::new(capacity);
        let capacity = buffer.capacity();

        for step in 0..20_000 {
            // Bias towards pushes in some stretches and pops in others
            let push_bias = if (step / 500) % 2 == 0 { 0.7 } else { 0.3 };
            if rng.gen_bool(push_bias) {
                buffer.push(step);
            } else {
                let (sample, was_underflow) = buffer.pop();
                if was_underflow {
                    assert_eq!(sample, 0);
                }
            }

            let occupancy = buffer.occupancy();
            assert!(
                occupancy <= capacity,
                "occupancy {} exceeds capacity {}",
                occupancy,
                capacity
            );
            if occupancy == 0 {
                assert!(buffer.is_underflowing());
            }
            assert_eq!(
                (buffer.read_cursor() + occupancy) % capacity,
                buffer.write_cursor()
            );
        }
    }
}

#[test]
fn test_underflow_hysteresis() {
    let mut buffer = ElasticRingBuffer::new(100);

    // Empty: silence, nothing consumed
    assert_eq!(buffer.pop(), (0, true));
    assert_eq!(buffer.occupancy(), 0);

    // Exactly half full is not enough to leave underflow
    for i in 1..=50 {
        buffer.push(i);
    }
    assert_eq!(buffer.pop(), (0, true));
    assert_eq!(buffer.occupancy(), 50);

    // One more crosses C/2
    buffer.push(51);
    assert_eq!(buffer.pop(), (1, false));
    assert_eq!(buffer.occupancy(), 50);
    assert!(!buffer.is_underflowing());

    // Drains normally all the way down once out of underflow
    for expected in 2..=51 {
        assert_eq!(buffer.pop(), (expected, false));
    }
    assert!(buffer.is_underflowing());
    assert_eq!(buffer.pop(), (0, true));
    assert_eq!(buffer.stats().underflows, 1);
}

#[test]
fn test_overflow_rebalances_to_half() {
    let mut buffer = ElasticRingBuffer::new(8);

    // Leave the initial underflow state first
    for i in 1..=5 {
        buffer.push(i);
    }
    assert_eq!(buffer.pop(), (1, false));

    for i in 6..=9 {
        assert!(buffer.push(i));
    }
    assert_eq!(buffer.occupancy(), 8);

    assert!(!buffer.push(10));
    assert_eq!(buffer.occupancy(), 4);
    assert_eq!(buffer.read_cursor(), (buffer.write_cursor() + 8 - 4) % 8);
    assert_eq!(buffer.stats().overflows, 1);

    // Newest half survives; the sample that overflowed is dropped
    let survivors: Vec<(i32, bool)> = (0..4).map(|_| buffer.pop()).collect();
    assert_eq!(survivors, vec![(6, false), (7, false), (8, false), (9, false)]);
}

#[test]
fn test_overflow_rebalance_with_wrapped_cursors() {
    let mut buffer = ElasticRingBuffer::new(8);

    // Move the read cursor to slot 4 and the write cursor to slot 5
    for i in 0..5 {
        buffer.push(i);
    }
    for _ in 0..4 {
        buffer.pop();
    }
    assert_eq!(buffer.read_cursor(), 4);
    assert_eq!(buffer.write_cursor(), 5);

    // Fill, wrapping the write cursor round to slot 4
    for i in 100..107 {
        buffer.push(i);
    }
    assert_eq!(buffer.occupancy(), 8);
    assert_eq!(buffer.write_cursor(), 4);

    buffer.push(107);
    assert_eq!(buffer.occupancy(), 4);
    assert_eq!(buffer.write_cursor(), 4);
    assert_eq!(buffer.read_cursor(), 0);

    let survivors: Vec<i32> = (0..4).map(|_| buffer.pop().0).collect();
    assert_eq!(survivors, vec![103, 104, 105, 106]);
}

#[test]
fn test_rebalance_before_first_pop_still_waits_for_refill() {
    let mut buffer = ElasticRingBuffer::new(10);
    for i in 0..11 {
        buffer.push(i);
    }

    // Never popped, so still in the initial underflow state; exactly C/2 is
    // not enough to leave it
    assert_eq!(buffer.occupancy(), 5);
    assert_eq!(buffer.pop(), (0, true));

    buffer.push(11);
    assert_eq!(buffer.pop(), (5, false));
}
