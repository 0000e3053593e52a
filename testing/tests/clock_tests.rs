//! Tests for the deterministic clocks.

#![allow(clippy::unwrap_used)] // Tests can unwrap

use std::sync::Arc;
use std::time::Duration;
use ticket_broker_core::environment::Clock;
use ticket_broker_testing::{ManualClock, init_tracing, test_clock, test_epoch};

#[test]
fn test_manual_clock_handles_share_one_instant() {
    let clock = ManualClock::default();
    let injected: Arc<dyn Clock> = Arc::new(clock.clone());

    clock.advance(Duration::from_secs(90));

    assert_eq!(injected.now(), test_epoch() + chrono::Duration::seconds(90));
}

#[test]
fn test_manual_clock_set_jumps_backwards() {
    let clock = ManualClock::default();
    clock.advance(Duration::from_secs(3600));
    clock.set(test_epoch());

    assert_eq!(clock.now(), test_clock().now());
}

#[test]
fn test_manual_clock_advance_from_many_threads() {
    init_tracing();
    let clock = ManualClock::default();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let clock = clock.clone();
            std::thread::spawn(move || {
                for _ in 0..10 {
                    clock.advance(Duration::from_secs(1));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!((clock.now() - test_epoch()).num_seconds(), 80);
}
