//! Acknowledgement ridge over concurrently filled append ranges.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::Mutex;

/// Tracks which contiguous prefix of an append-only region has been
/// completely filled.
///
/// Writers reserve disjoint ranges elsewhere (a `fetch_add` counter), fill
/// them in any order, and report each finished range through
/// [`add_segment`](AckResponder::add_segment). The horizon returned by
/// [`ack`](AckResponder::ack) is the largest `x` such that every index in
/// `[0, x)` has been reported; it only ever moves forward.
///
/// The horizon store uses release ordering and the load uses acquire, so a
/// reader that observes `ack() == x` also observes every write made to the
/// region below `x` before its range was reported.
#[derive(Debug, Default)]
pub struct AckResponder {
    horizon: AtomicI64,
    /// Completed ranges not yet absorbed into the horizon, keyed by start.
    pending: Mutex<BTreeMap<i64, i64>>,
}

impl AckResponder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report that the half-open range `[begin, end)` has been filled.
    /// Ranges are disjoint by construction of the reservation counter.
    pub fn add_segment(&self, begin: i64, end: i64) {
        debug_assert!(begin <= end);
        let mut pending = self.pending.lock();
        pending.insert(begin, end);

        let mut horizon = self.horizon.load(Ordering::Relaxed);
        while let Some((&start, &stop)) = pending.first_key_value() {
            if start != horizon {
                break;
            }
            pending.remove(&start);
            horizon = stop;
        }
        self.horizon.store(horizon, Ordering::Release);
    }

    /// The published horizon: every index below it has been filled.
    pub fn ack(&self) -> i64 {
        self.horizon.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_in_order() {
        let ack = AckResponder::new();
        assert_eq!(ack.ack(), 0);
        ack.add_segment(0, 3);
        assert_eq!(ack.ack(), 3);
        ack.add_segment(3, 10);
        assert_eq!(ack.ack(), 10);
    }

    #[test]
    fn test_out_of_order() {
        let ack = AckResponder::new();
        ack.add_segment(5, 8);
        assert_eq!(ack.ack(), 0);
        ack.add_segment(0, 2);
        assert_eq!(ack.ack(), 2);
        ack.add_segment(2, 5);
        // The head absorbs both the new range and the parked [5, 8).
        assert_eq!(ack.ack(), 8);
    }

    #[test]
    fn test_empty_range() {
        let ack = AckResponder::new();
        ack.add_segment(0, 0);
        assert_eq!(ack.ack(), 0);
        ack.add_segment(0, 4);
        assert_eq!(ack.ack(), 4);
    }

    #[test]
    fn test_concurrent_monotone() {
        let ack = Arc::new(AckResponder::new());
        let mut handles = Vec::new();
        for t in 0..8 {
            let ack = Arc::clone(&ack);
            handles.push(std::thread::spawn(move || {
                for i in 0..100 {
                    let begin = (t * 100 + i) * 2;
                    ack.add_segment(begin, begin + 2);
                }
            }));
        }
        let watcher = {
            let ack = Arc::clone(&ack);
            std::thread::spawn(move || {
                let mut last = 0;
                for _ in 0..10_000 {
                    let now = ack.ack();
                    assert!(now >= last, "horizon went backwards: {last} -> {now}");
                    last = now;
                }
            })
        };
        for handle in handles {
            handle.join().unwrap();
        }
        watcher.join().unwrap();
        assert_eq!(ack.ack(), 1600);
    }
}
