//! Lamport logical clock.
//!
//! A single monotonic counter per node. Every message a node sends carries
//! the post-tick value; every message received advances the clock past the
//! remote timestamp. The counter never decreases.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic Lamport counter.
///
/// Safe to share between the request-issuing path and the message-receive
/// path: both mutations go through a single atomic.
#[derive(Debug, Default)]
pub struct LamportClock {
    value: AtomicU64,
}

impl LamportClock {
    /// Create a clock starting at zero.
    pub fn new() -> Self {
        LamportClock {
            value: AtomicU64::new(0),
        }
    }

    /// Read the current value without advancing it.
    pub fn now(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }

    /// Increment the clock and return the new value.
    pub fn tick(&self) -> u64 {
        self.value.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Merge a remote timestamp: set the clock to `max(local, remote) + 1`
    /// and return the new value.
    pub fn observe(&self, remote: u64) -> u64 {
        let mut current = self.value.load(Ordering::SeqCst);
        loop {
            let next = current.max(remote) + 1;
            match self.value.compare_exchange(
                current,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return next,
                Err(observed) => current = observed,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_tick_increments() {
        let clock = LamportClock::new();
        assert_eq!(clock.now(), 0);
        assert_eq!(clock.tick(), 1);
        assert_eq!(clock.tick(), 2);
        assert_eq!(clock.now(), 2);
    }

    #[test]
    fn test_observe_jumps_past_remote() {
        let clock = LamportClock::new();
        clock.tick();
        clock.tick(); // local = 2

        // Remote ahead: jump to remote + 1
        assert_eq!(clock.observe(10), 11);

        // Remote behind: still advances past local
        assert_eq!(clock.observe(3), 12);
    }

    #[test]
    fn test_monotonic_under_mixed_calls() {
        let clock = LamportClock::new();
        let mut last = 0;
        for i in 0..100u64 {
            let v = if i % 3 == 0 {
                clock.observe(i * 2)
            } else {
                clock.tick()
            };
            assert!(v > last, "clock went backwards: {} -> {}", last, v);
            last = v;
        }
    }

    #[test]
    fn test_concurrent_observe_and_tick() {
        let clock = Arc::new(LamportClock::new());

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let clock = clock.clone();
                thread::spawn(move || {
                    for i in 0..1000u64 {
                        if t % 2 == 0 {
                            clock.tick();
                        } else {
                            clock.observe(i);
                        }
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        // 2000 ticks plus 2000 observes, each advancing by at least one.
        assert!(clock.now() >= 4000);
    }
}
