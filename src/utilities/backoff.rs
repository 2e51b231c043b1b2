/*
 * mnet - Event-driven TCP server/client engines with multicast helpers
 * This is free and unencumbered software released into the public domain.
 */
use std::hint;
use std::thread;
use std::time::Duration;

const SPIN_LIMIT: u32 = 6;
const YIELD_LIMIT: u32 = 10;
const MAX_SLEEP: Duration = Duration::from_millis(1);

/// Escalating wait used while a socket keeps reporting would-block: spin
/// first, then yield the thread, then sleep for at most `MAX_SLEEP`.
#[derive(Debug, Default)]
pub(crate) struct Backoff {
    step: u32,
}

impl Backoff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snooze(&mut self) {
        if self.step <= SPIN_LIMIT {
            for _ in 0..(1u32 << self.step) {
                hint::spin_loop();
            }
        } else if self.step <= YIELD_LIMIT {
            thread::yield_now();
        } else {
            let exponent = (self.step - YIELD_LIMIT).min(10);
            thread::sleep(Duration::from_micros(1u64 << exponent).min(MAX_SLEEP));
        }
        self.step = self.step.saturating_add(1);
    }

    pub fn reset(&mut self) {
        self.step = 0;
    }

    #[cfg(test)]
    fn is_sleeping(&self) -> bool {
        self.step > YIELD_LIMIT
    }
}
