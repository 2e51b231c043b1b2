/*
 * mnet - Event-driven TCP server/client engines with multicast helpers
 * This is free and unencumbered software released into the public domain.
 */
use std::sync::atomic::{AtomicBool, Ordering};

/// A boolean state flag that reports whether a transition actually happened.
#[derive(Debug, Default)]
pub(crate) struct Flag {
    flag: AtomicBool,
}

impl Flag {
    pub fn new() -> Self {
        Self {
            flag: AtomicBool::new(false),
        }
    }

    pub fn raise(&self) -> bool {
        self.flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    pub fn clear(&self) -> bool {
        self.flag.compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    pub fn check(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}
