/*
 * mnet - Event-driven TCP server/client engines with multicast helpers
 * This is free and unencumbered software released into the public domain.
 */
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

/// Locks the mutex, recovering the guard if a callback panicked while it was held.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Remembers which thread currently runs an engine loop.
#[derive(Debug, Default)]
pub(crate) struct ThreadMark {
    owner: Mutex<Option<ThreadId>>,
}

impl ThreadMark {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&self) {
        *lock(&self.owner) = Some(thread::current().id());
    }

    pub fn leave(&self) {
        *lock(&self.owner) = None;
    }

    pub fn is_current(&self) -> bool {
        *lock(&self.owner) == Some(thread::current().id())
    }
}
