/*
 * mnet - Event-driven TCP server/client engines with multicast helpers
 * This is free and unencumbered software released into the public domain.
 */
mod affinity;
mod backoff;
mod flag;
mod sync;
mod timeout;

pub(crate) use affinity::pin_current_thread;
pub(crate) use backoff::Backoff;
pub(crate) use flag::Flag;
pub(crate) use sync::{lock, ThreadMark};
pub(crate) use timeout::Timeout;
