/*
 * mnet - Event-driven TCP server/client engines with multicast helpers
 * This is free and unencumbered software released into the public domain.
 */

//! Readiness multiplexing: "which registered sockets are ready for I/O now?"
//!
//! Two interchangeable backends implement the [`Multiplexer`] trait:
//!
//! * [`Backend::Indexed`] (the default) uses the operating system's scalable
//!   facility through [**`mio`**](mio) (epoll, kqueue or IOCP). Each `wait()`
//!   costs O(ready sockets) and the number of sockets is only bounded by the
//!   descriptor limit.
//! * [`Backend::Scan`] (Unix only) builds a `poll(2)` set from every registered
//!   socket on each `wait()`. It costs O(registered sockets) and refuses more
//!   than [`SCAN_CAPACITY`] sockets.
//!
//! Both backends deliver readiness **level-triggered**: a socket that is still
//! readable is reported again on the next `wait()`. The indexed backend
//! emulates this on top of the edge-triggered OS facility by latching every
//! reported readiness until the consumer calls
//! [`drained()`](Multiplexer::drained()) (after a read returned would-block)
//! or unregisters the socket. While anything is latched, `wait()` does not
//! block.
//!
//! Error and hang-up conditions are reported as *both* readable and writable,
//! so that the consumer observes them through its next read or connect check.

use std::fmt::Debug;
use std::io::Result;
use std::sync::Arc;
use std::time::Duration;

use mio::event::Source;

pub use mio::Interest;

mod indexed;
#[cfg(unix)]
mod scan;

pub use indexed::IndexedMultiplexer;
#[cfg(unix)]
pub use scan::{ScanMultiplexer, SCAN_CAPACITY};

/// The OS-level identity of a socket (file descriptor or `SOCKET`).
#[cfg(unix)]
pub type SocketHandle = std::os::unix::io::RawFd;
/// The OS-level identity of a socket (file descriptor or `SOCKET`).
#[cfg(windows)]
pub type SocketHandle = std::os::windows::io::RawSocket;

/// A socket that can be watched by a [`Multiplexer`].
///
/// Implemented for every `mio` source that exposes its raw handle, notably
/// [`mio::net::TcpStream`] and [`mio::net::TcpListener`].
pub trait Socket: Source {
    fn handle(&self) -> SocketHandle;
}

#[cfg(unix)]
impl<T: Source + std::os::unix::io::AsRawFd> Socket for T {
    fn handle(&self) -> SocketHandle {
        self.as_raw_fd()
    }
}

#[cfg(windows)]
impl<T: Source + std::os::windows::io::AsRawSocket> Socket for T {
    fn handle(&self) -> SocketHandle {
        self.as_raw_socket()
    }
}

/// One readiness report returned from [`Multiplexer::wait()`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub handle: SocketHandle,
    pub readable: bool,
    pub writable: bool,
}

impl Readiness {
    pub(crate) fn new(handle: SocketHandle) -> Self {
        Self {
            handle,
            readable: false,
            writable: false,
        }
    }

    fn merge(&mut self, other: &Readiness) {
        self.readable |= other.readable;
        self.writable |= other.writable;
    }
}

/// Selects the [`Multiplexer`] implementation used by an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// The scalable OS facility (epoll/kqueue/IOCP) via `mio`.
    #[default]
    Indexed,
    /// Linear `poll(2)` scan, bounded by [`SCAN_CAPACITY`] sockets.
    #[cfg(unix)]
    Scan,
}

/// Portable readiness multiplexing
///
/// `register()`, `unregister()`, `drained()` and `wake()` may be called from
/// any thread, also while another thread is blocked in `wait()`. `wait()`
/// itself is meant to be driven by a single engine thread.
pub trait Multiplexer: Send + Sync + Debug {
    /// Starts watching `socket` for `interest`. Fails with
    /// `ErrorKind::AlreadyExists` if the socket is already registered.
    fn register(&self, socket: &mut dyn Socket, interest: Interest) -> Result<()>;

    /// Stops watching `socket`. Unknown sockets are ignored.
    fn unregister(&self, socket: &mut dyn Socket) -> Result<()>;

    /// Blocks for up to `timeout` (forever if `None`) and replaces the
    /// content of `events` with the ready sockets. An empty result means the
    /// timeout expired or the multiplexer was woken up.
    fn wait(&self, events: &mut Vec<Readiness>, timeout: Option<Duration>) -> Result<()>;

    /// Reports that `handle` returned would-block, i.e. the readiness that
    /// was reported for it has been consumed.
    fn drained(&self, _handle: SocketHandle) {}

    /// Makes a concurrent (or the next) `wait()` return immediately.
    fn wake(&self) -> Result<()>;

    fn backend(&self) -> Backend;
}

/// Creates a new multiplexer of the given kind.
///
/// `capacity` is a hint for the number of events collected per `wait()`.
pub fn open(backend: Backend, capacity: usize) -> Result<Arc<dyn Multiplexer>> {
    Ok(match backend {
        Backend::Indexed => Arc::new(IndexedMultiplexer::with_capacity(capacity)?),
        #[cfg(unix)]
        Backend::Scan => Arc::new(ScanMultiplexer::new()?),
    })
}
