/*
 * mnet - Event-driven TCP server/client engines with multicast helpers
 * This is free and unencumbered software released into the public domain.
 */
use std::fmt::{Debug, Display, Formatter};
use std::io::{Result as IoResult, Error as IoError, ErrorKind};
use std::net::{Shutdown, SocketAddr};
use std::sync::{Arc, Mutex};

use mio::Interest;
use mio::net::TcpStream;

use log::warn;

use crate::io::{event_conn, event_read, event_write, write_fully, ReadOutcome};
use crate::multiplexer::{Multiplexer, Socket, SocketHandle};
use crate::utilities::lock;

/// Identifier of a connection, unique for the lifetime of the owning engine
///
/// Ids are handed out in strictly increasing order, starting at 1, and are
/// never reused, even though the operating system may reuse the underlying
/// socket descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) const fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl Display for ConnectionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a socket owned by an engine
///
/// A server is `Listening` while its engine runs. A client connection is
/// `Connecting` until the non-blocking connect completes, then
/// `Established`. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Listening,
    Connecting,
    Established,
    Closed,
}

/// A TCP connection owned by an engine.
///
/// The stream is only touched while holding its lock, one syscall at a time,
/// so the engine thread may read while other threads write.
pub(crate) struct Connection {
    id: ConnectionId,
    handle: SocketHandle,
    remote_address: String,
    endpoint: Mutex<Endpoint>,
    mux: Arc<dyn Multiplexer>,
}

struct Endpoint {
    stream: TcpStream,
    state: LifecycleState,
}

impl Connection {
    /// Wraps an accepted stream that is already registered with `mux`.
    pub fn new(id: ConnectionId, remote_address: String, stream: TcpStream, mux: Arc<dyn Multiplexer>) -> Self {
        Self::with_state(id, remote_address, stream, mux, LifecycleState::Established)
    }

    /// Wraps a stream whose connect is still in progress. It must be
    /// registered with `mux` for writability.
    pub fn connecting(id: ConnectionId, remote_address: String, stream: TcpStream, mux: Arc<dyn Multiplexer>) -> Self {
        Self::with_state(id, remote_address, stream, mux, LifecycleState::Connecting)
    }

    fn with_state(id: ConnectionId, remote_address: String, stream: TcpStream, mux: Arc<dyn Multiplexer>, state: LifecycleState) -> Self {
        Self {
            id,
            handle: stream.handle(),
            remote_address,
            endpoint: Mutex::new(Endpoint { stream, state }),
            mux,
        }
    }

    /// Moves a `Connecting` connection to `Established` once the connect has
    /// completed, leaving it registered for reading only. Returns `false`
    /// while the connect is still pending.
    pub fn finish_connect(&self) -> IoResult<bool> {
        let mut endpoint = lock(&self.endpoint);
        match endpoint.state {
            LifecycleState::Connecting => (),
            LifecycleState::Established => return Ok(true),
            _ => return Err(not_connected()),
        }
        if !event_conn(&endpoint.stream)? {
            return Ok(false);
        }
        self.mux.unregister(&mut endpoint.stream)?;
        self.mux.register(&mut endpoint.stream, Interest::READABLE)?;
        endpoint.state = LifecycleState::Established;
        Ok(true)
    }

    pub fn handle(&self) -> SocketHandle {
        self.handle
    }

    pub fn remote_address(&self) -> &str {
        &self.remote_address
    }

    pub fn state(&self) -> LifecycleState {
        lock(&self.endpoint).state
    }

    pub fn local_addr(&self) -> IoResult<SocketAddr> {
        lock(&self.endpoint).stream.local_addr()
    }

    pub fn set_nodelay(&self, nodelay: bool) -> IoResult<()> {
        lock(&self.endpoint).stream.set_nodelay(nodelay)
    }

    pub fn read(&self, buffer: &mut [u8]) -> IoResult<ReadOutcome> {
        let endpoint = lock(&self.endpoint);
        match endpoint.state {
            LifecycleState::Established => event_read(&endpoint.stream, buffer),
            _ => Err(not_connected()),
        }
    }

    /// Writes all of `data`, or fails. The lock is released between
    /// attempts, so a stalled peer does not block readers of this stream.
    pub fn write_all(&self, data: &[u8]) -> IoResult<()> {
        write_fully(data, |chunk| {
            let endpoint = lock(&self.endpoint);
            match endpoint.state {
                LifecycleState::Established => event_write(&endpoint.stream, chunk),
                _ => Err(not_connected()),
            }
        })
    }

    /// Transitions to `Closed`: unregisters and shuts the socket down.
    /// Returns `false` if the connection was closed already.
    pub fn close(&self) -> bool {
        let mut endpoint = lock(&self.endpoint);
        if endpoint.state == LifecycleState::Closed {
            return false;
        }
        endpoint.state = LifecycleState::Closed;
        if let Err(error) = self.mux.unregister(&mut endpoint.stream) {
            warn!("Failed to de-register connection {}: {:?}", self.id, error);
        }
        if let Err(error) = endpoint.stream.shutdown(Shutdown::Both) {
            if error.kind() != ErrorKind::NotConnected {
                warn!("Failed to shut down connection {}: {:?}", self.id, error);
            }
        }
        true
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl Debug for Connection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("handle", &self.handle)
            .field("remote_address", &self.remote_address)
            .field("state", &self.state())
            .finish()
    }
}

fn not_connected() -> IoError {
    IoError::new(ErrorKind::NotConnected, "The connection is closed!")
}
