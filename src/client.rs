/*
 * mnet - Event-driven TCP server/client engines with multicast helpers
 * This is free and unencumbered software released into the public domain.
 */
use std::fmt::{Debug, Formatter};
use std::io::{Error as IoError, ErrorKind};
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use mio::Interest;
use mio::net::TcpStream;

use log::{debug, error, info, trace, warn};

use crate::connection::Connection;
use crate::io::ReadOutcome;
use crate::multiplexer::{self, Multiplexer};
use crate::utilities::{lock, pin_current_thread, Flag, ThreadMark, Timeout};
use crate::{ClientConfig, ClientHandler, ConnectionId, EngineError, LifecycleState, Statistics};

const EVENTS: usize = 8;

/// Event-driven TCP client with one outbound connection
///
/// After a successful [`connect()`](ClientEngine::connect()), a background
/// thread reads from the connection and hands the data to the
/// [`ClientHandler`]. `disconnect()` is called when the engine is dropped.
pub struct ClientEngine {
    handle: ClientHandle,
}

/// A cloneable reference to a [`ClientEngine`], also passed to every
/// [`ClientHandler`] callback.
#[derive(Clone)]
pub struct ClientHandle {
    shared: Arc<Shared>,
}

struct Shared {
    config: ClientConfig,
    handler: Arc<dyn ClientHandler>,
    connected: Flag,
    link: Mutex<Option<Arc<Connection>>>,
    mux: Mutex<Option<Arc<dyn Multiplexer>>>,
    local_addr: Mutex<Option<SocketAddr>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    engine: ThreadMark,
    next_id: AtomicU64,
    stats: Statistics,
}

impl ClientEngine {
    pub fn new<H: ClientHandler>(config: ClientConfig, handler: H) -> Self {
        Self {
            handle: ClientHandle {
                shared: Arc::new(Shared {
                    config,
                    handler: Arc::new(handler),
                    connected: Flag::new(),
                    link: Mutex::new(None),
                    mux: Mutex::new(None),
                    local_addr: Mutex::new(None),
                    thread: Mutex::new(None),
                    engine: ThreadMark::new(),
                    next_id: AtomicU64::new(1),
                    stats: Statistics::default(),
                }),
            },
        }
    }

    /// Connects to the configured server, waiting at most for the configured
    /// `connection_timeout`.
    ///
    /// Succeeds immediately if the client is connected already. On failure,
    /// the socket is closed and no callback fires.
    pub fn connect(&self) -> Result<(), EngineError> {
        self.handle.connect()
    }

    /// Closes the connection, see [`ClientHandle::disconnect()`].
    pub fn disconnect(&self) {
        self.handle.disconnect()
    }

    pub fn is_connected(&self) -> bool {
        self.handle.is_connected()
    }

    pub fn state(&self) -> LifecycleState {
        self.handle.state()
    }

    /// Sends data to the server, see [`ClientHandle::send()`].
    pub fn send(&self, data: &[u8]) -> bool {
        self.handle.send(data)
    }

    /// The local address of the current connection.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.handle.local_addr()
    }

    pub fn statistics(&self) -> &Statistics {
        &self.handle.shared.stats
    }

    pub fn config(&self) -> &ClientConfig {
        &self.handle.shared.config
    }

    pub fn handle(&self) -> ClientHandle {
        self.handle.clone()
    }
}

impl Drop for ClientEngine {
    fn drop(&mut self) {
        self.handle.disconnect();
    }
}

impl Debug for ClientEngine {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.handle.fmt(f)
    }
}

impl ClientHandle {
    fn name(&self) -> &str {
        &self.shared.config.name
    }

    fn connect(&self) -> Result<(), EngineError> {
        let shared = &self.shared;
        if shared.connected.check() {
            return Ok(());
        }
        if shared.engine.is_current() {
            return Err(EngineError::Failed(IoError::new(
                ErrorKind::WouldBlock,
                "The client can not reconnect from within one of its callbacks!",
            )));
        }

        let mut thread = lock(&shared.thread);
        if shared.connected.check() {
            return Ok(());
        }
        if let Some(previous) = thread.take() {
            self.reap(previous);
        }

        let config = &shared.config;
        info!("{} connecting to {}:{}...", self.name(), config.server_address, config.server_port);

        let address = resolve(config)?;
        let mux = multiplexer::open(config.backend, EVENTS)?;
        let id = ConnectionId::new(shared.next_id.fetch_add(1, Ordering::Relaxed));
        let connection = match self.establish(id, address, &mux) {
            Ok(connection) => connection,
            Err(error) => {
                warn!("{} failed to connect to {}: {}", self.name(), address, error);
                return Err(error);
            }
        };

        if config.nodelay {
            if let Err(error) = connection.set_nodelay(true) {
                debug!("{} failed to set TCP_NODELAY: {}", self.name(), error);
            }
        }

        let local_addr = connection.local_addr().ok();
        *lock(&shared.mux) = Some(mux.clone());
        *lock(&shared.local_addr) = local_addr;
        shared.connected.raise();
        shared.stats.record_connection();

        let client = self.clone();
        let worker = connection.clone();
        let spawned = thread::Builder::new()
            .name(config.name.clone())
            .spawn(move || client.run(worker, mux));

        match spawned {
            Ok(handle) => {
                *thread = Some(handle);
                info!("{} connected to {}", self.name(), address);
                Ok(())
            }
            Err(error) => {
                error!("{} failed to spawn its engine thread: {}", self.name(), error);
                shared.connected.clear();
                self.release();
                connection.close();
                Err(error.into())
            }
        }
    }

    /// Closes the connection. `on_disconnected()` has fired, and no other
    /// callback is running, once this returns.
    ///
    /// Does nothing when not connected. When called from within a callback,
    /// the disconnect is only requested; it completes as soon as the callback
    /// returns.
    pub fn disconnect(&self) {
        if self.shared.engine.is_current() {
            self.request_disconnect();
            return;
        }
        let mut thread = lock(&self.shared.thread);
        self.request_disconnect();
        if let Some(handle) = thread.take() {
            self.reap(handle);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.check()
    }

    /// `Connecting` while `connect()` waits for the server, `Established`
    /// while connected and `Closed` otherwise.
    pub fn state(&self) -> LifecycleState {
        lock(&self.shared.link)
            .as_ref()
            .map_or(LifecycleState::Closed, |connection| connection.state())
    }

    /// Writes all of `data` to the server.
    ///
    /// Returns `false` if not connected or if `data` is empty. A full socket
    /// buffer is waited out. Any other failure disconnects the client and
    /// returns `false`.
    pub fn send(&self, data: &[u8]) -> bool {
        if data.is_empty() {
            warn!("{} can not send empty data", self.name());
            return false;
        }
        if !self.shared.connected.check() {
            debug!("{} can not send while disconnected", self.name());
            return false;
        }
        let connection = match lock(&self.shared.link).clone() {
            Some(connection) => connection,
            None => return false,
        };
        match connection.write_all(data) {
            Ok(()) => {
                self.shared.stats.sent().record(data.len());
                trace!("{} sent {} bytes", self.name(), data.len());
                true
            }
            Err(error) => {
                self.shared.stats.sent().record_error();
                warn!("{} failed to send {} bytes: {}", self.name(), data.len(), error);
                drop(connection);
                self.disconnect();
                false
            }
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *lock(&self.shared.local_addr)
    }

    pub fn statistics(&self) -> &Statistics {
        &self.shared.stats
    }

    fn request_disconnect(&self) {
        if self.shared.connected.clear() {
            info!("{} disconnecting...", self.name());
            self.wake();
        }
    }

    fn wake(&self) {
        let mux = lock(&self.shared.mux).clone();
        if let Some(mux) = mux {
            if let Err(error) = mux.wake() {
                warn!("{} failed to wake its engine thread: {:?}", self.name(), error);
            }
        }
    }

    fn release(&self) -> Option<Arc<Connection>> {
        *lock(&self.shared.mux) = None;
        *lock(&self.shared.local_addr) = None;
        lock(&self.shared.link).take()
    }

    fn reap(&self, handle: JoinHandle<()>) {
        if handle.join().is_err() {
            error!("{} engine thread panicked!", self.name());
            self.shared.connected.clear();
            if let Some(connection) = self.release() {
                connection.close();
            }
        }
    }

    /// Starts a non-blocking connect and waits until it completes, fails or
    /// the timeout expires. The pending connection is published as the link
    /// meanwhile, so that `state()` reports `Connecting`.
    fn establish(&self, id: ConnectionId, address: SocketAddr, mux: &Arc<dyn Multiplexer>) -> Result<Arc<Connection>, EngineError> {
        let mut stream = TcpStream::connect(address)?;
        mux.register(&mut stream, Interest::READABLE | Interest::WRITABLE)?;
        let connection = Arc::new(Connection::connecting(id, address.ip().to_string(), stream, mux.clone()));

        *lock(&self.shared.link) = Some(connection.clone());
        match await_connect(&connection, &**mux, self.shared.config.connection_timeout) {
            Ok(()) => Ok(connection),
            Err(error) => {
                lock(&self.shared.link).take();
                connection.close();
                Err(error)
            }
        }
    }

    // ~~~~~~~~~~~~~~~~~~~~~~~
    // Engine thread
    // ~~~~~~~~~~~~~~~~~~~~~~~

    fn run(self, connection: Arc<Connection>, mux: Arc<dyn Multiplexer>) {
        let shared = &self.shared;
        shared.engine.enter();

        if let Some(core) = shared.config.cpu_affinity {
            match pin_current_thread(core) {
                Ok(()) => info!("{} engine thread pinned to CPU core {}", self.name(), core),
                Err(error) => warn!("{} failed to pin engine thread to CPU core {}: {}", self.name(), core, error),
            }
        }

        shared.handler.on_connected(&self);

        let handle = connection.handle();
        let mut events = Vec::with_capacity(EVENTS);
        let mut buffer = vec![0u8; shared.config.receive_buffer_size.max(1)];

        'serve: while shared.connected.check() {
            if let Err(error) = mux.wait(&mut events, None) {
                error!("{} multiplexer failed: {}", self.name(), error);
                break;
            }
            for ready in events.iter().filter(|ready| ready.handle == handle) {
                if !shared.connected.check() {
                    break 'serve;
                }
                match connection.read(&mut buffer) {
                    Ok(ReadOutcome::Data(count)) => {
                        shared.stats.received().record(count);
                        trace!("{} received {} bytes", self.name(), count);
                        shared.handler.on_data(&self, &buffer[..count]);
                    }
                    Ok(ReadOutcome::WouldBlock) => mux.drained(ready.handle),
                    Ok(ReadOutcome::Closed) => {
                        info!("{} connection closed by the server", self.name());
                        break 'serve;
                    }
                    Err(error) => {
                        shared.stats.received().record_error();
                        warn!("{} failed to read: {}", self.name(), error);
                        break 'serve;
                    }
                }
            }
        }

        shared.connected.clear();
        info!("{} disconnected", self.name());
        shared.handler.on_disconnected(&self);

        self.release();
        connection.close();
        shared.engine.leave();
    }
}

impl Debug for ClientHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let config = &self.shared.config;
        f.debug_struct("ClientHandle")
            .field("name", &config.name)
            .field("server", &format_args!("{}:{}", config.server_address, config.server_port))
            .field("connected", &self.is_connected())
            .field("local_addr", &self.local_addr())
            .finish()
    }
}

/// Resolves the server address, preferring IPv4 results since servers
/// commonly bind to `0.0.0.0`.
fn resolve(config: &ClientConfig) -> Result<SocketAddr, EngineError> {
    let target = (config.server_address.as_str(), config.server_port);
    let candidates: Vec<SocketAddr> = match target.to_socket_addrs() {
        Ok(addresses) => addresses.collect(),
        Err(error) => {
            debug!("{} failed to resolve {:?}: {}", config.name, config.server_address, error);
            Vec::new()
        }
    };
    candidates
        .iter()
        .find(|address| address.is_ipv4())
        .or_else(|| candidates.first())
        .copied()
        .ok_or_else(|| EngineError::Unresolved(config.server_address.clone()))
}

fn await_connect(connection: &Connection, mux: &dyn Multiplexer, timeout: Duration) -> Result<(), EngineError> {
    let handle = connection.handle();
    let timeout = Timeout::start(Some(timeout));
    let mut events = Vec::with_capacity(EVENTS);
    loop {
        if timeout.expired() {
            return Err(EngineError::TimedOut);
        }
        mux.wait(&mut events, timeout.remaining_time())?;
        if events.iter().any(|ready| ready.handle == handle) {
            if connection.finish_connect()? {
                return Ok(());
            }
            mux.drained(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_numeric_addresses() {
        let config = ClientConfig::new("127.0.0.1", 4242);
        assert_eq!(resolve(&config).unwrap(), SocketAddr::from(([127, 0, 0, 1], 4242)));
    }

    #[test]
    fn localhost_prefers_ipv4() {
        let config = ClientConfig::new("localhost", 4242);
        let address = resolve(&config).unwrap();
        assert_eq!(address.port(), 4242);
        assert!(address.ip().is_loopback());
    }

    #[test]
    fn unresolvable_names_are_reported() {
        let config = ClientConfig::new("no-such-host.invalid", 4242);
        match resolve(&config) {
            Err(EngineError::Unresolved(name)) => assert_eq!(name, "no-such-host.invalid"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn sending_while_disconnected_fails() {
        struct Silent;
        impl ClientHandler for Silent {
            fn on_data(&self, _client: &ClientHandle, _data: &[u8]) {}
        }

        let client = ClientEngine::new(ClientConfig::new("127.0.0.1", 1), Silent);
        assert!(!client.is_connected());
        assert_eq!(client.state(), LifecycleState::Closed);
        assert!(!client.send(b"hello"));
        assert!(!client.send(b""));
        assert_eq!(client.local_addr(), None);
        client.disconnect();
        client.disconnect();
    }
}
