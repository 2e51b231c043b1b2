/*
 * mnet - Event-driven TCP server/client engines with multicast helpers
 * This is free and unencumbered software released into the public domain.
 */
use std::fmt::{Debug, Display, Formatter};
use std::io::Result as IoResult;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use mio::Interest;
use mio::net::{TcpListener, TcpStream};
use socket2::{Domain, Protocol, Socket as Socket2, Type};

use log::{debug, error, info, trace, warn};

use crate::connection::Connection;
use crate::io::{event_accept, ReadOutcome};
use crate::multiplexer::{self, Multiplexer, Readiness, Socket, SocketHandle};
use crate::table::ConnectionTable;
use crate::utilities::{lock, pin_current_thread, Flag, ThreadMark};
use crate::{ConnectionId, EngineError, LifecycleState, ServerConfig, ServerHandler, Statistics};

const LISTEN_BACKLOG: i32 = 1024;
const MIN_EVENTS: usize = 16;
const MAX_EVENTS: usize = 1024;
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Event-driven TCP server running on a single background thread
///
/// The engine owns a listening socket, the table of established connections
/// and a [`Multiplexer`]. Its thread accepts new connections and reads from
/// ready ones, handing everything to the [`ServerHandler`]:
///
/// ```no_run
/// use mnet_rs::{ConnectionId, ServerConfig, ServerEngine, ServerHandle, ServerHandler};
///
/// struct Echo;
///
/// impl ServerHandler for Echo {
///     fn on_data(&self, server: &ServerHandle, id: ConnectionId, data: &[u8]) {
///         server.send(id, data);
///     }
/// }
///
/// let server = ServerEngine::new(ServerConfig::new(5000), Echo);
/// server.start().expect("Failed to start the server!");
/// /* ... */
/// server.stop();
/// ```
///
/// `stop()` is called when the engine is dropped.
pub struct ServerEngine {
    handle: ServerHandle,
}

/// A cloneable reference to a [`ServerEngine`], also passed to every
/// [`ServerHandler`] callback.
#[derive(Clone)]
pub struct ServerHandle {
    shared: Arc<Shared>,
}

struct Shared {
    config: ServerConfig,
    handler: Arc<dyn ServerHandler>,
    running: Flag,
    table: Mutex<ConnectionTable<Arc<Connection>>>,
    mux: Mutex<Option<Arc<dyn Multiplexer>>>,
    local_addr: Mutex<Option<SocketAddr>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    engine: ThreadMark,
    dispatch: Mutex<()>,
    dispatcher: ThreadMark,
    next_id: AtomicU64,
    stats: Statistics,
}

impl ServerEngine {
    pub fn new<H: ServerHandler>(config: ServerConfig, handler: H) -> Self {
        let table = ConnectionTable::with_capacity(config.max_connections);
        Self {
            handle: ServerHandle {
                shared: Arc::new(Shared {
                    config,
                    handler: Arc::new(handler),
                    running: Flag::new(),
                    table: Mutex::new(table),
                    mux: Mutex::new(None),
                    local_addr: Mutex::new(None),
                    thread: Mutex::new(None),
                    engine: ThreadMark::new(),
                    dispatch: Mutex::new(()),
                    dispatcher: ThreadMark::new(),
                    next_id: AtomicU64::new(1),
                    stats: Statistics::default(),
                }),
            },
        }
    }

    /// Binds the listening socket and starts the engine thread.
    ///
    /// Succeeds immediately if the server is running already. On failure,
    /// nothing is left behind: no socket stays open and no thread is started.
    pub fn start(&self) -> Result<(), EngineError> {
        self.handle.start()
    }

    /// Stops the server, see [`ServerHandle::stop()`].
    pub fn stop(&self) {
        self.handle.stop()
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    pub fn state(&self) -> LifecycleState {
        self.handle.state()
    }

    /// Sends data to a connection, see [`ServerHandle::send()`].
    pub fn send(&self, id: ConnectionId, data: &[u8]) -> bool {
        self.handle.send(id, data)
    }

    /// Closes a connection, see [`ServerHandle::disconnect()`].
    pub fn disconnect(&self, id: ConnectionId) {
        self.handle.disconnect(id)
    }

    pub fn connected_count(&self) -> usize {
        self.handle.connected_count()
    }

    /// The address the server is bound to, while it is running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.handle.local_addr()
    }

    pub fn statistics(&self) -> &Statistics {
        &self.handle.shared.stats
    }

    pub fn config(&self) -> &ServerConfig {
        &self.handle.shared.config
    }

    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }
}

impl Drop for ServerEngine {
    fn drop(&mut self) {
        self.handle.stop();
    }
}

impl Debug for ServerEngine {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.handle.fmt(f)
    }
}

impl ServerHandle {
    fn name(&self) -> &str {
        &self.shared.config.name
    }

    fn start(&self) -> Result<(), EngineError> {
        let shared = &self.shared;
        if shared.running.check() {
            return Ok(());
        }
        if self.in_callback() {
            return Err(EngineError::Failed(std::io::Error::new(
                std::io::ErrorKind::WouldBlock,
                "The server can not be restarted from within one of its callbacks!",
            )));
        }

        let mut thread = lock(&shared.thread);
        if shared.running.check() {
            return Ok(());
        }
        if let Some(previous) = thread.take() {
            self.reap(previous);
        }

        let config = &shared.config;
        info!("Starting {}, listening on {}:{}...", self.name(), config.bind_address, config.port);

        let capacity = config.max_connections.clamp(MIN_EVENTS, MAX_EVENTS);
        let mux = multiplexer::open(config.backend, capacity)?;
        let mut listener = match bind_listener(config) {
            Ok(listener) => listener,
            Err(error) => {
                error!("{} failed to bind {}:{}: {}", self.name(), config.bind_address, config.port, error);
                return Err(error.into());
            }
        };
        let local_addr = listener.local_addr()?;
        mux.register(&mut listener, Interest::READABLE)?;

        *lock(&shared.mux) = Some(mux.clone());
        *lock(&shared.local_addr) = Some(local_addr);
        shared.running.raise();

        let server = self.clone();
        let spawned = thread::Builder::new()
            .name(config.name.clone())
            .spawn(move || server.serve(listener, mux));

        match spawned {
            Ok(handle) => {
                *thread = Some(handle);
                info!("{} started on {}", self.name(), local_addr);
                Ok(())
            }
            Err(error) => {
                error!("{} failed to spawn its engine thread: {}", self.name(), error);
                shared.running.clear();
                *lock(&shared.mux) = None;
                *lock(&shared.local_addr) = None;
                Err(error.into())
            }
        }
    }

    /// Stops the server: the listening socket and every connection are
    /// closed (firing `on_disconnected()` for each) and the engine thread is
    /// joined before this function returns.
    ///
    /// Calling `stop()` on a stopped server does nothing. When called from
    /// within a callback, the shutdown is only requested; it completes as
    /// soon as the callback returns.
    pub fn stop(&self) {
        if self.in_callback() {
            self.request_stop();
            return;
        }
        let mut thread = lock(&self.shared.thread);
        self.request_stop();
        if let Some(handle) = thread.take() {
            self.reap(handle);
            info!("{} stopped", self.name());
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.check()
    }

    /// `Listening` while running, `Closed` otherwise.
    pub fn state(&self) -> LifecycleState {
        match self.is_running() {
            true => LifecycleState::Listening,
            false => LifecycleState::Closed,
        }
    }

    /// Writes all of `data` to connection `id`.
    ///
    /// Returns `false`, without any side effect, if the id is unknown or
    /// `data` is empty. If the socket buffer is full, the write is retried
    /// until it drains. Any other failure closes the connection, fires
    /// `on_disconnected()` and returns `false`. `true` means every byte was
    /// handed to the operating system.
    pub fn send(&self, id: ConnectionId, data: &[u8]) -> bool {
        if data.is_empty() {
            warn!("{} can not send empty data to {}", self.name(), id);
            return false;
        }
        let connection = match lock(&self.shared.table).get(id).cloned() {
            Some(connection) => connection,
            None => {
                debug!("{} can not send to unknown connection {}", self.name(), id);
                return false;
            }
        };
        match connection.write_all(data) {
            Ok(()) => {
                self.shared.stats.sent().record(data.len());
                trace!("{} sent {} bytes to {}", self.name(), data.len(), id);
                true
            }
            Err(error) => {
                self.shared.stats.sent().record_error();
                warn!("{} failed to send {} bytes to {}: {}", self.name(), data.len(), id, error);
                drop(connection);
                let _dispatch = self.dispatch_guard();
                self.teardown(id, &error);
                false
            }
        }
    }

    /// Closes connection `id` and fires its `on_disconnected()`. Unknown or
    /// already closed ids are ignored. Once this returns, no other callback
    /// for `id` is running or will run.
    pub fn disconnect(&self, id: ConnectionId) {
        let _dispatch = self.dispatch_guard();
        self.teardown(id, &"disconnect requested");
    }

    pub fn connected_count(&self) -> usize {
        lock(&self.shared.table).len()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *lock(&self.shared.local_addr)
    }

    pub fn statistics(&self) -> &Statistics {
        &self.shared.stats
    }

    fn request_stop(&self) {
        if self.shared.running.clear() {
            info!("Stopping {}...", self.name());
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

    fn reap(&self, handle: JoinHandle<()>) {
        if handle.join().is_err() {
            error!("{} engine thread panicked!", self.name());
            let leftovers = lock(&self.shared.table).drain();
            for (_id, connection) in leftovers {
                connection.close();
            }
            *lock(&self.shared.mux) = None;
            *lock(&self.shared.local_addr) = None;
        }
    }

    /// Whether the current thread is delivering callbacks of this server,
    /// either as the engine thread or while tearing down a connection.
    fn in_callback(&self) -> bool {
        self.shared.engine.is_current() || self.shared.dispatcher.is_current()
    }

    /// Serializes with the engine thread's event dispatch, unless the
    /// current thread is dispatching already.
    fn dispatch_guard(&self) -> Option<Dispatch<'_>> {
        if self.in_callback() {
            return None;
        }
        let guard = lock(&self.shared.dispatch);
        self.shared.dispatcher.enter();
        Some(Dispatch {
            _guard: guard,
            owner: &self.shared.dispatcher,
        })
    }

    /// Removes `id` from the table and closes it. Whoever removes the entry
    /// fires `on_disconnected()`, so it fires exactly once.
    fn teardown(&self, id: ConnectionId, reason: &dyn Display) -> bool {
        let connection = match lock(&self.shared.table).remove(id) {
            Some(connection) => connection,
            None => return false,
        };
        connection.close();
        info!("{} client disconnected: id={}, address={} ({})", self.name(), id, connection.remote_address(), reason);
        drop(connection);
        self.shared.handler.on_disconnected(self, id);
        true
    }

    // ~~~~~~~~~~~~~~~~~~~~~~~
    // Engine thread
    // ~~~~~~~~~~~~~~~~~~~~~~~

    fn serve(self, mut listener: TcpListener, mux: Arc<dyn Multiplexer>) {
        let shared = &self.shared;
        shared.engine.enter();

        if let Some(core) = shared.config.cpu_affinity {
            match pin_current_thread(core) {
                Ok(()) => info!("{} engine thread pinned to CPU core {}", self.name(), core),
                Err(error) => warn!("{} failed to pin engine thread to CPU core {}: {}", self.name(), core, error),
            }
        }

        let listener_handle = listener.handle();
        let mut pause = AcceptPause::default();
        let mut events = Vec::with_capacity(MIN_EVENTS);
        let mut buffer = vec![0u8; shared.config.receive_buffer_size.max(1)];
        debug!("{} engine loop started", self.name());

        while shared.running.check() {
            if let Err(error) = mux.wait(&mut events, pause.remaining(Instant::now())) {
                error!("{} multiplexer failed: {}", self.name(), error);
                break;
            }
            let _dispatch = lock(&shared.dispatch);
            if pause.is_due(Instant::now()) {
                match mux.register(&mut listener, Interest::READABLE) {
                    Ok(()) => {
                        debug!("{} accepts connections again", self.name());
                        pause.end();
                    }
                    Err(error) => {
                        warn!("{} failed to re-register the listener: {:?}", self.name(), error);
                        pause.begin(Instant::now());
                    }
                }
            }
            for ready in events.iter() {
                if !shared.running.check() {
                    break;
                }
                if ready.handle == listener_handle {
                    if !pause.is_active() && !self.accept_pending(&listener, listener_handle, &mux) {
                        if let Err(error) = mux.unregister(&mut listener) {
                            warn!("{} failed to de-register the listener: {:?}", self.name(), error);
                        }
                        pause.begin(Instant::now());
                    }
                } else {
                    self.service(ready, &mut buffer, &*mux);
                }
            }
        }

        shared.running.clear();
        if let Err(error) = mux.unregister(&mut listener) {
            warn!("{} failed to de-register the listener: {:?}", self.name(), error);
        }
        drop(listener);
        *lock(&shared.local_addr) = None;

        {
            let _dispatch = lock(&shared.dispatch);
            let connections = lock(&shared.table).drain();
            for (id, connection) in connections {
                connection.close();
                info!("{} client disconnected: id={}, address={} (server stopped)", self.name(), id, connection.remote_address());
                drop(connection);
                shared.handler.on_disconnected(&self, id);
            }
        }

        *lock(&shared.mux) = None;
        shared.engine.leave();
        debug!("{} engine loop ended", self.name());
    }

    /// Accepts until would-block. Returns `false` if accepting failed, in
    /// which case the listener is paused by the caller.
    fn accept_pending(&self, listener: &TcpListener, handle: SocketHandle, mux: &Arc<dyn Multiplexer>) -> bool {
        loop {
            match event_accept(listener) {
                Ok(Some((stream, address))) => self.admit(stream, address, mux),
                Ok(None) => {
                    mux.drained(handle);
                    return true;
                }
                Err(error) => {
                    warn!("{} failed to accept a connection, retrying in {:?}: {:?}", self.name(), ACCEPT_RETRY_DELAY, error);
                    return false;
                }
            }
        }
    }

    fn admit(&self, mut stream: TcpStream, address: SocketAddr, mux: &Arc<dyn Multiplexer>) {
        let shared = &self.shared;
        let id = ConnectionId::new(shared.next_id.fetch_add(1, Ordering::Relaxed));

        if shared.config.nodelay {
            if let Err(error) = stream.set_nodelay(true) {
                debug!("{} failed to set TCP_NODELAY for {}: {}", self.name(), id, error);
            }
        }
        if let Err(error) = mux.register(&mut stream, Interest::READABLE) {
            warn!("{} failed to register connection from {}: {}", self.name(), address, error);
            return;
        }

        let connection = Arc::new(Connection::new(id, address.ip().to_string(), stream, mux.clone()));
        let count = {
            let mut table = lock(&shared.table);
            if let Err(rejected) = table.insert(id, connection.handle(), connection.clone()) {
                drop(table);
                warn!("{} rejected connection from {}: socket handle already in use", self.name(), address);
                rejected.close();
                return;
            }
            table.len()
        };
        if count > shared.config.max_connections {
            warn!("{} has {} connections, above the advisory limit of {}", self.name(), count, shared.config.max_connections);
        }

        shared.stats.record_connection();
        info!("{} client connected: id={}, address={}", self.name(), id, connection.remote_address());
        shared.handler.on_connected(self, id, connection.remote_address());
    }

    fn service(&self, ready: &Readiness, buffer: &mut [u8], mux: &dyn Multiplexer) {
        let found = lock(&self.shared.table).lookup(ready.handle).map(|(id, connection)| (id, connection.clone()));
        let (id, connection) = match found {
            Some(found) => found,
            None => {
                mux.drained(ready.handle);
                return;
            }
        };

        match connection.read(buffer) {
            Ok(ReadOutcome::Data(count)) => {
                self.shared.stats.received().record(count);
                trace!("{} received {} bytes from {}", self.name(), count, id);
                drop(connection);
                self.shared.handler.on_data(self, id, &buffer[..count]);
            }
            Ok(ReadOutcome::WouldBlock) => mux.drained(ready.handle),
            Ok(ReadOutcome::Closed) => {
                drop(connection);
                self.teardown(id, &"closed by peer");
            }
            Err(error) => {
                self.shared.stats.received().record_error();
                drop(connection);
                self.teardown(id, &error);
            }
        }
    }
}

impl Debug for ServerHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("name", &self.shared.config.name)
            .field("running", &self.is_running())
            .field("local_addr", &self.local_addr())
            .field("connections", &self.connected_count())
            .finish()
    }
}

/// Marks the current thread as the dispatching one while the dispatch
/// lock is held outside of the engine thread.
struct Dispatch<'a> {
    _guard: MutexGuard<'a, ()>,
    owner: &'a ThreadMark,
}

impl Drop for Dispatch<'_> {
    fn drop(&mut self) {
        self.owner.leave();
    }
}

/// Keeps the listener out of the multiplexer for a while after `accept()`
/// failed with something other than would-block, e.g. `EMFILE`.
#[derive(Debug, Default)]
struct AcceptPause {
    until: Option<Instant>,
}

impl AcceptPause {
    fn begin(&mut self, now: Instant) {
        self.until = Some(now + ACCEPT_RETRY_DELAY);
    }

    fn end(&mut self) {
        self.until = None;
    }

    fn is_active(&self) -> bool {
        self.until.is_some()
    }

    fn is_due(&self, now: Instant) -> bool {
        self.until.map_or(false, |until| now >= until)
    }

    /// Bounds the next `wait()` while paused.
    fn remaining(&self, now: Instant) -> Option<Duration> {
        self.until.map(|until| until.saturating_duration_since(now))
    }
}

fn bind_listener(config: &ServerConfig) -> IoResult<TcpListener> {
    let address = SocketAddr::new(config.bind_address, config.port);
    let socket = Socket2::new(Domain::for_address(address), Type::STREAM, Some(Protocol::TCP))?;
    if config.reuse_address {
        if let Err(error) = socket.set_reuse_address(true) {
            warn!("{} failed to set SO_REUSEADDR: {}", config.name, error);
        }
    }
    socket.set_nonblocking(true)?;
    socket.bind(&address.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    Ok(TcpListener::from_std(socket.into()))
}
