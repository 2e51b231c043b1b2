/*
 * mnet - Event-driven TCP server/client engines with multicast helpers
 * This is free and unencumbered software released into the public domain.
 */
use std::fmt::{Debug, Formatter};
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket as Socket2, Type};

use log::{debug, error, info, trace, warn};

use super::MAX_DATAGRAM;
use crate::utilities::{lock, Flag};
use crate::{EngineError, MulticastHandler, MulticastReceiverConfig, TrafficStats};

const MIN_RECEIVE_TIMEOUT: Duration = Duration::from_millis(1);

/// Joins an IPv4 multicast group and delivers every datagram to a
/// [`MulticastHandler`] on a background thread.
///
/// `stop()` takes effect within one `receive_timeout`; it is called when the
/// receiver is dropped.
pub struct MulticastReceiver<H: MulticastHandler> {
    shared: Arc<Shared<H>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

struct Shared<H> {
    config: MulticastReceiverConfig,
    handler: H,
    running: Flag,
    local_addr: Mutex<Option<SocketAddr>>,
    stats: TrafficStats,
}

impl<H: MulticastHandler> MulticastReceiver<H> {
    pub fn new(config: MulticastReceiverConfig, handler: H) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                handler,
                running: Flag::new(),
                local_addr: Mutex::new(None),
                stats: TrafficStats::default(),
            }),
            thread: Mutex::new(None),
        }
    }

    /// Binds the port, joins the group and starts the receiver thread. Does
    /// nothing if the receiver is running already.
    pub fn start(&self) -> Result<(), EngineError> {
        let mut thread = lock(&self.thread);
        if self.shared.running.check() {
            return Ok(());
        }
        if let Some(previous) = thread.take() {
            self.reap(previous);
        }

        let config = &self.shared.config;
        let socket = open_socket(config)?;
        let local_addr = socket.local_addr()?;

        *lock(&self.shared.local_addr) = Some(local_addr);
        self.shared.running.raise();

        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name(config.name.clone())
            .spawn(move || shared.listen(socket));

        match spawned {
            Ok(handle) => {
                *thread = Some(handle);
                info!("{} joined {} on {}", config.name, config.group, local_addr);
                Ok(())
            }
            Err(error) => {
                error!("{} failed to spawn its receiver thread: {}", config.name, error);
                self.shared.running.clear();
                *lock(&self.shared.local_addr) = None;
                Err(error.into())
            }
        }
    }

    /// Stops the receiver thread, leaves the group and closes the socket.
    pub fn stop(&self) {
        if self.shared.running.clear() {
            info!("Stopping {}...", self.shared.config.name);
        }
        let mut thread = lock(&self.thread);
        if let Some(handle) = thread.take() {
            self.reap(handle);
            info!("{} stopped", self.shared.config.name);
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.check()
    }

    /// The bound address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *lock(&self.shared.local_addr)
    }

    /// Datagrams received, bytes received and receive errors.
    pub fn statistics(&self) -> &TrafficStats {
        &self.shared.stats
    }

    pub fn config(&self) -> &MulticastReceiverConfig {
        &self.shared.config
    }

    fn reap(&self, handle: JoinHandle<()>) {
        if handle.join().is_err() {
            error!("{} receiver thread panicked!", self.shared.config.name);
        }
        *lock(&self.shared.local_addr) = None;
    }
}

impl<H: MulticastHandler> Drop for MulticastReceiver<H> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<H: MulticastHandler> Debug for MulticastReceiver<H> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MulticastReceiver")
            .field("name", &self.shared.config.name)
            .field("group", &self.shared.config.group)
            .field("running", &self.is_running())
            .field("local_addr", &self.local_addr())
            .finish()
    }
}

impl<H: MulticastHandler> Shared<H> {
    fn listen(&self, socket: UdpSocket) {
        let name = &self.config.name;
        let mut buffer = vec![0u8; MAX_DATAGRAM];
        debug!("{} receiver loop started", name);

        while self.running.check() {
            match socket.recv_from(&mut buffer) {
                Ok((count, sender)) => {
                    self.stats.record(count);
                    trace!("{} received {} bytes from {}", name, count, sender);
                    self.handler.on_data(&buffer[..count], &sender.ip().to_string());
                }
                Err(error) => match error.kind() {
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted => (),
                    _ => {
                        self.stats.record_error();
                        warn!("{} failed to receive: {}", name, error);
                    }
                },
            }
        }

        if let Err(error) = socket.leave_multicast_v4(&self.config.group, &self.config.interface) {
            warn!("{} failed to leave {}: {}", name, self.config.group, error);
        }
        debug!("{} receiver loop ended", name);
    }
}

fn open_socket(config: &MulticastReceiverConfig) -> Result<UdpSocket, EngineError> {
    let socket = Socket2::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    if let Err(error) = socket.set_recv_buffer_size(config.receive_buffer_size) {
        warn!("{} failed to set the receive buffer size: {}", config.name, error);
    }
    if config.reuse_address {
        if let Err(error) = socket.set_reuse_address(true) {
            warn!("{} failed to set SO_REUSEADDR: {}", config.name, error);
        }
        #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
        {
            if let Err(error) = socket.set_reuse_port(true) {
                warn!("{} failed to set SO_REUSEPORT: {}", config.name, error);
            }
        }
    }

    let address = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.port);
    socket.bind(&address.into())?;
    socket.join_multicast_v4(&config.group, &config.interface)?;
    socket.set_read_timeout(Some(config.receive_timeout.max(MIN_RECEIVE_TIMEOUT)))?;
    Ok(socket.into())
}
