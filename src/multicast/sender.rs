/*
 * mnet - Event-driven TCP server/client engines with multicast helpers
 * This is free and unencumbered software released into the public domain.
 */
use std::fmt::{Debug, Formatter};
use std::net::{SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::Mutex;

use socket2::{Domain, Protocol, Socket as Socket2, Type};

use log::{debug, info, trace, warn};

use crate::utilities::lock;
use crate::{EngineError, MulticastSenderConfig, TrafficStats};

/// Publishes datagrams to an IPv4 multicast group.
///
/// `send()` may be called from any thread.
pub struct MulticastSender {
    config: MulticastSenderConfig,
    destination: SocketAddr,
    socket: Mutex<Option<UdpSocket>>,
    stats: TrafficStats,
}

impl MulticastSender {
    pub fn new(config: MulticastSenderConfig) -> Self {
        let destination = SocketAddrV4::new(config.group, config.port).into();
        Self {
            config,
            destination,
            socket: Mutex::new(None),
            stats: TrafficStats::default(),
        }
    }

    /// Opens and configures the sending socket. Does nothing if the sender
    /// is running already.
    pub fn start(&self) -> Result<(), EngineError> {
        let mut slot = lock(&self.socket);
        if slot.is_some() {
            return Ok(());
        }

        let config = &self.config;
        let socket = Socket2::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        if let Err(error) = socket.set_send_buffer_size(config.send_buffer_size) {
            warn!("{} failed to set the send buffer size: {}", config.name, error);
        }
        socket.set_multicast_ttl_v4(config.ttl)?;
        socket.set_multicast_loop_v4(config.enable_loopback)?;
        if !config.interface.is_unspecified() {
            socket.set_multicast_if_v4(&config.interface)?;
        }

        *slot = Some(socket.into());
        info!("{} started, sending to {} (ttl={}, loopback={})", config.name, self.destination, config.ttl, config.enable_loopback);
        Ok(())
    }

    pub fn stop(&self) {
        if lock(&self.socket).take().is_some() {
            info!("{} stopped", self.config.name);
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.socket).is_some()
    }

    /// Sends one datagram to the group. Returns `false` if the sender is
    /// stopped, `data` is empty or the send failed.
    pub fn send(&self, data: &[u8]) -> bool {
        if data.is_empty() {
            return false;
        }
        let slot = lock(&self.socket);
        let socket = match slot.as_ref() {
            Some(socket) => socket,
            None => {
                debug!("{} can not send while stopped", self.config.name);
                return false;
            }
        };
        match socket.send_to(data, self.destination) {
            Ok(count) => {
                if count < data.len() {
                    warn!("{} sent only {} of {} bytes", self.config.name, count, data.len());
                }
                self.stats.record(count);
                trace!("{} sent {} bytes", self.config.name, count);
                true
            }
            Err(error) => {
                self.stats.record_error();
                warn!("{} failed to send {} bytes: {}", self.config.name, data.len(), error);
                false
            }
        }
    }

    /// Datagrams sent, bytes sent and send errors.
    pub fn statistics(&self) -> &TrafficStats {
        &self.stats
    }

    pub fn config(&self) -> &MulticastSenderConfig {
        &self.config
    }
}

impl Drop for MulticastSender {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Debug for MulticastSender {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MulticastSender")
            .field("name", &self.config.name)
            .field("destination", &self.destination)
            .field("running", &self.is_running())
            .finish()
    }
}
