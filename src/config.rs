/*
 * mnet - Event-driven TCP server/client engines with multicast helpers
 * This is free and unencumbered software released into the public domain.
 */
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use crate::multiplexer::Backend;

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_RECEIVE_BUFFER: usize = 4096;
const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_millis(30000);
const DEFAULT_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 1);
const DEFAULT_DATAGRAM_BUFFER: usize = 65536;

/// Settings of a [`ServerEngine`](crate::ServerEngine)
///
/// The engine takes a snapshot of the configuration at construction time;
/// later changes to the value passed in have no effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Name used in log records.
    pub name: String,
    pub bind_address: IpAddr,
    /// Port to listen on; `0` lets the operating system choose.
    pub port: u16,
    /// Advisory: exceeding it only logs a warning.
    pub max_connections: usize,
    /// Sets `SO_REUSEADDR` on the listening socket.
    pub reuse_address: bool,
    /// Size of the buffer used for each read; also the largest chunk handed
    /// to [`on_data()`](crate::ServerHandler::on_data()).
    pub receive_buffer_size: usize,
    pub connection_timeout: Duration,
    /// Pins the engine thread to this CPU core.
    pub cpu_affinity: Option<usize>,
    /// Sets `TCP_NODELAY` on accepted connections.
    pub nodelay: bool,
    pub backend: Backend,
}

impl ServerConfig {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    /// Listens on the IPv4 loopback interface only.
    pub fn loopback(port: u16) -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            ..Self::new(port)
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "tcp-server".to_owned(),
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            max_connections: 100,
            reuse_address: true,
            receive_buffer_size: DEFAULT_RECEIVE_BUFFER,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            cpu_affinity: None,
            nodelay: true,
            backend: Backend::default(),
        }
    }
}

/// Settings of a [`ClientEngine`](crate::ClientEngine)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub name: String,
    /// Host name or IP address of the server.
    pub server_address: String,
    pub server_port: u16,
    pub receive_buffer_size: usize,
    /// Upper bound for [`connect()`](crate::ClientEngine::connect()).
    pub connection_timeout: Duration,
    pub cpu_affinity: Option<usize>,
    pub nodelay: bool,
    pub backend: Backend,
}

impl ClientConfig {
    pub fn new<T: Into<String>>(server_address: T, server_port: u16) -> Self {
        Self {
            server_address: server_address.into(),
            server_port,
            ..Self::default()
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: "tcp-client".to_owned(),
            server_address: "localhost".to_owned(),
            server_port: DEFAULT_PORT,
            receive_buffer_size: DEFAULT_RECEIVE_BUFFER,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            cpu_affinity: None,
            nodelay: true,
            backend: Backend::default(),
        }
    }
}

/// Settings of a [`MulticastSender`](crate::MulticastSender)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MulticastSenderConfig {
    pub name: String,
    pub group: Ipv4Addr,
    pub port: u16,
    /// Outgoing interface; `0.0.0.0` leaves the choice to the OS.
    pub interface: Ipv4Addr,
    pub ttl: u32,
    /// Deliver sent datagrams to receivers on this host as well.
    pub enable_loopback: bool,
    pub send_buffer_size: usize,
}

impl MulticastSenderConfig {
    pub fn new(group: Ipv4Addr, port: u16) -> Self {
        Self {
            group,
            port,
            ..Self::default()
        }
    }
}

impl Default for MulticastSenderConfig {
    fn default() -> Self {
        Self {
            name: "multicast-sender".to_owned(),
            group: DEFAULT_MULTICAST_GROUP,
            port: DEFAULT_PORT,
            interface: Ipv4Addr::UNSPECIFIED,
            ttl: 1,
            enable_loopback: false,
            send_buffer_size: DEFAULT_DATAGRAM_BUFFER,
        }
    }
}

/// Settings of a [`MulticastReceiver`](crate::MulticastReceiver)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MulticastReceiverConfig {
    pub name: String,
    pub group: Ipv4Addr,
    /// Port to bind; `0` lets the operating system choose.
    pub port: u16,
    pub interface: Ipv4Addr,
    /// Allows several receivers on the same port.
    pub reuse_address: bool,
    pub receive_buffer_size: usize,
    /// How long one receive call may block; bounds the latency of `stop()`.
    pub receive_timeout: Duration,
}

impl MulticastReceiverConfig {
    pub fn new(group: Ipv4Addr, port: u16) -> Self {
        Self {
            group,
            port,
            ..Self::default()
        }
    }
}

impl Default for MulticastReceiverConfig {
    fn default() -> Self {
        Self {
            name: "multicast-receiver".to_owned(),
            group: DEFAULT_MULTICAST_GROUP,
            port: DEFAULT_PORT,
            interface: Ipv4Addr::UNSPECIFIED,
            reuse_address: true,
            receive_buffer_size: DEFAULT_DATAGRAM_BUFFER,
            receive_timeout: Duration::from_millis(1000),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 5000);
        assert_eq!(config.max_connections, 100);
        assert!(config.reuse_address);
        assert_eq!(config.receive_buffer_size, 4096);
        assert_eq!(config.connection_timeout, Duration::from_millis(30000));
        assert_eq!(config.cpu_affinity, None);
        assert_eq!(config.backend, Backend::Indexed);
        assert_eq!(ServerConfig::loopback(0).bind_address, IpAddr::V4(Ipv4Addr::LOCALHOST));
    }

    #[test]
    fn client_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.server_address, "localhost");
        assert_eq!(config.server_port, 5000);
        assert_eq!(config.receive_buffer_size, 4096);
        assert_eq!(config.connection_timeout, Duration::from_secs(30));

        let config = ClientConfig::new("127.0.0.1", 9000);
        assert_eq!(config.server_address, "127.0.0.1");
        assert_eq!(config.server_port, 9000);
    }

    #[test]
    fn multicast_defaults() {
        let sender = MulticastSenderConfig::default();
        assert_eq!(sender.group, Ipv4Addr::new(224, 0, 0, 1));
        assert_eq!(sender.ttl, 1);
        assert!(!sender.enable_loopback);
        assert_eq!(sender.send_buffer_size, 65536);

        let receiver = MulticastReceiverConfig::default();
        assert!(receiver.reuse_address);
        assert_eq!(receiver.receive_timeout, Duration::from_secs(1));
        assert_eq!(receiver.interface, Ipv4Addr::UNSPECIFIED);
    }
}
