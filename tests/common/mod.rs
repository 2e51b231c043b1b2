/*
 * mnet - Event-driven TCP server/client engines with multicast helpers
 * This is free and unencumbered software released into the public domain.
 */
#![allow(dead_code)]

use std::io::Read;
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};

use mnet_rs::{ClientHandle, ClientHandler, ConnectionId, ServerConfig, ServerEngine, ServerHandle, ServerHandler};

pub const WAIT: Duration = Duration::from_secs(5);
pub const QUIET: Duration = Duration::from_millis(200);

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Polls `condition` until it holds or [`WAIT`] has passed.
pub fn eventually<F: FnMut() -> bool>(mut condition: F) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

pub fn connect_to(address: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(address).expect("Failed to connect!");
    stream.set_read_timeout(Some(WAIT)).unwrap();
    stream
}

pub fn read_exactly(stream: &mut TcpStream, length: usize) -> Vec<u8> {
    let mut buffer = vec![0u8; length];
    stream.read_exact(&mut buffer).expect("Failed to read!");
    buffer
}

/// Returns `true` if the peer closed the connection (or reset it).
pub fn sees_eof(stream: &mut TcpStream) -> bool {
    let mut buffer = [0u8; 64];
    loop {
        match stream.read(&mut buffer) {
            Ok(0) => return true,
            Ok(_) => continue,
            Err(error) => return !matches!(error.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut),
        }
    }
}

// ~~~~~~~~~~~~~~~~~~~~~~~
// Server side
// ~~~~~~~~~~~~~~~~~~~~~~~

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    Connected(ConnectionId, String),
    Data(ConnectionId, Vec<u8>),
    Disconnected(ConnectionId),
}

/// What the recording handler does with received data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaction {
    Ignore,
    Echo,
    Disconnect,
    Stop,
}

pub struct ServerRecorder {
    pub events: Sender<ServerEvent>,
    pub reaction: Reaction,
}

impl ServerHandler for ServerRecorder {
    fn on_connected(&self, _server: &ServerHandle, id: ConnectionId, remote_address: &str) {
        let _ = self.events.send(ServerEvent::Connected(id, remote_address.to_owned()));
    }

    fn on_data(&self, server: &ServerHandle, id: ConnectionId, data: &[u8]) {
        let _ = self.events.send(ServerEvent::Data(id, data.to_vec()));
        match self.reaction {
            Reaction::Ignore => (),
            Reaction::Echo => {
                server.send(id, data);
            }
            Reaction::Disconnect => server.disconnect(id),
            Reaction::Stop => server.stop(),
        }
    }

    fn on_disconnected(&self, _server: &ServerHandle, id: ConnectionId) {
        let _ = self.events.send(ServerEvent::Disconnected(id));
    }
}

pub fn recording_server(reaction: Reaction) -> (ServerEngine, Receiver<ServerEvent>) {
    recording_server_with(ServerConfig::loopback(0), reaction)
}

pub fn recording_server_with(config: ServerConfig, reaction: Reaction) -> (ServerEngine, Receiver<ServerEvent>) {
    let (events, receiver) = unbounded();
    let server = ServerEngine::new(config, ServerRecorder { events, reaction });
    server.start().expect("Failed to start the server!");
    (server, receiver)
}

pub fn expect_connected(events: &Receiver<ServerEvent>) -> ConnectionId {
    match events.recv_timeout(WAIT).expect("No event received!") {
        ServerEvent::Connected(id, _) => id,
        other => panic!("Expected a connection, got {:?}", other),
    }
}

pub fn expect_disconnected(events: &Receiver<ServerEvent>) -> ConnectionId {
    match events.recv_timeout(WAIT).expect("No event received!") {
        ServerEvent::Disconnected(id) => id,
        other => panic!("Expected a disconnect, got {:?}", other),
    }
}

/// Collects `length` bytes of data events for connection `id`.
pub fn expect_data(events: &Receiver<ServerEvent>, id: ConnectionId, length: usize) -> Vec<u8> {
    let mut collected = Vec::new();
    while collected.len() < length {
        match events.recv_timeout(WAIT).expect("No event received!") {
            ServerEvent::Data(from, data) if from == id => collected.extend_from_slice(&data),
            other => panic!("Expected data from {}, got {:?}", id, other),
        }
    }
    collected
}

// ~~~~~~~~~~~~~~~~~~~~~~~
// Client side
// ~~~~~~~~~~~~~~~~~~~~~~~

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Connected,
    Data(Vec<u8>),
    Disconnected,
}

pub struct ClientRecorder {
    pub events: Sender<ClientEvent>,
    pub disconnect_on_data: bool,
}

impl ClientHandler for ClientRecorder {
    fn on_connected(&self, client: &ClientHandle) {
        assert!(client.is_connected());
        let _ = self.events.send(ClientEvent::Connected);
    }

    fn on_data(&self, client: &ClientHandle, data: &[u8]) {
        let _ = self.events.send(ClientEvent::Data(data.to_vec()));
        if self.disconnect_on_data {
            client.disconnect();
        }
    }

    fn on_disconnected(&self, _client: &ClientHandle) {
        let _ = self.events.send(ClientEvent::Disconnected);
    }
}

pub fn client_recorder(disconnect_on_data: bool) -> (ClientRecorder, Receiver<ClientEvent>) {
    let (events, receiver) = unbounded();
    (ClientRecorder { events, disconnect_on_data }, receiver)
}

pub fn expect_client_data(events: &Receiver<ClientEvent>, length: usize) -> Vec<u8> {
    let mut collected = Vec::new();
    while collected.len() < length {
        match events.recv_timeout(WAIT).expect("No event received!") {
            ClientEvent::Data(data) => collected.extend_from_slice(&data),
            other => panic!("Expected data, got {:?}", other),
        }
    }
    collected
}
