/*
 * mnet - Event-driven TCP server/client engines with multicast helpers
 * This is free and unencumbered software released into the public domain.
 */

//! **mnet** provides ***event-driven*** TCP server and client engines, plus
//! small helpers for sending and receiving IPv4 ***multicast*** datagrams.
//!
//! A [`mnet_rs::ServerEngine`](ServerEngine) listens on a port, accepts any
//! number of connections and serves *all* of them from a single background
//! thread. A [`mnet_rs::ClientEngine`](ClientEngine) maintains one outbound
//! connection, again served by a background thread. Your application only
//! implements the callbacks of a [`ServerHandler`] or [`ClientHandler`], which
//! are invoked on the engine thread whenever a connection is established,
//! data arrives, or a connection goes away.
//!
//! Connections are identified by a [`ConnectionId`]: ids are handed out in
//! increasing order and are *never* reused, so a stale id can not accidentally
//! address a newer connection.
//!
//! The readiness of the sockets is observed through a [`Multiplexer`], which
//! by default is backed by the [**`mio`**](mio) library (epoll, kqueue or
//! IOCP). On Unix, a `poll(2)` based backend can be selected instead, see
//! [`Backend`].
//!
//! # Usage
//!
//! ```no_run
//! use mnet_rs::{ConnectionId, ServerConfig, ServerEngine, ServerHandle, ServerHandler};
//!
//! struct Echo;
//!
//! impl ServerHandler for Echo {
//!     fn on_connected(&self, _server: &ServerHandle, id: ConnectionId, remote_address: &str) {
//!         println!("{} connected from {}", id, remote_address);
//!     }
//!
//!     fn on_data(&self, server: &ServerHandle, id: ConnectionId, data: &[u8]) {
//!         server.send(id, data);
//!     }
//! }
//!
//! let server = ServerEngine::new(ServerConfig::new(8080), Echo);
//! server.start().expect("Failed to start the server!");
//! ```
//!
//! Callbacks run on the engine thread, so they ***must not block***. They
//! may call back into the engine through the handle they receive, e.g. to
//! reply, to drop a connection or even to stop the engine.
//!
//! The engines report what they do through the [**`log`**](log) facade; the
//! host application may install any logger implementation.
//!
//! # Examples
//!
//! Examples can be found in the `demos` sub-directory.

mod client;
mod config;
mod connection;
mod error;
mod handler;
mod io;
mod multicast;
mod server;
mod stats;
mod table;
mod utilities;

pub mod multiplexer;

pub use client::{ClientEngine, ClientHandle};
pub use config::{ClientConfig, MulticastReceiverConfig, MulticastSenderConfig, ServerConfig};
pub use connection::{ConnectionId, LifecycleState};
pub use error::EngineError;
pub use handler::{ClientHandler, MulticastHandler, ServerHandler};
pub use multicast::{MulticastReceiver, MulticastSender};
pub use multiplexer::{Backend, Multiplexer, Readiness};
pub use server::{ServerEngine, ServerHandle};
pub use stats::{Counter, Statistics, TrafficStats};
