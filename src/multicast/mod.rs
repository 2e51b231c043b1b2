/*
 * mnet - Event-driven TCP server/client engines with multicast helpers
 * This is free and unencumbered software released into the public domain.
 */

//! IPv4 multicast datagrams
//!
//! A [`MulticastSender`] publishes datagrams to a group; a
//! [`MulticastReceiver`] joins a group and hands every datagram it receives
//! to a [`MulticastHandler`](crate::MulticastHandler) on its own thread.
//! Neither one uses the readiness multiplexer: the sender writes directly and
//! the receiver blocks with a read timeout, so that `stop()` is honored within
//! one `receive_timeout`.

mod receiver;
mod sender;

pub use receiver::MulticastReceiver;
pub use sender::MulticastSender;

/// Upper bound of a UDP payload, used as the receive buffer size.
const MAX_DATAGRAM: usize = 65536;
