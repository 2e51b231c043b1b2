/*
 * mnet - Event-driven TCP server/client engines with multicast helpers
 * This is free and unencumbered software released into the public domain.
 */
use crate::{ClientHandle, ConnectionId, ServerHandle};

/// Callbacks of a [`ServerEngine`](crate::ServerEngine)
///
/// All callbacks run synchronously on the engine thread, which serves *every*
/// connection of the server: they must not block. The `server` handle can be
/// used to reply ([`send()`](ServerHandle::send())) or to drop the connection
/// ([`disconnect()`](ServerHandle::disconnect())) from within a callback.
///
/// For every connection, `on_connected()` is called exactly once, followed by
/// any number of `on_data()` calls and exactly one `on_disconnected()`.
pub trait ServerHandler: Send + Sync + 'static {
    fn on_connected(&self, _server: &ServerHandle, _id: ConnectionId, _remote_address: &str) {}

    /// Receives the bytes of one read, verbatim. There is no framing: a
    /// message sent by the peer may arrive split up or coalesced.
    fn on_data(&self, server: &ServerHandle, id: ConnectionId, data: &[u8]);

    /// Fired once the connection is closed, whatever the reason. Usually runs
    /// on the engine thread; when the teardown was triggered by
    /// [`disconnect()`](ServerHandle::disconnect()) or a failed
    /// [`send()`](ServerHandle::send()), it runs on the calling thread.
    fn on_disconnected(&self, _server: &ServerHandle, _id: ConnectionId) {}
}

/// Callbacks of a [`ClientEngine`](crate::ClientEngine)
///
/// All callbacks run on the client's engine thread.
pub trait ClientHandler: Send + Sync + 'static {
    fn on_connected(&self, _client: &ClientHandle) {}

    fn on_data(&self, client: &ClientHandle, data: &[u8]);

    /// Fired exactly once per successful `connect()`, after the read loop
    /// has ended and before the socket is closed.
    fn on_disconnected(&self, _client: &ClientHandle) {}
}

/// Callback of a [`MulticastReceiver`](crate::MulticastReceiver), run on the
/// receiver thread for every datagram.
pub trait MulticastHandler: Send + Sync + 'static {
    fn on_data(&self, data: &[u8], sender_address: &str);
}

impl<F> MulticastHandler for F
where
    F: Fn(&[u8], &str) + Send + Sync + 'static,
{
    fn on_data(&self, data: &[u8], sender_address: &str) {
        self(data, sender_address)
    }
}
