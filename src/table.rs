/*
 * mnet - Event-driven TCP server/client engines with multicast helpers
 * This is free and unencumbered software released into the public domain.
 */
use std::collections::HashMap;

use crate::connection::ConnectionId;
use crate::multiplexer::SocketHandle;

/// Bidirectional index of live connections
///
/// Maps a [`ConnectionId`] to its entry (primary) and the raw socket handle
/// back to the id (reverse index), so that a readiness event can be
/// dispatched in O(1). Both maps are always updated together.
#[derive(Debug)]
pub(crate) struct ConnectionTable<T> {
    entries: HashMap<ConnectionId, (SocketHandle, T)>,
    handles: HashMap<SocketHandle, ConnectionId>,
}

impl<T> ConnectionTable<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            handles: HashMap::with_capacity(capacity),
        }
    }

    /// Adds a new entry. The value is handed back if either the id or the
    /// handle is already present.
    pub fn insert(&mut self, id: ConnectionId, handle: SocketHandle, value: T) -> Result<(), T> {
        if self.entries.contains_key(&id) || self.handles.contains_key(&handle) {
            return Err(value);
        }
        self.entries.insert(id, (handle, value));
        self.handles.insert(handle, id);
        Ok(())
    }

    pub fn remove(&mut self, id: ConnectionId) -> Option<T> {
        let (handle, value) = self.entries.remove(&id)?;
        self.handles.remove(&handle);
        Some(value)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&T> {
        self.entries.get(&id).map(|(_, value)| value)
    }

    pub fn lookup(&self, handle: SocketHandle) -> Option<(ConnectionId, &T)> {
        let id = *self.handles.get(&handle)?;
        self.get(id).map(|value| (id, value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Removes every entry, in ascending id order.
    pub fn drain(&mut self) -> Vec<(ConnectionId, T)> {
        self.handles.clear();
        let mut drained: Vec<_> = self.entries.drain().map(|(id, (_, value))| (id, value)).collect();
        drained.sort_by_key(|(id, _)| *id);
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(value: u64) -> ConnectionId {
        ConnectionId::new(value)
    }

    #[test]
    fn insert_populates_both_indexes() {
        let mut table = ConnectionTable::with_capacity(4);
        assert_eq!(table.len(), 0);
        table.insert(id(1), 7, "a").unwrap();
        table.insert(id(2), 9, "b").unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.get(id(1)), Some(&"a"));
        assert_eq!(table.lookup(9), Some((id(2), &"b")));
        assert_eq!(table.lookup(8), None);
    }

    #[test]
    fn duplicate_id_or_handle_is_rejected() {
        let mut table = ConnectionTable::with_capacity(4);
        table.insert(id(1), 7, "a").unwrap();
        assert_eq!(table.insert(id(1), 8, "b"), Err("b"));
        assert_eq!(table.insert(id(2), 7, "c"), Err("c"));
        assert_eq!(table.len(), 1);
        assert_eq!(table.lookup(8), None);
    }

    #[test]
    fn remove_clears_both_indexes() {
        let mut table = ConnectionTable::with_capacity(4);
        table.insert(id(1), 7, "a").unwrap();
        assert_eq!(table.remove(id(1)), Some("a"));
        assert_eq!(table.remove(id(1)), None);
        assert_eq!(table.lookup(7), None);
        assert_eq!(table.len(), 0);

        /* the handle may be reused by the OS for a new connection */
        table.insert(id(2), 7, "b").unwrap();
        assert_eq!(table.lookup(7), Some((id(2), &"b")));
    }

    #[test]
    fn drain_returns_entries_in_id_order() {
        let mut table = ConnectionTable::with_capacity(4);
        table.insert(id(3), 30, 'c').unwrap();
        table.insert(id(1), 10, 'a').unwrap();
        table.insert(id(2), 20, 'b').unwrap();
        assert_eq!(table.drain(), vec![(id(1), 'a'), (id(2), 'b'), (id(3), 'c')]);
        assert_eq!(table.len(), 0);
        assert_eq!(table.lookup(20), None);
    }
}
