/*
 * mnet - Event-driven TCP server/client engines with multicast helpers
 * This is free and unencumbered software released into the public domain.
 */
use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonically increasing counter.
///
/// Updates and reads are relaxed: a value read from another thread may be
/// slightly stale, but is never torn.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub(crate) fn increment(&self) {
        self.add(1);
    }

    pub(crate) fn add(&self, amount: u64) {
        self.0.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Traffic in one direction.
#[derive(Debug, Default)]
pub struct TrafficStats {
    messages: Counter,
    bytes: Counter,
    errors: Counter,
}

impl TrafficStats {
    pub(crate) fn record(&self, bytes: usize) {
        self.messages.increment();
        self.bytes.add(bytes as u64);
    }

    pub(crate) fn record_error(&self) {
        self.errors.increment();
    }

    /// Number of reads, writes or datagrams.
    pub fn messages(&self) -> u64 {
        self.messages.get()
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.get()
    }

    pub fn errors(&self) -> u64 {
        self.errors.get()
    }
}

/// Counters of a TCP engine.
#[derive(Debug, Default)]
pub struct Statistics {
    connections: Counter,
    received: TrafficStats,
    sent: TrafficStats,
}

impl Statistics {
    pub(crate) fn record_connection(&self) {
        self.connections.increment();
    }

    /// Connections established since the engine was created.
    pub fn connections(&self) -> u64 {
        self.connections.get()
    }

    pub fn received(&self) -> &TrafficStats {
        &self.received
    }

    pub fn sent(&self) -> &TrafficStats {
        &self.sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traffic_is_accumulated() {
        let stats = Statistics::default();
        stats.record_connection();
        stats.received().record(4);
        stats.received().record(6);
        stats.sent().record_error();

        assert_eq!(stats.connections(), 1);
        assert_eq!(stats.received().messages(), 2);
        assert_eq!(stats.received().bytes(), 10);
        assert_eq!(stats.sent().messages(), 0);
        assert_eq!(stats.sent().errors(), 1);
    }
}
