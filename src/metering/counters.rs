//! Per-exchange byte counters.

use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Unique identifier for one request/response exchange.
///
/// Only used to correlate diagnostic events of the same exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExchangeId(Uuid);

impl ExchangeId {
    /// Generate a new random exchange ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ExchangeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "xchg-{}", self.0.simple())
    }
}

/// Received/sent totals of a single exchange.
///
/// Shared (behind an `Arc`) only between the interceptor invocation and the
/// two wrappers it creates for that exchange. Both counters only grow.
#[derive(Debug, Default)]
pub struct ExchangeCounters {
    received: AtomicU64,
    sent: AtomicU64,
}

impl ExchangeCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add inbound bytes, returning the new total.
    pub fn add_received(&self, bytes: u64) -> u64 {
        self.received.fetch_add(bytes, Ordering::Relaxed) + bytes
    }

    /// Add outbound bytes, returning the new total.
    pub fn add_sent(&self, bytes: u64) -> u64 {
        self.sent.fetch_add(bytes, Ordering::Relaxed) + bytes
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exchange_id_unique() {
        assert_ne!(ExchangeId::new(), ExchangeId::new());
    }

    #[test]
    fn counters_accumulate_independently() {
        let counters = ExchangeCounters::new();
        assert_eq!(counters.add_received(10), 10);
        assert_eq!(counters.add_received(5), 15);
        assert_eq!(counters.add_sent(7), 7);

        assert_eq!(counters.received(), 15);
        assert_eq!(counters.sent(), 7);
    }
}
