//! Counters describing what a client has done so far.

use std::sync::atomic::{AtomicU64, Ordering};

/// A point-in-time copy of a client's counters. Every counter only grows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Queries sent over UDP, including FORMERR retries.
    pub udp_queries: u64,
    /// Queries sent over TCP after a truncated UDP response.
    pub tcp_queries: u64,
    /// Truncated UDP responses received.
    pub truncated_responses: u64,
    /// Exchanges that failed at the transport or codec level.
    pub exchange_errors: u64,
    /// Failed lookups answered from the last-known-good cache.
    pub cache_last_hits: u64,
    /// Failed lookups with nothing in the last-known-good cache.
    pub cache_last_misses: u64,
    /// Lookups that joined a run already in flight.
    pub in_flight_hits: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    udp_queries: AtomicU64,
    tcp_queries: AtomicU64,
    truncated_responses: AtomicU64,
    exchange_errors: AtomicU64,
    cache_last_hits: AtomicU64,
    cache_last_misses: AtomicU64,
    in_flight_hits: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl Counters {
    pub(crate) fn udp_query(&self) {
        bump(&self.udp_queries);
    }

    pub(crate) fn tcp_query(&self) {
        bump(&self.tcp_queries);
    }

    pub(crate) fn truncated_response(&self) {
        bump(&self.truncated_responses);
    }

    pub(crate) fn exchange_error(&self) {
        bump(&self.exchange_errors);
    }

    pub(crate) fn cache_last_hit(&self) {
        bump(&self.cache_last_hits);
    }

    pub(crate) fn cache_last_miss(&self) {
        bump(&self.cache_last_misses);
    }

    pub(crate) fn in_flight_hit(&self) {
        bump(&self.in_flight_hits);
    }

    pub(crate) fn snapshot(&self) -> Stats {
        Stats {
            udp_queries: self.udp_queries.load(Ordering::Relaxed),
            tcp_queries: self.tcp_queries.load(Ordering::Relaxed),
            truncated_responses: self.truncated_responses.load(Ordering::Relaxed),
            exchange_errors: self.exchange_errors.load(Ordering::Relaxed),
            cache_last_hits: self.cache_last_hits.load(Ordering::Relaxed),
            cache_last_misses: self.cache_last_misses.load(Ordering::Relaxed),
            in_flight_hits: self.in_flight_hits.load(Ordering::Relaxed),
        }
    }
}
