//! Shuffle client metrics.
//!
//! Monotonic error counters, one per event class, plus coarse fetch gauges.
//! The handles are shared (`Arc`) across every fetcher of a consumer task;
//! nothing here is a process-wide singleton.

use std::sync::atomic::{AtomicU64, Ordering};

/// Error counters for one shuffle client.
#[derive(Debug, Default)]
pub struct ShuffleCounters {
    connection_errs: AtomicU64,
    io_errs: AtomicU64,
    wrong_length_errs: AtomicU64,
    bad_id_errs: AtomicU64,
    wrong_map_errs: AtomicU64,
    wrong_reduce_errs: AtomicU64,
}

impl ShuffleCounters {
    pub fn incr_connection_errs(&self) {
        self.connection_errs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_io_errs(&self) {
        self.io_errs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_wrong_length_errs(&self) {
        self.wrong_length_errs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_bad_id_errs(&self) {
        self.bad_id_errs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_wrong_map_errs(&self) {
        self.wrong_map_errs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_wrong_reduce_errs(&self) {
        self.wrong_reduce_errs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_errs(&self) -> u64 {
        self.connection_errs.load(Ordering::Relaxed)
    }

    pub fn io_errs(&self) -> u64 {
        self.io_errs.load(Ordering::Relaxed)
    }

    pub fn wrong_length_errs(&self) -> u64 {
        self.wrong_length_errs.load(Ordering::Relaxed)
    }

    pub fn bad_id_errs(&self) -> u64 {
        self.bad_id_errs.load(Ordering::Relaxed)
    }

    pub fn wrong_map_errs(&self) -> u64 {
        self.wrong_map_errs.load(Ordering::Relaxed)
    }

    pub fn wrong_reduce_errs(&self) -> u64 {
        self.wrong_reduce_errs.load(Ordering::Relaxed)
    }
}

/// Per-fleet fetch outcome metrics.
#[derive(Debug, Default)]
pub struct FetchMetrics {
    success_fetch: AtomicU64,
    failed_fetch: AtomicU64,
    busy_fetchers: AtomicU64,
}

impl FetchMetrics {
    pub fn record_success(&self) {
        self.success_fetch.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed_fetch.fetch_add(1, Ordering::Relaxed);
    }

    /// A fetcher entered an active host session.
    pub fn fetcher_busy(&self) {
        self.busy_fetchers.fetch_add(1, Ordering::Relaxed);
    }

    /// A fetcher finished its host session.
    pub fn fetcher_free(&self) {
        self.busy_fetchers.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn successes(&self) -> u64 {
        self.success_fetch.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failed_fetch.load(Ordering::Relaxed)
    }

    pub fn busy(&self) -> u64 {
        self.busy_fetchers.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_monotonic() {
        let counters = ShuffleCounters::default();
        counters.incr_io_errs();
        counters.incr_io_errs();
        counters.incr_wrong_reduce_errs();

        assert_eq!(counters.io_errs(), 2);
        assert_eq!(counters.wrong_reduce_errs(), 1);
        assert_eq!(counters.connection_errs(), 0);
    }

    #[test]
    fn busy_gauge_pairs_up() {
        let metrics = FetchMetrics::default();
        metrics.fetcher_busy();
        metrics.fetcher_busy();
        assert_eq!(metrics.busy(), 2);
        metrics.fetcher_free();
        metrics.fetcher_free();
        assert_eq!(metrics.busy(), 0);
    }
}
