//! Scheduler-facing contract.

use super::types::{InputAttemptIdentifier, MapHost, MapOutput};
use std::time::Duration;

/// The central shuffle scheduler, as seen from a fetcher.
///
/// Implementations are shared across every fetcher task of a consumer and
/// must be thread-safe. The fetcher holds a handle to the scheduler; the
/// scheduler never holds fetchers, it tracks them by id where it needs to.
pub trait ShuffleScheduler: Send + Sync {
    /// Current pending outputs on `host`, in fetch order. May come back
    /// empty when everything the host advertised has since become obsolete.
    fn get_maps_for_host(&self, host: &MapHost) -> Vec<InputAttemptIdentifier>;

    /// Resolves the identifier a served wire header refers to.
    fn get_identifier_for_fetched_output(
        &self,
        map_id: &str,
        partition: i32,
    ) -> Option<InputAttemptIdentifier>;

    /// One output landed. Ownership of the sink transfers to the scheduler
    /// (and onward to the allocator's merge machinery).
    fn copy_succeeded(
        &self,
        id: &InputAttemptIdentifier,
        host: &MapHost,
        compressed_length: u64,
        decompressed_length: u64,
        elapsed: Duration,
        output: MapOutput,
    );

    /// One output failed on `host`. The flag pair drives the scheduler's
    /// host-failure heuristics and is reported exactly as the session
    /// observed it.
    fn copy_failed(
        &self,
        id: &InputAttemptIdentifier,
        host: &MapHost,
        connect_failed: bool,
        read_error: bool,
    );

    /// A local resource problem (memory admission, scratch disk); not the
    /// host's fault and not attributable to one output.
    fn report_local_error(&self, err: anyhow::Error);

    /// Returns an unfetched output to the known-pending pool so another
    /// session can claim it.
    fn put_back_known_map_output(&self, host: &MapHost, id: &InputAttemptIdentifier);

    /// The assignment is over; the host may be lent to another fetcher.
    fn free_host(&self, host: &MapHost);
}
