//! Host session driver.
//!
//! One [`Fetcher`] executes one assignment at a time: open a connection to
//! the producer host (or go straight to local disk for a co-located one),
//! stream every pending output into a sink reserved from the allocator, and
//! report per-output outcomes to the scheduler. On every exit path the host
//! is freed and unfetched outputs are put back into the scheduler's pending
//! pool.

use super::connection::ShuffleConnection;
use crate::config::FetchConfig;
use crate::metrics::{FetchMetrics, ShuffleCounters};
use crate::protocol::auth::JobTokenManager;
use crate::protocol::header::ShuffleHeader;
use crate::protocol::url::construct_fetch_url;
use crate::shuffle::allocator::{IdentityCodec, OutputAllocator, ShuffleCodec};
use crate::shuffle::scheduler::ShuffleScheduler;
use crate::shuffle::types::{InputAttemptIdentifier, MapHost, MapOutput, PATH_PREFIX};
use anyhow::{bail, Result};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

static NEXT_FETCHER_ID: AtomicU64 = AtomicU64::new(0);

/// Shared collaborators every fetcher of a consumer task works against.
#[derive(Clone)]
pub struct ShuffleEnv {
    pub scheduler: Arc<dyn ShuffleScheduler>,
    pub allocator: Arc<dyn OutputAllocator>,
    pub codec: Arc<dyn ShuffleCodec>,
    pub tokens: Arc<JobTokenManager>,
    pub counters: Arc<ShuffleCounters>,
    pub metrics: Arc<FetchMetrics>,
    pub config: Arc<FetchConfig>,
    pub http_client: reqwest::Client,
}

impl ShuffleEnv {
    /// An environment with stock choices for everything the caller did not
    /// wire up explicitly: identity codec, empty job secret, fresh counters
    /// and client. Override fields as needed.
    pub fn new(
        scheduler: Arc<dyn ShuffleScheduler>,
        allocator: Arc<dyn OutputAllocator>,
        config: Arc<FetchConfig>,
    ) -> Self {
        Self {
            scheduler,
            allocator,
            codec: Arc::new(IdentityCodec),
            tokens: Arc::new(JobTokenManager::new(Vec::new())),
            counters: Arc::new(ShuffleCounters::default()),
            metrics: Arc::new(FetchMetrics::default()),
            config,
            http_client: reqwest::Client::new(),
        }
    }
}

/// Per-assignment state, owned by the fetch task for the session's
/// duration. Nothing outside the session observes it.
pub(super) struct HostSession<'a> {
    pub(super) host: &'a MapHost,
    pub(super) remaining: VecDeque<InputAttemptIdentifier>,
    pub(super) retry_start: Option<Instant>,
    pub(super) connection: Option<ShuffleConnection>,
}

/// Outcome of one output transfer attempt.
enum Transfer {
    /// One output committed; keep going.
    Done,
    /// Leave the session without reporting per-output failures (allocator
    /// wait, local error, shutdown observed). Unfetched outputs are put
    /// back by the driver.
    Yield,
    /// Read timed out within the retry budget; reconnect and resume with
    /// the pending set unchanged.
    Retry,
    /// These outputs failed and the session is over; the stream offset can
    /// no longer be trusted.
    Failed(Vec<InputAttemptIdentifier>),
}

/// A single fetch worker.
///
/// Internally single-tasked; only [`shut_down`](Self::shut_down) may be
/// called concurrently from elsewhere.
pub struct Fetcher {
    id: u64,
    pub(super) log_id: String,
    pub(super) env: ShuffleEnv,
    stopped: AtomicBool,
    /// Abort handle for the live connection. Guarded by its own lock so a
    /// shutdown never waits on fetch-loop progress.
    conn_abort: Mutex<Option<CancellationToken>>,
}

impl Fetcher {
    pub fn new(env: ShuffleEnv, source_name: &str) -> Arc<Self> {
        let id = NEXT_FETCHER_ID.fetch_add(1, Ordering::Relaxed) + 1;
        Arc::new(Self {
            id,
            log_id: format!("fetcher [{source_name}] #{id}"),
            env,
            stopped: AtomicBool::new(false),
            conn_abort: Mutex::new(None),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Stops this fetcher. Idempotent; any task may call it. An in-flight
    /// read is aborted, and the session still runs its put-back and
    /// free-host bookkeeping before returning.
    pub fn shut_down(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            tracing::debug!("{} shutting down", self.log_id);
            self.abort_connection();
        }
    }

    /// Cancels the live connection, if any. Serialized on its own lock and
    /// safe from any task.
    fn abort_connection(&self) {
        let token = self
            .conn_abort
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(token) = token {
            token.cancel();
        }
    }

    /// Runs one full assignment against `host`, returning once every
    /// pending output has been delivered, reported failed, or put back.
    pub async fn run_once(&self, host: &MapHost) -> Result<()> {
        let pending = self.env.scheduler.get_maps_for_host(host);
        // Hosts whose advertised outputs have all become obsolete show up
        // with an empty list, especially at the tail of large jobs.
        if pending.is_empty() {
            tracing::debug!("{} nothing pending on {host}", self.log_id);
            return Ok(());
        }

        tracing::debug!(
            "{} fetching {} outputs from {host} for partition {}",
            self.log_id,
            pending.len(),
            host.partition
        );

        let mut session = HostSession {
            host,
            remaining: pending.into(),
            retry_start: None,
            connection: None,
        };

        self.env.metrics.fetcher_busy();
        let result = if self.env.config.local_disk_fetch
            && host.host_identifier == self.env.config.local_host_port
        {
            self.run_local_disk_session(&mut session).await
        } else {
            self.run_http_session(&mut session).await
        };
        self.close_connection(&mut session, false).await;
        self.put_back_remaining(&mut session);
        self.env.scheduler.free_host(host);
        self.env.metrics.fetcher_free();
        result
    }

    async fn run_http_session(&self, session: &mut HostSession<'_>) -> Result<()> {
        if !self.setup_connection(session, true).await {
            return Ok(());
        }

        let mut failed: Option<Vec<InputAttemptIdentifier>> = None;
        let mut yielded = false;

        // A failure on one output ends the session: the stream offset is no
        // longer known, so the rest are put back rather than reported.
        while !session.remaining.is_empty() {
            match self.transfer_one(session).await {
                Transfer::Done => {}
                Transfer::Yield => {
                    yielded = true;
                    break;
                }
                Transfer::Retry => {
                    self.close_connection(session, true).await;
                    if self.is_stopped() {
                        tracing::debug!("{} stopped; not re-establishing connection", self.log_id);
                        return Ok(());
                    }
                    if !self.setup_connection(session, false).await {
                        if self.is_stopped() {
                            return Ok(());
                        }
                        // The reconnect died this deep into the session, so
                        // only the in-flight head is charged; the rest go
                        // back to the pending pool for another fetcher.
                        failed = session.remaining.pop_front().map(|head| vec![head]);
                        break;
                    }
                }
                Transfer::Failed(ids) => {
                    failed = Some(ids);
                    break;
                }
            }
        }

        let had_failure = failed.is_some() || yielded;
        if let Some(ids) = failed {
            if self.is_stopped() {
                // Too late to report; hand them back instead.
                for id in ids.into_iter().rev() {
                    session.remaining.push_front(id);
                }
            } else {
                tracing::warn!(
                    "{} output transfer failed for {} attempt(s) on {}",
                    self.log_id,
                    ids.len(),
                    session.host
                );
                for id in &ids {
                    self.env.scheduler.copy_failed(id, session.host, true, false);
                }
            }
        }

        self.close_connection(session, false).await;

        if !had_failure && !session.remaining.is_empty() {
            bail!(
                "server didn't return all expected map outputs: {} left",
                session.remaining.len()
            );
        }
        Ok(())
    }

    /// Opens and validates the host connection; `false` means the session
    /// cannot continue. In `whole_host` mode a failure is reported as
    /// `copy_failed` for every pending output (the error predates any
    /// payload byte and cannot be pinned on one of them) and the pending
    /// set is drained. The reconnect path reports nothing and leaves the
    /// set alone.
    async fn setup_connection(&self, session: &mut HostSession<'_>, whole_host: bool) -> bool {
        let url = construct_fetch_url(
            &session.host.base_url,
            session.remaining.iter(),
            session.host.partition,
            self.env.config.keep_alive,
        );

        let abort = CancellationToken::new();
        *self
            .conn_abort
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(abort.clone());
        if self.is_stopped() {
            // shut_down may have raced the slot install; make sure the
            // token it saw (or missed) is dead either way.
            abort.cancel();
            return false;
        }

        match ShuffleConnection::open(
            &self.env.http_client,
            &url,
            &self.env.tokens,
            self.env.config.read_timeout(),
            abort,
        )
        .await
        {
            Ok(connection) => {
                if self.is_stopped() {
                    tracing::debug!("{} stopped right after connecting to {}", self.log_id, session.host);
                    return false;
                }
                session.connection = Some(connection);
                true
            }
            Err(err) => {
                if self.is_stopped() {
                    tracing::debug!(
                        "{} stopped; connection failure to {} not reported",
                        self.log_id,
                        session.host
                    );
                    return false;
                }
                self.env.counters.incr_io_errs();
                if !err.connected {
                    self.env.counters.incr_connection_errs();
                    tracing::warn!(
                        "{} failed to connect to {} with {} pending: {:#}",
                        self.log_id,
                        session.host,
                        session.remaining.len(),
                        err.source
                    );
                } else {
                    tracing::warn!(
                        "{} failed to verify the reply from {} with {} pending: {:#}",
                        self.log_id,
                        session.host,
                        session.remaining.len(),
                        err.source
                    );
                }
                if whole_host {
                    // A failed connect is reported as a read error; the
                    // scheduler's host heuristics key off that pairing.
                    let host = session.host;
                    for id in session.remaining.drain(..) {
                        self.env
                            .scheduler
                            .copy_failed(&id, host, err.connected, !err.connected);
                    }
                }
                false
            }
        }
    }

    /// Closes the session connection, if one is open. `disconnect` tears
    /// the socket down instead of draining it for reuse.
    async fn close_connection(&self, session: &mut HostSession<'_>, disconnect: bool) {
        if let Some(connection) = session.connection.take() {
            connection.close(disconnect).await;
        }
        self.conn_abort
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }

    /// Attempts the next output on the stream.
    async fn transfer_one(&self, session: &mut HostSession<'_>) -> Transfer {
        let started = Instant::now();

        // 1. Header.
        let header_result = match session.connection.as_mut() {
            Some(connection) => connection.read_header().await,
            None => return Transfer::Yield,
        };
        let header = match header_result {
            Ok(header) => header,
            Err(err) if err.kind() == io::ErrorKind::InvalidData => {
                if self.is_stopped() {
                    tracing::debug!("{} stopped; ignoring malformed header: {err}", self.log_id);
                    return Transfer::Yield;
                }
                self.env.counters.incr_bad_id_errs();
                tracing::warn!(
                    "{} malformed output header from {}: {err}",
                    self.log_id,
                    session.host
                );
                // Alignment is gone and there is no telling which output
                // this was; charge the head.
                return self.fail_head(session);
            }
            Err(err) => return self.io_failure(session, err, None, None).await,
        };

        if !header.map_id.starts_with(PATH_PREFIX) {
            if self.is_stopped() {
                tracing::debug!("{} stopped; ignoring invalid map id", self.log_id);
                return Transfer::Yield;
            }
            self.env.counters.incr_bad_id_errs();
            tracing::warn!(
                "{} invalid map id {:?} (expected {:?}*), partition {}",
                self.log_id,
                header.map_id,
                PATH_PREFIX,
                header.for_reduce
            );
            return self.fail_head(session);
        }

        // 2. Resolve which attempt the header refers to.
        let resolved = self
            .env
            .scheduler
            .get_identifier_for_fetched_output(&header.map_id, header.for_reduce);

        // 3. Sanity.
        let src = match self.verify_sanity(session, &header, resolved) {
            Ok(src) => src,
            Err(blamed) => {
                if self.is_stopped() {
                    tracing::debug!("{} stopped; ignoring sanity failure", self.log_id);
                    return Transfer::Yield;
                }
                return match blamed {
                    Some(id) => {
                        session.remaining.retain(|left| *left != id);
                        Transfer::Failed(vec![id])
                    }
                    None => self.fail_head(session),
                };
            }
        };

        tracing::debug!(
            "{} header: {src}, len: {}, decomp len: {}",
            self.log_id,
            header.compressed_length,
            header.uncompressed_length
        );

        // 4. Reserve a sink. A failure here is this worker's problem, not
        // the host's.
        let reserved = self.env.allocator.reserve(
            &src,
            header.uncompressed_length as u64,
            header.compressed_length as u64,
            self.id,
        );
        let output = match reserved {
            Ok(output) => output,
            Err(err) => {
                if self.is_stopped() {
                    tracing::debug!("{} stopped; ignoring allocator error", self.log_id);
                } else {
                    self.env.counters.incr_io_errs();
                    self.env.scheduler.report_local_error(err);
                }
                return Transfer::Yield;
            }
        };
        let mut output = match output {
            MapOutput::Wait => {
                tracing::info!("{} allocator asked to wait before taking {src}", self.log_id);
                return Transfer::Yield;
            }
            other => other,
        };
        if self.is_stopped() {
            output.abort().await;
            return Transfer::Yield;
        }

        // 5. Payload.
        tracing::debug!(
            "{} about to shuffle output of {src} decomp: {} len: {} to {}",
            self.log_id,
            header.uncompressed_length,
            header.compressed_length,
            output.kind()
        );
        if let Err(err) = self.copy_payload(session, &header, &mut output).await {
            return self.io_failure(session, err, Some(src), Some(output)).await;
        }

        // 6. Commit.
        session.retry_start = None;
        self.env.scheduler.copy_succeeded(
            &src,
            session.host,
            header.compressed_length as u64,
            header.uncompressed_length as u64,
            started.elapsed(),
            output,
        );
        session.remaining.retain(|left| *left != src);
        self.env.metrics.record_success();
        Transfer::Done
    }

    /// Basic verification of a parsed header against this session. `Err`
    /// carries the attempt to blame, when one was resolved.
    fn verify_sanity(
        &self,
        session: &HostSession<'_>,
        header: &ShuffleHeader,
        resolved: Option<InputAttemptIdentifier>,
    ) -> Result<InputAttemptIdentifier, Option<InputAttemptIdentifier>> {
        if header.compressed_length < 0 || header.uncompressed_length < 0 {
            self.env.counters.incr_wrong_length_errs();
            tracing::warn!(
                "{} invalid lengths in output header: id: {:?} len: {} decomp len: {}",
                self.log_id,
                resolved,
                header.compressed_length,
                header.uncompressed_length
            );
            return Err(resolved);
        }

        if header.for_reduce != session.host.partition {
            self.env.counters.incr_wrong_reduce_errs();
            tracing::warn!(
                "{} data for the wrong partition: got {} expected {} (id: {:?})",
                self.log_id,
                header.for_reduce,
                session.host.partition,
                resolved
            );
            return Err(resolved);
        }

        match resolved {
            Some(src) if session.remaining.contains(&src) => Ok(src),
            other => {
                self.env.counters.incr_wrong_map_errs();
                tracing::warn!(
                    "{} received an output nobody asked for: {} (resolved: {:?})",
                    self.log_id,
                    header.map_id,
                    other
                );
                Err(other)
            }
        }
    }

    /// Streams one payload into the reserved sink.
    async fn copy_payload(
        &self,
        session: &mut HostSession<'_>,
        header: &ShuffleHeader,
        output: &mut MapOutput,
    ) -> io::Result<()> {
        let compressed_length = header.compressed_length as usize;
        let Some(connection) = session.connection.as_mut() else {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "no open shuffle connection",
            ));
        };

        match output {
            MapOutput::Memory(mem) => {
                let mut packed = vec![0u8; compressed_length];
                for chunk in packed.chunks_mut(self.env.config.copy_buffer_bytes) {
                    connection.read_exact(chunk).await?;
                }
                let read_ahead = self
                    .env
                    .config
                    .ifile_read_ahead
                    .then_some(self.env.config.ifile_read_ahead_bytes);
                self.env
                    .codec
                    .decompress(&packed, &mut mem.data, read_ahead)
                    .map_err(|err| {
                        io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("decompressing {}: {err:#}", mem.attempt),
                        )
                    })
            }
            MapOutput::Disk(disk) => {
                let Some(file) = disk.file.as_mut() else {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "disk sink has no writable file",
                    ));
                };
                let mut buf = vec![0u8; self.env.config.copy_buffer_bytes.min(compressed_length.max(1))];
                let mut left = compressed_length;
                while left > 0 {
                    let take = left.min(buf.len());
                    connection.read_exact(&mut buf[..take]).await?;
                    file.write_all(&buf[..take]).await?;
                    left -= take;
                }
                file.flush().await
            }
            MapOutput::Wait => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unusable sink variant for payload copy",
            )),
        }
    }

    /// Common handling for IO failures during a transfer: swallow after
    /// shutdown, reconnect on an in-budget read timeout, otherwise charge
    /// the resolved attempt, or all of them when the header never
    /// resolved and alignment is lost for everything pending.
    async fn io_failure(
        &self,
        session: &mut HostSession<'_>,
        err: io::Error,
        src: Option<InputAttemptIdentifier>,
        output: Option<MapOutput>,
    ) -> Transfer {
        if self.is_stopped() {
            tracing::debug!(
                "{} not reporting fetch failure after shutdown: {err}",
                self.log_id
            );
            self.close_connection(session, true).await;
            if let Some(output) = output {
                output.abort().await;
            }
            return Transfer::Yield;
        }

        if self.should_retry(session, &err) {
            if let Some(output) = output {
                output.abort().await;
            }
            return Transfer::Retry;
        }

        self.env.counters.incr_io_errs();
        match src {
            None => {
                tracing::warn!(
                    "{} failed to read an output header from {}: {err}",
                    self.log_id,
                    session.host
                );
                Transfer::Failed(session.remaining.drain(..).collect())
            }
            Some(id) => {
                tracing::warn!(
                    "{} failed to shuffle output of {id} from {}: {err}",
                    self.log_id,
                    session.host
                );
                if let Some(output) = output {
                    output.abort().await;
                }
                self.env.metrics.record_failure();
                session.remaining.retain(|left| *left != id);
                Transfer::Failed(vec![id])
            }
        }
    }

    /// Whether a read timeout warrants re-establishing the connection. The
    /// first timeout of a session starts the clock; reconnects are allowed
    /// until a full read-timeout has elapsed since then.
    fn should_retry(&self, session: &mut HostSession<'_>, err: &io::Error) -> bool {
        if err.kind() != io::ErrorKind::TimedOut {
            return false;
        }
        let now = Instant::now();
        let first_timeout = *session.retry_start.get_or_insert(now);
        if now.duration_since(first_timeout) < self.env.config.read_timeout() {
            tracing::warn!(
                "{} shuffle read from {} failed, retrying it",
                self.log_id,
                session.host
            );
            true
        } else {
            tracing::warn!(
                "{} retry budget for {} exhausted after {:?}",
                self.log_id,
                session.host,
                self.env.config.read_timeout()
            );
            false
        }
    }

    /// Fails the current head of the pending set; used when the stream
    /// cannot tell us which output went bad.
    fn fail_head(&self, session: &mut HostSession<'_>) -> Transfer {
        match session.remaining.pop_front() {
            Some(head) => Transfer::Failed(vec![head]),
            None => Transfer::Yield,
        }
    }

    /// Returns every unfetched output to the scheduler's known-pending
    /// pool. The head goes back last, so the next fetcher for this host
    /// does not lead with the output that was just in flight.
    fn put_back_remaining(&self, session: &mut HostSession<'_>) {
        let host = session.host;
        let mut drained = session.remaining.drain(..);
        let Some(first) = drained.next() else {
            return;
        };
        for id in drained {
            self.env.scheduler.put_back_known_map_output(host, &id);
        }
        self.env.scheduler.put_back_known_map_output(host, &first);
    }
}
