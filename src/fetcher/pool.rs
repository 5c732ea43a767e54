//! Fetcher pool.
//!
//! Runs a fixed fleet of workers over a stream of host assignments. Each
//! worker claims one assignment, spins up a fresh [`Fetcher`] for it, and
//! reports back through the shared environment. Shutdown propagates to
//! every live fetcher, which wind their sessions down through the normal
//! put-back path.

use super::fetcher::{Fetcher, ShuffleEnv};
use crate::shuffle::types::MapHost;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// Receives errors that are fatal to the consuming task but not to the
/// process.
pub type FatalErrorHandler = Arc<dyn Fn(anyhow::Error) + Send + Sync>;

pub struct FetcherPool {
    env: ShuffleEnv,
    source_name: String,
    live: DashMap<u64, Arc<Fetcher>>,
    stopping: AtomicBool,
    on_fatal: FatalErrorHandler,
}

impl FetcherPool {
    pub fn new(env: ShuffleEnv, source_name: impl Into<String>) -> Arc<Self> {
        Self::with_fatal_handler(
            env,
            source_name,
            Arc::new(|err| tracing::error!("shuffle fetch failed: {err:#}")),
        )
    }

    pub fn with_fatal_handler(
        env: ShuffleEnv,
        source_name: impl Into<String>,
        on_fatal: FatalErrorHandler,
    ) -> Arc<Self> {
        Arc::new(Self {
            env,
            source_name: source_name.into(),
            live: DashMap::new(),
            stopping: AtomicBool::new(false),
            on_fatal,
        })
    }

    /// Spawns `workers` tasks that claim assignments until the channel
    /// closes or the pool shuts down.
    pub fn start(
        self: &Arc<Self>,
        workers: usize,
        assignments: mpsc::Receiver<MapHost>,
    ) -> Vec<JoinHandle<()>> {
        tracing::info!("starting {workers} shuffle fetcher workers");
        let assignments = Arc::new(Mutex::new(assignments));
        (0..workers)
            .map(|_| {
                let pool = self.clone();
                let assignments = assignments.clone();
                tokio::spawn(async move {
                    pool.worker_loop(assignments).await;
                })
            })
            .collect()
    }

    async fn worker_loop(&self, assignments: Arc<Mutex<mpsc::Receiver<MapHost>>>) {
        loop {
            if self.stopping.load(Ordering::Acquire) {
                return;
            }
            let host = {
                let mut receiver = assignments.lock().await;
                receiver.recv().await
            };
            let Some(host) = host else {
                return;
            };

            let fetcher = Fetcher::new(self.env.clone(), &self.source_name);
            self.live.insert(fetcher.id(), fetcher.clone());
            if self.stopping.load(Ordering::Acquire) {
                // Raced a shutdown; run the session anyway so the host is
                // freed and its outputs are put back, just without fetching.
                fetcher.shut_down();
            }
            if let Err(err) = fetcher.run_once(&host).await {
                (self.on_fatal)(err);
            }
            self.live.remove(&fetcher.id());
        }
    }

    /// Stops accepting assignments and shuts down every live fetcher.
    /// Idempotent.
    pub fn shut_down(&self) {
        if self.stopping.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!(
            "shutting down fetcher pool ({} live fetchers)",
            self.live.len()
        );
        for entry in self.live.iter() {
            entry.value().shut_down();
        }
    }

    pub fn live_fetchers(&self) -> usize {
        self.live.len()
    }
}
