//! Local-disk bypass for co-located producers.
//!
//! When the assigned host is this worker's own shuffle service, the
//! producer's files are on local disk and HTTP would only add copies. The
//! fetcher reads the producer's spill index directly and hands the consumer
//! a reference into the data file instead of moving bytes.

use super::fetcher::{Fetcher, HostSession};
use crate::protocol::index::{
    IndexRecord, SpillIndex, INDEX_FILE_SUFFIX, TASK_OUTPUT_DIR, TASK_OUTPUT_FILENAME,
};
use crate::shuffle::types::{InputAttemptIdentifier, MapOutput};
use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Instant;

impl Fetcher {
    /// Serves every pending output straight off local disk. Unlike the
    /// HTTP path, a failure here is per-output: one unreadable spill does
    /// not end the session.
    pub(super) async fn run_local_disk_session(&self, session: &mut HostSession<'_>) -> Result<()> {
        let pending: Vec<InputAttemptIdentifier> = session.remaining.iter().cloned().collect();
        for id in pending {
            if self.is_stopped() {
                return Ok(());
            }
            let started = Instant::now();
            match self.fetch_local(&id, session.host.partition).await {
                Ok((record, output)) => {
                    self.env.scheduler.copy_succeeded(
                        &id,
                        session.host,
                        record.part_length,
                        record.raw_length,
                        started.elapsed(),
                        output,
                    );
                    session.remaining.retain(|left| *left != id);
                    self.env.metrics.record_success();
                }
                Err(err) => {
                    if self.is_stopped() {
                        tracing::debug!(
                            "{} ignoring local fetch error after shutdown: {err:#}",
                            self.log_id
                        );
                        return Ok(());
                    }
                    self.env.metrics.record_failure();
                    self.env.counters.incr_io_errs();
                    tracing::warn!(
                        "{} failed to read local disk output of {id} from {}: {err:#}",
                        self.log_id,
                        session.host
                    );
                    session.remaining.retain(|left| *left != id);
                    self.env.scheduler.copy_failed(&id, session.host, true, false);
                }
            }
        }
        Ok(())
    }

    /// Resolves one attempt's partition slice into a no-copy disk output.
    async fn fetch_local(
        &self,
        id: &InputAttemptIdentifier,
        partition: i32,
    ) -> Result<(IndexRecord, MapOutput)> {
        let data_file = self.local_output_file(&id.path_component, "").await?;
        let index_file = self
            .local_output_file(&id.path_component, INDEX_FILE_SUFFIX)
            .await?;
        let index = SpillIndex::read(&index_file).await?;
        let record = index.record(partition)?;
        let output = MapOutput::local_disk(
            id.clone(),
            data_file,
            record.start_offset,
            record.part_length,
        );
        Ok((record, output))
    }

    /// Resolves `<local_dir>/output/<path_component>/file.out<suffix>`;
    /// the first local dir holding the file wins.
    async fn local_output_file(&self, path_component: &str, suffix: &str) -> Result<PathBuf> {
        for dir in &self.env.config.local_dirs {
            let candidate = dir
                .join(TASK_OUTPUT_DIR)
                .join(path_component)
                .join(format!("{TASK_OUTPUT_FILENAME}{suffix}"));
            if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
                return Ok(candidate);
            }
        }
        bail!("no local dir holds an output for {path_component}{suffix}")
    }
}
