//! Spill index files.
//!
//! Next to its partitioned data file, every producer writes an index of
//! fixed-size records giving each partition's slice of that file. The
//! local-disk fetch path reads the index instead of asking the producer's
//! shuffle service for framing.
//!
//! On-disk layout under each local dir:
//! `<local_dir>/output/<path_component>/file.out` for the data and the same
//! path with `.index` appended for the index.

use anyhow::{bail, Context, Result};
use std::path::Path;

/// Directory under each local dir that producers publish outputs in.
pub const TASK_OUTPUT_DIR: &str = "output";
/// File name of a producer's partitioned data file.
pub const TASK_OUTPUT_FILENAME: &str = "file.out";
/// Suffix appended to the data file path to name its index file.
pub const INDEX_FILE_SUFFIX: &str = ".index";

/// Byte width of one serialized index record: three big-endian `u64`s.
pub const INDEX_RECORD_BYTES: usize = 24;

/// One partition's slice of a producer's data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexRecord {
    /// Byte offset of the partition's slice within the data file.
    pub start_offset: u64,
    /// Decompressed length of the slice.
    pub raw_length: u64,
    /// On-disk length of the slice.
    pub part_length: u64,
}

/// All partition records of one spill, as stored in an index file.
#[derive(Debug, Clone)]
pub struct SpillIndex {
    records: Vec<IndexRecord>,
}

impl SpillIndex {
    pub fn new(records: Vec<IndexRecord>) -> Self {
        Self { records }
    }

    /// Reads and parses an index file.
    pub async fn read(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read(path)
            .await
            .with_context(|| format!("reading spill index {}", path.display()))?;
        if raw.len() % INDEX_RECORD_BYTES != 0 {
            bail!(
                "corrupt spill index {}: {} bytes is not a whole number of records",
                path.display(),
                raw.len()
            );
        }
        let records = raw
            .chunks_exact(INDEX_RECORD_BYTES)
            .map(|chunk| IndexRecord {
                start_offset: be_u64(&chunk[0..8]),
                raw_length: be_u64(&chunk[8..16]),
                part_length: be_u64(&chunk[16..24]),
            })
            .collect();
        Ok(Self { records })
    }

    /// The record for `partition`, if the spill covers it.
    pub fn record(&self, partition: i32) -> Result<IndexRecord> {
        usize::try_from(partition)
            .ok()
            .and_then(|idx| self.records.get(idx))
            .copied()
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "no index record for partition {partition} ({} partitions in spill)",
                    self.records.len()
                )
            })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Serializes the records the way `read` expects them. Producers use
    /// this when closing a spill.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.records.len() * INDEX_RECORD_BYTES);
        for record in &self.records {
            out.extend_from_slice(&record.start_offset.to_be_bytes());
            out.extend_from_slice(&record.raw_length.to_be_bytes());
            out.extend_from_slice(&record.part_length.to_be_bytes());
        }
        out
    }
}

fn be_u64(bytes: &[u8]) -> u64 {
    let mut fixed = [0u8; 8];
    fixed.copy_from_slice(bytes);
    u64::from_be_bytes(fixed)
}
