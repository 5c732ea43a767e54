use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::PathBuf;

/// Path components of upstream attempts all start with this prefix; a wire
/// header whose map id lacks it is protocol corruption.
pub const PATH_PREFIX: &str = "attempt";

/// Identity of one upstream attempt's output.
///
/// The `path_component` is the stable string used both in fetch URLs and in
/// local producer file paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputAttemptIdentifier {
    pub input_index: u32,
    pub attempt_number: u32,
    pub path_component: String,
}

impl InputAttemptIdentifier {
    pub fn new(input_index: u32, attempt_number: u32, path_component: impl Into<String>) -> Self {
        Self {
            input_index,
            attempt_number,
            path_component: path_component.into(),
        }
    }
}

impl fmt::Display for InputAttemptIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{input={}, attempt={}, path={}}}",
            self.input_index, self.attempt_number, self.path_component
        )
    }
}

/// One host-side fetch assignment.
///
/// Owned by the scheduler, lent to exactly one fetcher at a time and
/// returned through `free_host`. `pending` is the snapshot taken at
/// assignment time; the fetcher asks the scheduler for the current list
/// when the session starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapHost {
    /// `host:port` identity of the producer host.
    pub host_identifier: String,
    /// Base URL of the host's shuffle service.
    pub base_url: String,
    /// Partition this consumer is responsible for.
    pub partition: i32,
    pub pending: Vec<InputAttemptIdentifier>,
}

impl MapHost {
    pub fn new(
        host_identifier: impl Into<String>,
        base_url: impl Into<String>,
        partition: i32,
    ) -> Self {
        Self {
            host_identifier: host_identifier.into(),
            base_url: base_url.into(),
            partition,
            pending: Vec::new(),
        }
    }

    pub fn with_pending(mut self, pending: Vec<InputAttemptIdentifier>) -> Self {
        self.pending = pending;
        self
    }
}

impl fmt::Display for MapHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.host_identifier)
    }
}

/// Allocator-owned sink for one fetched output.
///
/// Created by `OutputAllocator::reserve`; on success ownership transfers to
/// the scheduler through `copy_succeeded`, on failure the fetcher calls
/// [`MapOutput::abort`].
#[derive(Debug)]
pub enum MapOutput {
    /// In-memory sink sized for the decompressed output.
    Memory(MemoryOutput),
    /// Disk-backed sink, or a direct reference into a co-located producer's
    /// data file.
    Disk(DiskOutput),
    /// The allocator is backpressuring; no sink is available right now.
    Wait,
}

#[derive(Debug)]
pub struct MemoryOutput {
    pub attempt: InputAttemptIdentifier,
    pub data: BytesMut,
}

#[derive(Debug)]
pub struct DiskOutput {
    pub attempt: InputAttemptIdentifier,
    pub path: PathBuf,
    /// Open while the fetcher is still writing; `None` for direct
    /// references the consumer resolves lazily.
    pub file: Option<tokio::fs::File>,
    /// Slice of `path` holding this output.
    pub offset: u64,
    pub length: u64,
    /// Whether `path` is fetcher scratch (deleted on abort) as opposed to a
    /// producer-owned file.
    scratch: bool,
}

impl MapOutput {
    /// An in-memory sink with `decompressed_length` bytes reserved.
    pub fn memory(attempt: InputAttemptIdentifier, decompressed_length: usize) -> Self {
        Self::Memory(MemoryOutput {
            attempt,
            data: BytesMut::zeroed(decompressed_length),
        })
    }

    /// A scratch file sink created at `path`; the payload is written as-is,
    /// without decompression. Synchronous so allocators can call it from
    /// `reserve`.
    pub fn disk_scratch(
        attempt: InputAttemptIdentifier,
        path: PathBuf,
        length: u64,
    ) -> io::Result<Self> {
        let file = std::fs::File::create(&path)?;
        Ok(Self::Disk(DiskOutput {
            attempt,
            path,
            file: Some(tokio::fs::File::from_std(file)),
            offset: 0,
            length,
            scratch: true,
        }))
    }

    /// A direct reference into a co-located producer's data file; nothing is
    /// copied and the file is never deleted from here.
    pub fn local_disk(
        attempt: InputAttemptIdentifier,
        path: PathBuf,
        offset: u64,
        part_length: u64,
    ) -> Self {
        Self::Disk(DiskOutput {
            attempt,
            path,
            file: None,
            offset,
            length: part_length,
            scratch: false,
        })
    }

    pub fn attempt(&self) -> Option<&InputAttemptIdentifier> {
        match self {
            Self::Memory(mem) => Some(&mem.attempt),
            Self::Disk(disk) => Some(&disk.attempt),
            Self::Wait => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Disk(_) => "disk",
            Self::Wait => "wait",
        }
    }

    /// Releases whatever the reservation holds. Scratch files are removed;
    /// producer-owned files are left alone.
    pub async fn abort(self) {
        match self {
            Self::Memory(_) | Self::Wait => {}
            Self::Disk(mut disk) => {
                disk.file.take();
                if disk.scratch {
                    if let Err(err) = tokio::fs::remove_file(&disk.path).await {
                        tracing::debug!(
                            "failed to remove aborted scratch file {}: {err}",
                            disk.path.display()
                        );
                    }
                }
            }
        }
    }
}
