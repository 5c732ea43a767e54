//! Fetch configuration.
//!
//! Runtime knobs for the fetcher fleet. The embedding engine normally fills
//! these in from its own configuration layer; `from_env` covers standalone
//! deployments and tooling.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Tunables shared by every fetcher of one consumer task.
///
/// A single read timeout governs both individual socket reads and the total
/// budget for reconnect attempts within one host session; there is no
/// separate connect timeout.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Socket read timeout in milliseconds.
    pub read_timeout_ms: u64,
    /// Ask the shuffle service to keep the connection open across requests.
    pub keep_alive: bool,
    /// Read co-located producer outputs straight from local disk, skipping
    /// HTTP for hosts that resolve to this worker.
    pub local_disk_fetch: bool,
    /// `host:port` under which this worker's own shuffle service is
    /// published. Compared against assignment host identifiers.
    pub local_host_port: String,
    /// Directories local producers publish their outputs under.
    pub local_dirs: Vec<PathBuf>,
    /// Forward a read-ahead hint to the payload decoder.
    pub ifile_read_ahead: bool,
    /// Read-ahead window in bytes, when enabled.
    pub ifile_read_ahead_bytes: usize,
    /// Chunk size used when streaming payloads off the wire.
    pub copy_buffer_bytes: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: 180_000,
            keep_alive: false,
            local_disk_fetch: false,
            local_host_port: String::new(),
            local_dirs: Vec::new(),
            ifile_read_ahead: true,
            ifile_read_ahead_bytes: 4 * 1024 * 1024,
            copy_buffer_bytes: 128 * 1024,
        }
    }
}

impl FetchConfig {
    /// The read timeout as a [`Duration`].
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Builds a config from `SHUFFLE_*` environment variables, falling back
    /// to the defaults for anything unset.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            read_timeout_ms: env_parse("SHUFFLE_READ_TIMEOUT_MS", defaults.read_timeout_ms),
            keep_alive: env_parse("SHUFFLE_KEEP_ALIVE", defaults.keep_alive),
            local_disk_fetch: env_parse("SHUFFLE_LOCAL_DISK_FETCH", defaults.local_disk_fetch),
            local_host_port: std::env::var("SHUFFLE_LOCAL_HOST_PORT")
                .unwrap_or(defaults.local_host_port),
            local_dirs: std::env::var("SHUFFLE_LOCAL_DIRS")
                .map(|dirs| dirs.split(':').map(PathBuf::from).collect())
                .unwrap_or(defaults.local_dirs),
            ifile_read_ahead: env_parse("SHUFFLE_IFILE_READ_AHEAD", defaults.ifile_read_ahead),
            ifile_read_ahead_bytes: env_parse(
                "SHUFFLE_IFILE_READ_AHEAD_BYTES",
                defaults.ifile_read_ahead_bytes,
            ),
            copy_buffer_bytes: env_parse("SHUFFLE_COPY_BUFFER_BYTES", defaults.copy_buffer_bytes),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<T>().ok())
        .unwrap_or(fallback)
}
