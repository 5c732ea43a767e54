//! Allocator-facing contract and the payload decoder seam.

use super::types::{InputAttemptIdentifier, MapOutput};
use anyhow::{bail, Result};
use std::io::Read;

/// Decides where a fetched output lands: memory, disk, or nowhere yet.
///
/// `reserve` may be called concurrently from many fetchers and must be
/// thread-safe. Returning [`MapOutput::Wait`] backpressures the calling
/// session; the scheduler re-offers the host once the allocator has room.
pub trait OutputAllocator: Send + Sync {
    fn reserve(
        &self,
        id: &InputAttemptIdentifier,
        decompressed_length: u64,
        compressed_length: u64,
        fetcher_id: u64,
    ) -> Result<MapOutput>;
}

/// Decompresses map-output payloads fetched into memory.
///
/// `read_ahead` carries the ifile prefetch window when the engine has one
/// configured; codecs that do their own buffering may ignore it.
pub trait ShuffleCodec: Send + Sync {
    fn decompress(&self, src: &[u8], dst: &mut [u8], read_ahead: Option<usize>) -> Result<()>;
}

/// Pass-through codec for unencoded shuffles.
#[derive(Debug, Default)]
pub struct IdentityCodec;

impl ShuffleCodec for IdentityCodec {
    fn decompress(&self, src: &[u8], dst: &mut [u8], _read_ahead: Option<usize>) -> Result<()> {
        if src.len() != dst.len() {
            bail!(
                "payload length mismatch: {} bytes on the wire, {} reserved",
                src.len(),
                dst.len()
            );
        }
        dst.copy_from_slice(src);
        Ok(())
    }
}

/// Raw-deflate codec matching producers that compress their spills.
#[derive(Debug, Default)]
pub struct DeflateCodec;

impl ShuffleCodec for DeflateCodec {
    fn decompress(&self, src: &[u8], dst: &mut [u8], _read_ahead: Option<usize>) -> Result<()> {
        let mut decoder = flate2::read::DeflateDecoder::new(src);
        let mut written = 0;
        while written < dst.len() {
            let n = decoder.read(&mut dst[written..])?;
            if n == 0 {
                break;
            }
            written += n;
        }
        if written != dst.len() {
            bail!(
                "short decompressed payload: expected {} bytes, got {written}",
                dst.len()
            );
        }
        Ok(())
    }
}
