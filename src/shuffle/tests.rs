//! Shuffle Data Model Tests
//!
//! Validates sink lifecycle rules (what `abort` may and may not delete),
//! buffer sizing, and the bundled codecs.

#[cfg(test)]
mod tests {
    use crate::shuffle::allocator::{DeflateCodec, IdentityCodec, ShuffleCodec};
    use crate::shuffle::types::{InputAttemptIdentifier, MapHost, MapOutput};
    use std::io::Write;

    fn attempt() -> InputAttemptIdentifier {
        InputAttemptIdentifier::new(3, 0, "attempt_3_0")
    }

    #[test]
    fn memory_sink_is_sized_for_decompressed_output() {
        let output = MapOutput::memory(attempt(), 1234);
        match &output {
            MapOutput::Memory(mem) => assert_eq!(mem.data.len(), 1234),
            other => panic!("expected a memory sink, got {}", other.kind()),
        }
        assert_eq!(output.attempt(), Some(&attempt()));
    }

    #[tokio::test]
    async fn aborting_a_scratch_sink_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fetch-scratch.data");
        let output = MapOutput::disk_scratch(attempt(), path.clone(), 10).unwrap();
        assert!(path.exists());

        output.abort().await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn aborting_a_direct_reference_keeps_the_producer_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.out");
        tokio::fs::write(&path, b"producer data").await.unwrap();

        let output = MapOutput::local_disk(attempt(), path.clone(), 4, 3);
        output.abort().await;
        assert!(path.exists());
    }

    #[test]
    fn wait_carries_nothing() {
        assert!(MapOutput::Wait.attempt().is_none());
        assert_eq!(MapOutput::Wait.kind(), "wait");
    }

    #[test]
    fn map_host_display_is_the_identifier() {
        let host = MapHost::new("node7:4040", "http://node7:4040/mapOutput", 2);
        assert_eq!(host.to_string(), "node7:4040");
    }

    #[test]
    fn identity_codec_checks_lengths() {
        let codec = IdentityCodec;
        let mut dst = vec![0u8; 3];
        codec.decompress(b"abc", &mut dst, None).unwrap();
        assert_eq!(&dst, b"abc");

        assert!(codec.decompress(b"abcd", &mut dst, None).is_err());
    }

    #[test]
    fn deflate_codec_round_trips() {
        let raw = b"the quick brown fox jumps over the lazy dog".repeat(20);
        let mut encoder =
            flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&raw).unwrap();
        let packed = encoder.finish().unwrap();

        let codec = DeflateCodec;
        let mut dst = vec![0u8; raw.len()];
        codec.decompress(&packed, &mut dst, Some(64 * 1024)).unwrap();
        assert_eq!(dst, raw);

        // A reservation larger than the real output is a corruption signal.
        let mut oversized = vec![0u8; raw.len() + 1];
        assert!(codec.decompress(&packed, &mut oversized, None).is_err());
    }
}
