//! Protocol Module Tests
//!
//! Covers the wire header codec (including the variable-length integer
//! edges), fetch URL determinism, reply-hash verification, and spill index
//! parsing.

#[cfg(test)]
mod tests {
    use crate::protocol::auth::JobTokenManager;
    use crate::protocol::header::{write_vlong, ShuffleHeader};
    use crate::protocol::index::{IndexRecord, SpillIndex, INDEX_RECORD_BYTES};
    use crate::protocol::url::construct_fetch_url;
    use crate::shuffle::types::InputAttemptIdentifier;
    use bytes::BytesMut;

    async fn read_back(header: &ShuffleHeader) -> ShuffleHeader {
        let encoded = header.encode();
        let mut reader = encoded.as_ref();
        ShuffleHeader::read_from(&mut reader)
            .await
            .expect("round trip should parse")
    }

    #[tokio::test]
    async fn header_round_trips() {
        for header in [
            ShuffleHeader::new("attempt_142_1_m_000003_0_10003_0", 1024, 512, 7),
            ShuffleHeader::new("attempt_0_0_m_000000_0", 0, 0, 0),
            ShuffleHeader::new("attempt_huge", i64::MAX, i64::MAX - 1, i32::MAX),
        ] {
            assert_eq!(read_back(&header).await, header);
        }
    }

    #[tokio::test]
    async fn vlong_boundaries_round_trip() {
        use crate::protocol::header::read_vlong;

        for value in [
            0i64,
            1,
            -1,
            127,
            128,
            -112,
            -113,
            255,
            256,
            i64::from(i32::MAX),
            i64::from(i32::MIN),
            i64::MAX,
            i64::MIN,
        ] {
            let mut buf = BytesMut::new();
            write_vlong(&mut buf, value);
            let frozen = buf.freeze();
            let mut reader = frozen.as_ref();
            assert_eq!(read_vlong(&mut reader).await.unwrap(), value, "value {value}");
            assert!(reader.is_empty(), "trailing bytes for {value}");
        }
    }

    #[test]
    fn small_vlongs_take_one_byte() {
        for value in [-112i64, -1, 0, 42, 127] {
            let mut buf = BytesMut::new();
            write_vlong(&mut buf, value);
            assert_eq!(buf.len(), 1, "value {value}");
        }
    }

    #[tokio::test]
    async fn absurd_map_id_length_is_invalid_data() {
        let mut buf = BytesMut::new();
        write_vlong(&mut buf, -5);
        let frozen = buf.freeze();
        let mut reader = frozen.as_ref();

        let err = ShuffleHeader::read_from(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn truncated_header_is_not_invalid_data() {
        let header = ShuffleHeader::new("attempt_x", 10, 10, 3);
        let encoded = header.encode();
        let mut reader = &encoded[..encoded.len() - 1];

        let err = ShuffleHeader::read_from(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn fetch_url_is_deterministic() {
        let attempts = vec![
            InputAttemptIdentifier::new(0, 0, "attempt_a"),
            InputAttemptIdentifier::new(1, 0, "attempt_b"),
            InputAttemptIdentifier::new(2, 1, "attempt_c"),
        ];

        let first = construct_fetch_url("http://node1:4040/mapOutput", &attempts, 7, true);
        let second = construct_fetch_url("http://node1:4040/mapOutput", &attempts, 7, true);

        assert_eq!(first, second);
        assert_eq!(
            first,
            "http://node1:4040/mapOutput?map=attempt_a,attempt_b,attempt_c&reduce=7&keepAlive=true"
        );
    }

    #[test]
    fn fetch_url_single_attempt() {
        let attempts = vec![InputAttemptIdentifier::new(4, 2, "attempt_d")];
        assert_eq!(
            construct_fetch_url("http://h:1/out", &attempts, 0, false),
            "http://h:1/out?map=attempt_d&reduce=0&keepAlive=false"
        );
    }

    #[test]
    fn reply_hash_verification() {
        let tokens = JobTokenManager::new(*b"job-secret");
        let url_hash = tokens.sign_url("http://h:1/out?map=attempt_a&reduce=0&keepAlive=false");
        let reply = tokens.expected_reply_hash(&url_hash);

        assert!(tokens.verify_reply(&url_hash, &reply));
        assert!(!tokens.verify_reply(&url_hash, "tampered"));

        // A service holding a different secret cannot produce a valid reply.
        let other = JobTokenManager::new(*b"other-secret");
        assert!(!tokens.verify_reply(&url_hash, &other.expected_reply_hash(&url_hash)));
    }

    #[tokio::test]
    async fn spill_index_round_trips() {
        let records = vec![
            IndexRecord {
                start_offset: 0,
                raw_length: 100,
                part_length: 60,
            },
            IndexRecord {
                start_offset: 60,
                raw_length: 10,
                part_length: 10,
            },
            IndexRecord {
                start_offset: 70,
                raw_length: 0,
                part_length: 0,
            },
        ];
        let encoded = SpillIndex::new(records.clone()).encode();
        assert_eq!(encoded.len(), records.len() * INDEX_RECORD_BYTES);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.out.index");
        tokio::fs::write(&path, &encoded).await.unwrap();

        let index = SpillIndex::read(&path).await.unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(index.record(1).unwrap(), records[1]);
        assert!(index.record(3).is_err());
        assert!(index.record(-1).is_err());
    }

    #[tokio::test]
    async fn spill_index_rejects_torn_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.out.index");
        tokio::fs::write(&path, vec![0u8; INDEX_RECORD_BYTES + 3])
            .await
            .unwrap();

        assert!(SpillIndex::read(&path).await.is_err());
    }
}
