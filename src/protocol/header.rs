//! Per-output wire header.
//!
//! Every map output served over a shuffle connection is preceded by one
//! [`ShuffleHeader`] naming the producing attempt, the payload sizes and the
//! destination partition. The payload (`compressed_length` bytes) follows
//! immediately after the header, once per requested attempt, in request
//! order.

use bytes::{BufMut, Bytes, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Upper bound on a serialized map id. Anything larger is treated as stream
/// corruption rather than an allocation request.
const MAX_MAP_ID_BYTES: i32 = 64 * 1024;

/// On-wire header preceding every map-output payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShuffleHeader {
    /// Path component of the producing attempt.
    pub map_id: String,
    /// Payload size after decompression.
    pub uncompressed_length: i64,
    /// Payload size on the wire.
    pub compressed_length: i64,
    /// Partition this output is destined for.
    pub for_reduce: i32,
}

impl ShuffleHeader {
    pub fn new(
        map_id: impl Into<String>,
        uncompressed_length: i64,
        compressed_length: i64,
        for_reduce: i32,
    ) -> Self {
        Self {
            map_id: map_id.into(),
            uncompressed_length,
            compressed_length,
            for_reduce,
        }
    }

    /// Reads one header off the stream. Structural problems (bad length
    /// prefix, invalid UTF-8, vint overflow) surface as
    /// [`io::ErrorKind::InvalidData`]; plain stream errors pass through
    /// untouched.
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Self> {
        let id_len = read_vint(reader).await?;
        if !(0..=MAX_MAP_ID_BYTES).contains(&id_len) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unreasonable map id length: {id_len}"),
            ));
        }
        let mut raw = vec![0u8; id_len as usize];
        reader.read_exact(&mut raw).await?;
        let map_id = String::from_utf8(raw)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

        let uncompressed_length = read_vlong(reader).await?;
        let compressed_length = read_vlong(reader).await?;
        let for_reduce = read_vint(reader).await?;

        Ok(Self {
            map_id,
            uncompressed_length,
            compressed_length,
            for_reduce,
        })
    }

    /// Serializes the header the way `read_from` expects it.
    pub fn write_to(&self, buf: &mut BytesMut) {
        write_vint(buf, self.map_id.len() as i32);
        buf.put_slice(self.map_id.as_bytes());
        write_vlong(buf, self.uncompressed_length);
        write_vlong(buf, self.compressed_length);
        write_vint(buf, self.for_reduce);
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.write_to(&mut buf);
        buf.freeze()
    }
}

/// Writes a zig-free variable-length long: values in `[-112, 127]` take one
/// byte, everything else a sign-and-width marker byte followed by the
/// big-endian magnitude.
pub fn write_vlong(buf: &mut BytesMut, value: i64) {
    if (-112..=127).contains(&value) {
        buf.put_i8(value as i8);
        return;
    }

    let mut magnitude = value;
    let mut marker: i8 = -112;
    if magnitude < 0 {
        magnitude = !magnitude;
        marker = -120;
    }

    let mut tmp = magnitude;
    while tmp != 0 {
        tmp >>= 8;
        marker -= 1;
    }
    buf.put_i8(marker);

    let width = if marker < -120 {
        -(marker + 120)
    } else {
        -(marker + 112)
    };
    for idx in (1..=width).rev() {
        let shift = (idx - 1) * 8;
        buf.put_u8((magnitude >> shift) as u8);
    }
}

pub fn write_vint(buf: &mut BytesMut, value: i32) {
    write_vlong(buf, value as i64);
}

pub(crate) async fn read_vlong<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<i64> {
    let first = reader.read_i8().await?;
    let width = decode_vlong_width(first);
    if width == 1 {
        return Ok(first as i64);
    }

    let mut magnitude: i64 = 0;
    for _ in 0..width - 1 {
        let byte = reader.read_u8().await?;
        magnitude = (magnitude << 8) | byte as i64;
    }
    Ok(if is_negative_marker(first) {
        !magnitude
    } else {
        magnitude
    })
}

pub(crate) async fn read_vint<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<i32> {
    let value = read_vlong(reader).await?;
    i32::try_from(value).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("vint out of range: {value}"),
        )
    })
}

fn decode_vlong_width(marker: i8) -> i32 {
    if marker >= -112 {
        1
    } else if marker < -120 {
        -119 - marker as i32
    } else {
        -111 - marker as i32
    }
}

fn is_negative_marker(marker: i8) -> bool {
    marker < -120 || (-112..0).contains(&marker)
}
