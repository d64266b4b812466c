//! Chunked compression buffer
//!
//! Pulls bounded reads from an object body through a gzip encoder and hands
//! back one part's worth of compressed bytes at a time. Each part is a
//! complete gzip member, so the concatenation of all parts is a valid
//! multi-member gzip file and every part decodes on its own.
//!
//! # Memory
//!
//! At most one raw read buffer (`file_part_read_size`, allocated once and
//! reused) and one part's compressed output are held at any time.

use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{self, Write};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Suffix appended to compressed object keys
pub const COMPRESSED_SUFFIX: &str = ".gz";

/// One part's worth of compressed output
#[derive(Debug, Clone)]
pub struct CompressedPart {
    /// Complete gzip member, empty when no raw bytes were consumed
    pub bytes: Bytes,
    /// Raw bytes consumed to produce this part
    pub raw_bytes: u64,
    /// The source was exhausted while filling this part
    pub is_final: bool,
}

impl CompressedPart {
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Compression buffer over an async reader
///
/// Exclusive owner of the reader's cursor for the life of the pipeline.
pub struct CompressionBuffer<R> {
    reader: R,
    chunk: Vec<u8>,
    minimum_upload_size: usize,
    level: Compression,
    stream_ended: bool,
}

impl<R: AsyncRead + Unpin> CompressionBuffer<R> {
    /// Create a buffer.
    ///
    /// Sizes are used as given; range enforcement happens when the
    /// transfer configuration is resolved. A zero read size is bumped to one
    /// byte so every read cycle can make progress.
    pub fn new(
        reader: R,
        file_part_read_size: usize,
        minimum_upload_size: usize,
        compression_level: u32,
    ) -> Self {
        Self {
            reader,
            chunk: vec![0u8; file_part_read_size.max(1)],
            minimum_upload_size,
            level: Compression::new(compression_level.min(9)),
            stream_ended: false,
        }
    }

    /// Whether the source has been exhausted
    pub fn stream_ended(&self) -> bool {
        self.stream_ended
    }

    /// Fill one part.
    ///
    /// Reads and compresses until the compressed output reaches the
    /// minimum upload size or the source runs dry, then finishes the gzip
    /// member. Returns an empty final part when nothing was left to read.
    pub async fn fill_part(&mut self) -> io::Result<CompressedPart> {
        let mut encoder: Option<GzEncoder<Vec<u8>>> = None;
        let mut raw_bytes = 0u64;

        while !self.stream_ended {
            let n = read_chunk(&mut self.reader, &mut self.chunk).await?;
            if n == 0 {
                self.stream_ended = true;
                break;
            }

            let enc = encoder.get_or_insert_with(|| GzEncoder::new(Vec::new(), self.level));
            enc.write_all(&self.chunk[..n])?;
            raw_bytes += n as u64;

            // A short chunk means the reader already returned EOF.
            if n < self.chunk.len() {
                self.stream_ended = true;
                break;
            }
            if enc.get_ref().len() >= self.minimum_upload_size {
                break;
            }
        }

        let bytes = match encoder {
            Some(enc) => Bytes::from(enc.finish()?),
            None => Bytes::new(),
        };

        tracing::debug!(
            raw_bytes,
            compressed_bytes = bytes.len(),
            is_final = self.stream_ended,
            "Filled part"
        );

        Ok(CompressedPart {
            bytes,
            raw_bytes,
            is_final: self.stream_ended,
        })
    }
}

/// Read until `buf` is full or the reader reaches EOF.
///
/// Transports routinely return short reads, so a single `read` call is not
/// enough to tell a slow stream from an exhausted one.
async fn read_chunk<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::{GzDecoder, MultiGzDecoder};
    use rand::rngs::StdRng;
    use rand::{RngCore, SeedableRng};
    use std::io::Read;

    fn random_bytes(len: usize) -> Vec<u8> {
        let mut data = vec![0u8; len];
        StdRng::seed_from_u64(42).fill_bytes(&mut data);
        data
    }

    fn gunzip(bytes: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        GzDecoder::new(bytes).read_to_end(&mut out).unwrap();
        out
    }

    #[tokio::test]
    async fn test_empty_input_yields_empty_final_part() {
        let mut buffer = CompressionBuffer::new(&b""[..], 1024, 1024, 6);
        let part = buffer.fill_part().await.unwrap();

        assert!(part.is_empty());
        assert!(part.is_final);
        assert_eq!(part.raw_bytes, 0);
    }

    #[tokio::test]
    async fn test_small_input_is_single_final_member() {
        let data = b"hello hello hello hello";
        let mut buffer = CompressionBuffer::new(&data[..], 1024, 1024, 6);
        let part = buffer.fill_part().await.unwrap();

        assert!(part.is_final);
        assert_eq!(part.raw_bytes, data.len() as u64);
        assert_eq!(gunzip(&part.bytes), data);

        let next = buffer.fill_part().await.unwrap();
        assert!(next.is_empty() && next.is_final);
    }

    #[tokio::test]
    async fn test_short_reads_are_coalesced() {
        let reader = tokio_test::io::Builder::new()
            .read(b"abc")
            .read(b"def")
            .read(b"gh")
            .build();

        // 8 raw bytes fill the read buffer exactly, so EOF is only seen on
        // the following read.
        let mut buffer = CompressionBuffer::new(reader, 8, 1 << 20, 6);
        let part = buffer.fill_part().await.unwrap();

        assert!(part.is_final);
        assert_eq!(part.raw_bytes, 8);
        assert_eq!(gunzip(&part.bytes), b"abcdefgh");
    }

    #[tokio::test]
    async fn test_exact_multiple_ends_with_empty_part() {
        let data = random_bytes(4096);
        let mut buffer = CompressionBuffer::new(&data[..], 1024, 1, 6);

        let mut parts = Vec::new();
        loop {
            let part = buffer.fill_part().await.unwrap();
            let done = part.is_final;
            parts.push(part);
            if done {
                break;
            }
        }

        let last = parts.last().unwrap();
        assert!(last.is_empty());
        assert_eq!(last.raw_bytes, 0);
        assert!(parts[..parts.len() - 1].iter().all(|p| !p.is_empty()));
    }

    #[tokio::test]
    async fn test_parts_respect_threshold_and_round_trip() {
        let data = random_bytes(1 << 20);
        let minimum = 64 * 1024;
        let mut buffer = CompressionBuffer::new(&data[..], 16 * 1024, minimum, 6);

        let mut parts = Vec::new();
        loop {
            let part = buffer.fill_part().await.unwrap();
            let done = part.is_final;
            if !part.is_empty() {
                parts.push(part);
            }
            if done {
                break;
            }
        }

        assert!(parts.len() > 1, "expected several parts, got {}", parts.len());
        for part in &parts[..parts.len() - 1] {
            assert!(!part.is_final);
            assert!(part.bytes.len() >= minimum);
        }

        // Each member decodes alone, and the concatenation reproduces the input.
        let mut joined = Vec::new();
        let mut raw_total = 0u64;
        for part in &parts {
            let decoded = gunzip(&part.bytes);
            assert_eq!(decoded.len() as u64, part.raw_bytes);
            raw_total += part.raw_bytes;
            joined.extend_from_slice(&part.bytes);
        }
        assert_eq!(raw_total, data.len() as u64);

        let mut restored = Vec::new();
        MultiGzDecoder::new(&joined[..])
            .read_to_end(&mut restored)
            .unwrap();
        assert_eq!(restored, data);
    }

    #[tokio::test]
    async fn test_read_error_propagates() {
        let reader = tokio_test::io::Builder::new()
            .read(b"partial")
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();

        let mut buffer = CompressionBuffer::new(reader, 1024, 1024, 6);
        let err = buffer.fill_part().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }
}
