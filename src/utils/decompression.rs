//! Compression detection and buffered decompression
//!
//! Detection is magic-byte based so compressed payloads are recognized
//! even when the server sends wrong Content-Type/Content-Encoding
//! headers. Only gzip is decompressed; other detected formats are
//! reported so the caller can fail with a useful message.

use std::io::Read;

use bytes::Bytes;
use flate2::read::MultiGzDecoder;

use crate::errors::{IngestError, IngestResult};

/// gzip magic number
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Compression formats recognized by magic bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionFormat {
    Gzip,
    /// Something compressed we do not decompress (zip, bzip2, xz, ...)
    Unsupported,
    Uncompressed,
}

/// Magic byte detection and decompression utility
pub struct DecompressionService;

impl DecompressionService {
    /// Detect compression format using magic bytes
    pub fn detect_compression_format(data: &[u8]) -> CompressionFormat {
        if data.len() >= 2 && data[0..2] == GZIP_MAGIC {
            return CompressionFormat::Gzip;
        }

        if let Some(kind) = infer::get(data) {
            match kind.mime_type() {
                "application/gzip" => CompressionFormat::Gzip,
                "application/zip" | "application/x-bzip2" | "application/x-xz" => {
                    CompressionFormat::Unsupported
                }
                _ => CompressionFormat::Uncompressed,
            }
        } else {
            CompressionFormat::Uncompressed
        }
    }

    /// Decompress a fully buffered payload, enforcing the decompressed
    /// size limit
    pub fn decompress(data: Bytes, max_decompressed_bytes: u64) -> IngestResult<Vec<u8>> {
        match Self::detect_compression_format(&data) {
            CompressionFormat::Uncompressed => {
                if data.len() as u64 > max_decompressed_bytes {
                    return Err(IngestError::OversizedPayload {
                        compressed_bytes: data.len() as u64,
                        decompressed_bytes: data.len() as u64,
                        limit_bytes: max_decompressed_bytes,
                    });
                }
                Ok(data.to_vec())
            }
            CompressionFormat::Gzip => Self::decompress_gzip(data, max_decompressed_bytes),
            CompressionFormat::Unsupported => Err(IngestError::malformed(
                "source uses an unsupported compression format (only gzip and plain content are accepted)",
            )),
        }
    }

    fn decompress_gzip(data: Bytes, max_decompressed_bytes: u64) -> IngestResult<Vec<u8>> {
        let compressed_len = data.len() as u64;
        // Read through a limited decoder so a zip bomb cannot exhaust
        // memory before the limit check
        let decoder = MultiGzDecoder::new(data.as_ref());
        let mut limited = decoder.take(max_decompressed_bytes + 1);
        let mut decompressed = Vec::new();
        limited
            .read_to_end(&mut decompressed)
            .map_err(|e| IngestError::CorruptedStream {
                url: "<buffered>".to_string(),
                message: format!("gzip decompression failed: {e}"),
                attempts: 1,
            })?;

        if decompressed.len() as u64 > max_decompressed_bytes {
            return Err(IngestError::OversizedPayload {
                compressed_bytes: compressed_len,
                decompressed_bytes: decompressed.len() as u64,
                limit_bytes: max_decompressed_bytes,
            });
        }
        Ok(decompressed)
    }
}
