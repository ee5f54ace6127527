//! Streaming source retrieval
//!
//! Fetches a source document and lands the decompressed bytes in a
//! swappable [`IngestSink`]. Compression is sniffed from the first two
//! bytes of the body, so a gzipped guide is decoded even when the server
//! lies in its headers. A stall guard fails the transfer when no bytes
//! arrive within the configured idle window.
//!
//! Retrieval strategy is chosen per attempt. Sources advertising a
//! content length at or below the buffered threshold are downloaded in
//! one buffered request; everything else streams chunk by chunk. When a
//! streamed transfer dies in a way that smells like mid-stream
//! corruption, the next attempt switches strategy (buffered, then
//! disk-backed) before the source is declared permanently corrupted.

use std::io::Write;
use std::time::Duration;

use flate2::write::MultiGzDecoder;
use futures_util::StreamExt;
use reqwest::Client;
use tracing::{debug, warn};

use crate::config::FetchConfig;
use crate::errors::{IngestError, IngestResult};
use crate::utils::decompression::{CompressionFormat, DecompressionService, GZIP_MAGIC};
use crate::utils::url::UrlUtils;

use super::sink::{FileSink, IngestSink, MemorySink, SinkPayload};

/// How a single retrieval attempt moves bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStrategy {
    /// Incremental chunk-by-chunk transfer into memory
    Streamed,
    /// One buffered download, decompressed afterwards
    Buffered,
    /// Incremental transfer spooled to a temp file
    DiskBacked,
}

/// What a completed fetch produced, for logging and progress
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    /// Decompressed bytes delivered to the sink
    pub bytes_read: u64,
    /// Content-Length advertised by the server, when present
    pub total_bytes: Option<u64>,
    pub compressed: bool,
    pub strategy: FetchStrategy,
}

pub struct StreamIngestor {
    client: Client,
    buffered_threshold_bytes: u64,
    max_decompressed_bytes: u64,
    stall_timeout: Duration,
    max_attempts: u32,
}

impl StreamIngestor {
    pub fn new(config: &FetchConfig) -> IngestResult<Self> {
        let connect_timeout = config
            .connect_timeout()
            .map_err(|e| IngestError::internal(e.to_string()))?;
        let stall_timeout = config
            .stall_timeout()
            .map_err(|e| IngestError::internal(e.to_string()))?;

        // Connection timeout only. A total request timeout would kill
        // legitimate multi-minute transfers; the stall guard handles
        // dead connections instead.
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| IngestError::internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            buffered_threshold_bytes: config.buffered_threshold_bytes,
            max_decompressed_bytes: config.max_decompressed_bytes,
            stall_timeout,
            max_attempts: config.max_fetch_attempts.max(1),
        })
    }

    /// Fetch a source document, retrying with alternate strategies on
    /// transient or corruption-shaped failures
    pub async fn fetch(&self, url: &str) -> IngestResult<(SinkPayload, FetchOutcome)> {
        let masked = UrlUtils::obfuscate_credentials(url);
        let mut strategy: Option<FetchStrategy> = None;
        let mut last_error: Option<IngestError> = None;

        for attempt in 1..=self.max_attempts {
            let forced = match attempt {
                1 => None,
                2 => match strategy {
                    Some(FetchStrategy::Buffered) => Some(FetchStrategy::Streamed),
                    _ => Some(FetchStrategy::Buffered),
                },
                _ => Some(FetchStrategy::DiskBacked),
            };

            match self.attempt(url, forced).await {
                Ok((payload, outcome)) => {
                    debug!(
                        url = %masked,
                        attempt,
                        strategy = ?outcome.strategy,
                        bytes_read = outcome.bytes_read,
                        compressed = outcome.compressed,
                        "fetch succeeded"
                    );
                    return Ok((payload, outcome));
                }
                Err((used, error)) => {
                    strategy = Some(used);
                    if !error.is_retryable_fetch() || attempt == self.max_attempts {
                        return Err(finalize_error(error, attempt));
                    }
                    warn!(
                        url = %masked,
                        attempt,
                        strategy = ?used,
                        error = %error,
                        "fetch attempt failed, switching strategy"
                    );
                    last_error = Some(error);
                }
            }
        }

        // max_attempts >= 1, so the loop always returns or records an error
        Err(finalize_error(
            last_error.unwrap_or_else(|| IngestError::internal("fetch produced no result")),
            self.max_attempts,
        ))
    }

    async fn attempt(
        &self,
        url: &str,
        forced: Option<FetchStrategy>,
    ) -> Result<(SinkPayload, FetchOutcome), (FetchStrategy, IngestError)> {
        let fallback = forced.unwrap_or(FetchStrategy::Streamed);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| (fallback, classify_transport_error(url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err((
                fallback,
                IngestError::network(
                    UrlUtils::obfuscate_credentials(url),
                    format!(
                        "HTTP {} {}",
                        status.as_u16(),
                        status.canonical_reason().unwrap_or("Unknown")
                    ),
                ),
            ));
        }

        let total_bytes = response.content_length();
        let strategy = forced.unwrap_or_else(|| {
            if total_bytes.is_some_and(|len| len <= self.buffered_threshold_bytes) {
                FetchStrategy::Buffered
            } else {
                FetchStrategy::Streamed
            }
        });

        let result = match strategy {
            FetchStrategy::Buffered => self.drain_buffered(url, response, total_bytes).await,
            FetchStrategy::Streamed => {
                let sink = Box::new(MemorySink::new(self.max_decompressed_bytes));
                self.drain_streaming(url, response, sink, total_bytes, strategy)
                    .await
            }
            FetchStrategy::DiskBacked => {
                let sink: Box<dyn IngestSink> =
                    Box::new(FileSink::new().map_err(|e| (strategy, e))?);
                self.drain_streaming(url, response, sink, total_bytes, strategy)
                    .await
            }
        };
        result.map_err(|e| (strategy, e))
    }

    async fn drain_buffered(
        &self,
        url: &str,
        response: reqwest::Response,
        total_bytes: Option<u64>,
    ) -> IngestResult<(SinkPayload, FetchOutcome)> {
        let body = match tokio::time::timeout(self.body_deadline(total_bytes), response.bytes())
            .await
        {
            Err(_) => {
                return Err(IngestError::StallTimeout {
                    url: UrlUtils::obfuscate_credentials(url),
                    idle_secs: self.stall_timeout.as_secs(),
                });
            }
            Ok(result) => result.map_err(|e| classify_transport_error(url, e))?,
        };

        let compressed =
            DecompressionService::detect_compression_format(&body) == CompressionFormat::Gzip;
        let compressed_len = body.len() as u64;
        let decompressed = DecompressionService::decompress(body, self.max_decompressed_bytes)
            .map_err(|e| contextualize(e, &UrlUtils::obfuscate_credentials(url), compressed_len))?;
        validate_document_start(&decompressed)?;

        let bytes_read = decompressed.len() as u64;
        Ok((
            SinkPayload::Memory(decompressed.into()),
            FetchOutcome {
                bytes_read,
                total_bytes: total_bytes.or(Some(compressed_len)),
                compressed,
                strategy: FetchStrategy::Buffered,
            },
        ))
    }

    async fn drain_streaming(
        &self,
        url: &str,
        response: reqwest::Response,
        sink: Box<dyn IngestSink>,
        total_bytes: Option<u64>,
        strategy: FetchStrategy,
    ) -> IngestResult<(SinkPayload, FetchOutcome)> {
        let masked = UrlUtils::obfuscate_credentials(url);
        let mut stream = response.bytes_stream();
        let mut decoder = StreamDecoder::new(sink);
        let mut downloaded = 0u64;

        loop {
            let chunk = match tokio::time::timeout(self.stall_timeout, stream.next()).await {
                Err(_) => {
                    return Err(IngestError::StallTimeout {
                        url: masked,
                        idle_secs: self.stall_timeout.as_secs(),
                    });
                }
                Ok(None) => break,
                Ok(Some(result)) => result.map_err(|e| classify_transport_error(url, e))?,
            };
            downloaded += chunk.len() as u64;
            decoder
                .write(&chunk)
                .map_err(|e| contextualize(e, &masked, downloaded))?;
        }

        let (payload, compressed) = decoder
            .finish()
            .map_err(|e| contextualize(e, &masked, downloaded))?;

        let bytes_read = match &payload {
            SinkPayload::Memory(bytes) => bytes.len() as u64,
            SinkPayload::File(_) => downloaded,
        };
        Ok((
            payload,
            FetchOutcome {
                bytes_read,
                total_bytes,
                compressed,
                strategy,
            },
        ))
    }

    /// Buffered bodies are small by definition, but a dead connection
    /// should still fail within a bounded window
    fn body_deadline(&self, total_bytes: Option<u64>) -> Duration {
        // Assume at least ~1 MB/s; floor at the stall window
        let transfer_secs = total_bytes.unwrap_or(self.buffered_threshold_bytes) / (1024 * 1024);
        self.stall_timeout + Duration::from_secs(transfer_secs.max(1))
    }
}

/// Incremental decompressing writer in front of a sink
///
/// Holds bytes until the two-byte magic probe resolves, then routes each
/// chunk either straight through or via a gzip member decoder.
enum StreamDecoder {
    Probing {
        writer: SinkWriter,
        pending: Vec<u8>,
    },
    Plain(SinkWriter),
    Gzip(MultiGzDecoder<SinkWriter>),
    Done,
}

impl StreamDecoder {
    fn new(sink: Box<dyn IngestSink>) -> Self {
        StreamDecoder::Probing {
            writer: SinkWriter {
                sink,
                validated: false,
            },
            pending: Vec::new(),
        }
    }

    fn write(&mut self, chunk: &[u8]) -> IngestResult<()> {
        match std::mem::replace(self, StreamDecoder::Done) {
            StreamDecoder::Probing { writer, mut pending } => {
                pending.extend_from_slice(chunk);
                if pending.len() < GZIP_MAGIC.len() {
                    *self = StreamDecoder::Probing { writer, pending };
                    return Ok(());
                }
                *self = if pending[..2] == GZIP_MAGIC {
                    StreamDecoder::Gzip(MultiGzDecoder::new(writer))
                } else {
                    StreamDecoder::Plain(writer)
                };
                self.write_resolved(&pending)
            }
            mut resolved => {
                let result = resolved.write_resolved(chunk);
                *self = resolved;
                result
            }
        }
    }

    fn write_resolved(&mut self, chunk: &[u8]) -> IngestResult<()> {
        let io_result = match self {
            StreamDecoder::Plain(writer) => writer.write_all(chunk),
            StreamDecoder::Gzip(decoder) => decoder.write_all(chunk),
            StreamDecoder::Probing { pending, .. } => {
                pending.extend_from_slice(chunk);
                Ok(())
            }
            StreamDecoder::Done => Ok(()),
        };
        io_result.map_err(restore_ingest_error)
    }

    /// Flush any decoder state and close the sink. Returns the payload
    /// and whether the body was compressed.
    fn finish(self) -> IngestResult<(SinkPayload, bool)> {
        match self {
            StreamDecoder::Probing { mut writer, pending } => {
                // Body shorter than the magic probe; treat as plain
                writer.write_all(&pending).map_err(restore_ingest_error)?;
                Ok((writer.finish()?, false))
            }
            StreamDecoder::Plain(mut writer) => {
                writer.flush().map_err(restore_ingest_error)?;
                Ok((writer.finish()?, false))
            }
            StreamDecoder::Gzip(decoder) => {
                let writer = decoder.finish().map_err(restore_ingest_error)?;
                Ok((writer.finish()?, true))
            }
            StreamDecoder::Done => Err(IngestError::internal("stream decoder already finished")),
        }
    }
}

/// Adapts a sink to `io::Write` and rejects bodies that do not start
/// with markup before buffering anything substantial
struct SinkWriter {
    sink: Box<dyn IngestSink>,
    validated: bool,
}

impl SinkWriter {
    fn finish(self) -> IngestResult<SinkPayload> {
        self.sink.finish()
    }
}

impl Write for SinkWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if !self.validated
            && let Some(first) = buf.iter().find(|b| !b.is_ascii_whitespace())
        {
            if *first != b'<' {
                return Err(std::io::Error::other(IngestError::malformed(
                    "content does not begin with a markup start character; source is not an XML document",
                )));
            }
            self.validated = true;
        }
        self.sink.write_chunk(buf).map_err(std::io::Error::other)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Recover an `IngestError` smuggled through the `io::Write` seam;
/// anything else at this layer is the gzip decoder choking mid-stream
fn restore_ingest_error(error: std::io::Error) -> IngestError {
    match error.downcast::<IngestError>() {
        Ok(inner) => inner,
        Err(io) => IngestError::CorruptedStream {
            url: String::new(),
            message: format!("decompression failed mid-stream: {io}"),
            attempts: 1,
        },
    }
}

/// Attach the source URL and compressed byte count that only the fetch
/// loop knows
fn contextualize(error: IngestError, masked_url: &str, downloaded: u64) -> IngestError {
    match error {
        IngestError::CorruptedStream {
            message, attempts, ..
        } => IngestError::CorruptedStream {
            url: masked_url.to_string(),
            message,
            attempts,
        },
        IngestError::OversizedPayload {
            decompressed_bytes,
            limit_bytes,
            ..
        } => IngestError::OversizedPayload {
            compressed_bytes: downloaded,
            decompressed_bytes,
            limit_bytes,
        },
        other => other,
    }
}

fn classify_transport_error(url: &str, error: reqwest::Error) -> IngestError {
    let masked = UrlUtils::obfuscate_credentials(url);
    if error.is_timeout() {
        IngestError::StallTimeout {
            url: masked,
            idle_secs: 0,
        }
    } else {
        IngestError::network(masked, error.to_string())
    }
}

/// Record how many strategies were burned before giving up
fn finalize_error(error: IngestError, attempts_made: u32) -> IngestError {
    match error {
        IngestError::CorruptedStream { url, message, .. } => IngestError::CorruptedStream {
            url,
            message,
            attempts: attempts_made,
        },
        other => other,
    }
}

fn validate_document_start(decompressed: &[u8]) -> IngestResult<()> {
    match decompressed.iter().find(|b| !b.is_ascii_whitespace()) {
        Some(b'<') | None => Ok(()),
        Some(_) => Err(IngestError::malformed(
            "content does not begin with a markup start character; source is not an XML document",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Read;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn drain(payload: SinkPayload) -> Vec<u8> {
        let mut reader = payload.into_reader().unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        out
    }

    fn feed_in_chunks(data: &[u8], chunk: usize) -> IngestResult<(SinkPayload, bool)> {
        let mut decoder = StreamDecoder::new(Box::new(MemorySink::new(64 * 1024)));
        for piece in data.chunks(chunk) {
            decoder.write(piece)?;
        }
        decoder.finish()
    }

    #[test]
    fn plain_body_passes_through() {
        let (payload, compressed) = feed_in_chunks(b"<tv></tv>", 3).unwrap();
        assert!(!compressed);
        assert_eq!(drain(payload), b"<tv></tv>");
    }

    #[test]
    fn gzip_body_is_detected_and_decoded() {
        let original = b"<tv><channel id=\"a\"><display-name>A</display-name></channel></tv>";
        let body = gzip(original);

        for chunk in [1, 2, 7, body.len()] {
            let (payload, compressed) = feed_in_chunks(&body, chunk).unwrap();
            assert!(compressed, "chunk size {chunk}");
            assert_eq!(drain(payload), original, "chunk size {chunk}");
        }
    }

    #[test]
    fn concatenated_gzip_members_decode_fully() {
        let mut body = gzip(b"<tv><channel id=\"a\"/>");
        body.extend_from_slice(&gzip(b"</tv>"));

        let (payload, compressed) = feed_in_chunks(&body, 5).unwrap();
        assert!(compressed);
        assert_eq!(drain(payload), b"<tv><channel id=\"a\"/></tv>");
    }

    #[test]
    fn non_markup_body_fails_fast() {
        let err = feed_in_chunks(b"#EXTM3U\nnot xml at all", 64).unwrap_err();
        assert!(matches!(err, IngestError::MalformedSource { .. }));
        assert!(!err.is_retryable_fetch());
    }

    #[test]
    fn leading_whitespace_before_markup_is_accepted() {
        let (payload, _) = feed_in_chunks(b"\n  \t<tv></tv>", 2).unwrap();
        assert_eq!(drain(payload), b"\n  \t<tv></tv>");
    }

    #[test]
    fn truncated_gzip_surfaces_as_corrupted_stream() {
        let body = gzip(b"<tv>a reasonably long document body to compress</tv>");
        let truncated = &body[..body.len() / 2];

        let err = feed_in_chunks(truncated, 8).unwrap_err();
        let err = contextualize(err, "http://host/guide.xml.gz", truncated.len() as u64);
        match err {
            IngestError::CorruptedStream { url, .. } => {
                assert_eq!(url, "http://host/guide.xml.gz");
            }
            other => panic!("expected CorruptedStream, got {other:?}"),
        }
        // Corruption is what the strategy ladder exists for
    }

    #[test]
    fn oversize_reports_both_sizes() {
        let original = vec![b'<'; 4096];
        let body = gzip(&original);

        let run = || -> IngestResult<()> {
            let mut decoder = StreamDecoder::new(Box::new(MemorySink::new(1024)));
            for piece in body.chunks(16) {
                decoder.write(piece)?;
            }
            decoder.finish().map(|_| ())
        };
        let err = contextualize(run().unwrap_err(), "http://host/guide.xml.gz", 999);
        match err {
            IngestError::OversizedPayload {
                compressed_bytes,
                decompressed_bytes,
                limit_bytes,
            } => {
                assert_eq!(compressed_bytes, 999);
                assert!(decompressed_bytes > limit_bytes);
            }
            other => panic!("expected OversizedPayload, got {other:?}"),
        }
    }

    #[test]
    fn disk_backed_sink_round_trips_gzip() {
        let original = b"<tv><channel id=\"disk\"/></tv>";
        let body = gzip(original);

        let mut decoder = StreamDecoder::new(Box::new(FileSink::new().unwrap()));
        decoder.write(&body).unwrap();
        let (payload, compressed) = decoder.finish().unwrap();
        assert!(compressed);
        assert!(matches!(payload, SinkPayload::File(_)));
        assert_eq!(drain(payload), original);
    }
}
