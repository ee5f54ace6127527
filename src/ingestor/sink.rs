//! Swappable sinks for fetched payloads
//!
//! One fetch pipeline writes decompressed bytes into whichever sink the
//! capability probe selected: memory for ordinary documents, a temp file
//! for the disk-backed fallback. The memory sink enforces the
//! representable-size cap so an oversized payload fails as its own
//! condition instead of exhausting memory.

use std::io::{Read, Seek, SeekFrom, Write};

use bytes::Bytes;
use tempfile::NamedTempFile;

use crate::errors::{IngestError, IngestResult};

/// Where a completed fetch landed
#[derive(Debug)]
pub enum SinkPayload {
    Memory(Bytes),
    File(NamedTempFile),
}

impl SinkPayload {
    /// Open the payload for reading from the start
    pub fn into_reader(self) -> IngestResult<Box<dyn Read + Send>> {
        match self {
            SinkPayload::Memory(bytes) => Ok(Box::new(std::io::Cursor::new(bytes))),
            SinkPayload::File(mut file) => {
                file.seek(SeekFrom::Start(0))?;
                Ok(Box::new(file))
            }
        }
    }
}

/// Destination for decompressed fetch output
pub trait IngestSink: Send {
    fn write_chunk(&mut self, chunk: &[u8]) -> IngestResult<()>;

    fn bytes_written(&self) -> u64;

    fn finish(self: Box<Self>) -> IngestResult<SinkPayload>;
}

/// In-memory sink with a hard size cap
pub struct MemorySink {
    buf: Vec<u8>,
    max_bytes: u64,
}

impl MemorySink {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            buf: Vec::new(),
            max_bytes,
        }
    }
}

impl IngestSink for MemorySink {
    fn write_chunk(&mut self, chunk: &[u8]) -> IngestResult<()> {
        let next = self.buf.len() as u64 + chunk.len() as u64;
        if next > self.max_bytes {
            // The fetch layer fills in the compressed size it counted
            return Err(IngestError::OversizedPayload {
                compressed_bytes: 0,
                decompressed_bytes: next,
                limit_bytes: self.max_bytes,
            });
        }
        self.buf.extend_from_slice(chunk);
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        self.buf.len() as u64
    }

    fn finish(self: Box<Self>) -> IngestResult<SinkPayload> {
        Ok(SinkPayload::Memory(Bytes::from(self.buf)))
    }
}

/// Temp-file sink for the disk-backed fallback
pub struct FileSink {
    file: NamedTempFile,
    written: u64,
}

impl FileSink {
    pub fn new() -> IngestResult<Self> {
        Ok(Self {
            file: NamedTempFile::new()?,
            written: 0,
        })
    }
}

impl IngestSink for FileSink {
    fn write_chunk(&mut self, chunk: &[u8]) -> IngestResult<()> {
        self.file.write_all(chunk)?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        self.written
    }

    fn finish(mut self: Box<Self>) -> IngestResult<SinkPayload> {
        self.file.flush()?;
        Ok(SinkPayload::File(self.file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_enforces_cap() {
        let mut sink = MemorySink::new(8);
        sink.write_chunk(b"12345678").unwrap();

        let err = sink.write_chunk(b"9").unwrap_err();
        match err {
            IngestError::OversizedPayload {
                decompressed_bytes,
                limit_bytes,
                ..
            } => {
                assert_eq!(decompressed_bytes, 9);
                assert_eq!(limit_bytes, 8);
            }
            other => panic!("expected OversizedPayload, got {other:?}"),
        }
    }

    #[test]
    fn file_sink_round_trips() {
        let mut sink = Box::new(FileSink::new().unwrap());
        sink.write_chunk(b"<tv>").unwrap();
        sink.write_chunk(b"</tv>").unwrap();
        assert_eq!(sink.bytes_written(), 9);

        let mut reader = sink.finish().unwrap().into_reader().unwrap();
        let mut content = String::new();
        reader.read_to_string(&mut content).unwrap();
        assert_eq!(content, "<tv></tv>");
    }
}
