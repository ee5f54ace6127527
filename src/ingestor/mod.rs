//! Source retrieval and incremental parsing
//!
//! [`fetch::StreamIngestor`] lands a source document in a sink,
//! [`xmltv_stream::XmltvChannelReader`] pulls channel records out of it
//! without ever holding the whole document's parse tree, and
//! [`xmltv_export`] rewrites small guides for the filtered-export path.

pub mod fetch;
pub mod sink;
pub mod xmltv_export;
pub mod xmltv_stream;

use std::io::BufReader;

use crate::errors::IngestResult;
use crate::models::EpgChannelRecord;

pub use fetch::{FetchOutcome, FetchStrategy, StreamIngestor};
pub use sink::{FileSink, IngestSink, MemorySink, SinkPayload};
pub use xmltv_export::filter_xmltv;
pub use xmltv_stream::XmltvChannelReader;

impl StreamIngestor {
    /// Fetch an XMLTV guide and extract its channel list
    ///
    /// Parsing runs on the blocking pool: the payload is already fully
    /// landed, so this is pure CPU and disk work.
    pub async fn fetch_epg_channels(
        &self,
        url: &str,
    ) -> IngestResult<(Vec<EpgChannelRecord>, FetchOutcome)> {
        let (payload, outcome) = self.fetch(url).await?;
        let channels = tokio::task::spawn_blocking(move || {
            let reader = BufReader::new(payload.into_reader()?);
            XmltvChannelReader::new(reader).collect_channels()
        })
        .await
        .map_err(|e| crate::errors::IngestError::internal(format!("parser task panicked: {e}")))??;
        Ok((channels, outcome))
    }
}
