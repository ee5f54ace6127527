//! Source client construction per job kind

use std::sync::Arc;
use std::time::Duration;

use crate::errors::{IngestError, IngestResult};
use crate::jobs::JobKind;

use super::m3u::M3uClient;
use super::traits::ChannelSource;
use super::xtream::XtreamClient;

pub struct SourceFactory {
    client: reqwest::Client,
}

impl SourceFactory {
    pub fn new(connect_timeout: Duration) -> IngestResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| IngestError::internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Client for the provider-list job kinds. EPG sync and mapping jobs
    /// do not go through a channel source.
    pub fn for_kind(&self, kind: JobKind) -> Option<Arc<dyn ChannelSource>> {
        match kind {
            JobKind::XtreamSync => Some(Arc::new(XtreamClient::new(self.client.clone()))),
            JobKind::M3uSync => Some(Arc::new(M3uClient::new(self.client.clone()))),
            JobKind::EpgSync | JobKind::MappingReconcile => None,
        }
    }
}
