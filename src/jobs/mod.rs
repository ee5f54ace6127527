//! Chunked, resumable sync jobs

pub mod mapping;
pub mod progress;
pub mod runner;
pub mod service;
pub mod types;

pub use progress::ProgressReporter;
pub use runner::{ArtifactFetcher, ChunkedJobRunner, JobArtifact, NetworkFetcher};
pub use service::JobService;
pub use types::{ChunkBudget, JobKind, JobStatus, JobUpdate, SyncJob};
