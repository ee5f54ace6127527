//! Error types for the ingestion core

mod types;

pub use types::IngestError;

/// Convenience result alias used throughout the crate
pub type IngestResult<T> = Result<T, IngestError>;
