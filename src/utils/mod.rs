//! Utility modules shared across the ingestion core

pub mod decompression;
pub mod url;

pub use decompression::{CompressionFormat, DecompressionService};
pub use url::UrlUtils;
