//! Repository layer
//!
//! The ingestion core depends only on the traits in [`traits`]; the
//! SeaORM implementations here are the production wiring.

pub mod channel;
pub mod epg_channel;
pub mod sync_job;
pub mod traits;

pub use channel::ChannelSeaOrmRepository;
pub use epg_channel::EpgChannelSeaOrmRepository;
pub use sync_job::SyncJobSeaOrmRepository;
pub use traits::{ChannelStore, EpgChannelStore, JobStore};
