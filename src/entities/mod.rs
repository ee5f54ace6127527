//! SeaORM entity definitions

pub mod channels;
pub mod epg_channels;
pub mod sync_jobs;

pub mod prelude {
    pub use super::channels::Entity as Channels;
    pub use super::epg_channels::Entity as EpgChannels;
    pub use super::sync_jobs::Entity as SyncJobs;
}
