//! Provider source clients

pub mod factory;
pub mod m3u;
pub mod traits;
pub mod xtream;

pub use factory::SourceFactory;
pub use m3u::M3uClient;
pub use traits::ChannelSource;
pub use xtream::XtreamClient;
