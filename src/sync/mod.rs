pub mod discovery;
pub mod runner;

pub use discovery::{DiscoveryConfig, SyncReport, TieredDiscoveryJob};
pub use runner::{SyncHandle, SyncRequest, SyncRunner};
