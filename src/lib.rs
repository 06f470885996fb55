pub mod aggregate;
pub mod cache;
pub mod client;
pub mod config;
pub mod device;
pub mod dispatch;
mod engine;
pub mod error;
pub mod job;
pub mod partition;
pub mod peer;
pub mod retry;

pub use cache::ResultCache;
pub use config::EngineConfig;
pub use device::{Device, DeviceDiscovery, DiscoveryOptions, NetworkScanner, SubnetScanner};
pub use dispatch::{DispatchResult, Dispatcher, Outcome};
pub use engine::RamSharing;
pub use error::{DispatchErrorKind, EngineError, Result};
pub use job::{Job, Operation};
pub use partition::{Matrix, Partition};
