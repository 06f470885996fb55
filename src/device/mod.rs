mod discovery;
mod scanner;

use async_trait::async_trait;

pub use discovery::{DeviceDiscovery, DiscoveryOptions};
pub use scanner::SubnetScanner;

/// A peer accepted by a discovery pass.
///
/// Immutable snapshot, nothing keeps track of it once the pass returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    address: String,
    available_memory: u64,
    reachable: bool,
}

impl Device {
    /// Creates a new `Device`.
    ///
    /// # Arguments
    /// * `address` - Host or ip, optionally with a `:port` suffix.
    /// * `available_memory` - Available memory in bytes.
    /// * `reachable` - Whether a liveness probe succeeded during the pass.
    pub fn new(address: impl Into<String>, available_memory: u64, reachable: bool) -> Self {
        Self {
            address: address.into(),
            available_memory,
            reachable,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn available_memory(&self) -> u64 {
        self.available_memory
    }

    pub fn reachable(&self) -> bool {
        self.reachable
    }
}

/// A raw address found by a network scan along with its capacity hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub address: String,
    pub available_memory: u64,
}

/// Enumerates candidate peers when no explicit address list is given.
#[async_trait]
pub trait NetworkScanner: Send + Sync {
    /// Scans the network.
    ///
    /// # Returns
    /// The candidates in scan order.
    async fn scan(&self) -> Vec<Candidate>;
}
