use std::sync::Arc;

use futures::{StreamExt, stream};
use log::{debug, info, warn};

use super::{Candidate, Device, NetworkScanner};
use crate::client::PeerClient;

/// One gibibyte, the unit of the historical `ram_min` knob.
pub const GIB: u64 = 1 << 30;

const PROBE_CONCURRENCY: usize = 16;

/// Filters applied during a discovery pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryOptions {
    /// Minimum available memory in bytes, inclusive.
    pub ram_min: u64,
    /// Whether candidates must answer a liveness probe.
    pub require_reachable: bool,
    /// Stop the pass once this many devices were accepted.
    pub max_devices: usize,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            ram_min: GIB,
            require_reachable: true,
            max_devices: 100,
        }
    }
}

impl DiscoveryOptions {
    /// Why a candidate is excluded, if it is.
    fn rejects(&self, available: u64, reachable: bool) -> Option<&'static str> {
        if available < self.ram_min {
            return Some("not enough available memory");
        }
        if self.require_reachable && !reachable {
            return Some("executor unreachable");
        }
        None
    }
}

/// Turns candidate addresses into an ordered list of usable devices.
///
/// Exclusions are logged and absorbed, a pass never fails: it just returns
/// fewer (possibly zero) devices.
pub struct DeviceDiscovery {
    client: PeerClient,
    scanner: Option<Arc<dyn NetworkScanner>>,
}

impl DeviceDiscovery {
    /// Creates a new `DeviceDiscovery` without a network scanner.
    pub fn new(client: PeerClient) -> Self {
        Self {
            client,
            scanner: None,
        }
    }

    /// Sets the scanner used when no candidate list is given.
    pub fn with_scanner(mut self, scanner: Arc<dyn NetworkScanner>) -> Self {
        self.scanner = Some(scanner);
        self
    }

    /// Runs a discovery pass.
    ///
    /// # Arguments
    /// * `candidates` - Addresses to check in the given order, or `None` to ask the scanner.
    /// * `options` - The acceptance filters.
    ///
    /// # Returns
    /// The accepted devices in acceptance order, at most `options.max_devices`.
    pub async fn discover(
        &self,
        candidates: Option<&[String]>,
        options: &DiscoveryOptions,
    ) -> Vec<Device> {
        if options.max_devices == 0 {
            return Vec::new();
        }

        let devices = match candidates {
            Some(candidates) => self.discover_listed(candidates, options).await,
            None => self.discover_scanned(options).await,
        };

        info!(accepted = devices.len(); "discovery pass finished");
        devices
    }

    /// Probes every listed address on `/ram`.
    ///
    /// Capacity and liveness come from the same round trip: a probe that
    /// fails counts as zero available memory and as unreachable.
    async fn discover_listed(&self, candidates: &[String], options: &DiscoveryOptions) -> Vec<Device> {
        let mut probes = stream::iter(candidates)
            .map(|address| async move { (address, self.client.probe_ram(address).await) })
            .buffered(PROBE_CONCURRENCY);

        let mut devices = Vec::new();
        while let Some((address, probe)) = probes.next().await {
            let (available, reachable) = match probe {
                Ok(report) => (report.available_ram, true),
                Err(e) => {
                    debug!(device = address.as_str(); "probe failed: {e}");
                    (0, false)
                }
            };

            if let Some(reason) = options.rejects(available, reachable) {
                warn!(device = address.as_str(), available = available; "candidate excluded: {reason}");
                continue;
            }

            devices.push(Device::new(address.as_str(), available, reachable));
            if devices.len() >= options.max_devices {
                break;
            }
        }

        devices
    }

    /// Uses the scanner's capacity hints, probing liveness only when required.
    async fn discover_scanned(&self, options: &DiscoveryOptions) -> Vec<Device> {
        let Some(scanner) = &self.scanner else {
            warn!("no candidate list given and no network scanner configured");
            return Vec::new();
        };

        let candidates = scanner.scan().await;
        debug!(candidates = candidates.len(); "network scan finished");

        let mut checks = stream::iter(candidates)
            .map(|candidate| async move {
                let reachable = if options.require_reachable
                    && candidate.available_memory >= options.ram_min
                {
                    self.client.probe_ram(&candidate.address).await.is_ok()
                } else {
                    false
                };
                (candidate, reachable)
            })
            .buffered(PROBE_CONCURRENCY);

        let mut devices = Vec::new();
        while let Some((Candidate { address, available_memory }, reachable)) = checks.next().await {
            if let Some(reason) = options.rejects(available_memory, reachable) {
                warn!(device = address.as_str(), available = available_memory; "candidate excluded: {reason}");
                continue;
            }

            devices.push(Device::new(address, available_memory, reachable));
            if devices.len() >= options.max_devices {
                break;
            }
        }

        devices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_boundary_is_inclusive() {
        let options = DiscoveryOptions {
            ram_min: 4 * GIB,
            require_reachable: false,
            max_devices: 10,
        };

        assert!(options.rejects(4 * GIB, false).is_none());
        assert!(options.rejects(4 * GIB - 1, true).is_some());
    }

    #[test]
    fn reachability_only_matters_when_required() {
        let mut options = DiscoveryOptions {
            ram_min: 0,
            ..Default::default()
        };
        assert!(options.rejects(0, false).is_some());

        options.require_reachable = false;
        assert!(options.rejects(0, false).is_none());
    }
}
