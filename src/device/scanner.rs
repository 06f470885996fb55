use std::net::Ipv4Addr;

use async_trait::async_trait;
use futures::{StreamExt, stream};
use log::debug;

use super::{Candidate, NetworkScanner};
use crate::client::PeerClient;

const SCAN_CONCURRENCY: usize = 64;

/// Sweeps a `/24` for hosts answering `/ram` on the configured port.
pub struct SubnetScanner {
    prefix: [u8; 3],
    client: PeerClient,
}

impl SubnetScanner {
    /// Creates a new `SubnetScanner`.
    ///
    /// # Arguments
    /// * `network` - Any address inside the subnet, its last octet is ignored.
    /// * `client` - The client used for the probes.
    pub fn new(network: Ipv4Addr, client: PeerClient) -> Self {
        let [a, b, c, _] = network.octets();
        Self {
            prefix: [a, b, c],
            client,
        }
    }

    /// The host addresses covered by the sweep, `.1` to `.254`.
    pub fn hosts(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        let [a, b, c] = self.prefix;
        (1..=254).map(move |d| Ipv4Addr::new(a, b, c, d))
    }
}

#[async_trait]
impl NetworkScanner for SubnetScanner {
    async fn scan(&self) -> Vec<Candidate> {
        let mut found: Vec<(Ipv4Addr, u64)> = stream::iter(self.hosts())
            .map(|ip| async move {
                let address = ip.to_string();
                match self.client.probe_ram(&address).await {
                    Ok(report) => Some((ip, report.available_ram)),
                    Err(_) => None,
                }
            })
            .buffer_unordered(SCAN_CONCURRENCY)
            .filter_map(|hit| async move { hit })
            .collect()
            .await;

        found.sort_unstable_by_key(|(ip, _)| *ip);
        debug!(hits = found.len(); "subnet sweep finished");

        found
            .into_iter()
            .map(|(ip, available_memory)| Candidate {
                address: ip.to_string(),
                available_memory,
            })
            .collect()
    }
}
