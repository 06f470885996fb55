mod common;

use std::sync::Arc;

use async_trait::async_trait;
use common::{GIB, config, dead_address, spawn_peer};
use ram_sharing::{
    DeviceDiscovery, DiscoveryOptions, NetworkScanner, client::PeerClient, device::Candidate,
};

fn discovery() -> DeviceDiscovery {
    DeviceDiscovery::new(PeerClient::new(&config()).unwrap())
}

fn options(ram_min: u64, max_devices: usize) -> DiscoveryOptions {
    DiscoveryOptions {
        ram_min,
        require_reachable: true,
        max_devices,
    }
}

#[tokio::test]
async fn memory_threshold_is_inclusive() {
    let exact = spawn_peer(4 * GIB).await;
    let short = spawn_peer(4 * GIB - 1).await;
    let candidates = vec![short, exact.clone()];

    let devices = discovery()
        .discover(Some(&candidates[..]), &options(4 * GIB, 10))
        .await;

    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].address(), exact);
    assert_eq!(devices[0].available_memory(), 4 * GIB);
    assert!(devices[0].reachable());
}

#[tokio::test]
async fn keeps_list_order_and_stops_at_max_devices() {
    let mut candidates = Vec::new();
    for gib in [2, 8, 4] {
        candidates.push(spawn_peer(gib * GIB).await);
    }

    let devices = discovery().discover(Some(&candidates[..]), &options(GIB, 2)).await;

    let addresses: Vec<_> = devices.iter().map(|d| d.address().to_string()).collect();
    assert_eq!(addresses, candidates[..2]);

    let none = discovery().discover(Some(&candidates[..]), &options(GIB, 0)).await;
    assert!(none.is_empty());
}

#[tokio::test]
async fn unreachable_candidates_are_excluded_not_fatal() {
    let live = spawn_peer(2 * GIB).await;
    let candidates = vec![dead_address(), live.clone(), dead_address()];

    let devices = discovery().discover(Some(&candidates[..]), &options(GIB, 10)).await;
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].address(), live);

    let devices = discovery()
        .discover(Some(&[dead_address()][..]), &options(GIB, 10))
        .await;
    assert!(devices.is_empty());
}

#[tokio::test]
async fn failed_probes_count_as_no_memory() {
    let lenient = DiscoveryOptions {
        ram_min: 0,
        require_reachable: false,
        max_devices: 10,
    };
    let dead = dead_address();

    let devices = discovery().discover(Some(&[dead.clone()][..]), &lenient).await;

    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].address(), dead);
    assert_eq!(devices[0].available_memory(), 0);
    assert!(!devices[0].reachable());
}

struct FixedScanner(Vec<Candidate>);

#[async_trait]
impl NetworkScanner for FixedScanner {
    async fn scan(&self) -> Vec<Candidate> {
        self.0.clone()
    }
}

#[tokio::test]
async fn scanner_hints_are_checked_for_liveness() {
    let live = spawn_peer(2 * GIB).await;
    let dead = dead_address();
    let scanner = FixedScanner(vec![
        Candidate {
            address: dead.clone(),
            available_memory: 16 * GIB,
        },
        Candidate {
            address: live.clone(),
            available_memory: 2 * GIB,
        },
        Candidate {
            address: "10.255.255.1".into(),
            available_memory: GIB / 2,
        },
    ]);
    let discovery = discovery().with_scanner(Arc::new(scanner));

    let devices = discovery.discover(None, &options(GIB, 10)).await;
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].address(), live);

    let unchecked = DiscoveryOptions {
        require_reachable: false,
        ..options(GIB, 10)
    };
    let devices = discovery.discover(None, &unchecked).await;
    let addresses: Vec<_> = devices.iter().map(|d| d.address()).collect();
    assert_eq!(addresses, vec![dead.as_str(), live.as_str()]);
    assert!(devices.iter().all(|d| !d.reachable()));
}

#[tokio::test]
async fn no_scanner_means_no_devices() {
    let devices = discovery().discover(None, &DiscoveryOptions::default()).await;
    assert!(devices.is_empty());
}
