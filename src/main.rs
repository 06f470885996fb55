use std::{env, net::Ipv4Addr, process, sync::Arc};

use anyhow::{Context, ensure};
use log::info;
use ndarray::Array2;
use ram_sharing::{
    DiscoveryOptions, EngineConfig, Job, Operation, RamSharing, SubnetScanner,
    client::PeerClient,
    peer::{self, MemorySource, PeerState},
};
use tokio::{net::TcpListener, signal};

const USAGE: &str = "\
usage:
  ram-sharing peer <addr>
  ram-sharing discover <ip>...
  ram-sharing scan <subnet-ip>
  ram-sharing sum-squares <n> <ip>...
  ram-sharing matmul <ip>...";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().skip(1).collect();
    let Some((mode, rest)) = args.split_first() else {
        usage();
    };

    let config = EngineConfig::load()?;

    match (mode.as_str(), rest) {
        ("peer", [addr]) => run_peer(addr, &config).await,
        ("discover", ips) if !ips.is_empty() => discover(ips, config).await,
        ("scan", [subnet]) => scan(subnet, config).await,
        ("sum-squares", [n, ips @ ..]) if !ips.is_empty() => {
            let n = n.parse::<u64>().context("<n> must be a positive integer")?;
            sum_squares(n, ips, config).await
        }
        ("matmul", ips) if !ips.is_empty() => matmul(ips, config).await,
        _ => usage(),
    }
}

fn usage() -> ! {
    eprintln!("{USAGE}");
    process::exit(1);
}

async fn run_peer(addr: &str, config: &EngineConfig) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("peer listening at {}", listener.local_addr()?);

    let state = PeerState::new(MemorySource::System);
    tokio::select! {
        res = peer::serve(listener, state, &config.endpoint) => res?,
        _ = signal::ctrl_c() => info!("shutting down"),
    }

    Ok(())
}

async fn discover(ips: &[String], config: EngineConfig) -> anyhow::Result<()> {
    let engine = RamSharing::new(config)?;
    let devices = engine
        .get_available_devices(Some(ips), &DiscoveryOptions::default())
        .await;

    for device in devices {
        println!("{}\t{} bytes available", device.address(), device.available_memory());
    }
    Ok(())
}

async fn scan(subnet: &str, config: EngineConfig) -> anyhow::Result<()> {
    let ip: Ipv4Addr = subnet.parse().context("<subnet-ip> must be an IPv4 address")?;
    let scanner = SubnetScanner::new(ip, PeerClient::new(&config)?);

    let engine = RamSharing::new(config)?.with_scanner(Arc::new(scanner));
    let devices = engine
        .get_available_devices(None, &DiscoveryOptions::default())
        .await;

    for device in devices {
        println!("{}\t{} bytes available", device.address(), device.available_memory());
    }
    Ok(())
}

async fn sum_squares(n: u64, ips: &[String], config: EngineConfig) -> anyhow::Result<()> {
    let engine = RamSharing::new(config)?;
    let devices = engine
        .get_available_devices(Some(ips), &DiscoveryOptions::default())
        .await;
    ensure!(!devices.is_empty(), "no usable device among {ips:?}");

    let input: Vec<u64> = (1..=n).collect();
    let flat = engine
        .run_flat(&Job::new(Operation::SumOfSquares), input, &devices)
        .await?;
    ensure!(flat.is_complete(), "missing partial sums: {}", flat.failures().join("; "));

    let total: u128 = flat.decode::<u64>()?.into_iter().map(u128::from).sum();
    println!("{total}");
    Ok(())
}

async fn matmul(ips: &[String], config: EngineConfig) -> anyhow::Result<()> {
    let engine = RamSharing::new(config)?;
    let devices = engine
        .get_available_devices(Some(ips), &DiscoveryOptions::default())
        .await;
    ensure!(!devices.is_empty(), "no usable device among {ips:?}");

    let a = Array2::from_shape_fn((4, 4), |(i, j)| (i * 4 + j + 1) as f64);
    let b = Array2::from_shape_fn((4, 4), |(i, j)| (i * 4 + j + 17) as f64);

    let c = engine
        .run_matrix(&Job::new(Operation::MatrixMultiply), &a, &b, &devices)
        .await?;
    ensure!(c == a.dot(&b), "distributed product differs from the local one");

    println!("{c}");
    Ok(())
}
