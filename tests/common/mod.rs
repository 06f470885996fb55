#![allow(dead_code)]

use std::{
    net::TcpListener as StdListener,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use ram_sharing::{
    EngineConfig,
    job::{ExecuteRequest, ExecuteResponse, RamReport},
    peer::{self, MemorySource, PeerState},
};
use tokio::net::TcpListener;

pub const GIB: u64 = 1 << 30;
pub const ENDPOINT: &str = "/execute_function";

/// Engine config for loopback tests: no wait between attempts.
pub fn config() -> EngineConfig {
    EngineConfig {
        retry_delay: Duration::ZERO,
        ..EngineConfig::default()
    }
}

fn report(available_ram: u64) -> RamReport {
    RamReport {
        total_ram: available_ram.saturating_mul(2),
        available_ram,
    }
}

async fn spawn_router(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router).await });
    addr.to_string()
}

/// Spawns a real peer reporting `available` bytes of free memory.
pub async fn spawn_peer(available: u64) -> String {
    let state = PeerState::new(MemorySource::Fixed(report(available)));
    spawn_router(peer::router(state, ENDPOINT)).await
}

/// An address where nothing listens.
pub fn dead_address() -> String {
    let listener = StdListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().to_string()
}

#[derive(Clone)]
struct Mock {
    hits: Arc<AtomicU32>,
    failures: u32,
    delay: Duration,
}

async fn mock_ram() -> Json<RamReport> {
    Json(report(8 * GIB))
}

async fn mock_execute(
    State(mock): State<Mock>,
    Json(request): Json<ExecuteRequest>,
) -> (StatusCode, Json<ExecuteResponse>) {
    let hit = mock.hits.fetch_add(1, Ordering::SeqCst) + 1;
    if !mock.delay.is_zero() {
        tokio::time::sleep(mock.delay).await;
    }
    if hit <= mock.failures {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ExecuteResponse::err("overloaded")),
        );
    }

    match peer::evaluate(request.func, &request.inputs) {
        Ok(value) => (StatusCode::OK, Json(ExecuteResponse::ok(value))),
        Err(e) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ExecuteResponse::err(e.to_string())),
        ),
    }
}

async fn spawn_mock(failures: u32, delay: Duration) -> (String, Arc<AtomicU32>) {
    let hits = Arc::new(AtomicU32::new(0));
    let mock = Mock {
        hits: Arc::clone(&hits),
        failures,
        delay,
    };

    let router = Router::new()
        .route("/ram", get(mock_ram))
        .route(ENDPOINT, post(mock_execute))
        .with_state(mock);

    (spawn_router(router).await, hits)
}

/// A peer whose job endpoint answers 503 to the first `failures` calls.
pub async fn spawn_flaky(failures: u32) -> (String, Arc<AtomicU32>) {
    spawn_mock(failures, Duration::ZERO).await
}

/// A peer whose job endpoint always answers 503.
pub async fn spawn_failing() -> (String, Arc<AtomicU32>) {
    spawn_mock(u32::MAX, Duration::ZERO).await
}

/// A peer that takes `delay` to answer every job.
pub async fn spawn_slow(delay: Duration) -> (String, Arc<AtomicU32>) {
    spawn_mock(0, delay).await
}

pub fn hits(counter: &AtomicU32) -> u32 {
    counter.load(Ordering::SeqCst)
}
