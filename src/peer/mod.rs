//! Reference executor service run by every peer.
//!
//! Serves `GET /ram` and `POST /execute_function` over axum. Requests name an
//! entry of the closed [`Operation`](crate::job::Operation) registry, no code
//! is ever shipped, but the service still trusts whoever can reach it and must
//! only be exposed on a private network.

mod memory;
mod ops;

use std::{io, sync::Arc};

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use log::{debug, warn};
use serde_json::json;
use tokio::net::TcpListener;

use crate::{
    cache::{ResultCache, fingerprint},
    job::{ExecuteRequest, ExecuteResponse, RamReport},
};

pub use memory::{parse_meminfo, read_meminfo};
pub use ops::{OpError, evaluate};

/// Where `/ram` gets its numbers from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemorySource {
    /// The host's `/proc/meminfo`.
    System,
    /// A fixed report, for tests and simulations.
    Fixed(RamReport),
}

impl MemorySource {
    async fn report(self) -> io::Result<RamReport> {
        match self {
            Self::System => read_meminfo().await,
            Self::Fixed(report) => Ok(report),
        }
    }
}

/// State shared by the peer handlers.
#[derive(Debug, Clone)]
pub struct PeerState {
    cache: Arc<ResultCache>,
    memory: MemorySource,
}

impl PeerState {
    /// Creates a new `PeerState` with an empty cache.
    pub fn new(memory: MemorySource) -> Self {
        Self {
            cache: Arc::default(),
            memory,
        }
    }

    /// The cache consulted by requests carrying `use_cache`.
    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }
}

/// Builds the peer router, serving jobs on `endpoint`.
pub fn router(state: PeerState, endpoint: &str) -> Router {
    Router::new()
        .route("/ram", get(ram))
        .route(endpoint, post(execute))
        .with_state(state)
}

/// Serves the peer router on `listener` until the connection loop fails.
pub async fn serve(listener: TcpListener, state: PeerState, endpoint: &str) -> io::Result<()> {
    axum::serve(listener, router(state, endpoint)).await
}

async fn ram(State(state): State<PeerState>) -> Response {
    match state.memory.report().await {
        Ok(report) => Json(report).into_response(),
        Err(e) => {
            warn!("cannot read memory report: {e}");
            let body = json!({ "error": e.to_string() });
            (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
        }
    }
}

async fn execute(
    State(state): State<PeerState>,
    Json(request): Json<ExecuteRequest>,
) -> (StatusCode, Json<ExecuteResponse>) {
    let ExecuteRequest {
        func,
        inputs,
        matrix,
        use_cache,
    } = request;

    if matrix != func.is_matrix() {
        let msg = format!("matrix flag is {matrix} but {func} expects {}", func.is_matrix());
        return (StatusCode::BAD_REQUEST, Json(ExecuteResponse::err(msg)));
    }

    let key = use_cache.then(|| fingerprint(func, &inputs));
    if let Some(value) = key.as_deref().and_then(|key| state.cache.get(key)) {
        debug!(operation = func.name(); "served from peer cache");
        return (StatusCode::OK, Json(ExecuteResponse::ok(value)));
    }

    match tokio::task::spawn_blocking(move || evaluate(func, &inputs)).await {
        Ok(Ok(value)) => {
            if let Some(key) = key {
                state.cache.set(key, value.clone());
            }
            (StatusCode::OK, Json(ExecuteResponse::ok(value)))
        }
        Ok(Err(e)) => {
            debug!(operation = func.name(); "operation rejected: {e}");
            (StatusCode::UNPROCESSABLE_ENTITY, Json(ExecuteResponse::err(e.to_string())))
        }
        Err(e) => {
            warn!(operation = func.name(); "evaluation task died: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(ExecuteResponse::err("evaluation failed")))
        }
    }
}
