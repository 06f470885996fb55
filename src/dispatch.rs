use std::{
    collections::{HashMap, HashSet},
    num::NonZeroUsize,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
};

use log::{debug, info, warn};
use serde::Serialize;
use serde_json::Value;
use tokio::{sync::Semaphore, task::JoinSet};
use tokio_util::sync::CancellationToken;

use crate::{
    cache::{ResultCache, fingerprint},
    client::PeerClient,
    config::EngineConfig,
    device::Device,
    error::{DispatchErrorKind, EngineError, Result},
    job::{ExecuteRequest, Job},
    partition::Partition,
    retry::{RetryPolicy, retry},
};

/// What a device produced for its partition once retries are exhausted.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(Value),
    Failure {
        kind: DispatchErrorKind,
        detail: String,
    },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// The result value, if the partition succeeded.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Success(value) => Some(value),
            Self::Failure { .. } => None,
        }
    }
}

/// The single, final record for one partition sent to one device.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchResult {
    /// The origin index of the partition this result belongs to.
    pub origin: usize,
    /// The address of the device that ran it.
    pub device: String,
    /// Attempts made, `0` when the result came from the local cache.
    pub attempts: u32,
    pub outcome: Outcome,
}

impl DispatchResult {
    fn failure(
        origin: usize,
        device: String,
        attempts: u32,
        kind: DispatchErrorKind,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            origin,
            device,
            attempts,
            outcome: Outcome::Failure {
                kind,
                detail: detail.into(),
            },
        }
    }
}

/// Fans a job out over a set of devices and collects one result per partition.
pub struct Dispatcher {
    client: PeerClient,
    policy: RetryPolicy,
    max_workers: NonZeroUsize,
    cache: Arc<ResultCache>,
}

impl Dispatcher {
    /// Creates a new `Dispatcher`.
    ///
    /// # Arguments
    /// * `client` - The HTTP client used to reach the devices.
    /// * `policy` - The per-device retry bounds.
    /// * `max_workers` - Cap on the amount of partitions in flight at once.
    /// * `cache` - The engine's cache, used by memoizing jobs.
    pub fn new(
        client: PeerClient,
        policy: RetryPolicy,
        max_workers: NonZeroUsize,
        cache: Arc<ResultCache>,
    ) -> Self {
        Self {
            client,
            policy,
            max_workers,
            cache,
        }
    }

    /// Creates a new `Dispatcher` out of the engine configuration.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if `config` does not validate or the HTTP
    /// client cannot be built.
    pub fn from_config(config: &EngineConfig, cache: Arc<ResultCache>) -> Result<Self> {
        config.validate()?;

        Ok(Self::new(
            PeerClient::new(config)?,
            RetryPolicy::from_config(config),
            config.max_workers,
            cache,
        ))
    }

    /// Runs `job` over `partitions`, sending partition `i` of the list to `devices[i]`.
    ///
    /// Devices beyond the amount of partitions stay idle.
    ///
    /// # Returns
    /// Exactly one `DispatchResult` per partition, sorted by origin.
    ///
    /// # Errors
    /// See [`Dispatcher::run_distributed_with_cancel`].
    pub async fn run_distributed<T: Serialize>(
        &self,
        job: &Job,
        partitions: Vec<Partition<T>>,
        devices: &[Device],
    ) -> Result<Vec<DispatchResult>> {
        self.run_distributed_with_cancel(job, partitions, devices, CancellationToken::new())
            .await
    }

    /// Same as [`Dispatcher::run_distributed`] but stops every in-flight call
    /// once `cancel` fires.
    ///
    /// Partitions interrupted by the cancellation are still reported, as a
    /// `Failure` of kind `Cancelled`.
    ///
    /// # Errors
    /// Nothing is dispatched if this fails:
    /// * `NoDevices` if there are partitions but no devices.
    /// * `NotEnoughDevices` if there are more partitions than devices.
    /// * `DuplicateOrigin` if two partitions share an origin.
    /// * `Serialization` if a partition cannot be turned into JSON.
    pub async fn run_distributed_with_cancel<T: Serialize>(
        &self,
        job: &Job,
        partitions: Vec<Partition<T>>,
        devices: &[Device],
        cancel: CancellationToken,
    ) -> Result<Vec<DispatchResult>> {
        if partitions.is_empty() {
            return Ok(Vec::new());
        }
        if devices.is_empty() {
            return Err(EngineError::NoDevices);
        }
        if partitions.len() > devices.len() {
            return Err(EngineError::NotEnoughDevices {
                partitions: partitions.len(),
                devices: devices.len(),
            });
        }

        let mut seen = HashSet::with_capacity(partitions.len());
        let mut payloads = Vec::with_capacity(partitions.len());
        for partition in &partitions {
            if !seen.insert(partition.origin()) {
                return Err(EngineError::DuplicateOrigin(partition.origin()));
            }
            payloads.push((partition.origin(), serde_json::to_value(partition.data())?));
        }

        let workers = partitions.len().min(self.max_workers.get());
        info!(
            operation = job.operation().name(),
            partitions = partitions.len(),
            workers = workers;
            "dispatching job"
        );

        let semaphore = Arc::new(Semaphore::new(workers));
        let mut tasks = JoinSet::new();
        let mut pending = HashMap::with_capacity(payloads.len());
        let mut results = Vec::with_capacity(payloads.len());

        for ((origin, inputs), device) in payloads.into_iter().zip(devices) {
            let address = device.address().to_string();
            let key = job.memoizes().then(|| fingerprint(job.operation(), &inputs));

            if let Some(value) = key.as_deref().and_then(|key| self.cache.get(key)) {
                debug!(origin = origin; "partition served from cache");
                results.push(DispatchResult {
                    origin,
                    device: address,
                    attempts: 0,
                    outcome: Outcome::Success(value),
                });
                continue;
            }

            pending.insert(origin, address.clone());
            tasks.spawn(run_partition(PartitionTask {
                origin,
                address,
                request: job.request(inputs),
                client: self.client.clone(),
                policy: self.policy,
                semaphore: Arc::clone(&semaphore),
                cancel: cancel.clone(),
                memo: key.map(|key| (key, Arc::clone(&self.cache))),
            }));
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => {
                    pending.remove(&result.origin);
                    results.push(result);
                }
                Err(e) => warn!("dispatch task died: {e}"),
            }
        }

        // Whatever is still pending belongs to a task that panicked.
        for (origin, device) in pending {
            results.push(DispatchResult::failure(
                origin,
                device,
                0,
                DispatchErrorKind::Internal,
                "dispatch task died",
            ));
        }

        results.sort_by_key(|r| r.origin);

        let failed = results.iter().filter(|r| !r.outcome.is_success()).count();
        info!(
            operation = job.operation().name(),
            succeeded = results.len() - failed,
            failed = failed;
            "job dispatched"
        );

        Ok(results)
    }
}

/// Everything a spawned task owns to run one partition.
struct PartitionTask {
    origin: usize,
    address: String,
    request: ExecuteRequest,
    client: PeerClient,
    policy: RetryPolicy,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    memo: Option<(String, Arc<ResultCache>)>,
}

async fn run_partition(task: PartitionTask) -> DispatchResult {
    let PartitionTask {
        origin,
        address,
        request,
        client,
        policy,
        semaphore,
        cancel,
        memo,
    } = task;

    let _permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            let kind = DispatchErrorKind::Cancelled;
            return DispatchResult::failure(origin, address, 0, kind, "run cancelled");
        }
        permit = semaphore.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(e) => {
                let kind = DispatchErrorKind::Internal;
                return DispatchResult::failure(origin, address, 0, kind, e.to_string());
            }
        },
    };

    let counter = AtomicU32::new(0);
    let attempts = &counter;
    let (client, address_ref, request_ref) = (&client, address.as_str(), &request);

    let run = retry(&policy, |n| async move {
        attempts.store(n, Ordering::SeqCst);
        let res = client.execute(address_ref, request_ref).await;
        if let Err(e) = &res {
            debug!(device = address_ref, origin = origin, attempt = n; "attempt failed: {e}");
        }
        res
    });

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            let made = counter.load(Ordering::SeqCst);
            let kind = DispatchErrorKind::Cancelled;
            DispatchResult::failure(origin, address.clone(), made, kind, "run cancelled")
        }
        attempted = run => match attempted.result {
            Ok(value) => {
                if let Some((key, cache)) = memo {
                    cache.set(key, value.clone());
                }
                DispatchResult {
                    origin,
                    device: address.clone(),
                    attempts: attempted.attempts,
                    outcome: Outcome::Success(value),
                }
            }
            Err(e) => {
                let attempts = attempted.attempts;
                warn!(device = address.as_str(), origin = origin, attempts = attempts; "device failed: {e}");
                DispatchResult::failure(origin, address.clone(), attempts, e.kind(), e.to_string())
            }
        },
    }
}
