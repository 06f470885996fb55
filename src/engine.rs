use std::sync::Arc;

use log::info;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::{
    aggregate::{FlatResults, combine_flat, combine_matrix_blocks},
    cache::ResultCache,
    client::PeerClient,
    config::EngineConfig,
    device::{Device, DeviceDiscovery, DiscoveryOptions, NetworkScanner},
    dispatch::{DispatchResult, Dispatcher},
    error::{EngineError, Result},
    job::Job,
    partition::{Matrix, Partition, Splittable, split_collection, split_matrix_pair},
    retry::RetryPolicy,
};

/// The distribution engine.
///
/// Owns one configuration, one result cache and the components built from
/// them. Two engines never share state.
pub struct RamSharing {
    config: EngineConfig,
    cache: Arc<ResultCache>,
    discovery: DeviceDiscovery,
    dispatcher: Dispatcher,
}

impl RamSharing {
    /// Creates a new `RamSharing` engine.
    ///
    /// # Arguments
    /// * `config` - The engine configuration.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if `config` does not validate.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let client = PeerClient::new(&config)?;
        let cache: Arc<ResultCache> = Arc::default();
        let discovery = DeviceDiscovery::new(client.clone());
        let dispatcher = Dispatcher::new(
            client,
            RetryPolicy::from_config(&config),
            config.max_workers,
            Arc::clone(&cache),
        );

        Ok(Self {
            config,
            cache,
            discovery,
            dispatcher,
        })
    }

    /// Sets the scanner used by discovery passes without a candidate list.
    pub fn with_scanner(mut self, scanner: Arc<dyn NetworkScanner>) -> Self {
        self.discovery = self.discovery.with_scanner(scanner);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    /// Runs a discovery pass, see [`DeviceDiscovery::discover`].
    pub async fn get_available_devices(
        &self,
        candidates: Option<&[String]>,
        options: &DiscoveryOptions,
    ) -> Vec<Device> {
        self.discovery.discover(candidates, options).await
    }

    /// Dispatches already built partitions, see [`Dispatcher::run_distributed`].
    pub async fn run_distributed<T: Serialize>(
        &self,
        job: &Job,
        partitions: Vec<Partition<T>>,
        devices: &[Device],
    ) -> Result<Vec<DispatchResult>> {
        self.dispatcher.run_distributed(job, partitions, devices).await
    }

    /// See [`Dispatcher::run_distributed_with_cancel`].
    pub async fn run_distributed_with_cancel<T: Serialize>(
        &self,
        job: &Job,
        partitions: Vec<Partition<T>>,
        devices: &[Device],
        cancel: CancellationToken,
    ) -> Result<Vec<DispatchResult>> {
        self.dispatcher
            .run_distributed_with_cancel(job, partitions, devices, cancel)
            .await
    }

    /// Splits `input` over `devices`, runs `job` and orders the partial results.
    ///
    /// The caller applies the final reduction over the returned values.
    ///
    /// # Errors
    /// * `JobMismatch` if `job` takes matrices.
    /// * `NoDevices` if `devices` is empty.
    /// * Any error of [`Dispatcher::run_distributed`].
    pub async fn run_flat<C>(&self, job: &Job, input: C, devices: &[Device]) -> Result<FlatResults>
    where
        C: Splittable + Serialize,
    {
        if job.is_matrix() {
            return Err(EngineError::JobMismatch(
                "matrix operations go through run_matrix",
            ));
        }
        if devices.is_empty() {
            return Err(EngineError::NoDevices);
        }

        let partitions = split_collection(input, devices.len())?;
        let results = self.run_distributed(job, partitions, devices).await?;
        combine_flat(&results)
    }

    /// Runs a block matrix job of `a` and `b` over `devices`.
    ///
    /// Uses the largest `k x k` block grid that fits both the devices and the
    /// matrix dimension. Extra devices stay idle.
    ///
    /// # Errors
    /// * `JobMismatch` if `job` does not take matrices.
    /// * `NoDevices` if `devices` is empty.
    /// * The shape errors of [`split_matrix_pair`].
    /// * `PartialResult` if any block failed.
    pub async fn run_matrix(
        &self,
        job: &Job,
        a: &Matrix,
        b: &Matrix,
        devices: &[Device],
    ) -> Result<Matrix> {
        if !job.is_matrix() {
            return Err(EngineError::JobMismatch(
                "flat operations go through run_flat",
            ));
        }
        if devices.is_empty() {
            return Err(EngineError::NoDevices);
        }

        let dim = a.nrows();
        let per_side = blocks_per_side(dim, devices.len());
        let blocks = per_side * per_side;

        let split = split_matrix_pair(a, b, blocks)?;
        let operands = split.operands(job.operation())?;
        info!(
            operation = job.operation().name(),
            dim = dim,
            blocks = blocks,
            devices = devices.len();
            "running matrix job"
        );

        let results = self
            .run_distributed(job, operands, &devices[..blocks])
            .await?;
        combine_matrix_blocks(&results, dim)
    }

    pub fn get_cached_value(&self, key: &str) -> Option<Value> {
        self.cache.get(key)
    }

    pub fn update_cache(&self, key: impl Into<String>, value: Value) {
        self.cache.set(key, value);
    }
}

/// The largest `k` with `k * k <= devices` that divides `dim`.
fn blocks_per_side(dim: usize, devices: usize) -> usize {
    (1..)
        .take_while(|k| k * k <= devices)
        .filter(|k| dim % k == 0)
        .last()
        .unwrap_or(1)
}
