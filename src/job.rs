//! Jobs and the JSON shapes exchanged with peer executors.
//!
//! A job never ships executable code: it names one entry of a closed
//! [`Operation`] registry that every peer knows how to run. The serialized
//! operation tag travels in the `func` field of the request.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The closed set of operations a peer can execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Sum of every number in the partition.
    Sum,
    /// Sum of the square of every number in the partition.
    SumOfSquares,
    /// Amount of elements in the partition.
    Count,
    /// Smallest number in the partition, `null` if empty.
    Min,
    /// Largest number in the partition, `null` if empty.
    Max,
    /// Echoes the partition back.
    Identity,
    /// Dense product of the two matrices in the partition.
    MatrixMultiply,
    /// Element-wise sum of the two matrices in the partition.
    MatrixAdd,
    /// Element-wise product of the two matrices in the partition.
    Hadamard,
}

impl Operation {
    /// Whether the operation takes a pair of matrices as its input.
    pub fn is_matrix(self) -> bool {
        matches!(self, Self::MatrixMultiply | Self::MatrixAdd | Self::Hadamard)
    }

    /// The wire name of the operation.
    pub fn name(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::SumOfSquares => "sum_of_squares",
            Self::Count => "count",
            Self::Min => "min",
            Self::Max => "max",
            Self::Identity => "identity",
            Self::MatrixMultiply => "matrix_multiply",
            Self::MatrixAdd => "matrix_add",
            Self::Hadamard => "hadamard",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A unit of work to be fanned out over a set of devices.
///
/// Created once per distributed run and dropped with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Job {
    operation: Operation,
    memoize: bool,
    remote_cache: bool,
}

impl Job {
    /// Creates a new `Job`.
    ///
    /// # Arguments
    /// * `operation` - The operation every device runs over its partition.
    ///
    /// # Returns
    /// A job with local memoization off. Peer side caching is only on for
    /// matrix operations.
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            memoize: false,
            remote_cache: operation.is_matrix(),
        }
    }

    /// Makes the dispatcher consult and fill the engine's cache using a
    /// fingerprint of the operation and each partition.
    pub fn memoize(mut self, memoize: bool) -> Self {
        self.memoize = memoize;
        self
    }

    /// Sets the `use_cache` hint forwarded to every peer.
    pub fn remote_cache(mut self, remote_cache: bool) -> Self {
        self.remote_cache = remote_cache;
        self
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn is_matrix(&self) -> bool {
        self.operation.is_matrix()
    }

    pub fn memoizes(&self) -> bool {
        self.memoize
    }

    /// Builds the request body for one partition.
    pub fn request(&self, inputs: Value) -> ExecuteRequest {
        ExecuteRequest {
            func: self.operation,
            inputs,
            matrix: self.is_matrix(),
            use_cache: self.remote_cache,
        }
    }
}

/// Body of `POST /execute_function`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub func: Operation,
    pub inputs: Value,
    #[serde(default)]
    pub matrix: bool,
    #[serde(default, alias = "useCache")]
    pub use_cache: bool,
}

/// Body answered by `POST /execute_function`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExecuteResponse {
    #[serde(default)]
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecuteResponse {
    pub fn ok(result: Value) -> Self {
        Self {
            result,
            error: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            result: Value::Null,
            error: Some(msg.into()),
        }
    }
}

/// Body answered by `GET /ram`, sizes in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RamReport {
    #[serde(alias = "totalRamBytes")]
    pub total_ram: u64,
    #[serde(alias = "availableRamBytes")]
    pub available_ram: u64,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn request_carries_operation_tag_and_flags() {
        let job = Job::new(Operation::MatrixMultiply).remote_cache(false);
        let req = job.request(json!([[[1.0]], [[2.0]]]));

        let body = serde_json::to_value(&req).unwrap();
        assert_eq!(body["func"], "matrix_multiply");
        assert_eq!(body["matrix"], true);
        assert_eq!(body["use_cache"], false);
    }

    #[test]
    fn peer_cache_defaults_to_matrix_jobs_only() {
        let flat = Job::new(Operation::Identity).request(json!([1, 2]));
        assert!(!flat.use_cache);

        let matrix = Job::new(Operation::MatrixAdd).request(json!([[[1.0]], [[2.0]]]));
        assert!(matrix.use_cache);

        let forced = Job::new(Operation::Sum).remote_cache(true).request(json!([1]));
        assert!(forced.use_cache);
    }

    #[test]
    fn request_accepts_camel_case_cache_flag() {
        let req: ExecuteRequest =
            serde_json::from_value(json!({ "func": "sum", "inputs": [1, 2], "useCache": true }))
                .unwrap();

        assert_eq!(req.func, Operation::Sum);
        assert!(req.use_cache);
        assert!(!req.matrix);
    }

    #[test]
    fn unknown_operations_are_rejected() {
        let res = serde_json::from_value::<ExecuteRequest>(json!({ "func": "rm -rf", "inputs": [] }));
        assert!(res.is_err());
    }

    #[test]
    fn ram_report_accepts_both_spellings() {
        let snake: RamReport =
            serde_json::from_value(json!({ "total_ram": 8, "available_ram": 4 })).unwrap();
        let camel: RamReport =
            serde_json::from_value(json!({ "totalRamBytes": 8, "availableRamBytes": 4 })).unwrap();

        assert_eq!(snake, camel);
    }

    #[test]
    fn operation_names_match_serde() {
        for op in [
            Operation::Sum,
            Operation::SumOfSquares,
            Operation::Count,
            Operation::Min,
            Operation::Max,
            Operation::Identity,
            Operation::MatrixMultiply,
            Operation::MatrixAdd,
            Operation::Hadamard,
        ] {
            assert_eq!(serde_json::to_value(op).unwrap(), json!(op.name()));
        }
    }
}
