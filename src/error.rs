use std::{error::Error, fmt, io};

/// The engine's result type.
pub type Result<T> = std::result::Result<T, EngineError>;

/// All errors that can abort a discovery, partitioning, dispatch or aggregation call.
///
/// Per-device dispatch failures are not errors at this level, they travel inside
/// `DispatchResult`s as a `DispatchErrorKind` so the caller can decide the policy.
#[derive(Debug)]
pub enum EngineError {
    /// Invalid configuration, caught before any network traffic.
    InvalidConfig(String),
    /// A collection was asked to be split into zero pieces.
    InvalidPartitionCount,
    /// A matrix operand is not square.
    NotSquare { rows: usize, cols: usize },
    /// Both matrix operands must share the same dimension.
    DimensionMismatch { left: usize, right: usize },
    /// Matrix jobs need a perfect square amount of blocks.
    NotPerfectSquare(usize),
    /// The matrix dimension is not evenly divisible into `blocks_per_side` blocks.
    BlockSizeMismatch { dim: usize, blocks_per_side: usize },
    /// No device was given to run a job on.
    NoDevices,
    /// There are more partitions than devices to run them on.
    NotEnoughDevices { partitions: usize, devices: usize },
    /// The job was handed an input of the wrong shape.
    JobMismatch(&'static str),
    /// A partition payload could not be serialized, nothing was dispatched.
    Serialization(serde_json::Error),
    /// Fewer successful results than partitions sent.
    PartialResult {
        missing: Vec<usize>,
        failures: Vec<String>,
    },
    /// A device returned a value that does not fit the expected result shape.
    MalformedResult { origin: usize, detail: String },
    /// The same origin index was produced twice for a single job.
    DuplicateOrigin(usize),
    /// Assembling matrix blocks failed.
    Shape(ndarray::ShapeError),
    /// An underlying I/O error not covered by the above variants.
    Io(io::Error),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Self::InvalidPartitionCount => write!(f, "cannot split an input into 0 partitions"),
            Self::NotSquare { rows, cols } => {
                write!(f, "matrix must be square, got {rows}x{cols}")
            }
            Self::DimensionMismatch { left, right } => {
                write!(f, "matrix dimensions differ: {left} vs {right}")
            }
            Self::NotPerfectSquare(n) => {
                write!(f, "matrix jobs need a perfect square amount of blocks, got {n}")
            }
            Self::BlockSizeMismatch {
                dim,
                blocks_per_side,
            } => write!(
                f,
                "dimension {dim} cannot be split evenly into {blocks_per_side} blocks per side"
            ),
            Self::NoDevices => write!(f, "no devices available to run the job"),
            Self::NotEnoughDevices {
                partitions,
                devices,
            } => write!(
                f,
                "{partitions} partition(s) cannot be run on {devices} device(s)"
            ),
            Self::JobMismatch(msg) => write!(f, "job mismatch: {msg}"),
            Self::Serialization(e) => write!(f, "serialization error: {e}"),
            Self::PartialResult { missing, failures } => {
                write!(f, "missing results for origin(s) {missing:?}")?;
                for failure in failures {
                    write!(f, "; {failure}")?;
                }
                Ok(())
            }
            Self::MalformedResult { origin, detail } => {
                write!(f, "malformed result for origin {origin}: {detail}")
            }
            Self::DuplicateOrigin(origin) => write!(f, "origin {origin} appears more than once"),
            Self::Shape(e) => write!(f, "shape error: {e}"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for EngineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Serialization(e) => Some(e),
            Self::Shape(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e)
    }
}

impl From<ndarray::ShapeError> for EngineError {
    fn from(e: ndarray::ShapeError) -> Self {
        Self::Shape(e)
    }
}

impl From<io::Error> for EngineError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<EngineError> for io::Error {
    fn from(value: EngineError) -> Self {
        match value {
            EngineError::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

/// Why a single device failed to produce a result for its partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchErrorKind {
    /// Connection refused, reset, DNS or any other transport failure.
    Network,
    /// The call exceeded its timeout.
    Timeout,
    /// The peer answered with a non-success status or an error payload.
    Remote { status: u16 },
    /// The peer answered but the body could not be decoded.
    Decode,
    /// The run was cancelled while this partition was in flight.
    Cancelled,
    /// The dispatch task itself died.
    Internal,
}

impl fmt::Display for DispatchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network error"),
            Self::Timeout => write!(f, "timeout"),
            Self::Remote { status } => write!(f, "remote error ({status})"),
            Self::Decode => write!(f, "decode error"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Internal => write!(f, "internal error"),
        }
    }
}
