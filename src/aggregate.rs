//! Recombination of per-device results.
//!
//! Results are always placed by their origin tag. Nothing here assumes the
//! order in which devices finished.

use std::collections::HashSet;

use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{
    dispatch::{DispatchResult, Outcome},
    error::{EngineError, Result},
    partition::{BlockGrid, Matrix, NestedMatrix, from_nested},
};

/// Successful flat results in origin order, along with the origins that failed.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatResults {
    values: Vec<(usize, Value)>,
    missing: Vec<usize>,
    failures: Vec<String>,
}

impl FlatResults {
    /// The successful `(origin, value)` pairs, sorted by origin.
    pub fn values(&self) -> &[(usize, Value)] {
        &self.values
    }

    /// Origins without a result, sorted.
    pub fn missing(&self) -> &[usize] {
        &self.missing
    }

    /// One line per failed origin describing why it failed.
    pub fn failures(&self) -> &[String] {
        &self.failures
    }

    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    /// Drops the origin tags, keeping the order.
    ///
    /// # Errors
    /// `PartialResult` if any origin is missing.
    pub fn into_complete(self) -> Result<Vec<Value>> {
        if !self.is_complete() {
            return Err(EngineError::PartialResult {
                missing: self.missing,
                failures: self.failures,
            });
        }
        Ok(self.values.into_iter().map(|(_, value)| value).collect())
    }

    /// Decodes every successful value as a `T`.
    ///
    /// # Errors
    /// `MalformedResult` naming the first origin whose value is not a `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        self.values
            .iter()
            .map(|(origin, value)| {
                T::deserialize(value).map_err(|e| EngineError::MalformedResult {
                    origin: *origin,
                    detail: e.to_string(),
                })
            })
            .collect()
    }
}

/// Orders flat results by origin and separates out the failures.
///
/// # Errors
/// `DuplicateOrigin` if two results claim the same origin.
pub fn combine_flat(results: &[DispatchResult]) -> Result<FlatResults> {
    let mut sorted: Vec<&DispatchResult> = results.iter().collect();
    sorted.sort_by_key(|r| r.origin);
    ensure_unique(&sorted)?;

    let mut flat = FlatResults {
        values: Vec::with_capacity(sorted.len()),
        missing: Vec::new(),
        failures: Vec::new(),
    };

    for result in sorted {
        match &result.outcome {
            Outcome::Success(value) => flat.values.push((result.origin, value.clone())),
            Outcome::Failure { .. } => {
                flat.missing.push(result.origin);
                flat.failures.push(describe_failure(result));
            }
        }
    }

    Ok(flat)
}

/// Rebuilds a `dim x dim` matrix from one result block per origin.
///
/// The amount of results is the amount of blocks, so it must be a perfect
/// square dividing `dim` evenly.
///
/// # Errors
/// * `PartialResult` if any block failed, no partial matrix is ever built.
/// * `MalformedResult` if an origin is out of range or a block has the wrong shape.
/// * `DuplicateOrigin` if two results claim the same origin.
/// * The grid errors of [`BlockGrid::new`].
pub fn combine_matrix_blocks(results: &[DispatchResult], dim: usize) -> Result<Matrix> {
    let grid = BlockGrid::new(dim, results.len())?;

    let failed: Vec<&DispatchResult> = results.iter().filter(|r| !r.outcome.is_success()).collect();
    if !failed.is_empty() {
        let mut missing: Vec<usize> = failed.iter().map(|r| r.origin).collect();
        missing.sort_unstable();
        return Err(EngineError::PartialResult {
            missing,
            failures: failed.into_iter().map(describe_failure).collect(),
        });
    }

    let bs = grid.block_size();
    let mut out = Matrix::zeros((dim, dim));
    let mut seen = HashSet::with_capacity(results.len());

    for result in results {
        let origin = result.origin;
        if origin >= grid.len() {
            return Err(EngineError::MalformedResult {
                origin,
                detail: format!("origin outside of a {}-block grid", grid.len()),
            });
        }
        if !seen.insert(origin) {
            return Err(EngineError::DuplicateOrigin(origin));
        }

        let Outcome::Success(value) = &result.outcome else {
            continue;
        };
        let block = decode_block(origin, value)?;
        if block.dim() != (bs, bs) {
            return Err(EngineError::MalformedResult {
                origin,
                detail: format!("expected a {bs}x{bs} block, got {:?}", block.dim()),
            });
        }

        grid.place(&mut out, grid.coord(origin), &block);
    }

    Ok(out)
}

fn decode_block(origin: usize, value: &Value) -> Result<Matrix> {
    let malformed = |detail: String| EngineError::MalformedResult { origin, detail };

    let rows = NestedMatrix::deserialize(value).map_err(|e| malformed(e.to_string()))?;
    from_nested(rows).map_err(|e| malformed(e.to_string()))
}

fn ensure_unique(sorted: &[&DispatchResult]) -> Result<()> {
    match sorted.windows(2).find(|w| w[0].origin == w[1].origin) {
        Some(w) => Err(EngineError::DuplicateOrigin(w[0].origin)),
        None => Ok(()),
    }
}

fn describe_failure(result: &DispatchResult) -> String {
    match &result.outcome {
        Outcome::Failure { kind, detail } => format!(
            "origin {} on {} after {} attempt(s): {kind}: {detail}",
            result.origin, result.device, result.attempts
        ),
        Outcome::Success(_) => format!("origin {} succeeded", result.origin),
    }
}
