use std::{cmp::Ordering, fmt};

use serde::Deserialize;
use serde_json::{Number, Value};

use crate::{
    job::Operation,
    partition::{NestedMatrix, from_nested, to_nested},
};

/// Why an operation could not be evaluated over its inputs.
#[derive(Debug, Clone, PartialEq)]
pub enum OpError {
    /// The inputs do not have the shape the operation takes.
    InvalidInput(String),
    /// Matrix operands of incompatible dimensions.
    Shape(String),
    /// An integer result that does not fit.
    Overflow,
    /// A float result that JSON cannot carry.
    NonFinite,
}

impl fmt::Display for OpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            Self::Shape(msg) => write!(f, "incompatible operands: {msg}"),
            Self::Overflow => write!(f, "integer overflow"),
            Self::NonFinite => write!(f, "result is not a finite number"),
        }
    }
}

impl std::error::Error for OpError {}

/// Evaluates `op` over one partition.
///
/// Flat operations take a JSON array, or an object whose values are used.
/// Integers are accumulated exactly and only fall back to floats when some
/// element is not an integer. Matrix operations take a `[left, right]` pair
/// of nested row arrays.
///
/// # Returns
/// The JSON result, `null` for the min or max of nothing.
pub fn evaluate(op: Operation, inputs: &Value) -> Result<Value, OpError> {
    match op {
        Operation::Identity => Ok(inputs.clone()),
        Operation::Count => Ok(Value::from(elements(inputs)?.len())),
        Operation::Sum => reduce(inputs, |acc, x| acc.checked_add(x), |acc, x| acc + x),
        Operation::SumOfSquares => reduce(
            inputs,
            |acc, x| x.checked_mul(x).and_then(|sq| acc.checked_add(sq)),
            |acc, x| acc + x * x,
        ),
        Operation::Min => extreme(inputs, Ordering::Less),
        Operation::Max => extreme(inputs, Ordering::Greater),
        Operation::MatrixMultiply | Operation::MatrixAdd | Operation::Hadamard => {
            matrix(op, inputs)
        }
    }
}

enum Numbers {
    Ints(Vec<i128>),
    Floats(Vec<f64>),
}

fn elements(inputs: &Value) -> Result<Vec<&Value>, OpError> {
    match inputs {
        Value::Array(items) => Ok(items.iter().collect()),
        Value::Object(map) => Ok(map.values().collect()),
        other => Err(OpError::InvalidInput(format!(
            "expected an array or an object, got {other}"
        ))),
    }
}

fn numbers(inputs: &Value) -> Result<Numbers, OpError> {
    let items = elements(inputs)?;

    let ints = items
        .iter()
        .map(|v| v.as_i64().map(i128::from))
        .collect::<Option<Vec<_>>>();
    if let Some(ints) = ints {
        return Ok(Numbers::Ints(ints));
    }

    items
        .iter()
        .map(|v| v.as_f64())
        .collect::<Option<Vec<_>>>()
        .map(Numbers::Floats)
        .ok_or_else(|| OpError::InvalidInput("every element must be a number".into()))
}

fn reduce<I, F>(inputs: &Value, int_step: I, float_step: F) -> Result<Value, OpError>
where
    I: Fn(i128, i128) -> Option<i128>,
    F: Fn(f64, f64) -> f64,
{
    match numbers(inputs)? {
        Numbers::Ints(xs) => {
            let total = xs
                .into_iter()
                .try_fold(0i128, &int_step)
                .ok_or(OpError::Overflow)?;
            int_value(total)
        }
        Numbers::Floats(xs) => float_value(xs.into_iter().fold(0.0, float_step)),
    }
}

/// Keeps the element that compares as `wanted` against every other one.
fn extreme(inputs: &Value, wanted: Ordering) -> Result<Value, OpError> {
    match numbers(inputs)? {
        Numbers::Ints(xs) => {
            let best = xs
                .into_iter()
                .reduce(|a, b| if b.cmp(&a) == wanted { b } else { a });
            best.map_or(Ok(Value::Null), int_value)
        }
        Numbers::Floats(xs) => {
            let best = xs
                .into_iter()
                .reduce(|a, b| if b.partial_cmp(&a) == Some(wanted) { b } else { a });
            best.map_or(Ok(Value::Null), float_value)
        }
    }
}

fn int_value(n: i128) -> Result<Value, OpError> {
    if let Ok(n) = i64::try_from(n) {
        return Ok(Value::from(n));
    }
    u64::try_from(n).map(Value::from).map_err(|_| OpError::Overflow)
}

fn float_value(x: f64) -> Result<Value, OpError> {
    Number::from_f64(x).map(Value::Number).ok_or(OpError::NonFinite)
}

fn matrix(op: Operation, inputs: &Value) -> Result<Value, OpError> {
    let (left, right) = <(NestedMatrix, NestedMatrix)>::deserialize(inputs)
        .map_err(|e| OpError::InvalidInput(format!("expected a pair of matrices: {e}")))?;

    let a = from_nested(left).map_err(|e| OpError::InvalidInput(e.to_string()))?;
    let b = from_nested(right).map_err(|e| OpError::InvalidInput(e.to_string()))?;

    let out = match op {
        Operation::MatrixMultiply => {
            if a.ncols() != b.nrows() {
                return Err(OpError::Shape(format!("{:?} x {:?}", a.dim(), b.dim())));
            }
            a.dot(&b)
        }
        _ if a.dim() != b.dim() => {
            return Err(OpError::Shape(format!("{:?} vs {:?}", a.dim(), b.dim())));
        }
        Operation::MatrixAdd => a + b,
        Operation::Hadamard => a * b,
        _ => return Err(OpError::InvalidInput(format!("{op} is not a matrix operation"))),
    };

    if out.iter().any(|x| !x.is_finite()) {
        return Err(OpError::NonFinite);
    }
    Ok(serde_json::json!(to_nested(out.view())))
}
