//! A commutative integer counter.
//!
//! The payload is an integer, the op is a signed delta. Addition commutes, so
//! `transform` is the identity and the convergence property holds trivially.
//! Useful as the minimal correctness vehicle for the kernel and the commit
//! loop.

use serde_json::{json, Value};

use crate::error::OtError;
use crate::types::{OtType, Side};

pub struct Counter;

fn as_delta(op: &Value) -> Result<i64, OtError> {
    op.as_i64()
        .ok_or_else(|| OtError::BadlyFormed(format!("counter op must be an integer, got {op}")))
}

fn as_count(payload: &Value) -> Result<i64, OtError> {
    payload.as_i64().ok_or_else(|| {
        OtError::BadlyFormed(format!("counter payload must be an integer, got {payload}"))
    })
}

impl OtType for Counter {
    fn name(&self) -> &'static str {
        "counter"
    }

    fn uri(&self) -> &'static str {
        "https://tandem.rs/types/counter"
    }

    fn create(&self, data: Option<&Value>) -> Result<Value, OtError> {
        let initial = match data {
            // Truncate toward zero; anything non-numeric starts at 0.
            Some(v) => v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)).unwrap_or(0),
            None => 0,
        };
        Ok(json!(initial))
    }

    fn apply(&self, payload: &Value, op: &Value) -> Result<Value, OtError> {
        Ok(json!(as_count(payload)? + as_delta(op)?))
    }

    fn transform(&self, op: &Value, applied: &Value, _side: Side) -> Result<Value, OtError> {
        as_delta(op)?;
        as_delta(applied)?;
        Ok(op.clone())
    }

    fn compose(&self, a: &Value, b: &Value) -> Option<Result<Value, OtError>> {
        Some(match (as_delta(a), as_delta(b)) {
            (Ok(a), Ok(b)) => Ok(json!(a + b)),
            (Err(e), _) | (_, Err(e)) => Err(e),
        })
    }

    fn invert(&self, op: &Value) -> Option<Result<Value, OtError>> {
        Some(as_delta(op).map(|d| json!(-d)))
    }
}
