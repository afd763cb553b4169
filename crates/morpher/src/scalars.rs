//! `JSON` and `Date` scalars.

use chrono::DateTime;
use morpher_runtime::ScalarType;
use serde_json::Value;

/// Arbitrary JSON, passed through unchanged in both directions.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonScalar;

impl ScalarType for JsonScalar {
    fn serialize(&self, value: &Value) -> Result<Value, String> {
        Ok(value.clone())
    }

    fn parse_value(&self, value: &Value) -> Result<Value, String> {
        Ok(value.clone())
    }
}

/// A point in time, as milliseconds since the Unix epoch.
///
/// Inputs may also be RFC 3339 strings; outputs are always integers.
#[derive(Debug, Clone, Copy, Default)]
pub struct DateScalar;

impl DateScalar {
    fn to_millis(value: &Value) -> Result<i64, String> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| {
                    n.as_f64()
                        .filter(|f| f.fract() == 0.0 && f.abs() < 9.0e15)
                        .map(|f| f as i64)
                })
                .ok_or_else(|| format!("Date cannot represent non-integer timestamp: {n}")),
            Value::String(s) => DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.timestamp_millis())
                .map_err(|e| format!("Date cannot represent \"{s}\": {e}")),
            other => Err(format!("Date cannot represent value: {other}")),
        }
    }
}

impl ScalarType for DateScalar {
    fn serialize(&self, value: &Value) -> Result<Value, String> {
        Self::to_millis(value).map(Value::from)
    }

    fn parse_value(&self, value: &Value) -> Result<Value, String> {
        Self::to_millis(value).map(Value::from)
    }
}
