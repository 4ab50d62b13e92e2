//! `serde_json::Value` ⇄ `yrs::Any` mapping.
//!
//! Integers are stored as `Any::BigInt` so they survive a round trip
//! without turning into floats; everything else maps one to one.

use super::CrdtError;
use serde_json::{Map as JsonMap, Number, Value};
use std::collections::HashMap;
use std::sync::Arc;
use yrs::Any;

pub(crate) fn json_to_any(value: &Value) -> Any {
    match value {
        Value::Null => Any::Null,
        Value::Bool(b) => Any::Bool(*b),
        Value::Number(n) => number_to_any(n),
        Value::String(s) => Any::String(Arc::from(s.as_str())),
        Value::Array(items) => {
            let items: Vec<Any> = items.iter().map(json_to_any).collect();
            Any::Array(Arc::from(items))
        }
        Value::Object(fields) => {
            let map: HashMap<String, Any> = fields
                .iter()
                .map(|(k, v)| (k.clone(), json_to_any(v)))
                .collect();
            Any::Map(Arc::new(map))
        }
    }
}

fn number_to_any(n: &Number) -> Any {
    if let Some(i) = n.as_i64() {
        Any::BigInt(i)
    } else {
        // u64 beyond i64::MAX and real floats
        Any::Number(n.as_f64().unwrap_or_default())
    }
}

pub(crate) fn any_to_json(field: &str, value: &Any) -> Result<Value, CrdtError> {
    Ok(match value {
        Any::Null | Any::Undefined => Value::Null,
        Any::Bool(b) => Value::Bool(*b),
        Any::Number(f) => Number::from_f64(*f)
            .map(Value::Number)
            .ok_or_else(|| CrdtError::UnsupportedField(field.to_string()))?,
        Any::BigInt(i) => Value::from(*i),
        Any::String(s) => Value::String(s.to_string()),
        Any::Buffer(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
        Any::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| any_to_json(field, item))
                .collect::<Result<_, _>>()?,
        ),
        Any::Map(fields) => {
            let mut out = JsonMap::with_capacity(fields.len());
            for (k, v) in fields.iter() {
                out.insert(k.clone(), any_to_json(field, v)?);
            }
            Value::Object(out)
        }
    })
}
