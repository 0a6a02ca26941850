//! JSON rendering of ABI-decoded values.
//!
//! Integers render as decimal strings and addresses as checksummed hex.

use alloy::dyn_abi::DynSolValue;
use alloy::hex;
use alloy::json_abi::{Event, EventParam, Param};
use serde_json::{Map, Value};

/// Converts a decoded ABI value to JSON. Integers become decimal strings
/// rather than JSON numbers so `uint256` values keep full precision.
pub fn value_to_json(value: &DynSolValue) -> Value {
    match value {
        DynSolValue::Bool(b) => Value::Bool(*b),
        DynSolValue::Int(i, _) => Value::String(i.to_string()),
        DynSolValue::Uint(u, _) => Value::String(u.to_string()),
        DynSolValue::FixedBytes(word, size) => {
            Value::String(hex::encode_prefixed(&word[..(*size).min(32)]))
        }
        DynSolValue::Address(address) => Value::String(address.to_checksum(None)),
        DynSolValue::Bytes(bytes) => Value::String(hex::encode_prefixed(bytes)),
        DynSolValue::String(s) => Value::String(s.clone()),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) | DynSolValue::Tuple(items) => {
            Value::Array(items.iter().map(value_to_json).collect())
        }
        other => Value::String(format!("{other:?}")),
    }
}

/// Pairs parameter names with decoded values; unnamed parameters become `argN`.
pub fn named_args<'a>(names: impl IntoIterator<Item = &'a str>, values: &[DynSolValue]) -> Value {
    let mut object = Map::new();
    for (position, (name, value)) in names.into_iter().zip(values).enumerate() {
        let key = if name.is_empty() {
            format!("arg{position}")
        } else {
            name.to_string()
        };
        object.insert(key, value_to_json(value));
    }
    Value::Object(object)
}

/// Function-input arguments as a JSON object.
pub fn function_args(inputs: &[Param], values: &[DynSolValue]) -> Value {
    named_args(inputs.iter().map(|param| param.name.as_str()), values)
}

/// Event arguments in declaration order, re-interleaving indexed topics and
/// body values.
pub fn event_args(event: &Event, indexed: &[DynSolValue], body: &[DynSolValue]) -> Value {
    let mut indexed = indexed.iter();
    let mut body = body.iter();
    let values: Vec<DynSolValue> = event
        .inputs
        .iter()
        .filter_map(|param: &EventParam| {
            if param.indexed {
                indexed.next().cloned()
            } else {
                body.next().cloned()
            }
        })
        .collect();
    named_args(event.inputs.iter().map(|param| param.name.as_str()), &values)
}
