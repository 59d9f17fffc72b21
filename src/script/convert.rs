//! `serde_json::Value` ⇄ `rhai::Dynamic` conversion.
//!
//! Unrecognized runtime types collapse to `()` (rhai's unit), matching the
//! spec's "unrecognized runtime types emit undefined" rule for Gate
//! bindings; the same conversion is reused for ScriptHost scope variables
//! and return-value extraction.

use rhai::Dynamic;
use serde_json::{Map, Number, Value};

pub fn json_to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(*b),
        Value::Number(n) => number_to_dynamic(n),
        Value::String(s) => Dynamic::from(s.clone()),
        Value::Array(items) => {
            let arr: rhai::Array = items.iter().map(json_to_dynamic).collect();
            Dynamic::from(arr)
        }
        Value::Object(map) => {
            let mut out = rhai::Map::new();
            for (k, v) in map {
                out.insert(k.as_str().into(), json_to_dynamic(v));
            }
            Dynamic::from(out)
        }
    }
}

fn number_to_dynamic(n: &Number) -> Dynamic {
    if let Some(i) = n.as_i64() {
        Dynamic::from(i)
    } else {
        Dynamic::from(n.as_f64().unwrap_or(0.0))
    }
}

pub fn dynamic_to_json(value: &Dynamic) -> Value {
    if value.is_unit() {
        return Value::Null;
    }
    if let Some(b) = value.clone().try_cast::<bool>() {
        return Value::Bool(b);
    }
    if let Some(i) = value.clone().try_cast::<i64>() {
        return Value::Number(i.into());
    }
    if let Some(f) = value.clone().try_cast::<f64>() {
        return Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null);
    }
    if let Some(s) = value.clone().try_cast::<rhai::ImmutableString>() {
        return Value::String(s.to_string());
    }
    if let Some(arr) = value.clone().try_cast::<rhai::Array>() {
        return Value::Array(arr.iter().map(dynamic_to_json).collect());
    }
    if let Some(map) = value.clone().try_cast::<rhai::Map>() {
        let mut out = Map::new();
        for (k, v) in map.iter() {
            out.insert(k.to_string(), dynamic_to_json(v));
        }
        return Value::Object(out);
    }
    Value::Null
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trips_scalars() {
        for v in [json!(null), json!(true), json!(42), json!(1.5), json!("hi")] {
            let dyn_value = json_to_dynamic(&v);
            assert_eq!(dynamic_to_json(&dyn_value), v);
        }
    }

    #[test]
    fn round_trips_nested_structures() {
        let v = json!({"a": [1, 2, {"b": "c"}]});
        let dyn_value = json_to_dynamic(&v);
        assert_eq!(dynamic_to_json(&dyn_value), v);
    }
}
