//! Validates an inbound request's query/header/body against a rule's
//! [`FieldRule`] trees before a run starts.
//!
//! Ported from the Go original's `FieldRule.Validate*` family: one
//! recursive validator per JSON type, each returning either a (possibly
//! defaulted/coerced) value or a structured error. `object` rules recurse
//! into their `attribute` map the same way the original's `Map` case does.

use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

use crate::model::{FieldRule, FieldType};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("field `{0}` is required")]
    Required(String),
    #[error("field `{0}` expected type {1:?}, got a value that does not match")]
    WrongType(String, FieldType),
    #[error("field `{0}` length {1} exceeds maxLen {2}")]
    TooLong(String, usize, usize),
    #[error("field `{0}` length {1} below minLen {2}")]
    TooShort(String, usize, usize),
    #[error("field `{0}` value {1} exceeds max {2}")]
    TooLarge(String, String, String),
    #[error("field `{0}` value {1} below min {2}")]
    TooSmall(String, String, String),
    #[error("field `{0}` value {1} not in enum")]
    NotInEnum(String, String),
}

pub type ValidationResult<T> = Result<T, Vec<ValidationError>>;

/// Validates `input` (a flat or nested JSON object) against `rules`, one
/// rule per field name. Returns the validated/defaulted object on success,
/// or every error found (not just the first).
pub fn validate_fields(
    input: &HashMap<String, Value>,
    rules: &HashMap<String, FieldRule>,
) -> ValidationResult<HashMap<String, Value>> {
    let mut out = HashMap::with_capacity(rules.len());
    let mut errors = Vec::new();

    for (name, rule) in rules {
        let present = input.contains_key(name);
        let value = input.get(name).cloned();
        match validate_field(name, rule, value, present) {
            Ok(Some(resolved)) => {
                out.insert(name.clone(), resolved);
            }
            Ok(None) => {}
            Err(mut errs) => errors.append(&mut errs),
        }
    }

    if errors.is_empty() {
        Ok(out)
    } else {
        Err(errors)
    }
}

/// Validates one field. Returns `Ok(None)` when the field was optional,
/// absent, and carries no default — i.e. should be omitted from the
/// resolved object entirely.
fn validate_field(
    name: &str,
    rule: &FieldRule,
    value: Option<Value>,
    was_present: bool,
) -> Result<Option<Value>, Vec<ValidationError>> {
    if !was_present {
        if rule.required {
            return Err(vec![ValidationError::Required(name.to_string())]);
        }
        return Ok(rule.default.clone());
    }

    let value = value.expect("was_present guarantees a value");
    match rule.field_type {
        FieldType::Int => validate_int(name, rule, value),
        FieldType::Float => validate_float(name, rule, value),
        FieldType::String => validate_string(name, rule, value),
        FieldType::Bool => validate_bool(name, rule, value),
        FieldType::Slice => validate_slice(name, rule, value),
        FieldType::Object => validate_object(name, rule, value),
    }
}

fn as_f64(name: &str, rule: &FieldRule, value: &Value) -> Result<f64, Vec<ValidationError>> {
    value
        .as_f64()
        .ok_or_else(|| vec![ValidationError::WrongType(name.to_string(), rule.field_type)])
}

fn validate_int(name: &str, rule: &FieldRule, value: Value) -> Result<Option<Value>, Vec<ValidationError>> {
    if !value.is_i64() && !value.is_u64() {
        return Err(vec![ValidationError::WrongType(name.to_string(), FieldType::Int)]);
    }
    let n = as_f64(name, rule, &value)?;
    check_numeric_bounds(name, rule, n)?;
    Ok(Some(value))
}

fn validate_float(name: &str, rule: &FieldRule, value: Value) -> Result<Option<Value>, Vec<ValidationError>> {
    if !value.is_number() {
        return Err(vec![ValidationError::WrongType(name.to_string(), FieldType::Float)]);
    }
    let n = as_f64(name, rule, &value)?;
    check_numeric_bounds(name, rule, n)?;
    Ok(Some(value))
}

fn check_numeric_bounds(name: &str, rule: &FieldRule, n: f64) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    if let Some(max) = rule.max.as_ref().and_then(Value::as_f64) {
        if n > max {
            errors.push(ValidationError::TooLarge(name.to_string(), n.to_string(), max.to_string()));
        }
    }
    if let Some(min) = rule.min.as_ref().and_then(Value::as_f64) {
        if n < min {
            errors.push(ValidationError::TooSmall(name.to_string(), n.to_string(), min.to_string()));
        }
    }
    if !rule.r#enum.is_empty() {
        let hit = rule.r#enum.iter().any(|v| v.as_f64() == Some(n));
        if !hit {
            errors.push(ValidationError::NotInEnum(name.to_string(), n.to_string()));
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_string(name: &str, rule: &FieldRule, value: Value) -> Result<Option<Value>, Vec<ValidationError>> {
    let s = value
        .as_str()
        .ok_or_else(|| vec![ValidationError::WrongType(name.to_string(), FieldType::String)])?;
    let mut errors = Vec::new();
    if let Some(max_len) = rule.max_len {
        if s.chars().count() > max_len {
            errors.push(ValidationError::TooLong(name.to_string(), s.chars().count(), max_len));
        }
    }
    if let Some(min_len) = rule.min_len {
        if s.chars().count() < min_len {
            errors.push(ValidationError::TooShort(name.to_string(), s.chars().count(), min_len));
        }
    }
    if !rule.r#enum.is_empty() {
        let hit = rule.r#enum.iter().any(|v| v.as_str() == Some(s));
        if !hit {
            errors.push(ValidationError::NotInEnum(name.to_string(), s.to_string()));
        }
    }
    if errors.is_empty() {
        Ok(Some(value))
    } else {
        Err(errors)
    }
}

fn validate_bool(name: &str, _rule: &FieldRule, value: Value) -> Result<Option<Value>, Vec<ValidationError>> {
    if value.is_boolean() {
        Ok(Some(value))
    } else {
        Err(vec![ValidationError::WrongType(name.to_string(), FieldType::Bool)])
    }
}

fn validate_slice(name: &str, rule: &FieldRule, value: Value) -> Result<Option<Value>, Vec<ValidationError>> {
    let items = value
        .as_array()
        .ok_or_else(|| vec![ValidationError::WrongType(name.to_string(), FieldType::Slice)])?;
    let mut errors = Vec::new();
    if let Some(max_len) = rule.max_len {
        if items.len() > max_len {
            errors.push(ValidationError::TooLong(name.to_string(), items.len(), max_len));
        }
    }
    if let Some(min_len) = rule.min_len {
        if items.len() < min_len {
            errors.push(ValidationError::TooShort(name.to_string(), items.len(), min_len));
        }
    }
    if errors.is_empty() {
        Ok(Some(value))
    } else {
        Err(errors)
    }
}

fn validate_object(name: &str, rule: &FieldRule, value: Value) -> Result<Option<Value>, Vec<ValidationError>> {
    let map = value
        .as_object()
        .ok_or_else(|| vec![ValidationError::WrongType(name.to_string(), FieldType::Object)])?;
    if rule.attribute.is_empty() {
        return Ok(Some(value));
    }
    let input: HashMap<String, Value> = map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    let resolved = validate_fields(&input, &rule.attribute).map_err(|errs| {
        errs.into_iter()
            .map(|e| prefix_error(name, e))
            .collect::<Vec<_>>()
    })?;
    Ok(Some(Value::Object(resolved.into_iter().collect())))
}

fn prefix_error(prefix: &str, err: ValidationError) -> ValidationError {
    match err {
        ValidationError::Required(f) => ValidationError::Required(format!("{prefix}.{f}")),
        ValidationError::WrongType(f, t) => ValidationError::WrongType(format!("{prefix}.{f}"), t),
        ValidationError::TooLong(f, a, b) => ValidationError::TooLong(format!("{prefix}.{f}"), a, b),
        ValidationError::TooShort(f, a, b) => ValidationError::TooShort(format!("{prefix}.{f}"), a, b),
        ValidationError::TooLarge(f, a, b) => ValidationError::TooLarge(format!("{prefix}.{f}"), a, b),
        ValidationError::TooSmall(f, a, b) => ValidationError::TooSmall(format!("{prefix}.{f}"), a, b),
        ValidationError::NotInEnum(f, a) => ValidationError::NotInEnum(format!("{prefix}.{f}"), a),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FieldType;
    use serde_json::json;

    fn rule(field_type: FieldType) -> FieldRule {
        FieldRule {
            field_type,
            required: false,
            default: None,
            max_len: None,
            min_len: None,
            max: None,
            min: None,
            r#enum: vec![],
            attribute: HashMap::new(),
        }
    }

    #[test]
    fn missing_required_field_errors() {
        let mut rules = HashMap::new();
        rules.insert("id".to_string(), FieldRule { required: true, ..rule(FieldType::Int) });
        let errs = validate_fields(&HashMap::new(), &rules).unwrap_err();
        assert_eq!(errs, vec![ValidationError::Required("id".to_string())]);
    }

    #[test]
    fn missing_optional_field_uses_default() {
        let mut rules = HashMap::new();
        rules.insert(
            "count".to_string(),
            FieldRule { default: Some(json!(10)), ..rule(FieldType::Int) },
        );
        let out = validate_fields(&HashMap::new(), &rules).unwrap();
        assert_eq!(out.get("count"), Some(&json!(10)));
    }

    #[test]
    fn string_out_of_enum_errors() {
        let mut rules = HashMap::new();
        rules.insert(
            "status".to_string(),
            FieldRule { r#enum: vec![json!("a"), json!("b")], ..rule(FieldType::String) },
        );
        let mut input = HashMap::new();
        input.insert("status".to_string(), json!("c"));
        let errs = validate_fields(&input, &rules).unwrap_err();
        assert_eq!(errs.len(), 1);
    }

    #[test]
    fn numeric_out_of_range_errors() {
        let mut rules = HashMap::new();
        rules.insert(
            "age".to_string(),
            FieldRule { max: Some(json!(120)), min: Some(json!(0)), ..rule(FieldType::Int) },
        );
        let mut input = HashMap::new();
        input.insert("age".to_string(), json!(200));
        let errs = validate_fields(&input, &rules).unwrap_err();
        assert_eq!(errs, vec![ValidationError::TooLarge("age".to_string(), "200".to_string(), "120".to_string())]);
    }

    #[test]
    fn nested_object_validates_recursively() {
        let mut inner = HashMap::new();
        inner.insert("zip".to_string(), FieldRule { required: true, ..rule(FieldType::String) });
        let mut rules = HashMap::new();
        rules.insert("address".to_string(), FieldRule { attribute: inner, ..rule(FieldType::Object) });
        let mut input = HashMap::new();
        input.insert("address".to_string(), json!({}));
        let errs = validate_fields(&input, &rules).unwrap_err();
        assert_eq!(errs, vec![ValidationError::Required("address.zip".to_string())]);
    }

    #[test]
    fn well_formed_input_resolves_cleanly() {
        let mut rules = HashMap::new();
        rules.insert("name".to_string(), FieldRule { required: true, max_len: Some(20), ..rule(FieldType::String) });
        let mut input = HashMap::new();
        input.insert("name".to_string(), json!("ok"));
        let out = validate_fields(&input, &rules).unwrap();
        assert_eq!(out.get("name"), Some(&json!("ok")));
    }
}
