//! JSON-Schema shape checks for tool arguments.
//!
//! Covers the subset tool schemas use: `type`, `enum`, `const`, `properties`,
//! `required`, `additionalProperties`, `items`, `minItems`/`maxItems`,
//! `minLength`/`maxLength` and `minimum`/`maximum`. Unknown keywords are
//! ignored. Validation stops at the first violated constraint.

use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{path}: {message}")]
pub struct SchemaViolation {
    /// Location of the offending value, e.g. `arguments.products[0]`.
    pub path: String,
    pub message: String,
}

type Checked = Result<(), SchemaViolation>;

fn violation(path: &str, message: String) -> Checked {
    Err(SchemaViolation { path: path.to_string(), message })
}

/// Validate `value` against `schema`, rooted at the `arguments` path.
pub fn validate(schema: &Value, value: &Value) -> Checked {
    validate_at(schema, value, "arguments")
}

fn validate_at(schema: &Value, value: &Value, path: &str) -> Checked {
    if let Some(accept) = schema.as_bool() {
        return if accept { Ok(()) } else { violation(path, "no value is allowed here".into()) };
    }
    let Some(schema) = schema.as_object() else {
        return Ok(());
    };

    if let Some(expected) = schema.get("type") {
        if !type_matches(expected, value) {
            return violation(
                path,
                format!("expected {}, got {}", describe_type(expected), type_name(value)),
            );
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            let options: Vec<String> = allowed.iter().map(Value::to_string).collect();
            return violation(path, format!("must be one of [{}]", options.join(", ")));
        }
    }

    if let Some(expected) = schema.get("const") {
        if value != expected {
            return violation(path, format!("must equal {expected}"));
        }
    }

    match value {
        Value::Object(obj) => validate_object(schema, obj, path),
        Value::Array(items) => validate_array(schema, items, path),
        Value::String(s) => validate_string(schema, s, path),
        Value::Number(n) => validate_number(schema, n, path),
        _ => Ok(()),
    }
}

fn validate_object(schema: &Map<String, Value>, obj: &Map<String, Value>, path: &str) -> Checked {
    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if !obj.contains_key(name) {
                return violation(path, format!("missing required property '{name}'"));
            }
        }
    }

    let properties = schema.get("properties").and_then(Value::as_object);
    for (key, item) in obj {
        let child = format!("{path}.{key}");
        match properties.and_then(|p| p.get(key)) {
            Some(prop_schema) => validate_at(prop_schema, item, &child)?,
            None => match schema.get("additionalProperties") {
                Some(Value::Bool(false)) => {
                    return violation(path, format!("unexpected property '{key}'"));
                }
                Some(extra @ Value::Object(_)) => validate_at(extra, item, &child)?,
                _ => {}
            },
        }
    }
    Ok(())
}

fn validate_array(schema: &Map<String, Value>, items: &[Value], path: &str) -> Checked {
    if let Some(min) = schema.get("minItems").and_then(Value::as_u64) {
        if (items.len() as u64) < min {
            return violation(path, format!("must contain at least {min} item(s)"));
        }
    }
    if let Some(max) = schema.get("maxItems").and_then(Value::as_u64) {
        if (items.len() as u64) > max {
            return violation(path, format!("must contain at most {max} item(s)"));
        }
    }
    if let Some(item_schema) = schema.get("items").filter(|s| s.is_object() || s.is_boolean()) {
        for (i, item) in items.iter().enumerate() {
            validate_at(item_schema, item, &format!("{path}[{i}]"))?;
        }
    }
    Ok(())
}

fn validate_string(schema: &Map<String, Value>, s: &str, path: &str) -> Checked {
    let len = s.chars().count() as u64;
    if let Some(min) = schema.get("minLength").and_then(Value::as_u64) {
        if len < min {
            return violation(path, format!("must be at least {min} character(s)"));
        }
    }
    if let Some(max) = schema.get("maxLength").and_then(Value::as_u64) {
        if len > max {
            return violation(path, format!("must be at most {max} character(s)"));
        }
    }
    Ok(())
}

fn validate_number(schema: &Map<String, Value>, n: &serde_json::Number, path: &str) -> Checked {
    let Some(v) = n.as_f64() else {
        return Ok(());
    };
    if let Some(min) = schema.get("minimum").and_then(Value::as_f64) {
        if v < min {
            return violation(path, format!("must be >= {min}"));
        }
    }
    if let Some(max) = schema.get("maximum").and_then(Value::as_f64) {
        if v > max {
            return violation(path, format!("must be <= {max}"));
        }
    }
    Ok(())
}

fn type_matches(expected: &Value, value: &Value) -> bool {
    match expected {
        Value::String(t) => is_type(t, value),
        Value::Array(types) => types.iter().filter_map(Value::as_str).any(|t| is_type(t, value)),
        _ => true,
    }
}

fn is_type(name: &str, value: &Value) -> bool {
    match name {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn describe_type(expected: &Value) -> String {
    match expected {
        Value::String(t) => t.clone(),
        Value::Array(types) => {
            types.iter().filter_map(Value::as_str).collect::<Vec<_>>().join(" or ")
        }
        other => other.to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
