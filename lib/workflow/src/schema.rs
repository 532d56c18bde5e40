//! Schema validation for node outputs.
//!
//! Supports a small dialect: `type`, `properties`, `required` and `items`,
//! applied recursively. `integer` means "a whole number" and arrays are
//! distinct from objects. The first violation is reported with a dotted
//! path (`profile.id`, `tags[2]`).

use crate::error::ValidationError;
use serde_json::{Map, Value as JsonValue};

/// Path label used for violations at the top level.
const ROOT: &str = "(root)";

/// Validates `data` against `schema`.
///
/// The schema may be a JSON object or a string holding JSON text. Null and
/// empty strings mean "no schema".
///
/// # Errors
///
/// Returns the first violation, or `InvalidSchema` if the schema text does
/// not parse or is not an object.
pub fn validate(data: &JsonValue, schema: &JsonValue) -> Result<(), ValidationError> {
    let parsed;
    let schema = match schema {
        JsonValue::Null => return Ok(()),
        JsonValue::String(text) if text.trim().is_empty() => return Ok(()),
        JsonValue::String(text) => {
            parsed = serde_json::from_str::<JsonValue>(text).map_err(|e| {
                ValidationError::InvalidSchema {
                    reason: e.to_string(),
                }
            })?;
            &parsed
        }
        other => other,
    };
    let JsonValue::Object(rules) = schema else {
        return Err(ValidationError::InvalidSchema {
            reason: "schema must be an object".to_string(),
        });
    };
    check(data, rules, "")
}

fn check(data: &JsonValue, rules: &Map<String, JsonValue>, path: &str) -> Result<(), ValidationError> {
    if let Some(expected) = rules.get("type") {
        check_type(data, expected, path)?;
    }

    if let JsonValue::Object(object) = data {
        if let Some(required) = rules.get("required") {
            let JsonValue::Array(keys) = required else {
                return Err(ValidationError::InvalidSchema {
                    reason: "'required' must be an array".to_string(),
                });
            };
            for key in keys.iter().filter_map(JsonValue::as_str) {
                if !object.contains_key(key) {
                    return Err(ValidationError::MissingRequired {
                        path: join(path, key),
                    });
                }
            }
        }

        if let Some(properties) = rules.get("properties") {
            let JsonValue::Object(properties) = properties else {
                return Err(ValidationError::InvalidSchema {
                    reason: "'properties' must be an object".to_string(),
                });
            };
            for (key, sub) in properties {
                let (Some(value), JsonValue::Object(sub)) = (object.get(key), sub) else {
                    continue;
                };
                check(value, sub, &join(path, key))?;
            }
        }
    }

    if let (JsonValue::Array(items), Some(JsonValue::Object(item_rules))) = (data, rules.get("items")) {
        for (i, item) in items.iter().enumerate() {
            check(item, item_rules, &format!("{path}[{i}]"))?;
        }
    }

    Ok(())
}

fn check_type(data: &JsonValue, expected: &JsonValue, path: &str) -> Result<(), ValidationError> {
    let allowed: Vec<&str> = match expected {
        JsonValue::String(t) => vec![t.as_str()],
        JsonValue::Array(types) => types.iter().filter_map(JsonValue::as_str).collect(),
        _ => {
            return Err(ValidationError::InvalidSchema {
                reason: "'type' must be a string or array of strings".to_string(),
            });
        }
    };
    if allowed.iter().any(|t| matches_type(data, t)) {
        return Ok(());
    }
    Err(ValidationError::TypeMismatch {
        path: if path.is_empty() { ROOT.to_string() } else { path.to_string() },
        expected: allowed.join(" | "),
        actual: actual_type(data).to_string(),
    })
}

fn matches_type(data: &JsonValue, expected: &str) -> bool {
    match expected {
        "integer" => data
            .as_f64()
            .is_some_and(|f| f.fract() == 0.0 && f.is_finite()),
        "number" => data.is_number(),
        other => actual_type(data) == other,
    }
}

fn actual_type(data: &JsonValue) -> &'static str {
    match data {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}
