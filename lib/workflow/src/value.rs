//! Loosely-typed value semantics over JSON.
//!
//! Expressions and control-flow nodes compare and coerce values the way
//! template authors expect from a scripting language: `"5" == 5`, `null`
//! equals a missing value, numbers print without a trailing `.0`.
//! `None` stands for "undefined" throughout.

use serde_json::{Number, Value as JsonValue};
use std::cmp::Ordering;

/// Truthiness of a value.
#[must_use]
pub fn truthy(value: Option<&JsonValue>) -> bool {
    match value {
        None | Some(JsonValue::Null) => false,
        Some(JsonValue::Bool(b)) => *b,
        Some(JsonValue::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Some(JsonValue::String(s)) => !s.is_empty(),
        Some(JsonValue::Array(_) | JsonValue::Object(_)) => true,
    }
}

/// Numeric coercion. Returns `None` where the result would be NaN.
#[must_use]
pub fn to_number(value: Option<&JsonValue>) -> Option<f64> {
    match value? {
        JsonValue::Null => Some(0.0),
        JsonValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Some(0.0)
            } else {
                trimmed.parse::<f64>().ok().filter(|f| f.is_finite())
            }
        }
        JsonValue::Array(_) | JsonValue::Object(_) => None,
    }
}

/// Builds a JSON number, keeping whole numbers integral.
#[must_use]
pub fn number_value(f: f64) -> JsonValue {
    if f.fract() == 0.0 && f.abs() < 9.007_199_254_740_992e15 {
        // Whole and within the exact-integer range of f64.
        return JsonValue::Number(Number::from(f as i64));
    }
    Number::from_f64(f).map_or(JsonValue::Null, JsonValue::Number)
}

/// Formats a number the way a template renders it.
#[must_use]
pub fn format_number(f: f64) -> String {
    if f.fract() == 0.0 && f.abs() < 1e21 {
        format!("{f:.0}")
    } else {
        f.to_string()
    }
}

/// String rendering used for interpolation and concatenation.
#[must_use]
pub fn display_string(value: Option<&JsonValue>) -> String {
    match value {
        None => String::new(),
        Some(JsonValue::Null) => "null".to_string(),
        Some(JsonValue::Bool(b)) => b.to_string(),
        Some(JsonValue::Number(n)) => n.as_f64().map_or_else(|| n.to_string(), format_number),
        Some(JsonValue::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Loose equality (`==`).
#[must_use]
pub fn loose_eq(a: Option<&JsonValue>, b: Option<&JsonValue>) -> bool {
    let nullish = |v: Option<&JsonValue>| matches!(v, None | Some(JsonValue::Null));
    if nullish(a) || nullish(b) {
        return nullish(a) && nullish(b);
    }
    match (a, b) {
        (Some(JsonValue::String(x)), Some(JsonValue::String(y))) => x == y,
        (Some(JsonValue::Array(_) | JsonValue::Object(_)), _)
        | (_, Some(JsonValue::Array(_) | JsonValue::Object(_))) => a == b,
        _ => match (to_number(a), to_number(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
    }
}

/// Strict equality (`===`).
#[must_use]
pub fn strict_eq(a: Option<&JsonValue>, b: Option<&JsonValue>) -> bool {
    match (a, b) {
        (Some(JsonValue::Number(x)), Some(JsonValue::Number(y))) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Relational comparison (`<`, `>`, ...). `None` if the values are incomparable.
#[must_use]
pub fn compare(a: Option<&JsonValue>, b: Option<&JsonValue>) -> Option<Ordering> {
    match (a, b) {
        (Some(JsonValue::String(x)), Some(JsonValue::String(y))) => Some(x.cmp(y)),
        _ => to_number(a)?.partial_cmp(&to_number(b)?),
    }
}

/// Total order used by sort nodes. Missing and null keys sort last.
#[must_use]
pub fn sort_cmp(a: Option<&JsonValue>, b: Option<&JsonValue>) -> Ordering {
    let missing = |v: Option<&JsonValue>| matches!(v, None | Some(JsonValue::Null));
    match (missing(a), missing(b)) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => match (a, b) {
            (Some(JsonValue::Number(_)), Some(JsonValue::Number(_))) => {
                compare(a, b).unwrap_or(Ordering::Equal)
            }
            _ => display_string(a).cmp(&display_string(b)),
        },
    }
}

/// Looks up a dot path (`"user.tags.0"`) inside a JSON value.
///
/// An empty path returns the value itself.
#[must_use]
pub fn lookup_path<'a>(value: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    let path = path.trim();
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| match current {
        JsonValue::Object(map) => map.get(segment),
        JsonValue::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Name of a value's type for error messages.
#[must_use]
pub fn type_name(value: Option<&JsonValue>) -> &'static str {
    match value {
        None => "undefined",
        Some(JsonValue::Null) => "null",
        Some(JsonValue::Bool(_)) => "boolean",
        Some(JsonValue::Number(_)) => "number",
        Some(JsonValue::String(_)) => "string",
        Some(JsonValue::Array(_)) => "array",
        Some(JsonValue::Object(_)) => "object",
    }
}
