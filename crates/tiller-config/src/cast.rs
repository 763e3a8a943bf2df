//! Conversion between untyped text and canonical values.
//!
//! Lists travel as their elements joined by [`LIST_SEPARATOR`].

use crate::value::{List, ScalarKind, LIST_SEPARATOR};
use crate::{ConfigError, Result, Value, ValueKind};

/// Parse `text` into a value of kind `kind`; `key` is only used for errors.
pub(crate) fn cast(key: &str, kind: ValueKind, text: &str) -> Result<Value> {
    match kind {
        ValueKind::String => Ok(Value::String(text.to_string())),
        ValueKind::Int => parse_int(key, text).map(Value::Int),
        ValueKind::Float => parse_float(key, text).map(Value::Float),
        ValueKind::Bool => parse_bool_for(key, text).map(Value::Bool),
        ValueKind::List(elem) => cast_list(key, elem, text).map(Value::List),
    }
}

fn cast_list(key: &str, elem: ScalarKind, text: &str) -> Result<List> {
    // String elements keep their whitespace so that `uncast` text casts back
    // to the same list; numbers and booleans are trimmed when parsed.
    let parts: Vec<&str> = if text.is_empty() {
        Vec::new()
    } else {
        text.split(LIST_SEPARATOR).collect()
    };

    let list = match elem {
        ScalarKind::String => List::Strings(parts.iter().map(|p| (*p).to_string()).collect()),
        ScalarKind::Int => List::Ints(
            parts
                .iter()
                .map(|p| parse_int(key, p))
                .collect::<Result<_>>()?,
        ),
        ScalarKind::Float => List::Floats(
            parts
                .iter()
                .map(|p| parse_float(key, p))
                .collect::<Result<_>>()?,
        ),
        ScalarKind::Bool => List::Bools(
            parts
                .iter()
                .map(|p| parse_bool_for(key, p))
                .collect::<Result<_>>()?,
        ),
    };

    Ok(list)
}

fn parse_int(key: &str, text: &str) -> Result<i64> {
    text.trim()
        .parse()
        .map_err(|e| ConfigError::cast(key, text, format!("expected integer: {e}")))
}

fn parse_float(key: &str, text: &str) -> Result<f64> {
    text.trim()
        .parse()
        .map_err(|e| ConfigError::cast(key, text, format!("expected float: {e}")))
}

fn parse_bool_for(key: &str, text: &str) -> Result<bool> {
    parse_bool(text.trim()).ok_or_else(|| ConfigError::cast(key, text, "expected boolean"))
}

/// Parse a boolean the way environment variables spell them.
pub(crate) fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
