//! Adapter implementations, one module per source kind.

mod datapackage;
mod delimited;
mod json;
mod spreadsheet;
mod sql;

pub use datapackage::TabularPackageAdapter;
pub use delimited::DelimitedTextAdapter;
pub use json::StructuredDocumentAdapter;
pub use spreadsheet::SpreadsheetAdapter;
pub use sql::SqlAdapter;

use serde_json::Value as JsonValue;
use tabula_core::{TableOptions, TabulaError};

// ── Option helpers ───────────────────────────────────────────────────

fn invalid(key: &str, value: &JsonValue, expected: &str) -> TabulaError {
    TabulaError::Config(format!("option '{}' must be {}, got {}", key, expected, value))
}

pub(crate) fn opt_bool(options: &TableOptions, key: &str, default: bool) -> Result<bool, TabulaError> {
    match options.get(key) {
        None | Some(JsonValue::Null) => Ok(default),
        Some(JsonValue::Bool(b)) => Ok(*b),
        Some(JsonValue::String(s)) if s.eq_ignore_ascii_case("true") => Ok(true),
        Some(JsonValue::String(s)) if s.eq_ignore_ascii_case("false") => Ok(false),
        Some(other) => Err(invalid(key, other, "a boolean")),
    }
}

pub(crate) fn opt_usize(options: &TableOptions, key: &str, default: usize) -> Result<usize, TabulaError> {
    match options.get(key) {
        None | Some(JsonValue::Null) => Ok(default),
        Some(JsonValue::Number(n)) => n
            .as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| invalid(key, &JsonValue::Number(n.clone()), "a non-negative integer")),
        Some(JsonValue::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| invalid(key, &JsonValue::String(s.clone()), "a non-negative integer")),
        Some(other) => Err(invalid(key, other, "a non-negative integer")),
    }
}

pub(crate) fn opt_str<'a>(options: &'a TableOptions, key: &str, default: &'a str) -> &'a str {
    options
        .get(key)
        .and_then(JsonValue::as_str)
        .unwrap_or(default)
}

/// A single-byte separator. Accepts the character itself or a name like `tab`.
pub(crate) fn opt_byte(options: &TableOptions, key: &str, default: u8) -> Result<u8, TabulaError> {
    let Some(value) = options.get(key).filter(|v| !v.is_null()) else {
        return Ok(default);
    };
    let text = value
        .as_str()
        .ok_or_else(|| invalid(key, value, "a single character"))?;
    let byte = match text.to_ascii_lowercase().as_str() {
        "tab" | "\\t" => b'\t',
        "space" => b' ',
        "comma" => b',',
        "semicolon" => b';',
        _ if text.len() == 1 && text.is_ascii() => text.as_bytes()[0],
        _ => return Err(invalid(key, value, "a single character")),
    };
    Ok(byte)
}
