//! Declared value types and cell coercion.
//!
//! Every source hands rows over as text. Column and row type maps declare how
//! a cell should be interpreted when it ends up as a parameter value.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Value type that can be declared for a column or a pivot row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    #[default]
    String,
    Float,
    Datetime,
    Duration,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::String => write!(f, "string"),
            ValueType::Float => write!(f, "float"),
            ValueType::Datetime => write!(f, "datetime"),
            ValueType::Duration => write!(f, "duration"),
        }
    }
}

/// A converted cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum Value {
    String(String),
    Float(f64),
    Datetime(NaiveDateTime),
    /// Normalised relative duration such as `3h` or `1Y`.
    Duration(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{}", s),
            Value::Float(v) => write!(f, "{}", v),
            Value::Datetime(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S")),
            Value::Duration(d) => write!(f, "{}", d),
        }
    }
}

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"];

/// Duration units: (accepted spellings, normalised suffix).
const DURATION_UNITS: &[(&[&str], &str)] = &[
    (&["s", "sec", "second", "seconds"], "s"),
    (&["m", "min", "minute", "minutes"], "m"),
    (&["h", "hour", "hours"], "h"),
    (&["D", "d", "day", "days"], "D"),
    (&["M", "month", "months"], "M"),
    (&["Y", "y", "year", "years"], "Y"),
];

impl ValueType {
    /// Convert a non-empty cell into a typed value.
    ///
    /// The error string is meant to become part of a row error message.
    pub fn convert(self, raw: &str) -> Result<Value, String> {
        let trimmed = raw.trim();
        match self {
            ValueType::String => Ok(Value::String(raw.to_string())),
            // NaN and infinities have no JSON form
            ValueType::Float => trimmed
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(Value::Float)
                .ok_or_else(|| format!("cannot convert '{}' to float", raw)),
            ValueType::Datetime => parse_datetime(trimmed)
                .map(Value::Datetime)
                .ok_or_else(|| format!("cannot convert '{}' to datetime", raw)),
            ValueType::Duration => parse_duration(trimmed)
                .map(Value::Duration)
                .ok_or_else(|| format!("cannot convert '{}' to duration", raw)),
        }
    }
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn parse_duration(s: &str) -> Option<String> {
    let split = s.find(|c: char| !c.is_ascii_digit())?;
    let (amount, unit) = s.split_at(split);
    let amount: u64 = amount.parse().ok()?;
    let unit = unit.trim();
    DURATION_UNITS
        .iter()
        .find(|(spellings, _)| spellings.contains(&unit))
        .map(|(_, short)| format!("{}{}", amount, short))
}
