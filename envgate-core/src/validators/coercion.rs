//! Value coercion policy
//!
//! Maps any decoded JSON value to a [`Reading`] plus a "was modified" flag.
//! Every input type has a defined output and nothing here can fail.

use serde_json::{Number, Value};

use super::{Coerced, Reading};

/// Normalize the raw `value` field of a payload
pub fn coerce(value: &Value) -> Coerced {
    match value {
        Value::Null => Coerced {
            value: Reading::Absent,
            modified: false,
        },
        Value::Number(n) => Coerced {
            value: Reading::Number(n.clone()),
            modified: false,
        },
        Value::String(s) => Coerced {
            value: parse_numeric(s).map_or(Reading::Absent, Reading::Number),
            modified: true,
        },
        Value::Bool(_) | Value::Array(_) | Value::Object(_) => Coerced {
            value: Reading::Absent,
            modified: true,
        },
    }
}

/// Integer parse when there is no `.`, float parse otherwise
fn parse_numeric(raw: &str) -> Option<Number> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if !trimmed.contains('.') {
        if let Ok(int) = trimmed.parse::<i64>() {
            return Some(Number::from(int));
        }
        // Positive values past i64::MAX
        return trimmed.parse::<u64>().ok().map(Number::from);
    }

    // f64::from_str also takes "inf" and "nan"; JSON can't carry those
    trimmed.parse::<f64>().ok().and_then(Number::from_f64)
}
