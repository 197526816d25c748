//! Payload Validation and Value Cleaning
//!
//! ## Overview
//!
//! Readings arrive on the ingest namespace from devices and scripts of varying
//! quality. The same temperature might show up as `23.5`, `"23.5"`, `""` or
//! `true`. This module turns every one of those into a single, closed shape
//! before anything is republished:
//!
//! ```text
//! {"ts": "<YYYY-MM-DDTHH:MM:SS[zone]>", "value": <number> | null}
//! ```
//!
//! ## Validation Layers
//!
//! ### 1. Structure
//! The payload must be one JSON object with both `ts` and `value` keys.
//! Bytes that are not valid UTF-8 are skipped rather than failing the decode,
//! so a single corrupted byte does not cost an otherwise good reading.
//!
//! ### 2. Timestamp
//! `ts` must be a string of the form `YYYY-MM-DDTHH:MM:SS`, optionally followed
//! by `Z` or a numeric UTC offset, and must name a real calendar instant
//! (`2024-02-30T00:00:00` is refused). The string is kept verbatim: no zone
//! conversion happens here.
//!
//! ### 3. Value Coercion
//! `value` is run through [`coerce`]:
//!
//! | Input                          | Output          | Modified |
//! |--------------------------------|-----------------|----------|
//! | `null`                         | `null`          | no       |
//! | number                         | same number     | no       |
//! | `""`                           | `null`          | yes      |
//! | numeric string without `.`     | integer         | yes      |
//! | numeric string with `.`        | float           | yes      |
//! | other string                   | `null`          | yes      |
//! | boolean, array, object         | `null`          | yes      |
//!
//! ## Usage Example
//!
//! ```rust
//! use envgate_core::validators::{validate, Reading};
//!
//! let validated = validate(br#"{"ts":"2024-01-01T00:00:00Z","value":"21"}"#)?;
//! assert_eq!(validated.payload.ts, "2024-01-01T00:00:00Z");
//! assert_eq!(validated.payload.value, Reading::from(21));
//! assert!(validated.modified);
//!
//! assert_eq!(
//!     validated.payload.canonical_json(),
//!     r#"{"ts":"2024-01-01T00:00:00Z","value":21}"#
//! );
//! # Ok::<(), envgate_core::RejectReason>(())
//! ```

mod coercion;
mod payload;
mod utils;

use core::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Number, Value};

pub use coercion::coerce;
pub use payload::{validate, validate_text};
pub use utils::{decode_utf8_ignoring_invalid, is_iso8601_timestamp};

/// A normalized sensor value
///
/// Whatever JSON type the device sent, only these two shapes survive validation.
/// Integers stay integers so that an already clean payload re-serializes to the
/// exact same bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    /// A finite JSON number
    Number(Number),
    /// No usable value; serialized as `null`
    Absent,
}

impl Reading {
    /// Numeric view, `None` when absent
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Reading::Number(n) => n.as_f64(),
            Reading::Absent => None,
        }
    }

    /// True for [`Reading::Absent`]
    pub fn is_absent(&self) -> bool {
        matches!(self, Reading::Absent)
    }

    /// Wrap a float, non-finite values become [`Reading::Absent`]
    pub fn from_f64(value: f64) -> Self {
        Number::from_f64(value).map_or(Reading::Absent, Reading::Number)
    }
}

impl From<i64> for Reading {
    fn from(value: i64) -> Self {
        Reading::Number(Number::from(value))
    }
}

impl From<Reading> for Value {
    fn from(reading: Reading) -> Self {
        match reading {
            Reading::Number(n) => Value::Number(n),
            Reading::Absent => Value::Null,
        }
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reading::Number(n) => write!(f, "{n}"),
            Reading::Absent => f.write_str("null"),
        }
    }
}

impl Serialize for Reading {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Reading::Number(n) => n.serialize(serializer),
            Reading::Absent => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for Reading {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Option::<Number>::deserialize(deserializer)?.map_or(Reading::Absent, Reading::Number))
    }
}

/// Output of [`coerce`]
#[derive(Debug, Clone, PartialEq)]
pub struct Coerced {
    /// Normalized value
    pub value: Reading,
    /// Whether the input had to be changed to get there
    pub modified: bool,
}

/// A reading that passed validation, in its republishable form
///
/// Built fresh by [`validate`] and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanedPayload {
    /// Timestamp exactly as received
    pub ts: String,
    /// Normalized value
    pub value: Reading,
}

impl CleanedPayload {
    /// Compact JSON with `ts` first and no whitespace
    ///
    /// This is both the outbound wire form and the reference the pipeline
    /// compares raw payloads against to decide whether they were modified.
    pub fn canonical_json(&self) -> String {
        let mut fields = Map::new();
        fields.insert("ts".to_string(), Value::String(self.ts.clone()));
        fields.insert("value".to_string(), self.value.clone().into());
        Value::Object(fields).to_string()
    }
}

/// Successful result of [`validate`]
#[derive(Debug, Clone, PartialEq)]
pub struct Validated {
    /// The cleaned payload
    pub payload: CleanedPayload,
    /// Whether value coercion changed anything
    pub modified: bool,
}
