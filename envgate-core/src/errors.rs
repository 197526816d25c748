//! Error Types for Rejected Payloads and Bad Configuration
//!
//! ## Design Philosophy
//!
//! Nothing that arrives on the ingest namespace is allowed to take the gateway
//! down. Every way a payload can be wrong has its own [`RejectReason`] variant,
//! and every one of them is recovered locally: the message is dropped, counted
//! and logged with the reason.
//!
//! ## Error Categories
//!
//! ### Malformed Input
//! - `InvalidJson`: bytes are not a single JSON document
//! - `NotAnObject`: valid JSON, but not a `{...}` map
//! - `MissingField`: `ts` or `value` is absent
//!
//! ### Timestamp Violations
//! - `InvalidTimestampType`: `ts` is present but not a string
//! - `InvalidTimestampFormat`: `ts` is a string that is not `YYYY-MM-DDTHH:MM:SS[zone]`
//!
//! ### Startup Issues
//! - [`ConfigError`]: the only errors that are allowed to stop the process,
//!   raised while building the gateway configuration.
//!
//! ## Error Handling Strategy
//!
//! ```rust
//! use envgate_core::{validate, RejectReason};
//!
//! match validate(br#"{"ts":"2024-01-01T00:00:00"}"#) {
//!     Ok(validated) => {
//!         let _forward = validated.payload;
//!     }
//!     Err(RejectReason::MissingField(field)) => {
//!         assert_eq!(field, "value");
//!     }
//!     Err(other) => panic!("unexpected rejection: {other}"),
//! }
//! ```

use thiserror::Error;

/// Why a payload was refused by the validator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Payload is not parseable as a single JSON value
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    /// Payload parsed, but the top-level value is not an object
    #[error("Payload must be a JSON object")]
    NotAnObject,

    /// A required key is absent
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// `ts` exists but is not a JSON string; carries the JSON type name found
    #[error("Field 'ts' must be string, got {0}")]
    InvalidTimestampType(&'static str),

    /// `ts` is a string that does not match the accepted timestamp grammar
    #[error("Field 'ts' is not valid ISO8601 format: {0}")]
    InvalidTimestampFormat(String),
}

impl RejectReason {
    /// Short stable label, used as a log field
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidJson(_) => "invalid_json",
            Self::NotAnObject => "not_an_object",
            Self::MissingField(_) => "missing_field",
            Self::InvalidTimestampType(_) => "invalid_timestamp_type",
            Self::InvalidTimestampFormat(_) => "invalid_timestamp_format",
        }
    }
}

/// Configuration rejected at startup
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Dedup capacity must hold at least one key
    #[error("Dedup capacity must be positive, got {0}")]
    ZeroCapacity(usize),

    /// Dedup TTL must be finite and at least one millisecond
    #[error("Dedup TTL must be at least 0.001 seconds, got {0}")]
    InvalidTtl(f64),

    /// A metric name outside the recognized set
    #[error("Unknown metric: {0}")]
    UnknownMetric(String),

    /// The allowed metric set ended up empty
    #[error("At least one metric must be allowed")]
    NoMetrics,

    /// A topic prefix is empty or contains MQTT wildcard characters
    #[error("Invalid topic prefix '{prefix}': {reason}")]
    InvalidPrefix {
        /// The offending prefix
        prefix: String,
        /// What is wrong with it
        reason: &'static str,
    },

    /// Ingest and output prefixes overlap, which would make the gateway consume its own output
    #[error("Output prefix '{output}' overlaps ingest prefix '{ingest}'")]
    LoopingPrefixes {
        /// Ingest namespace prefix
        ingest: String,
        /// Output namespace prefix
        output: String,
    },
}
