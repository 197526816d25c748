//! Core of the EnvGate ingest gateway
//!
//! Sits between the raw `ingest/env/<metric>` namespace and the clean
//! `env/<metric>` namespace of an MQTT broker. Every inbound reading is
//! validated, its value normalized, duplicates within a time window are
//! suppressed, and the cleaned reading is republished.
//!
//! Nothing in this crate touches the network. The transport is reached only
//! through the [`Transport`] trait and drives the pipeline through
//! [`MessageHandler`], so the whole flow can be exercised in memory:
//!
//! ```
//! use envgate_core::{GatewayConfig, GatewayPipeline, MessageHandler, Transport};
//!
//! #[derive(Default)]
//! struct Recorder(Vec<(String, Vec<u8>)>);
//!
//! impl Transport for Recorder {
//!     type Error = std::convert::Infallible;
//!
//!     fn subscribe(&mut self, _filter: &str) -> Result<(), Self::Error> {
//!         Ok(())
//!     }
//!
//!     fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), Self::Error> {
//!         self.0.push((topic.to_string(), payload.to_vec()));
//!         Ok(())
//!     }
//! }
//!
//! let mut pipeline = GatewayPipeline::new(GatewayConfig::default());
//! let mut transport = Recorder::default();
//!
//! pipeline.on_connected(&mut transport);
//! pipeline.on_message(
//!     &mut transport,
//!     "ingest/env/temperature",
//!     br#"{"ts":"2024-01-01T00:00:00","value":"23.5"}"#,
//! );
//!
//! assert_eq!(transport.0[0].0, "env/temperature");
//! assert_eq!(transport.0[0].1, br#"{"ts":"2024-01-01T00:00:00","value":23.5}"#);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod dedup;
pub mod errors;
pub mod metric;
pub mod pipeline;
pub mod time;
pub mod traits;
pub mod validators;

// Public API
pub use config::{DedupConfig, GatewayConfig};
pub use dedup::DedupCache;
pub use errors::{ConfigError, RejectReason};
pub use metric::Metric;
pub use pipeline::{
    ConnectionState, DisconnectReason, Disposition, DropReason, GatewayPipeline, GatewayStats,
};
pub use traits::{MessageHandler, Transport};
pub use validators::{coerce, validate, CleanedPayload, Coerced, Reading, Validated};

/// Crate version, as published in `Cargo.toml`
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
