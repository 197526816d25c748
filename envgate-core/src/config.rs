//! Gateway configuration
//!
//! Builder-style, with the defaults of the deployed service:
//!
//! | Setting          | Default                              |
//! |------------------|--------------------------------------|
//! | ingest prefix    | `ingest/env/`                        |
//! | output prefix    | `env/`                               |
//! | allowed metrics  | temperature, humidity, pressure      |
//! | dedup            | enabled, 1000 keys, 300 s window     |
//!
//! ```rust
//! use envgate_core::{DedupConfig, GatewayConfig, Metric};
//!
//! let config = GatewayConfig::default()
//!     .ingest_prefix("raw/lab/")
//!     .output_prefix("lab/")
//!     .allowed_metrics([Metric::Temperature])
//!     .dedup(DedupConfig::new(50, 30.0)?);
//!
//! config.validate()?;
//! assert_eq!(config.subscribe_filter(), "raw/lab/+");
//! assert_eq!(config.output_topic(Metric::Temperature), "lab/temperature");
//! # Ok::<(), envgate_core::ConfigError>(())
//! ```

use std::time::Duration;

use crate::errors::ConfigError;
use crate::metric::Metric;

/// Default ingest namespace
pub const DEFAULT_INGEST_PREFIX: &str = "ingest/env/";

/// Default output namespace
pub const DEFAULT_OUTPUT_PREFIX: &str = "env/";

/// Default number of keys the dedup cache holds
pub const DEFAULT_DEDUP_CAPACITY: usize = 1000;

/// Default dedup window in seconds
pub const DEFAULT_DEDUP_TTL_SECS: f64 = 300.0;

/// Single-level MQTT wildcard appended to the ingest prefix
const SINGLE_LEVEL_WILDCARD: char = '+';

/// Dedup cache sizing; always valid once constructed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DedupConfig {
    capacity: usize,
    ttl: Duration,
}

impl DedupConfig {
    /// Capacity in keys, TTL in (fractional) seconds
    pub fn new(capacity: usize, ttl_secs: f64) -> Result<Self, ConfigError> {
        if !(ttl_secs.is_finite() && ttl_secs > 0.0) {
            return Err(ConfigError::InvalidTtl(ttl_secs));
        }
        let ttl =
            Duration::try_from_secs_f64(ttl_secs).map_err(|_| ConfigError::InvalidTtl(ttl_secs))?;
        Self::with_ttl(capacity, ttl)
    }

    /// Capacity in keys, TTL as a duration
    ///
    /// The cache counts in whole milliseconds, so the TTL must be at least one.
    pub fn with_ttl(capacity: usize, ttl: Duration) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::ZeroCapacity(capacity));
        }
        if ttl < Duration::from_millis(1) {
            return Err(ConfigError::InvalidTtl(ttl.as_secs_f64()));
        }
        Ok(Self { capacity, ttl })
    }

    /// Maximum keys held at once
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Dedup window
    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_DEDUP_CAPACITY,
            ttl: Duration::from_secs(DEFAULT_DEDUP_TTL_SECS as u64),
        }
    }
}

/// Routing and dedup settings for [`GatewayPipeline`](crate::GatewayPipeline)
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    /// Topic prefix raw readings arrive under; must end with `/`
    pub ingest_prefix: String,
    /// Topic prefix cleaned readings are republished under
    pub output_prefix: String,
    /// Metrics accepted; anything else is dropped
    pub allowed_metrics: Vec<Metric>,
    /// Dedup settings, `None` disables deduplication
    pub dedup: Option<DedupConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            ingest_prefix: DEFAULT_INGEST_PREFIX.to_string(),
            output_prefix: DEFAULT_OUTPUT_PREFIX.to_string(),
            allowed_metrics: Metric::ALL.to_vec(),
            dedup: Some(DedupConfig::default()),
        }
    }
}

impl GatewayConfig {
    /// Set the ingest prefix
    pub fn ingest_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.ingest_prefix = prefix.into();
        self
    }

    /// Set the output prefix
    pub fn output_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.output_prefix = prefix.into();
        self
    }

    /// Replace the allowed metric set
    pub fn allowed_metrics(mut self, metrics: impl IntoIterator<Item = Metric>) -> Self {
        let mut metrics: Vec<Metric> = metrics.into_iter().collect();
        metrics.sort_unstable();
        metrics.dedup();
        self.allowed_metrics = metrics;
        self
    }

    /// Enable dedup with the given sizing
    pub fn dedup(mut self, dedup: DedupConfig) -> Self {
        self.dedup = Some(dedup);
        self
    }

    /// Disable dedup
    pub fn without_dedup(mut self) -> Self {
        self.dedup = None;
        self
    }

    /// Check the settings can run
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_prefix(&self.ingest_prefix)?;
        check_prefix(&self.output_prefix)?;
        if !self.ingest_prefix.ends_with('/') {
            return Err(ConfigError::InvalidPrefix {
                prefix: self.ingest_prefix.clone(),
                reason: "ingest prefix must end with '/'",
            });
        }

        if self.allowed_metrics.is_empty() {
            return Err(ConfigError::NoMetrics);
        }

        // Our own output must never match our subscription
        let loops = self
            .allowed_metrics
            .iter()
            .any(|&metric| self.metric_name_for_topic(&self.output_topic(metric)).is_some());
        if loops {
            return Err(ConfigError::LoopingPrefixes {
                ingest: self.ingest_prefix.clone(),
                output: self.output_prefix.clone(),
            });
        }

        Ok(())
    }

    /// Filter to subscribe to: `<ingest_prefix>+`
    pub fn subscribe_filter(&self) -> String {
        format!("{}{}", self.ingest_prefix, SINGLE_LEVEL_WILDCARD)
    }

    /// Where a cleaned reading for `metric` is republished
    pub fn output_topic(&self, metric: Metric) -> String {
        format!("{}{}", self.output_prefix, metric.name())
    }

    /// The topic level after the ingest prefix, if `topic` is a single level below it
    pub fn metric_name_for_topic<'a>(&self, topic: &'a str) -> Option<&'a str> {
        topic
            .strip_prefix(self.ingest_prefix.as_str())
            .filter(|rest| !rest.is_empty() && !rest.contains('/'))
    }

    /// Whether `metric` is in the allowed set
    pub fn is_allowed(&self, metric: Metric) -> bool {
        self.allowed_metrics.contains(&metric)
    }
}

fn check_prefix(prefix: &str) -> Result<(), ConfigError> {
    if prefix.is_empty() {
        return Err(ConfigError::InvalidPrefix {
            prefix: prefix.to_string(),
            reason: "prefix must not be empty",
        });
    }
    if prefix.contains(['+', '#']) {
        return Err(ConfigError::InvalidPrefix {
            prefix: prefix.to_string(),
            reason: "prefix must not contain MQTT wildcards",
        });
    }
    Ok(())
}
