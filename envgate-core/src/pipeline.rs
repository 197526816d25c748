//! Gateway Pipeline: Ingest → Validate → Dedup → Republish
//!
//! ## Overview
//!
//! [`GatewayPipeline`] owns the validator policy, the dedup cache and the
//! running statistics, and implements [`MessageHandler`] so a transport can
//! drive it. It contains no loop and performs no I/O of its own; everything
//! it sends goes through the [`Transport`] it is lent for the duration of a
//! callback.
//!
//! ## Message Flow
//!
//! ```text
//! ingest/env/<metric>
//!        │
//!        ▼
//!   received += 1
//!        │
//!   topic under ingest prefix? ── no ──▶ warn, UnexpectedTopic (not counted as dropped)
//!        │
//!   metric allowed? ─────────────── no ──▶ dropped += 1
//!        │
//!   payload valid? ──────────────── no ──▶ dropped += 1, log reason + payload preview
//!        │
//!   canonical bytes != raw bytes? ─ yes ─▶ modified += 1
//!        │
//!   seen inside dedup window? ───── yes ─▶ duplicated += 1
//!        │
//!   publish env/<metric> ────────── err ─▶ dropped += 1
//!        │
//!   forwarded += 1
//! ```
//!
//! ## Connection State
//!
//! ```text
//! Disconnected ──▶ Connecting ──▶ Connected ──▶ Disconnected
//!                      │                            │
//!                      └──────── (failure) ◀────────┘
//! ```
//!
//! Subscriptions do not survive a disconnect, so the ingest filter is
//! subscribed again on every entry into `Connected`.

use core::fmt;

use log::{debug, error, info, warn};
use serde::Serialize;

use crate::{
    config::GatewayConfig,
    dedup::DedupCache,
    errors::RejectReason,
    metric::Metric,
    time::{MonotonicTime, TimeSource},
    traits::{MessageHandler, Transport},
    validators::{decode_utf8_ignoring_invalid, validate_text},
};

/// Characters of a rejected payload kept in the log line
const RAW_PREVIEW_CHARS: usize = 100;

/// Where the pipeline stands with the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session; the transport is responsible for reconnecting
    Disconnected,
    /// A connection attempt is in flight
    Connecting,
    /// Session established and the ingest filter subscribed
    Connected,
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// We asked for it (shutdown)
    Requested,
    /// Broker or network dropped us; carries the transport's description
    Unexpected(String),
}

/// Why a counted message was not forwarded
#[derive(Debug, Clone, PartialEq)]
pub enum DropReason {
    /// Topic level after the ingest prefix is not an allowed metric
    UnknownMetric(String),
    /// Payload failed validation
    Rejected(RejectReason),
    /// Transport refused the publish
    PublishFailed(String),
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::UnknownMetric(metric) => write!(f, "Unknown metric '{metric}'"),
            DropReason::Rejected(reason) => write!(f, "{reason}"),
            DropReason::PublishFailed(err) => write!(f, "Publish failed: {err}"),
        }
    }
}

/// What happened to one delivery
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// Republished on `topic`
    Forwarded {
        /// Output topic
        topic: String,
        /// Whether the outbound bytes differ from the inbound ones
        modified: bool,
    },
    /// Same `(metric, ts)` already forwarded inside the dedup window
    Duplicate,
    /// Counted as dropped
    Dropped(DropReason),
    /// Topic outside the ingest namespace; counted as received only
    UnexpectedTopic,
    /// Arrived after shutdown; not counted
    Stopped,
}

/// Running counters, read for reporting
///
/// `modified` is orthogonal to the others: it counts messages that needed
/// cleanup whether they were then forwarded or found to be duplicates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GatewayStats {
    /// Every delivery handed to the pipeline
    pub received: u64,
    /// Successfully republished
    pub forwarded: u64,
    /// Unknown metric, invalid payload or failed publish
    pub dropped: u64,
    /// Suppressed by the dedup cache
    pub duplicated: u64,
    /// Cleaned payload differed from the raw bytes
    pub modified: u64,
}

impl GatewayStats {
    /// Emit the multi-line summary printed at shutdown
    pub fn log_summary(&self) {
        info!("{}", "=".repeat(60));
        info!("Gateway Statistics:");
        info!("  Total received:  {}", self.received);
        info!("  Forwarded:       {}", self.forwarded);
        info!("  Modified:        {}", self.modified);
        info!("  Duplicated:      {}", self.duplicated);
        info!("  Dropped:         {}", self.dropped);
        info!("{}", "=".repeat(60));
    }
}

impl fmt::Display for GatewayStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "received={} forwarded={} modified={} duplicated={} dropped={}",
            self.received, self.forwarded, self.modified, self.duplicated, self.dropped
        )
    }
}

/// The ingest-to-output gateway
pub struct GatewayPipeline<C: TimeSource = MonotonicTime> {
    config: GatewayConfig,
    dedup: Option<DedupCache<C>>,
    stats: GatewayStats,
    state: ConnectionState,
    stopped: bool,
}

impl GatewayPipeline<MonotonicTime> {
    /// Pipeline whose dedup window runs on a monotonic clock
    pub fn new(config: GatewayConfig) -> Self {
        Self::with_clock(config, MonotonicTime::new())
    }
}

impl<C: TimeSource> GatewayPipeline<C> {
    /// Pipeline whose dedup window runs on `clock`
    pub fn with_clock(config: GatewayConfig, clock: C) -> Self {
        let dedup = match config.dedup {
            Some(dedup) => {
                info!(
                    "Deduplication enabled (cache size: {}, TTL: {}s)",
                    dedup.capacity(),
                    dedup.ttl().as_secs_f64()
                );
                Some(DedupCache::new(dedup, clock))
            }
            None => {
                info!("Deduplication disabled");
                None
            }
        };

        Self {
            config,
            dedup,
            stats: GatewayStats::default(),
            state: ConnectionState::Disconnected,
            stopped: false,
        }
    }

    /// Active configuration
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> GatewayStats {
        self.stats
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether [`shutdown`](Self::shutdown) has run
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Keys held by the dedup cache, `None` when dedup is disabled
    pub fn dedup_len(&self) -> Option<usize> {
        self.dedup.as_ref().map(DedupCache::len)
    }

    /// Stop accepting deliveries and report the final counters
    ///
    /// Idempotent; the summary is only logged the first time.
    pub fn shutdown(&mut self) -> GatewayStats {
        if !self.stopped {
            info!("Stopping gateway pipeline...");
            self.stopped = true;
            self.state = ConnectionState::Disconnected;
            self.stats.log_summary();
        }
        self.stats
    }

    fn forward<T: Transport>(
        &mut self,
        transport: &mut T,
        topic: &str,
        metric: Metric,
        payload: &[u8],
    ) -> Disposition {
        let text = decode_utf8_ignoring_invalid(payload);
        let validated = match validate_text(&text) {
            Ok(validated) => validated,
            Err(reason) => {
                warn!("{}", drop_line(topic, &reason, &text));
                self.stats.dropped += 1;
                return Disposition::Dropped(DropReason::Rejected(reason));
            }
        };
        let cleaned = validated.payload;

        let canonical = cleaned.canonical_json();
        let was_modified = canonical.as_bytes() != payload;
        if was_modified {
            self.stats.modified += 1;
        }

        if let Some(cache) = self.dedup.as_mut() {
            if cache.is_duplicate(metric, &cleaned.ts) {
                info!(
                    "DUPLICATE | topic={} | ts={} | value={} | dropped",
                    topic, cleaned.ts, cleaned.value
                );
                self.stats.duplicated += 1;
                return Disposition::Duplicate;
            }
        }

        let output_topic = self.config.output_topic(metric);
        match transport.publish(&output_topic, canonical.as_bytes()) {
            Ok(()) => {
                self.stats.forwarded += 1;
                let status = if was_modified { "MODIFIED" } else { "FORWARD" };
                info!(
                    "{} | {} → {} | ts={} | value={}",
                    status, topic, output_topic, cleaned.ts, cleaned.value
                );
                Disposition::Forwarded {
                    topic: output_topic,
                    modified: was_modified,
                }
            }
            Err(err) => {
                error!("Failed to publish to {}: {}", output_topic, err);
                self.stats.dropped += 1;
                Disposition::Dropped(DropReason::PublishFailed(err.to_string()))
            }
        }
    }
}

impl<C: TimeSource> MessageHandler for GatewayPipeline<C> {
    fn on_connecting(&mut self) {
        self.state = ConnectionState::Connecting;
    }

    fn on_connected<T: Transport>(&mut self, transport: &mut T) {
        self.state = ConnectionState::Connected;
        info!("✓ Connected to MQTT Broker successfully");

        let filter = self.config.subscribe_filter();
        match transport.subscribe(&filter) {
            Ok(()) => {
                info!("✓ Subscribed to: {}", filter);
                info!("Gateway is ready to forward messages");
                info!(
                    "Mapping: {}* → {}*",
                    self.config.ingest_prefix, self.config.output_prefix
                );
            }
            Err(err) => error!("Failed to subscribe to {}: {}", filter, err),
        }
    }

    fn on_disconnected(&mut self, reason: DisconnectReason) {
        let was_connected = self.state == ConnectionState::Connected;
        self.state = ConnectionState::Disconnected;

        match reason {
            DisconnectReason::Requested => info!("Disconnected from MQTT Broker"),
            DisconnectReason::Unexpected(detail) if was_connected => warn!(
                "Unexpected disconnection ({}). Will attempt to reconnect...",
                detail
            ),
            DisconnectReason::Unexpected(detail) => {
                debug!("Connection attempt ended: {}", detail)
            }
        }
    }

    fn on_message<T: Transport>(
        &mut self,
        transport: &mut T,
        topic: &str,
        payload: &[u8],
    ) -> Disposition {
        if self.stopped {
            debug!("Ignoring delivery on {} after shutdown", topic);
            return Disposition::Stopped;
        }

        self.stats.received += 1;

        let Some(metric_name) = topic.strip_prefix(self.config.ingest_prefix.as_str()) else {
            warn!("Received message from unexpected topic: {}", topic);
            return Disposition::UnexpectedTopic;
        };

        let metric = match Metric::from_name(metric_name) {
            Some(metric) if self.config.is_allowed(metric) => metric,
            _ => {
                warn!(
                    "Unknown metric '{}', dropping message | topic={}",
                    metric_name, topic
                );
                self.stats.dropped += 1;
                return Disposition::Dropped(DropReason::UnknownMetric(metric_name.to_string()));
            }
        };

        self.forward(transport, topic, metric, payload)
    }
}

fn drop_line(topic: &str, reason: &RejectReason, text: &str) -> String {
    format!(
        "DROP | topic={} | kind={} | reason={} | raw_payload={}",
        topic,
        reason.kind(),
        reason,
        preview(text)
    )
}

fn preview(text: &str) -> String {
    text.chars().take(RAW_PREVIEW_CHARS).collect()
}
