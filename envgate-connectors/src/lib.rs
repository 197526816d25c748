//! Broker Connectors for the EnvGate Pipeline
//!
//! ## Overview
//!
//! `envgate-core` contains no network code. A connector owns the broker
//! session, implements [`Transport`](envgate_core::Transport) so the pipeline
//! can subscribe and publish, and feeds every connection event and delivery to
//! a [`MessageHandler`](envgate_core::MessageHandler).
//!
//! ## MQTT
//!
//! The only protocol the gateway speaks today. Characteristics of the session:
//!
//! - MQTT 3.1.1, clean session, username/password auth
//! - Keep-alive 60 s by default
//! - QoS 0 everywhere: subscriptions and fire-and-forget publishes
//! - Fixed-delay reconnection, forever, until shutdown
//!
//! ```text
//!           ┌──────────── reconnect_delay ◀───────────┐
//!           ▼                                         │
//!     on_connecting ──▶ CONNACK ok ──▶ on_connected ──┤ (error)
//!           │                              │          │
//!           └── refused / io error ────────┼──────────┘
//!                                          ▼
//!                               PUBLISH ──▶ on_message
//! ```
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use envgate_connectors::mqtt::{MqttConfig, MqttConnector};
//! use envgate_core::{GatewayConfig, GatewayPipeline};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MqttConfig::new("localhost", 1883).credentials("proxy", "proxy123");
//! let mut connector = MqttConnector::new(config)?;
//! let mut pipeline = GatewayPipeline::new(GatewayConfig::default());
//!
//! connector.run(&mut pipeline, async {
//!     let _ = tokio::signal::ctrl_c().await;
//! }).await;
//! pipeline.shutdown();
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "mqtt")]
pub mod mqtt;

// Re-export common types
#[cfg(feature = "mqtt")]
pub use mqtt::{MqttConfig, MqttConnector, MqttError, MqttTransport};

/// What every connector reports about its session
pub trait Connector {
    /// Whether a broker session is currently established
    fn is_connected(&self) -> bool;

    /// Counters since the connector was created
    fn stats(&self) -> ConnectionStats;
}

/// Connection statistics common to all connectors
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Publishes handed to the client successfully
    pub messages_sent: u64,
    /// Publishes the client refused
    pub messages_failed: u64,
    /// Payload bytes handed to the client
    pub bytes_sent: u64,
    /// Sessions established after the first one
    pub reconnections: u32,
    /// Last connection or publish error message
    pub last_error: Option<String>,
}

impl ConnectionStats {
    pub(crate) fn record_sent(&mut self, bytes: usize) {
        self.messages_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    pub(crate) fn record_failure(&mut self, error: impl ToString) {
        self.messages_failed += 1;
        self.last_error = Some(error.to_string());
    }
}
