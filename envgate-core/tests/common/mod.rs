//! Shared fixtures for gateway integration tests
//!
//! - An in-memory broker stand-in that records subscriptions and publishes
//! - A pipeline factory on a manually driven clock

#![allow(dead_code)]

use envgate_core::{
    time::FixedTime, DedupConfig, GatewayConfig, GatewayPipeline, MessageHandler, Transport,
};

/// Records everything the pipeline sends
#[derive(Debug, Default)]
pub struct RecordingTransport {
    pub subscriptions: Vec<String>,
    pub published: Vec<(String, Vec<u8>)>,
    /// Refuse every publish while set
    pub offline: bool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Payloads published on `topic`, as text
    pub fn payloads_on(&self, topic: &str) -> Vec<String> {
        self.published
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, payload)| String::from_utf8_lossy(payload).into_owned())
            .collect()
    }
}

impl Transport for RecordingTransport {
    type Error = String;

    fn subscribe(&mut self, filter: &str) -> Result<(), Self::Error> {
        self.subscriptions.push(filter.to_string());
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), Self::Error> {
        if self.offline {
            return Err("not connected".to_string());
        }
        self.published.push((topic.to_string(), payload.to_vec()));
        Ok(())
    }
}

/// A pipeline on a clock starting at zero, already connected to `transport`
pub fn connected_gateway(
    config: GatewayConfig,
    transport: &mut RecordingTransport,
) -> (GatewayPipeline<FixedTime>, FixedTime) {
    let clock = FixedTime::new(0);
    let mut pipeline = GatewayPipeline::with_clock(config, clock.clone());
    pipeline.on_connecting();
    pipeline.on_connected(transport);
    (pipeline, clock)
}

/// Default routing with a short dedup window
pub fn short_window_config(ttl_secs: f64) -> GatewayConfig {
    match DedupConfig::new(1000, ttl_secs) {
        Ok(dedup) => GatewayConfig::default().dedup(dedup),
        Err(err) => panic!("bad test window {ttl_secs}: {err}"),
    }
}
