//! MQTT connector for EnvGate
//!
//! Wraps a `rumqttc` client and event loop. [`MqttConnector::run`] polls the
//! event loop on the calling task, translating broker events into
//! [`MessageHandler`] callbacks, until the shutdown future resolves.

use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use envgate_core::{DisconnectReason, MessageHandler, Transport};
use log::{debug, error, info, warn};
use rumqttc::{
    AsyncClient, ClientError, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions,
    Outgoing, Packet, QoS,
};
use thiserror::Error;

use crate::{ConnectionStats, Connector};

/// Default broker port
pub const DEFAULT_PORT: u16 = 1883;

/// Default keep-alive interval
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Default pause between connection attempts
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Default depth of the client request channel
pub const DEFAULT_REQUEST_CAPACITY: usize = 100;

/// Largest packet MQTT can encode (remaining length of 268 435 455 bytes)
pub const MAX_PACKET_SIZE: usize = 268_435_455;

/// Longest wait for the DISCONNECT packet to leave on shutdown
const DISCONNECT_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// MQTT-specific errors
#[derive(Debug, Error)]
pub enum MqttError {
    /// Settings the client cannot run with
    #[error("Configuration error: {0}")]
    Config(String),

    /// The client refused a request (channel full or closed)
    #[error("Client error: {0}")]
    Client(#[from] ClientError),
}

/// Broker session settings
#[derive(Debug, Clone, PartialEq)]
pub struct MqttConfig {
    /// Broker host name or address
    pub host: String,
    /// Broker TCP port
    pub port: u16,
    /// Username, sent only together with a password
    pub username: Option<String>,
    /// Password
    pub password: Option<String>,
    /// Client identifier
    pub client_id: String,
    /// Keep-alive interval
    pub keep_alive: Duration,
    /// Pause between connection attempts
    pub reconnect_delay: Duration,
    /// Depth of the request channel between client and event loop
    pub request_capacity: usize,
    /// Largest packet accepted or sent; bigger incoming packets end the session
    pub max_packet_size: usize,
}

impl MqttConfig {
    /// Anonymous session to `host:port` with default timings
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
            password: None,
            client_id: default_client_id(),
            keep_alive: DEFAULT_KEEP_ALIVE,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            request_capacity: DEFAULT_REQUEST_CAPACITY,
            max_packet_size: MAX_PACKET_SIZE,
        }
    }

    /// Authenticate with username and password
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set the client identifier
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Set the keep-alive interval
    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Set the pause between connection attempts
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set the request channel depth
    pub fn request_capacity(mut self, capacity: usize) -> Self {
        self.request_capacity = capacity;
        self
    }

    /// Set the packet size limit, both directions
    pub fn max_packet_size(mut self, bytes: usize) -> Self {
        self.max_packet_size = bytes;
        self
    }

    /// `host:port`
    pub fn broker_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check the settings before they reach `rumqttc`, which panics on some of them
    pub fn validate(&self) -> Result<(), MqttError> {
        if self.host.trim().is_empty() {
            return Err(MqttError::Config("broker host must not be empty".into()));
        }
        if self.port == 0 {
            return Err(MqttError::Config("broker port must not be 0".into()));
        }
        if self.client_id.is_empty() || self.client_id.starts_with(' ') {
            return Err(MqttError::Config(format!(
                "invalid client id '{}'",
                self.client_id
            )));
        }
        if self.keep_alive < Duration::from_secs(1) {
            return Err(MqttError::Config("keep-alive must be at least 1 second".into()));
        }
        if self.max_packet_size == 0 || self.max_packet_size > MAX_PACKET_SIZE {
            return Err(MqttError::Config(format!(
                "max packet size must be between 1 and {MAX_PACKET_SIZE}, got {}",
                self.max_packet_size
            )));
        }
        if self.request_capacity == 0 {
            return Err(MqttError::Config("request capacity must not be 0".into()));
        }
        if self.password.is_some() && self.username.is_none() {
            return Err(MqttError::Config("password given without username".into()));
        }
        Ok(())
    }

    /// Options for a clean MQTT 3.1.1 session
    pub fn to_options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(self.client_id.clone(), self.host.clone(), self.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);
        // Oversized payloads must reach the validator, not fail the session
        options.set_max_packet_size(self.max_packet_size, self.max_packet_size);
        if let Some(username) = &self.username {
            options.set_credentials(username.clone(), self.password.clone().unwrap_or_default());
        }
        options
    }
}

/// `proxy-gateway-<unix seconds>`
pub fn default_client_id() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default();
    format!("proxy-gateway-{secs}")
}

/// Human readable reason for a CONNACK return code
pub fn connack_reason(code: ConnectReturnCode) -> &'static str {
    match code {
        ConnectReturnCode::Success => "Connection accepted",
        ConnectReturnCode::RefusedProtocolVersion => {
            "Connection refused - incorrect protocol version"
        }
        ConnectReturnCode::BadClientId => "Connection refused - invalid client identifier",
        ConnectReturnCode::ServiceUnavailable => "Connection refused - server unavailable",
        ConnectReturnCode::BadUserNamePassword => "Connection refused - bad username or password",
        ConnectReturnCode::NotAuthorized => "Connection refused - not authorized",
    }
}

/// The client half, lent to the handler during callbacks
pub struct MqttTransport {
    client: AsyncClient,
    stats: ConnectionStats,
}

impl MqttTransport {
    fn new(client: AsyncClient) -> Self {
        Self {
            client,
            stats: ConnectionStats::default(),
        }
    }
}

impl Transport for MqttTransport {
    type Error = MqttError;

    fn subscribe(&mut self, filter: &str) -> Result<(), Self::Error> {
        self.client.try_subscribe(filter, QoS::AtMostOnce)?;
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), Self::Error> {
        match self
            .client
            .try_publish(topic, QoS::AtMostOnce, false, payload.to_vec())
        {
            Ok(()) => {
                self.stats.record_sent(payload.len());
                Ok(())
            }
            Err(err) => {
                self.stats.record_failure(&err);
                Err(err.into())
            }
        }
    }
}

/// Owns the broker session and drives a [`MessageHandler`]
pub struct MqttConnector {
    config: MqttConfig,
    transport: MqttTransport,
    eventloop: EventLoop,
    connected: bool,
    sessions: u64,
}

impl MqttConnector {
    /// Build the client; nothing is sent until [`run`](Self::run)
    pub fn new(config: MqttConfig) -> Result<Self, MqttError> {
        config.validate()?;
        let (client, eventloop) = AsyncClient::new(config.to_options(), config.request_capacity);

        Ok(Self {
            config,
            transport: MqttTransport::new(client),
            eventloop,
            connected: false,
            sessions: 0,
        })
    }

    /// Active settings
    pub fn config(&self) -> &MqttConfig {
        &self.config
    }

    /// Drive `handler` until `shutdown` resolves
    ///
    /// Connection failures never end the loop: they are logged and retried
    /// after `reconnect_delay`. On shutdown a DISCONNECT is sent if a session
    /// is up, with a bounded wait for it to leave.
    pub async fn run<H, F>(&mut self, handler: &mut H, shutdown: F)
    where
        H: MessageHandler,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        info!("Connecting to MQTT Broker at {}...", self.config.broker_addr());
        handler.on_connecting();

        loop {
            let polled = tokio::select! {
                biased;
                _ = &mut shutdown => None,
                event = self.eventloop.poll() => Some(event),
            };
            let Some(polled) = polled else {
                break;
            };

            match polled {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => self.on_connack(handler, ack.code),
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    handler.on_message(&mut self.transport, &publish.topic, &publish.payload);
                }
                Ok(event) => debug!("MQTT event: {:?}", event),
                Err(err) => {
                    self.on_connection_error(handler, err);

                    let interrupted = tokio::select! {
                        biased;
                        _ = &mut shutdown => true,
                        _ = tokio::time::sleep(self.config.reconnect_delay) => false,
                    };
                    if interrupted {
                        break;
                    }

                    info!("Reconnecting to MQTT Broker at {}...", self.config.broker_addr());
                    handler.on_connecting();
                }
            }
        }

        self.disconnect(handler).await;
    }

    fn on_connack<H: MessageHandler>(&mut self, handler: &mut H, code: ConnectReturnCode) {
        if code != ConnectReturnCode::Success {
            // rumqttc reports refusals as poll errors; handled there
            warn!("Unexpected CONNACK: {}", connack_reason(code));
            return;
        }

        if self.sessions > 0 {
            self.transport.stats.reconnections += 1;
        }
        self.sessions += 1;
        self.connected = true;
        handler.on_connected(&mut self.transport);
    }

    fn on_connection_error<H: MessageHandler>(&mut self, handler: &mut H, err: ConnectionError) {
        let detail = match &err {
            ConnectionError::ConnectionRefused(code) => connack_reason(*code).to_string(),
            other => other.to_string(),
        };
        self.transport.stats.last_error = Some(detail.clone());

        let delay = self.config.reconnect_delay.as_secs_f64();
        if self.connected {
            self.connected = false;
            handler.on_disconnected(DisconnectReason::Unexpected(detail));
            info!("Retrying in {}s...", delay);
        } else {
            match err {
                ConnectionError::ConnectionRefused(_) => {
                    error!("Failed to connect: {}. Retrying in {}s...", detail, delay)
                }
                _ => error!("Connection error: {}. Retrying in {}s...", detail, delay),
            }
            handler.on_disconnected(DisconnectReason::Unexpected(detail));
        }
    }

    async fn disconnect<H: MessageHandler>(&mut self, handler: &mut H) {
        if !self.connected {
            return;
        }
        self.connected = false;

        if let Err(err) = self.transport.client.try_disconnect() {
            warn!("Failed to queue DISCONNECT: {}", err);
        } else {
            let eventloop = &mut self.eventloop;
            let flushed = tokio::time::timeout(DISCONNECT_FLUSH_TIMEOUT, async {
                loop {
                    match eventloop.poll().await {
                        Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                        Ok(_) => {}
                    }
                }
            })
            .await;
            if flushed.is_err() {
                warn!("Timed out waiting for DISCONNECT to be sent");
            }
        }

        handler.on_disconnected(DisconnectReason::Requested);
    }
}

impl Connector for MqttConnector {
    fn is_connected(&self) -> bool {
        self.connected
    }

    fn stats(&self) -> ConnectionStats {
        self.transport.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use envgate_core::{Disposition, GatewayConfig, GatewayPipeline};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_config_builder() {
        let config = MqttConfig::new("broker.local", 1884)
            .credentials("proxy", "proxy123")
            .client_id("gateway-test")
            .keep_alive(Duration::from_secs(30))
            .reconnect_delay(Duration::from_millis(250));

        assert_eq!(config.broker_addr(), "broker.local:1884");
        assert_eq!(config.username.as_deref(), Some("proxy"));
        assert_eq!(config.reconnect_delay, Duration::from_millis(250));
        assert!(config.validate().is_ok());

        let options = config.to_options();
        assert_eq!(options.broker_address(), ("broker.local".to_string(), 1884));
        assert_eq!(options.client_id(), "gateway-test");
        assert_eq!(options.keep_alive(), Duration::from_secs(30));
        assert!(options.clean_session());
        assert_eq!(
            options.credentials(),
            Some(("proxy".to_string(), "proxy123".to_string()))
        );
    }

    #[test]
    fn test_defaults() {
        let config = MqttConfig::new("localhost", DEFAULT_PORT);
        assert!(config.client_id.starts_with("proxy-gateway-"));
        assert_eq!(config.keep_alive, Duration::from_secs(60));
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
        assert!(config.to_options().credentials().is_none());
        assert_eq!(config.max_packet_size, MAX_PACKET_SIZE);
        assert_eq!(config.to_options().max_packet_size(), MAX_PACKET_SIZE);

        let options = config.max_packet_size(64 * 1024).to_options();
        assert_eq!(options.max_packet_size(), 64 * 1024);
    }

    #[test]
    fn test_validation() {
        let base = MqttConfig::new("localhost", DEFAULT_PORT);
        assert!(base.clone().validate().is_ok());

        let cases = [
            MqttConfig::new("", DEFAULT_PORT),
            MqttConfig::new("localhost", 0),
            base.clone().client_id(""),
            base.clone().client_id(" padded"),
            base.clone().keep_alive(Duration::from_millis(500)),
            base.clone().request_capacity(0),
            base.clone().max_packet_size(0),
            base.clone().max_packet_size(MAX_PACKET_SIZE + 1),
        ];
        for config in cases {
            assert!(matches!(config.validate(), Err(MqttError::Config(_))), "{config:?}");
        }
        assert!(MqttConnector::new(MqttConfig::new("", DEFAULT_PORT)).is_err());
    }

    #[test]
    fn test_connack_reasons() {
        assert_eq!(
            connack_reason(ConnectReturnCode::BadUserNamePassword),
            "Connection refused - bad username or password"
        );
        assert_eq!(
            connack_reason(ConnectReturnCode::NotAuthorized),
            "Connection refused - not authorized"
        );
        assert_eq!(
            connack_reason(ConnectReturnCode::ServiceUnavailable),
            "Connection refused - server unavailable"
        );
    }

    #[test]
    fn test_publish_counts_refusals() {
        let config = MqttConfig::new("localhost", DEFAULT_PORT).request_capacity(1);
        let (client, _eventloop) = AsyncClient::new(config.to_options(), config.request_capacity);
        let mut transport = MqttTransport::new(client);

        assert!(transport.publish("env/temperature", b"{}").is_ok());
        // Event loop never polled, so the channel is now full
        assert!(matches!(
            transport.publish("env/temperature", b"{}"),
            Err(MqttError::Client(_))
        ));

        assert_eq!(transport.stats.messages_sent, 1);
        assert_eq!(transport.stats.bytes_sent, 2);
        assert_eq!(transport.stats.messages_failed, 1);
        assert!(transport.stats.last_error.is_some());
    }

    #[derive(Default)]
    struct CountingHandler {
        connecting: usize,
        connected: usize,
        disconnected: Vec<DisconnectReason>,
    }

    impl MessageHandler for CountingHandler {
        fn on_connecting(&mut self) {
            self.connecting += 1;
        }

        fn on_connected<T: Transport>(&mut self, _transport: &mut T) {
            self.connected += 1;
        }

        fn on_disconnected(&mut self, reason: DisconnectReason) {
            self.disconnected.push(reason);
        }

        fn on_message<T: Transport>(
            &mut self,
            _transport: &mut T,
            _topic: &str,
            _payload: &[u8],
        ) -> Disposition {
            Disposition::UnexpectedTopic
        }
    }

    #[tokio::test]
    async fn test_unreachable_broker_retries_until_shutdown() {
        // Grab a free port, then close it so connects are refused
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .and_then(|listener| listener.local_addr())
            .map(|addr| addr.port())
            .unwrap();

        let config = MqttConfig::new("127.0.0.1", port)
            .client_id("envgate-test")
            .reconnect_delay(Duration::from_millis(20));
        let mut connector = MqttConnector::new(config).unwrap();
        let mut handler = CountingHandler::default();

        connector
            .run(&mut handler, tokio::time::sleep(Duration::from_millis(300)))
            .await;

        assert!(handler.connecting >= 2, "attempts: {}", handler.connecting);
        assert_eq!(handler.connected, 0);
        assert!(handler
            .disconnected
            .iter()
            .all(|reason| matches!(reason, DisconnectReason::Unexpected(_))));
        assert!(!connector.is_connected());
        assert!(connector.stats().last_error.is_some());
    }

    #[tokio::test]
    async fn test_immediate_shutdown_sends_nothing() {
        let config = MqttConfig::new("127.0.0.1", DEFAULT_PORT).client_id("envgate-test");
        let mut connector = MqttConnector::new(config).unwrap();
        let mut handler = CountingHandler::default();

        connector.run(&mut handler, async {}).await;

        assert_eq!(handler.connecting, 1);
        assert!(handler.disconnected.is_empty());
        assert_eq!(connector.stats(), ConnectionStats::default());
    }

    /// QoS 0 PUBLISH as a broker would put it on the wire
    fn publish_packet(topic: &str, payload: &[u8]) -> Vec<u8> {
        let mut body = Vec::with_capacity(2 + topic.len() + payload.len());
        body.extend_from_slice(&(topic.len() as u16).to_be_bytes());
        body.extend_from_slice(topic.as_bytes());
        body.extend_from_slice(payload);

        let mut packet = vec![0x30];
        let mut remaining = body.len();
        loop {
            let mut byte = (remaining % 128) as u8;
            remaining /= 128;
            if remaining > 0 {
                byte |= 0x80;
            }
            packet.push(byte);
            if remaining == 0 {
                break;
            }
        }
        packet.extend_from_slice(&body);
        packet
    }

    /// Accept one client, acknowledge it, push `deliveries`, then drain until it hangs up
    async fn serve_session(listener: TcpListener, deliveries: Vec<Vec<u8>>) {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 4096];
        socket.read(&mut buf).await.unwrap();
        socket.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();
        for packet in deliveries {
            socket.write_all(&packet).await.unwrap();
        }
        while matches!(socket.read(&mut buf).await, Ok(n) if n > 0) {}
    }

    #[tokio::test]
    async fn test_oversized_delivery_is_dropped_not_fatal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let oversized = vec![b'x'; 20_000];
        let valid = br#"{"ts":"2024-01-01T00:00:00","value":1}"#;
        let broker = tokio::spawn(serve_session(
            listener,
            vec![
                publish_packet("ingest/env/temperature", &oversized),
                publish_packet("ingest/env/temperature", valid),
            ],
        ));

        let config = MqttConfig::new("127.0.0.1", port)
            .client_id("envgate-test")
            .reconnect_delay(Duration::from_millis(20));
        let mut connector = MqttConnector::new(config).unwrap();
        let mut gateway = GatewayPipeline::new(GatewayConfig::default());

        connector
            .run(&mut gateway, tokio::time::sleep(Duration::from_millis(500)))
            .await;
        broker.abort();

        let stats = gateway.stats();
        assert_eq!(stats.received, 2);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.forwarded, 1);
        assert_eq!(connector.stats().reconnections, 0);
        assert_eq!(connector.stats().messages_sent, 1);
        assert!(connector.stats().last_error.is_none());
    }
}
