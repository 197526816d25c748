use std::time::Duration;

use config::{Config, ConfigError, Environment};
use envgate_connectors::mqtt::{default_client_id, MqttConfig, MqttError, MAX_PACKET_SIZE};
use envgate_core::{DedupConfig, GatewayConfig, Metric};
use serde::{Deserialize, Serialize};

/// Service settings, read from unprefixed environment variables
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Broker host name
    #[serde(default = "default_broker_host")]
    pub mqtt_broker_host: String,

    /// Broker TCP port
    #[serde(default = "default_broker_port")]
    pub mqtt_broker_port: u16,

    /// Username; empty connects anonymously
    #[serde(default = "default_username")]
    pub mqtt_username: String,

    #[serde(default = "default_password", skip_serializing)]
    pub mqtt_password: String,

    /// Client id; generated from the start time when unset
    #[serde(default)]
    pub mqtt_client_id: Option<String>,

    /// Keep-alive in seconds
    #[serde(default = "default_keep_alive_secs")]
    pub mqtt_keep_alive_secs: u64,

    /// Largest MQTT packet in bytes, both directions
    #[serde(default = "default_max_packet_size")]
    pub mqtt_max_packet_size: usize,

    /// Log level (debug, info, warning, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_dedup_enabled")]
    pub dedup_enabled: bool,

    /// Maximum keys held by the dedup cache
    #[serde(default = "default_dedup_cache_size")]
    pub dedup_cache_size: usize,

    /// Dedup window in seconds
    #[serde(default = "default_dedup_cache_ttl")]
    pub dedup_cache_ttl: f64,

    #[serde(default = "default_ingest_prefix")]
    pub ingest_prefix: String,

    #[serde(default = "default_output_prefix")]
    pub output_prefix: String,

    /// Comma separated metric names
    #[serde(default = "default_allowed_metrics")]
    pub allowed_metrics: String,

    /// Pause between connection attempts in seconds
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: f64,
}

fn default_broker_host() -> String {
    "localhost".to_string()
}

fn default_broker_port() -> u16 {
    1883
}

fn default_username() -> String {
    "proxy".to_string()
}

fn default_password() -> String {
    "proxy123".to_string()
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_max_packet_size() -> usize {
    MAX_PACKET_SIZE
}

fn default_log_level() -> String {
    "INFO".to_string()
}

fn default_dedup_enabled() -> bool {
    true
}

fn default_dedup_cache_size() -> usize {
    envgate_core::config::DEFAULT_DEDUP_CAPACITY
}

fn default_dedup_cache_ttl() -> f64 {
    envgate_core::config::DEFAULT_DEDUP_TTL_SECS
}

fn default_ingest_prefix() -> String {
    envgate_core::config::DEFAULT_INGEST_PREFIX.to_string()
}

fn default_output_prefix() -> String {
    envgate_core::config::DEFAULT_OUTPUT_PREFIX.to_string()
}

fn default_allowed_metrics() -> String {
    Metric::ALL.map(|metric| metric.name()).join(",")
}

fn default_reconnect_delay_secs() -> f64 {
    5.0
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::default())
            .build()?
            .try_deserialize()
    }

    /// Routing and dedup settings for the pipeline, validated
    pub fn gateway_config(&self) -> Result<GatewayConfig, envgate_core::ConfigError> {
        let metrics = self
            .allowed_metrics
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::parse::<Metric>)
            .collect::<Result<Vec<_>, _>>()?;

        let mut gateway = GatewayConfig::default()
            .ingest_prefix(self.ingest_prefix.as_str())
            .output_prefix(self.output_prefix.as_str())
            .allowed_metrics(metrics);

        gateway = if self.dedup_enabled {
            gateway.dedup(DedupConfig::new(self.dedup_cache_size, self.dedup_cache_ttl)?)
        } else {
            gateway.without_dedup()
        };

        gateway.validate()?;
        Ok(gateway)
    }

    /// Broker session settings, validated
    pub fn mqtt_config(&self) -> Result<MqttConfig, MqttError> {
        let reconnect_delay = Duration::try_from_secs_f64(self.reconnect_delay_secs)
            .map_err(|_| {
                MqttError::Config(format!(
                    "invalid reconnect delay: {}",
                    self.reconnect_delay_secs
                ))
            })?;

        let client_id = self
            .mqtt_client_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(default_client_id);

        let mut mqtt = MqttConfig::new(self.mqtt_broker_host.as_str(), self.mqtt_broker_port)
            .client_id(client_id)
            .keep_alive(Duration::from_secs(self.mqtt_keep_alive_secs))
            .max_packet_size(self.mqtt_max_packet_size)
            .reconnect_delay(reconnect_delay);
        if !self.mqtt_username.is_empty() {
            mqtt = mqtt.credentials(self.mqtt_username.as_str(), self.mqtt_password.as_str());
        }

        mqtt.validate()?;
        Ok(mqtt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Mutex to ensure tests run serially and don't interfere with each other
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    const KEYS: [&str; 15] = [
        "MQTT_BROKER_HOST",
        "MQTT_BROKER_PORT",
        "MQTT_USERNAME",
        "MQTT_PASSWORD",
        "MQTT_CLIENT_ID",
        "MQTT_KEEP_ALIVE_SECS",
        "MQTT_MAX_PACKET_SIZE",
        "LOG_LEVEL",
        "DEDUP_ENABLED",
        "DEDUP_CACHE_SIZE",
        "DEDUP_CACHE_TTL",
        "INGEST_PREFIX",
        "OUTPUT_PREFIX",
        "ALLOWED_METRICS",
        "RECONNECT_DELAY_SECS",
    ];

    fn clear_env() {
        for key in KEYS {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn test_default_config() {
        let _lock = TEST_LOCK.lock().unwrap();
        clear_env();

        let config = ServiceConfig::from_env().unwrap();
        assert_eq!(config.mqtt_broker_host, "localhost");
        assert_eq!(config.mqtt_broker_port, 1883);
        assert_eq!(config.mqtt_username, "proxy");
        assert_eq!(config.mqtt_password, "proxy123");
        assert_eq!(config.log_level, "INFO");
        assert!(config.dedup_enabled);
        assert_eq!(config.dedup_cache_size, 1000);
        assert_eq!(config.dedup_cache_ttl, 300.0);

        let gateway = config.gateway_config().unwrap();
        assert_eq!(gateway, GatewayConfig::default());

        let mqtt = config.mqtt_config().unwrap();
        assert_eq!(mqtt.broker_addr(), "localhost:1883");
        assert!(mqtt.client_id.starts_with("proxy-gateway-"));
        assert_eq!(mqtt.password.as_deref(), Some("proxy123"));
        assert_eq!(mqtt.reconnect_delay, Duration::from_secs(5));
        assert_eq!(mqtt.max_packet_size, MAX_PACKET_SIZE);
    }

    #[test]
    fn test_custom_config() {
        let _lock = TEST_LOCK.lock().unwrap();
        clear_env();

        std::env::set_var("MQTT_BROKER_HOST", "mosquitto");
        std::env::set_var("MQTT_BROKER_PORT", "1884");
        std::env::set_var("MQTT_USERNAME", "");
        std::env::set_var("MQTT_CLIENT_ID", "gateway-7");
        std::env::set_var("DEDUP_ENABLED", "false");
        std::env::set_var("ALLOWED_METRICS", "pressure, temperature");
        std::env::set_var("RECONNECT_DELAY_SECS", "0.5");
        std::env::set_var("MQTT_MAX_PACKET_SIZE", "65536");

        let config = ServiceConfig::from_env().unwrap();

        let gateway = config.gateway_config().unwrap();
        assert_eq!(gateway.dedup, None);
        assert_eq!(
            gateway.allowed_metrics,
            vec![Metric::Temperature, Metric::Pressure]
        );

        let mqtt = config.mqtt_config().unwrap();
        assert_eq!(mqtt.broker_addr(), "mosquitto:1884");
        assert_eq!(mqtt.client_id, "gateway-7");
        assert_eq!(mqtt.username, None);
        assert_eq!(mqtt.reconnect_delay, Duration::from_millis(500));
        assert_eq!(mqtt.max_packet_size, 65_536);

        clear_env();
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let _lock = TEST_LOCK.lock().unwrap();
        clear_env();

        std::env::set_var("ALLOWED_METRICS", "temperature,voltage");
        let config = ServiceConfig::from_env().unwrap();
        assert_eq!(
            config.gateway_config(),
            Err(envgate_core::ConfigError::UnknownMetric("voltage".into()))
        );
        clear_env();

        std::env::set_var("DEDUP_CACHE_SIZE", "0");
        let config = ServiceConfig::from_env().unwrap();
        assert!(config.gateway_config().is_err());
        clear_env();

        std::env::set_var("RECONNECT_DELAY_SECS", "-1");
        let config = ServiceConfig::from_env().unwrap();
        assert!(config.mqtt_config().is_err());
        clear_env();

        std::env::set_var("MQTT_MAX_PACKET_SIZE", "0");
        let config = ServiceConfig::from_env().unwrap();
        assert!(config.mqtt_config().is_err());
        clear_env();

        std::env::set_var("MQTT_BROKER_PORT", "not-a-port");
        assert!(ServiceConfig::from_env().is_err());
        clear_env();
    }
}
