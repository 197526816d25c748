mod config;
mod telemetry;

use std::process::ExitCode;

use anyhow::{Context, Result};
use envgate_connectors::{Connector, MqttConnector};
use envgate_core::GatewayPipeline;
use log::{error, info};

use crate::config::ServiceConfig;

#[tokio::main]
async fn main() -> ExitCode {
    let settings = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = telemetry::init(&settings.log_level) {
        eprintln!("Failed to initialize logging: {:#}", e);
        return ExitCode::FAILURE;
    }

    match run(settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(settings: ServiceConfig) -> Result<()> {
    let gateway = settings
        .gateway_config()
        .context("invalid gateway configuration")?;
    let mqtt = settings
        .mqtt_config()
        .context("invalid MQTT configuration")?;

    info!("{}", "=".repeat(60));
    info!("MQTT Gateway Proxy Service v{}", envgate_core::VERSION);
    info!("{}", "=".repeat(60));
    info!("Broker: {}", mqtt.broker_addr());
    info!(
        "Username: {}",
        mqtt.username.as_deref().unwrap_or("(anonymous)")
    );
    info!("Client ID: {}", mqtt.client_id);
    info!(
        "Routing: {} → {}<metric>",
        gateway.subscribe_filter(),
        gateway.output_prefix
    );

    let mut connector = MqttConnector::new(mqtt).context("failed to create MQTT client")?;
    let mut pipeline = GatewayPipeline::new(gateway);

    connector.run(&mut pipeline, shutdown_signal()).await;

    pipeline.shutdown();

    let link = connector.stats();
    info!(
        "Connection: published={} failed={} bytes={} reconnections={}",
        link.messages_sent, link.messages_failed, link.bytes_sent, link.reconnections
    );
    info!("Gateway stopped");
    Ok(())
}

/// Resolves on Ctrl+C, or SIGTERM on Unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Error setting up signal handler: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!("Error setting up SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received shutdown signal"),
        _ = terminate => info!("Received SIGTERM signal"),
    }
}
