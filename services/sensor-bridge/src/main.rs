//! Sensor bridge CLI
//!
//! Command-line interface for the MQTT to HTTP sensor bridge.

use std::path::PathBuf;

use clap::Parser;
use sensor_bridge::{load_config, Config};
use tracing::Level;

#[derive(Parser)]
#[command(name = "sensor-bridge")]
#[command(about = "MQTT sensor telemetry to HTTP bridge with rolling median")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// MQTT broker host (overrides config file)
    #[arg(long, env = "MQTT_BROKER")]
    broker: Option<String>,

    /// Temperature topic (overrides config file)
    #[arg(long, env = "TEMP_TOPIC")]
    temperature_topic: Option<String>,

    /// Humidity topic (overrides config file)
    #[arg(long, env = "HUMIDITY_TOPIC")]
    humidity_topic: Option<String>,

    /// Soil moisture topic (overrides config file)
    #[arg(long, env = "SOIL_MOISTURE_TOPIC")]
    soil_moisture_topic: Option<String>,

    /// HTTP port (overrides config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: Level,
}

impl Args {
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(broker) = &self.broker {
            config.bus.host = broker.clone();
        }
        if let Some(topic) = &self.temperature_topic {
            config.bus.topics.temperature = topic.clone();
        }
        if let Some(topic) = &self.humidity_topic {
            config.bus.topics.humidity = topic.clone();
        }
        if let Some(topic) = &self.soil_moisture_topic {
            config.bus.topics.soil_moisture = topic.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .init();

    tracing::debug!(
        "Parsed command line arguments: config={:?}, broker={:?}, port={:?}, log_level={:?}",
        args.config,
        args.broker,
        args.port,
        args.log_level
    );

    let mut config = if let Some(config_path) = &args.config {
        tracing::debug!("Loading configuration from {:?}", config_path);
        load_config(config_path)?
    } else {
        tracing::debug!("Using default configuration");
        Config::default()
    };

    args.apply_overrides(&mut config);

    tracing::info!("Starting sensor bridge");
    tracing::debug!(
        "Topics: temperature='{}', humidity='{}', soil_moisture='{}'; median window {}; timezone {}",
        config.bus.topics.temperature,
        config.bus.topics.humidity,
        config.bus.topics.soil_moisture,
        config.median.window,
        config.query.timezone
    );

    sensor_bridge::run(config).await?;

    Ok(())
}
