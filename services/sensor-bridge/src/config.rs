//! Configuration types for the sensor bridge

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::localtime::Localizer;
use crate::median::DEFAULT_MEDIAN_WINDOW;
use crate::store::RetryPolicy;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub correction: CorrectionConfig,
    #[serde(default)]
    pub median: MedianConfig,
    #[serde(default)]
    pub query: QueryConfig,
}

impl Config {
    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.median.window == 0 {
            return Err(crate::BridgeError::Config(
                "median.window must be at least 1".to_string(),
            ));
        }
        if self.query.history_size == 0 {
            return Err(crate::BridgeError::Config(
                "query.history_size must be at least 1".to_string(),
            ));
        }
        if self.store.max_attempts == 0 {
            return Err(crate::BridgeError::Config(
                "store.max_attempts must be at least 1".to_string(),
            ));
        }

        let topics = [
            &self.bus.topics.temperature,
            &self.bus.topics.humidity,
            &self.bus.topics.soil_moisture,
        ];
        if topics.iter().any(|t| t.trim().is_empty()) {
            return Err(crate::BridgeError::Config(
                "bus topics must not be empty".to_string(),
            ));
        }
        let unique: HashSet<&String> = topics.iter().copied().collect();
        if unique.len() != topics.len() {
            return Err(crate::BridgeError::Config(
                "each channel needs its own bus topic".to_string(),
            ));
        }

        Localizer::new(&self.query.timezone)?;
        Ok(())
    }
}

/// MQTT broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_seconds: u64,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_seconds: u64,
    #[serde(default)]
    pub topics: TopicConfig,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_mqtt_port(),
            client_id: default_client_id(),
            keep_alive_seconds: default_keep_alive(),
            reconnect_delay_seconds: default_reconnect_delay(),
            topics: TopicConfig::default(),
        }
    }
}

/// Topic name per channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicConfig {
    #[serde(default = "default_temperature_topic")]
    pub temperature: String,
    #[serde(default = "default_humidity_topic")]
    pub humidity: String,
    #[serde(default = "default_soil_moisture_topic")]
    pub soil_moisture: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            temperature: default_temperature_topic(),
            humidity: default_humidity_topic(),
            soil_moisture: default_soil_moisture_topic(),
        }
    }
}

/// Reading store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// JSON-lines journal; readings are kept in memory only when unset
    #[serde(default)]
    pub journal: Option<PathBuf>,
    #[serde(default = "default_store_timeout")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff")]
    pub backoff_ms: u64,
}

impl StoreConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(self.timeout_ms),
            max_attempts: self.max_attempts,
            backoff: Duration::from_millis(self.backoff_ms),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            journal: None,
            timeout_ms: default_store_timeout(),
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff(),
        }
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_http_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_http_port(),
        }
    }
}

/// Calibration constants applied before storage
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CorrectionConfig {
    #[serde(default = "default_temperature_offset")]
    pub temperature_offset: f64,
    #[serde(default = "default_temperature_fallback")]
    pub temperature_fallback: f64,
    #[serde(default = "default_humidity_offset")]
    pub humidity_offset: f64,
    #[serde(default = "default_humidity_ceiling")]
    pub humidity_ceiling: f64,
    /// Stored in place of a humidity above `humidity_ceiling`. The default of 70
    /// reproduces the deployed sensors and sits well below the ceiling.
    #[serde(default = "default_humidity_substitute")]
    pub humidity_substitute: f64,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            temperature_offset: default_temperature_offset(),
            temperature_fallback: default_temperature_fallback(),
            humidity_offset: default_humidity_offset(),
            humidity_ceiling: default_humidity_ceiling(),
            humidity_substitute: default_humidity_substitute(),
        }
    }
}

/// Rolling median settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedianConfig {
    #[serde(default = "default_median_window")]
    pub window: usize,
    /// Persist a median record after every stored temperature
    #[serde(default)]
    pub persist: bool,
}

impl Default for MedianConfig {
    fn default() -> Self {
        Self {
            window: default_median_window(),
            persist: false,
        }
    }
}

/// How `/temperatura` reports the latest temperature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemperatureView {
    /// Single latest value and timestamp
    #[default]
    Scalar,
    /// The whole median window with one timestamp per value
    List,
}

/// Read path settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_history_size")]
    pub history_size: usize,
    #[serde(default)]
    pub temperature_view: TemperatureView,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            history_size: default_history_size(),
            temperature_view: TemperatureView::default(),
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "sensor-bridge".to_string()
}

fn default_keep_alive() -> u64 {
    60
}

fn default_reconnect_delay() -> u64 {
    5
}

fn default_temperature_topic() -> String {
    "temperatura".to_string()
}

fn default_humidity_topic() -> String {
    "humedad".to_string()
}

fn default_soil_moisture_topic() -> String {
    "humedad_tierra".to_string()
}

fn default_store_timeout() -> u64 {
    2000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff() -> u64 {
    100
}

fn default_http_port() -> u16 {
    5000
}

fn default_temperature_offset() -> f64 {
    -5.0
}

fn default_temperature_fallback() -> f64 {
    18.0
}

fn default_humidity_offset() -> f64 {
    20.0
}

fn default_humidity_ceiling() -> f64 {
    90.0
}

fn default_humidity_substitute() -> f64 {
    70.0
}

fn default_median_window() -> usize {
    DEFAULT_MEDIAN_WINDOW
}

fn default_timezone() -> String {
    "Europe/Madrid".to_string()
}

fn default_history_size() -> usize {
    10
}

/// Load configuration from a JSON file
pub fn load_config(path: &Path) -> crate::Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        crate::BridgeError::Config(format!("Failed to read config file {:?}: {}", path, e))
    })?;
    let config: Config = serde_json::from_str(&content)?;
    Ok(config)
}
