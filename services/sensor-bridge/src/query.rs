//! Query service: latest readings and the current snapshot with local timestamps

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::channel::Channel;
use crate::config::TemperatureView;
use crate::error::{BridgeError, Result};
use crate::localtime::Localizer;
use crate::median::MedianAggregator;
use crate::store::{Reading, ReadingStore, RetryPolicy};

/// A stored value with its localized creation time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalizedReading {
    pub value: f64,
    pub timestamp: String,
}

/// A persisted median with its localized computation time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalizedMedian {
    pub median: f64,
    pub timestamp: String,
    /// Identities of the readings the median was computed from
    pub window: Vec<String>,
}

/// Latest temperature in the configured shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TemperatureSnapshot {
    Scalar {
        temperature: f64,
        temperature_timestamp: String,
    },
    List {
        temperatures: Vec<f64>,
        temperature_timestamps: Vec<String>,
    },
}

/// Latest reading per channel plus the rolling median
///
/// Channels are read independently, so their timestamps may be skewed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(flatten)]
    pub temperature: TemperatureSnapshot,
    pub median: f64,
    pub humidity: f64,
    pub humidity_timestamp: String,
    pub soil_moisture: Option<f64>,
    pub soil_moisture_timestamp: Option<String>,
}

/// Read-only view over the reading store
pub struct QueryService {
    store: Arc<dyn ReadingStore>,
    aggregator: MedianAggregator,
    localizer: Localizer,
    retry: RetryPolicy,
    temperature_view: TemperatureView,
    history_size: usize,
}

impl fmt::Debug for QueryService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryService")
            .field("aggregator", &self.aggregator)
            .field("localizer", &self.localizer)
            .field("temperature_view", &self.temperature_view)
            .field("history_size", &self.history_size)
            .finish_non_exhaustive()
    }
}

impl QueryService {
    pub fn new(
        store: Arc<dyn ReadingStore>,
        aggregator: MedianAggregator,
        localizer: Localizer,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            aggregator,
            localizer,
            retry,
            temperature_view: TemperatureView::default(),
            history_size: 10,
        }
    }

    pub fn with_temperature_view(mut self, view: TemperatureView) -> Self {
        self.temperature_view = view;
        self
    }

    pub fn with_history_size(mut self, history_size: usize) -> Self {
        self.history_size = history_size;
        self
    }

    /// Number of readings the list endpoints return
    pub fn history_size(&self) -> usize {
        self.history_size
    }

    /// Up to `n` latest readings of `channel`, most recent first
    ///
    /// An empty channel yields an empty list.
    pub async fn latest_n(&self, channel: Channel, n: usize) -> Result<Vec<LocalizedReading>> {
        let readings = self.fetch(channel, n).await?;
        Ok(readings.iter().map(|r| self.localize(r)).collect())
    }

    /// Latest temperature view, rolling median, latest humidity and soil moisture
    pub async fn current_snapshot(&self) -> Result<Snapshot> {
        let window = self
            .retry
            .run("temperature window", || {
                self.aggregator
                    .window_of(self.store.as_ref(), Channel::Temperature)
            })
            .await?;

        let humidity = self
            .fetch(Channel::Humidity, 1)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                BridgeError::InsufficientData("no humidity readings stored".to_string())
            })?;

        let soil_moisture = self
            .fetch(Channel::SoilMoisture, 1)
            .await?
            .into_iter()
            .next();

        let temperature = match self.temperature_view {
            TemperatureView::Scalar => {
                // window_of never returns an empty window
                let latest = &window.readings[0];
                TemperatureSnapshot::Scalar {
                    temperature: latest.value,
                    temperature_timestamp: self.localizer.format(latest.recorded_at),
                }
            }
            TemperatureView::List => TemperatureSnapshot::List {
                temperatures: window.readings.iter().map(|r| r.value).collect(),
                temperature_timestamps: window
                    .readings
                    .iter()
                    .map(|r| self.localizer.format(r.recorded_at))
                    .collect(),
            },
        };

        Ok(Snapshot {
            temperature,
            median: window.median,
            humidity: humidity.value,
            humidity_timestamp: self.localizer.format(humidity.recorded_at),
            soil_moisture: soil_moisture.as_ref().map(|r| r.value),
            soil_moisture_timestamp: soil_moisture
                .as_ref()
                .map(|r| self.localizer.format(r.recorded_at)),
        })
    }

    /// Up to `n` latest persisted medians, most recent first
    pub async fn latest_medians(&self, n: usize) -> Result<Vec<LocalizedMedian>> {
        let records = self
            .retry
            .run("median records", || self.store.latest_medians(n))
            .await?;
        Ok(records
            .into_iter()
            .map(|record| LocalizedMedian {
                median: record.value,
                timestamp: self.localizer.format(record.computed_at),
                window: record.window.iter().map(ToString::to_string).collect(),
            })
            .collect())
    }

    async fn fetch(&self, channel: Channel, n: usize) -> Result<Vec<Reading>> {
        self.retry
            .run("latest readings", || self.store.latest(channel, n))
            .await
    }

    fn localize(&self, reading: &Reading) -> LocalizedReading {
        LocalizedReading {
            value: reading.value,
            timestamp: self.localizer.format(reading.recorded_at),
        }
    }
}
