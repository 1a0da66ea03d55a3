//! Rolling median calculation
//!
//! The median is computed over the most recent readings of a channel, fetched
//! fresh from the store on every call. One [`MedianAggregator`] is shared by the
//! ingestion fallback and the read path so both use the same window.

use chrono::Utc;

use crate::channel::Channel;
use crate::error::{BridgeError, Result};
use crate::store::{MedianRecord, Reading, ReadingStore};

/// Number of readings in the rolling median window unless configured otherwise
pub const DEFAULT_MEDIAN_WINDOW: usize = 7;

/// Median of `values`
///
/// Sorts in place. An odd count yields the middle element, an even count the
/// mean of the two middle elements.
pub fn median(values: &mut [f64]) -> Result<f64> {
    if values.is_empty() {
        return Err(BridgeError::InsufficientData(
            "no values to compute a median from".to_string(),
        ));
    }

    values.sort_by(f64::total_cmp);

    let n = values.len();
    if n % 2 == 1 {
        Ok(values[n / 2])
    } else {
        Ok((values[n / 2 - 1] + values[n / 2]) / 2.0)
    }
}

/// A median together with the readings it was computed from
#[derive(Debug, Clone)]
pub struct MedianWindow {
    pub median: f64,
    /// Most recent first
    pub readings: Vec<Reading>,
}

/// Rolling median over the latest `window` readings of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MedianAggregator {
    window: usize,
}

impl Default for MedianAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_MEDIAN_WINDOW)
    }
}

impl MedianAggregator {
    pub fn new(window: usize) -> Self {
        Self { window }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Median of the latest readings of `channel`
    pub async fn median_of(&self, store: &dyn ReadingStore, channel: Channel) -> Result<f64> {
        self.window_of(store, channel).await.map(|w| w.median)
    }

    /// Latest readings of `channel` and their median
    pub async fn window_of(
        &self,
        store: &dyn ReadingStore,
        channel: Channel,
    ) -> Result<MedianWindow> {
        let readings = store.latest(channel, self.window).await?;
        if readings.is_empty() {
            return Err(BridgeError::InsufficientData(format!(
                "no {} readings stored",
                channel
            )));
        }

        let mut values: Vec<f64> = readings.iter().map(|r| r.value).collect();
        let median = median(&mut values)?;
        tracing::debug!(
            "Rolling {} median over {} readings: {}",
            channel,
            readings.len(),
            median
        );
        Ok(MedianWindow { median, readings })
    }

    /// Compute the median of `channel` and persist it with its window identities
    pub async fn record(
        &self,
        store: &dyn ReadingStore,
        channel: Channel,
    ) -> Result<MedianRecord> {
        let window = self.window_of(store, channel).await?;
        let record = MedianRecord {
            channel,
            value: window.median,
            computed_at: Utc::now(),
            window: window.readings.iter().map(|r| r.id).collect(),
        };
        store.insert_median(record.clone()).await?;
        tracing::info!(
            "Recorded {} median {} over {} readings",
            channel,
            record.value,
            record.window.len()
        );
        Ok(record)
    }
}
