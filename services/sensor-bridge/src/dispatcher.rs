//! Ingestion dispatcher: bus message to corrected, stored reading

use std::fmt;
use std::sync::Arc;

use crate::channel::{Channel, TopicMap};
use crate::correction::{parse_payload, Corrector};
use crate::error::{BridgeError, Result};
use crate::median::MedianAggregator;
use crate::store::{Reading, ReadingStore, RetryPolicy};

/// What happened to one delivered message
#[derive(Debug)]
pub enum IngestOutcome {
    /// The corrected reading was persisted
    Stored(Reading),
    /// The topic does not belong to this pipeline
    Ignored,
    /// The message could not be ingested and was discarded
    Dropped(BridgeError),
}

/// Routes bus messages through correction into the store
pub struct Dispatcher {
    topics: TopicMap,
    corrector: Corrector,
    aggregator: MedianAggregator,
    store: Arc<dyn ReadingStore>,
    retry: RetryPolicy,
    persist_median: bool,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("topics", &self.topics)
            .field("corrector", &self.corrector)
            .field("aggregator", &self.aggregator)
            .field("retry", &self.retry)
            .field("persist_median", &self.persist_median)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(
        topics: TopicMap,
        corrector: Corrector,
        aggregator: MedianAggregator,
        store: Arc<dyn ReadingStore>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            topics,
            corrector,
            aggregator,
            store,
            retry,
            persist_median: false,
        }
    }

    /// Also persist a median record after every stored temperature
    pub fn with_median_persistence(mut self, enabled: bool) -> Self {
        self.persist_median = enabled;
        self
    }

    /// Ingest one message, returning the stored reading
    pub async fn on_message(&self, topic: &str, payload: &[u8]) -> Result<Reading> {
        let channel = self
            .topics
            .channel_for(topic)
            .ok_or_else(|| BridgeError::UnknownTopic(topic.to_string()))?;

        let raw = parse_payload(payload)?;

        let value = self
            .corrector
            .correct(channel, raw, || self.rolling_median(channel))
            .await;

        let store = Arc::clone(&self.store);
        let reading = self
            .retry
            .run_write("reading insert", || store.insert(channel, value))
            .await?;

        tracing::debug!(
            "Ingested {} raw={} stored={} id={}",
            channel,
            raw,
            value,
            reading.id
        );

        if self.persist_median && channel == Channel::Temperature {
            if let Err(e) = self.aggregator.record(self.store.as_ref(), channel).await {
                tracing::warn!("Failed to record {} median: {}", channel, e);
            }
        }

        Ok(reading)
    }

    /// Ingest one message, containing every failure
    pub async fn handle(&self, topic: &str, payload: &[u8]) -> IngestOutcome {
        match self.on_message(topic, payload).await {
            Ok(reading) => IngestOutcome::Stored(reading),
            Err(BridgeError::UnknownTopic(topic)) => {
                tracing::debug!("Ignoring message on unknown topic '{}'", topic);
                IngestOutcome::Ignored
            }
            Err(e) => {
                tracing::warn!("Dropping message on '{}': {}", topic, e);
                IngestOutcome::Dropped(e)
            }
        }
    }

    async fn rolling_median(&self, channel: Channel) -> Result<f64> {
        let store = self.store.as_ref();
        self.retry
            .run("median window", || self.aggregator.median_of(store, channel))
            .await
    }
}
