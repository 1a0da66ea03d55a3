//! Message bus input: MQTT subscription and the serialized delivery loop

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio_util::sync::CancellationToken;

use crate::config::BusConfig;
use crate::dispatcher::{Dispatcher, IngestOutcome};

/// One message delivered by the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Source of bus messages, delivered one at a time
#[async_trait]
pub trait MessageSource: Send {
    /// Wait for the next message; `None` once the source is closed
    async fn recv(&mut self) -> Option<BusMessage>;
}

/// MQTT subscription to every channel topic
pub struct MqttSource {
    client: AsyncClient,
    eventloop: EventLoop,
    topics: Vec<String>,
    reconnect_delay: Duration,
}

impl MqttSource {
    pub fn new(config: &BusConfig, topics: Vec<String>) -> Self {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_seconds));

        let (client, eventloop) = AsyncClient::new(options, 10);
        Self {
            client,
            eventloop,
            topics,
            reconnect_delay: Duration::from_secs(config.reconnect_delay_seconds),
        }
    }

    /// Politely close the broker connection
    pub async fn disconnect(&self) {
        if let Err(e) = self.client.disconnect().await {
            tracing::debug!("MQTT disconnect failed: {}", e);
        }
    }

    // Borrows only the client; the event loop is not Sync
    async fn subscribe_all(client: &AsyncClient, topics: &[String]) {
        for topic in topics {
            match client.subscribe(topic.as_str(), QoS::AtMostOnce).await {
                Ok(()) => tracing::info!("Subscribed to '{}'", topic),
                Err(e) => tracing::warn!("Failed to subscribe to '{}': {}", topic, e),
            }
        }
    }
}

#[async_trait]
impl MessageSource for MqttSource {
    async fn recv(&mut self) -> Option<BusMessage> {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    tracing::info!("Connected to MQTT broker ({:?})", ack.code);
                    // Subscriptions do not survive a reconnect with a clean session
                    Self::subscribe_all(&self.client, &self.topics).await;
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    return Some(BusMessage {
                        topic: publish.topic,
                        payload: publish.payload.to_vec(),
                    });
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        "MQTT connection error: {}, reconnecting in {:?}",
                        e,
                        self.reconnect_delay
                    );
                    tokio::time::sleep(self.reconnect_delay).await;
                }
            }
        }
    }
}

/// Counters of the delivery loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub stored: u64,
    pub ignored: u64,
    pub dropped: u64,
}

/// Feed every delivered message to the dispatcher until cancelled
///
/// Each message is handled to completion before the next one is received. A
/// message that fails to ingest is counted and the loop carries on.
pub async fn run_ingestion(
    source: &mut dyn MessageSource,
    dispatcher: &Dispatcher,
    cancel: CancellationToken,
) -> IngestStats {
    let mut stats = IngestStats::default();

    loop {
        let message = tokio::select! {
            message = source.recv() => message,
            _ = cancel.cancelled() => {
                tracing::debug!("Ingestion loop cancelled");
                break;
            }
        };

        let Some(message) = message else {
            tracing::info!("Message source closed");
            break;
        };

        match dispatcher.handle(&message.topic, &message.payload).await {
            IngestOutcome::Stored(_) => stats.stored += 1,
            IngestOutcome::Ignored => stats.ignored += 1,
            IngestOutcome::Dropped(_) => stats.dropped += 1,
        }
    }

    tracing::info!(
        "Ingestion stopped: {} stored, {} ignored, {} dropped",
        stats.stored,
        stats.ignored,
        stats.dropped
    );
    stats
}
