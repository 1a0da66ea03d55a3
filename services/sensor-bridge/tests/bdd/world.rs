//! BDD test world for the sensor bridge

use std::sync::Arc;

use cucumber::World;
use sensor_bridge::channel::{Channel, TopicMap};
use sensor_bridge::config::Config;
use sensor_bridge::correction::Corrector;
use sensor_bridge::dispatcher::{Dispatcher, IngestOutcome};
use sensor_bridge::localtime::Localizer;
use sensor_bridge::median::MedianAggregator;
use sensor_bridge::query::QueryService;
use sensor_bridge::store::LocalStore;

#[derive(Debug, Default, World)]
pub struct BridgeWorld {
    pub config: Config,
    pub store: Option<Arc<LocalStore>>,

    // Ingestion
    pub last_outcome: Option<IngestOutcome>,

    // Query
    pub response_status: Option<u16>,
    pub response_body: Option<serde_json::Value>,
}

impl BridgeWorld {
    pub fn store(&self) -> Arc<LocalStore> {
        Arc::clone(self.store.as_ref().expect("store not set"))
    }

    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(
            TopicMap::new(&self.config.bus.topics),
            Corrector::new(self.config.correction),
            MedianAggregator::new(self.config.median.window),
            self.store(),
            self.config.store.retry_policy(),
        )
        .with_median_persistence(self.config.median.persist)
    }

    pub fn query(&self) -> QueryService {
        QueryService::new(
            self.store(),
            MedianAggregator::new(self.config.median.window),
            Localizer::new(&self.config.query.timezone).expect("invalid timezone"),
            self.config.store.retry_policy(),
        )
        .with_temperature_view(self.config.query.temperature_view)
        .with_history_size(self.config.query.history_size)
    }

    pub fn topic_for(&self, channel: &str) -> String {
        let channel = parse_channel(channel);
        TopicMap::new(&self.config.bus.topics)
            .topic_for(channel)
            .to_string()
    }
}

pub fn parse_channel(s: &str) -> Channel {
    match s {
        "temperature" => Channel::Temperature,
        "humidity" => Channel::Humidity,
        "soil_moisture" => Channel::SoilMoisture,
        other => panic!("Unknown channel: {}", other),
    }
}
