//! Sensor channels and their bus topics

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::TopicConfig;

/// One sensor type's data path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Temperature,
    Humidity,
    SoilMoisture,
}

impl Channel {
    pub const ALL: [Channel; 3] = [
        Channel::Temperature,
        Channel::Humidity,
        Channel::SoilMoisture,
    ];
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Temperature => write!(f, "temperature"),
            Channel::Humidity => write!(f, "humidity"),
            Channel::SoilMoisture => write!(f, "soil_moisture"),
        }
    }
}

/// Static channel to topic mapping, fixed at startup
#[derive(Debug, Clone)]
pub struct TopicMap {
    entries: Vec<(Channel, String)>,
}

impl TopicMap {
    pub fn new(topics: &TopicConfig) -> Self {
        Self {
            entries: vec![
                (Channel::Temperature, topics.temperature.clone()),
                (Channel::Humidity, topics.humidity.clone()),
                (Channel::SoilMoisture, topics.soil_moisture.clone()),
            ],
        }
    }

    /// Resolve a bus topic to the channel it carries
    pub fn channel_for(&self, topic: &str) -> Option<Channel> {
        self.entries
            .iter()
            .find(|(_, t)| t == topic)
            .map(|(channel, _)| *channel)
    }

    pub fn topic_for(&self, channel: Channel) -> &str {
        self.entries
            .iter()
            .find(|(c, _)| *c == channel)
            .map(|(_, topic)| topic.as_str())
            .unwrap_or_default()
    }

    /// All subscribed topics, in channel order
    pub fn topics(&self) -> Vec<String> {
        self.entries.iter().map(|(_, t)| t.clone()).collect()
    }
}
