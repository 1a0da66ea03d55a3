//! Rendering of UTC instants in the configured local timezone

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

/// Output format of every timestamp on the HTTP surface
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Converts UTC instants to one fixed IANA timezone
#[derive(Debug, Clone, Copy)]
pub struct Localizer {
    tz: Tz,
}

impl Localizer {
    /// Build a localizer for an IANA timezone name such as `Europe/Madrid`
    pub fn new(name: &str) -> crate::Result<Self> {
        let tz: Tz = name.parse().map_err(|e| {
            crate::BridgeError::Config(format!("Invalid timezone '{}': {}", name, e))
        })?;
        Ok(Self { tz })
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Format `instant` as local wall-clock time
    pub fn format(&self, instant: DateTime<Utc>) -> String {
        instant
            .with_timezone(&self.tz)
            .format(TIMESTAMP_FORMAT)
            .to_string()
    }
}
