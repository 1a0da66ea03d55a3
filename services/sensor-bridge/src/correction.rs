//! Per-channel correction of raw sensor values before storage

use std::future::Future;

use crate::channel::Channel;
use crate::config::CorrectionConfig;
use crate::error::{BridgeError, Result};

/// Parse a bus payload into a finite number
pub fn parse_payload(payload: &[u8]) -> Result<f64> {
    let text = std::str::from_utf8(payload)
        .map_err(|e| BridgeError::Parse(format!("payload is not UTF-8: {}", e)))?
        .trim();

    let value: f64 = text
        .parse()
        .map_err(|_| BridgeError::Parse(format!("'{}' is not a number", text)))?;

    if !value.is_finite() {
        return Err(BridgeError::Parse(format!("'{}' is not a finite number", text)));
    }
    Ok(value)
}

/// Applies calibration offsets and anomaly substitution
#[derive(Debug, Clone, Copy, Default)]
pub struct Corrector {
    config: CorrectionConfig,
}

impl Corrector {
    pub fn new(config: CorrectionConfig) -> Self {
        Self { config }
    }

    /// Value to store for a raw reading on `channel`
    ///
    /// `median_lookup` is only awaited for a faulty temperature; if it fails the
    /// configured fallback is stored instead.
    pub async fn correct<F, Fut>(&self, channel: Channel, raw: f64, median_lookup: F) -> f64
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<f64>>,
    {
        match channel {
            Channel::Temperature => {
                let corrected = raw + self.config.temperature_offset;
                if corrected > 0.0 {
                    return corrected;
                }

                match median_lookup().await {
                    Ok(median) => {
                        tracing::warn!(
                            "Temperature {} corrected to {} looks faulty, storing rolling median {}",
                            raw,
                            corrected,
                            median
                        );
                        median
                    }
                    Err(e) => {
                        tracing::warn!(
                            "Temperature {} corrected to {} looks faulty and no median is available ({}), storing fallback {}",
                            raw,
                            corrected,
                            e,
                            self.config.temperature_fallback
                        );
                        self.config.temperature_fallback
                    }
                }
            }
            Channel::Humidity => {
                let corrected = raw + self.config.humidity_offset;
                if corrected > self.config.humidity_ceiling {
                    tracing::debug!(
                        "Humidity {} above {}, substituting {}",
                        corrected,
                        self.config.humidity_ceiling,
                        self.config.humidity_substitute
                    );
                    self.config.humidity_substitute
                } else {
                    corrected
                }
            }
            Channel::SoilMoisture => raw,
        }
    }
}
