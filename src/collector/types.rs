//! Sample types produced by the sensor drivers.

use serde::{Deserialize, Serialize};

/// A single raw PPG reading.
///
/// `timestamp` is seconds since the driver was opened. Samples are immutable
/// once they reach the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Seconds since acquisition started
    pub timestamp: f64,
    /// Raw plethysmograph value
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp: f64, value: f64) -> Self {
        Self { timestamp, value }
    }

    /// Build a sample from its position in an evenly sampled stream.
    pub fn at_index(index: u64, sample_rate_hz: u32, value: f64) -> Self {
        Self {
            timestamp: index as f64 / f64::from(sample_rate_hz),
            value,
        }
    }
}
