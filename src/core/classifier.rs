//! Hysteresis band classifier.
//!
//! Maps the LF feature onto NONE / LOW / MID / HIGH. A band is kept while the
//! value stays inside its retention range; otherwise the band is picked
//! fresh from the entry thresholds.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Discretized feature level. The numeric labels are what gets logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Band {
    #[default]
    None,
    Low,
    Mid,
    High,
}

impl Band {
    /// Numeric label: 40 / 65 / 80, or `None` for the empty band.
    pub fn label(self) -> Option<u8> {
        match self {
            Band::None => None,
            Band::Low => Some(40),
            Band::Mid => Some(65),
            Band::High => Some(80),
        }
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.label() {
            Some(label) => write!(f, "{label}"),
            None => write!(f, "none"),
        }
    }
}

/// Entry thresholds plus a retention margin.
///
/// A value strictly above `high` is HIGH, above `mid` MID, above `low` LOW.
/// With `margin = 0` the retention ranges equal the entry ranges; a positive
/// margin widens each retention range on both sides.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandThresholds {
    pub low: f64,
    pub mid: f64,
    pub high: f64,
    #[serde(default)]
    pub margin: f64,
}

impl Default for BandThresholds {
    fn default() -> Self {
        Self {
            low: 30.0,
            mid: 55.0,
            high: 75.0,
            margin: 0.0,
        }
    }
}

impl BandThresholds {
    fn absolute(&self, value: f64) -> Band {
        if value > self.high {
            Band::High
        } else if value > self.mid {
            Band::Mid
        } else if value > self.low {
            Band::Low
        } else {
            Band::None
        }
    }

    /// Whether `value` keeps `band` alive.
    pub fn retains(&self, band: Band, value: f64) -> bool {
        let m = self.margin;
        match band {
            Band::High => value > self.high - m,
            Band::Mid => value > self.mid - m && value <= self.high + m,
            Band::Low => value > self.low - m && value <= self.mid + m,
            Band::None => false,
        }
    }
}

/// Stateful classifier. Remembers the previous band between ticks.
#[derive(Debug, Clone, Default)]
pub struct ThresholdClassifier {
    thresholds: BandThresholds,
    previous: Band,
}

impl ThresholdClassifier {
    pub fn new(thresholds: BandThresholds) -> Self {
        Self {
            thresholds,
            previous: Band::None,
        }
    }

    pub fn classify(&mut self, value: f64) -> Band {
        let band = if self.thresholds.retains(self.previous, value) {
            self.previous
        } else {
            self.thresholds.absolute(value)
        };
        self.previous = band;
        band
    }

    pub fn current(&self) -> Band {
        self.previous
    }

    pub fn reset(&mut self) {
        self.previous = Band::None;
    }
}
