//! Per-tick decision strategy, selected by session mode.

use crate::core::classifier::{Band, BandThresholds, ThresholdClassifier};
use crate::core::policy::{ActuationPolicy, PolicyConfig, PolicyOutput};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// The two experimental conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Condition 1: record and label the feature, no audio modulation
    Logging,
    /// Condition 2: feature drives volume and reverb
    Modulated,
}

impl Mode {
    /// Condition number used in file names and records.
    pub fn condition_id(self) -> u8 {
        match self {
            Mode::Logging => 1,
            Mode::Modulated => 2,
        }
    }

    pub fn from_condition(id: u8) -> Option<Self> {
        match id {
            1 => Some(Mode::Logging),
            2 => Some(Mode::Modulated),
            _ => None,
        }
    }

    /// Whether the audio sink and warm-up phase are used.
    pub fn drives_audio(self) -> bool {
        matches!(self, Mode::Modulated)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Logging => write!(f, "logging"),
            Mode::Modulated => write!(f, "modulated"),
        }
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "1" | "logging" => Ok(Mode::Logging),
            "2" | "modulated" => Ok(Mode::Modulated),
            other => Err(format!("unknown condition '{other}' (expected 1 or 2)")),
        }
    }
}

/// Result of one tick's decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    Label(Band),
    Actuate(PolicyOutput),
}

/// Strategy behind a tick: classify for logging, or run the policy.
#[derive(Debug, Clone)]
pub enum Decider {
    Logging(ThresholdClassifier),
    Modulated(ActuationPolicy),
}

impl Decider {
    pub fn for_mode(mode: Mode, thresholds: BandThresholds, policy: PolicyConfig) -> Self {
        match mode {
            Mode::Logging => Decider::Logging(ThresholdClassifier::new(thresholds)),
            Mode::Modulated => Decider::Modulated(ActuationPolicy::new(policy)),
        }
    }

    pub fn decide(&mut self, value: f64, now: Duration) -> Decision {
        match self {
            Decider::Logging(classifier) => Decision::Label(classifier.classify(value)),
            Decider::Modulated(policy) => Decision::Actuate(policy.update(value, now)),
        }
    }

    pub fn mode(&self) -> Mode {
        match self {
            Decider::Logging(_) => Mode::Logging,
            Decider::Modulated(_) => Mode::Modulated,
        }
    }

    pub fn reset(&mut self) {
        match self {
            Decider::Logging(classifier) => classifier.reset(),
            Decider::Modulated(policy) => policy.reset(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!("1".parse::<Mode>().unwrap(), Mode::Logging);
        assert_eq!("Modulated".parse::<Mode>().unwrap(), Mode::Modulated);
        assert!("3".parse::<Mode>().is_err());
        assert_eq!(Mode::from_condition(2), Some(Mode::Modulated));
        assert_eq!(Mode::Modulated.condition_id(), 2);
    }

    #[test]
    fn test_decider_follows_mode() {
        let mut logging =
            Decider::for_mode(Mode::Logging, BandThresholds::default(), PolicyConfig::default());
        assert_eq!(
            logging.decide(60.0, Duration::ZERO),
            Decision::Label(Band::Mid)
        );

        let mut modulated = Decider::for_mode(
            Mode::Modulated,
            BandThresholds::default(),
            PolicyConfig::default(),
        );
        match modulated.decide(30.0, Duration::ZERO) {
            Decision::Actuate(out) => assert_eq!(out.volume, 20),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(modulated.mode(), Mode::Modulated);
    }
}
