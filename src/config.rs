//! Configuration for the biofeedback controller.

use crate::actuator::ControlMap;
use crate::core::{BandThresholds, FeatureBand, PolicyConfig};
use crate::sync::START_TOKEN;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main configuration for a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub sensor: SensorConfig,

    /// Length of the analysis window
    #[serde(with = "duration_serde")]
    pub window: Duration,

    /// Control loop cadence
    #[serde(with = "duration_serde")]
    pub tick_interval: Duration,

    /// Length of the RUNNING phase
    #[serde(with = "duration_serde")]
    pub session_duration: Duration,

    /// Buffer pre-fill before RUNNING in the modulated condition
    #[serde(with = "duration_serde")]
    pub warmup: Duration,

    /// Which band value the loop acts on
    #[serde(default)]
    pub feature: FeatureBand,

    pub sync: SyncConfig,

    pub audio: AudioConfig,

    #[serde(default)]
    pub classifier: BandThresholds,

    #[serde(default)]
    pub policy: PolicyConfig,

    /// Root folder for participant data
    pub data_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("hrv-biofeedback")
            .join("data");

        Self {
            sensor: SensorConfig::default(),
            window: Duration::from_secs(30),
            tick_interval: Duration::from_secs(1),
            session_duration: Duration::from_secs(330), // 5.5 minutes
            warmup: Duration::from_secs(30),
            feature: FeatureBand::default(),
            sync: SyncConfig::default(),
            audio: AudioConfig::default(),
            classifier: BandThresholds::default(),
            policy: PolicyConfig::default(),
            data_dir,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .map_err(|e| ConfigError::Io(e.to_string()))?;
            let config: Config =
                serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;

        std::fs::write(&config_path, content).map_err(|e| ConfigError::Io(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("hrv-biofeedback")
            .join("config.json")
    }

    /// Number of samples in one analysis window.
    pub fn window_samples(&self) -> usize {
        (self.window.as_secs_f64() * f64::from(self.sensor.sample_rate_hz)).round() as usize
    }

    /// Reject settings the control loop cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(msg: impl Into<String>) -> Result<(), ConfigError> {
            Err(ConfigError::Invalid(msg.into()))
        }

        if self.sensor.sample_rate_hz == 0 {
            return invalid("sensor.sample_rate_hz must be positive");
        }
        if self.window_samples() < 2 {
            return invalid("window must span at least two samples");
        }
        if self.tick_interval.is_zero() {
            return invalid("tick_interval must be positive");
        }
        if self.session_duration < self.tick_interval {
            return invalid("session_duration must cover at least one tick");
        }

        let c = &self.classifier;
        if !(c.low < c.mid && c.mid < c.high) {
            return invalid("classifier thresholds must satisfy low < mid < high");
        }
        if c.margin < 0.0 {
            return invalid("classifier.margin must not be negative");
        }

        let p = &self.policy;
        if p.decay_threshold > p.reward_threshold {
            return invalid("policy.decay_threshold must not exceed reward_threshold");
        }
        if p.reverb_max > 127 || p.reverb_initial > p.reverb_max {
            return invalid("policy reverb levels must satisfy initial <= max <= 127");
        }
        if p.reverb_step == 0 || p.fade_step == 0 {
            return invalid("policy.reverb_step and fade_step must be positive");
        }
        if p.reward_hold.is_zero() {
            return invalid("policy.reward_hold must be positive");
        }
        let v = &p.volume;
        if !(v.low_in.0 < v.low_in.1 && v.high_in.0 < v.high_in.1) {
            return invalid("volume curve input ranges must be increasing");
        }
        if v.low_out.0 > v.low_out.1 || v.low_out.1 > v.high_out.0 || v.high_out.0 > v.high_out.1
        {
            return invalid("volume curve outputs must be non-decreasing");
        }

        if self.audio.channel > 15 {
            return invalid("audio.channel must be 0-15");
        }
        if self.audio.reverb_baseline > 127 {
            return invalid("audio.reverb_baseline must be 0-127");
        }
        if self.sync.token.is_empty() {
            return invalid("sync.token must not be empty");
        }
        Ok(())
    }

    /// Ensure the data directory exists.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_dir).map_err(|e| ConfigError::Io(e.to_string()))
    }
}

/// Pulse oximeter connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Serial device path
    pub device: PathBuf,
    pub sample_rate_hz: u32,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from("/dev/tty.usbserial-FT0QKFGA"),
            sample_rate_hz: 75,
        }
    }
}

/// Pacer rendezvous.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub address: SocketAddr,
    pub token: String,
    /// Give up waiting after this long; wait forever when absent
    #[serde(default, with = "optional_duration_serde")]
    pub timeout: Option<Duration>,
    /// Start without waiting for the pacer
    #[serde(default)]
    pub disabled: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            address: SocketAddr::from(([127, 0, 0, 1], 5005)),
            token: START_TOKEN.to_string(),
            timeout: None,
            disabled: false,
        }
    }
}

/// Audio engine output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Substring of the MIDI output port name; first port when absent
    pub port: Option<String>,
    pub channel: u8,
    pub controls: ControlMap,
    /// Reverb level restored at session start
    pub reverb_baseline: u8,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            port: None,
            channel: 0,
            controls: ControlMap::default(),
            reverb_baseline: 20,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Serialize error: {0}")]
    Serialize(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Serde support for Duration as (possibly fractional) seconds.
pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

pub(crate) mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.map(|d| d.as_secs_f64()).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<f64>::deserialize(deserializer)?
            .map(|secs| Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom))
            .transpose()
    }
}
