//! Signal path of the biofeedback loop.
//!
//! This module contains:
//! - The rolling sample buffer and its trailing window
//! - HRV estimation and feature extraction
//! - The hysteresis classifier and the reverb/volume policy
//! - The per-tick decision strategy tying them to a session mode

pub mod buffer;
pub mod classifier;
pub mod decision;
pub mod features;
pub mod hrv;
pub mod policy;

// Re-export commonly used types
pub use buffer::{InsufficientData, SampleBuffer, Window};
pub use classifier::{Band, BandThresholds, ThresholdClassifier};
pub use decision::{Decider, Decision, Mode};
pub use features::{FeatureBand, FeatureExtractor, FeatureValue};
pub use hrv::{BandPowers, FeatureError, HrvEstimator, SpectralHrv};
pub use policy::{ActuationPolicy, PolicyConfig, PolicyOutput, PolicyState, VolumeCurve, Zone};
