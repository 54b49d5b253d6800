//! Feature extraction from a sample window.
//!
//! The extractor turns the trailing PPG window into the single scalar the
//! control loop acts on. Which band value is reported is fixed per session.

use crate::core::buffer::Window;
use crate::core::hrv::{BandPowers, FeatureError, HrvEstimator, SpectralHrv};
use serde::{Deserialize, Serialize};

/// Which band quantity becomes the feature value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureBand {
    /// LF power as a percentage of VLF + LF + HF
    #[default]
    LfPercent,
    /// Absolute LF power in ms²
    LfPower,
}

/// One tick's feature, with the band breakdown it came from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureValue {
    pub value: f64,
    pub bands: BandPowers,
}

/// Wraps an [`HrvEstimator`] and reduces its output to one number.
pub struct FeatureExtractor<E = SpectralHrv> {
    estimator: E,
    band: FeatureBand,
    sample_rate_hz: u32,
}

impl FeatureExtractor<SpectralHrv> {
    /// Extractor using the built-in spectral estimator.
    pub fn spectral(band: FeatureBand, sample_rate_hz: u32) -> Self {
        Self::new(SpectralHrv::default(), band, sample_rate_hz)
    }
}

impl<E: HrvEstimator> FeatureExtractor<E> {
    pub fn new(estimator: E, band: FeatureBand, sample_rate_hz: u32) -> Self {
        Self {
            estimator,
            band,
            sample_rate_hz,
        }
    }

    pub fn band(&self) -> FeatureBand {
        self.band
    }

    /// Compute the feature over exactly `window`.
    pub fn extract(&self, window: &Window<'_>) -> Result<FeatureValue, FeatureError> {
        let bands = self
            .estimator
            .band_powers(window.values, self.sample_rate_hz)?;

        let value = match self.band {
            FeatureBand::LfPercent => bands.lf_percent().ok_or(FeatureError::NoPower)?,
            FeatureBand::LfPower => bands.lf,
        };
        if !value.is_finite() {
            return Err(FeatureError::NoPower);
        }
        Ok(FeatureValue { value, bands })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::types::Sample;
    use crate::core::buffer::SampleBuffer;
    use crate::core::hrv::tests::synthetic_ppg;

    struct Fixed(BandPowers);

    impl HrvEstimator for Fixed {
        fn band_powers(&self, _: &[f64], _: u32) -> Result<BandPowers, FeatureError> {
            Ok(self.0)
        }
    }

    fn window_buffer(values: &[f64]) -> SampleBuffer {
        let mut buffer = SampleBuffer::new();
        for (i, &v) in values.iter().enumerate() {
            buffer.append(Sample::at_index(i as u64, 75, v));
        }
        buffer
    }

    #[test]
    fn test_band_selection() {
        let bands = BandPowers {
            vlf: 0.0,
            lf: 250.0,
            hf: 750.0,
            peak_count: 30,
        };
        let buffer = window_buffer(&[0.0; 4]);
        let window = buffer.trailing_window(4).unwrap();

        let percent = FeatureExtractor::new(Fixed(bands), FeatureBand::LfPercent, 75);
        assert_eq!(percent.extract(&window).unwrap().value, 25.0);

        let absolute = FeatureExtractor::new(Fixed(bands), FeatureBand::LfPower, 75);
        assert_eq!(absolute.extract(&window).unwrap().value, 250.0);
    }

    #[test]
    fn test_zero_power_is_unavailable() {
        let buffer = window_buffer(&[0.0; 4]);
        let window = buffer.trailing_window(4).unwrap();
        let extractor =
            FeatureExtractor::new(Fixed(BandPowers::default()), FeatureBand::LfPercent, 75);

        assert_eq!(extractor.extract(&window), Err(FeatureError::NoPower));
    }

    #[test]
    fn test_spectral_extractor_on_trailing_window() {
        let buffer = window_buffer(&synthetic_ppg(75, 40.0, 0.1));
        let window = buffer.trailing_window(75 * 30).unwrap();

        let feature = FeatureExtractor::spectral(FeatureBand::LfPercent, 75)
            .extract(&window)
            .unwrap();
        assert!((0.0..=100.0).contains(&feature.value));
        assert!(feature.bands.peak_count >= 25);
    }
}
