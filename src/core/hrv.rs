//! Frequency-domain HRV estimate from a PPG window.
//!
//! Pipeline: rolling-average peak detection → RR intervals → 4 Hz linear
//! resampling → mean removal → Hann window → periodogram → band powers.
//!
//! Bands follow the usual short-term HRV conventions:
//!
//! | band | range (Hz)      |
//! |------|-----------------|
//! | VLF  | 0.0033 – 0.04   |
//! | LF   | 0.04 – 0.15     |
//! | HF   | 0.15 – 0.40     |

use rustfft::num_complex::Complex64;
use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::f64::consts::PI;
use thiserror::Error;

const VLF_BAND: (f64, f64) = (0.0033, 0.04);
const LF_BAND: (f64, f64) = (0.04, 0.15);
const HF_BAND: (f64, f64) = (0.15, 0.40);

/// Minimum resampled points before a spectrum is attempted.
const MIN_SPECTRUM_POINTS: usize = 8;

/// Why a window produced no estimate.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FeatureError {
    #[error("too few peaks: found {found}, need {needed}")]
    TooFewPeaks { found: usize, needed: usize },

    #[error("RR series too short for spectral estimate ({0} points)")]
    ShortSeries(usize),

    #[error("spectrum has no power")]
    NoPower,

    #[error("estimator failed: {0}")]
    Estimator(String),
}

/// Power in each HRV band (ms²).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BandPowers {
    pub vlf: f64,
    pub lf: f64,
    pub hf: f64,
    /// Peaks detected in the source window
    pub peak_count: usize,
}

impl BandPowers {
    pub fn total(&self) -> f64 {
        self.vlf + self.lf + self.hf
    }

    /// LF share of total power, 0–100.
    pub fn lf_percent(&self) -> Option<f64> {
        let total = self.total();
        if total > 0.0 && total.is_finite() {
            Some(self.lf / total * 100.0)
        } else {
            None
        }
    }
}

/// The HRV computation seen by the feature extractor.
pub trait HrvEstimator {
    fn band_powers(&self, signal: &[f64], sample_rate_hz: u32) -> Result<BandPowers, FeatureError>;
}

impl<T: HrvEstimator + ?Sized> HrvEstimator for Box<T> {
    fn band_powers(&self, signal: &[f64], sample_rate_hz: u32) -> Result<BandPowers, FeatureError> {
        (**self).band_powers(signal, sample_rate_hz)
    }
}

/// Default estimator.
#[derive(Debug, Clone)]
pub struct SpectralHrv {
    /// Rolling-average window for peak detection
    pub peak_window_secs: f64,
    /// RR series resampling rate
    pub resample_hz: f64,
    /// Fewer peaks than this gives no estimate
    pub min_peaks: usize,
    /// Plausible RR interval range in ms
    pub rr_range_ms: (f64, f64),
}

impl Default for SpectralHrv {
    fn default() -> Self {
        Self {
            peak_window_secs: 0.75,
            resample_hz: 4.0,
            min_peaks: 5,
            rr_range_ms: (300.0, 2000.0),
        }
    }
}

impl HrvEstimator for SpectralHrv {
    fn band_powers(&self, signal: &[f64], sample_rate_hz: u32) -> Result<BandPowers, FeatureError> {
        let sfreq = f64::from(sample_rate_hz);
        let peaks = detect_peaks(signal, sfreq, self.peak_window_secs);
        if peaks.len() < self.min_peaks {
            return Err(FeatureError::TooFewPeaks {
                found: peaks.len(),
                needed: self.min_peaks,
            });
        }

        let (rr_times, rr_ms) = rr_intervals(&peaks, sfreq, self.rr_range_ms);
        if rr_ms.len() + 1 < self.min_peaks {
            return Err(FeatureError::TooFewPeaks {
                found: rr_ms.len() + 1,
                needed: self.min_peaks,
            });
        }

        let series = resample(&rr_times, &rr_ms, self.resample_hz);
        if series.len() < MIN_SPECTRUM_POINTS {
            return Err(FeatureError::ShortSeries(series.len()));
        }

        let (freqs, power) = periodogram(&series, self.resample_hz);
        let powers = BandPowers {
            vlf: band_power(&freqs, &power, VLF_BAND),
            lf: band_power(&freqs, &power, LF_BAND),
            hf: band_power(&freqs, &power, HF_BAND),
            peak_count: peaks.len(),
        };

        if powers.total() <= 0.0 || !powers.total().is_finite() {
            return Err(FeatureError::NoPower);
        }
        Ok(powers)
    }
}

/// Systolic peak indices: the maximum of each run where the signal sits
/// above its centred rolling mean. Runs touching either edge are dropped
/// since their maximum may be cut off.
pub fn detect_peaks(signal: &[f64], sfreq: f64, window_secs: f64) -> Vec<usize> {
    let n = signal.len();
    if n == 0 {
        return Vec::new();
    }

    let width = ((window_secs * sfreq).round() as usize).max(1);
    let half = width / 2;

    let mut prefix = Vec::with_capacity(n + 1);
    prefix.push(0.0);
    for &x in signal {
        let last = prefix[prefix.len() - 1];
        prefix.push(last + x);
    }

    let mut peaks = Vec::new();
    let mut run: Option<(usize, usize)> = None; // (start, argmax)
    for i in 0..n {
        let lo = i.saturating_sub(half);
        let hi = (i + half + 1).min(n);
        let mean = (prefix[hi] - prefix[lo]) / (hi - lo) as f64;

        if signal[i] > mean {
            run = match run {
                None => Some((i, i)),
                Some((start, best)) if signal[i] > signal[best] => Some((start, i)),
                keep => keep,
            };
        } else if let Some((start, best)) = run.take() {
            if start > 0 {
                peaks.push(best);
            }
        }
    }
    peaks
}

/// RR intervals in ms, timestamped at the closing beat. Intervals outside
/// `range_ms` are discarded.
fn rr_intervals(peaks: &[usize], sfreq: f64, range_ms: (f64, f64)) -> (Vec<f64>, Vec<f64>) {
    peaks
        .windows(2)
        .map(|pair| {
            let rr = (pair[1] - pair[0]) as f64 / sfreq * 1000.0;
            (pair[1] as f64 / sfreq, rr)
        })
        .filter(|&(_, rr)| rr >= range_ms.0 && rr <= range_ms.1)
        .unzip()
}

/// Linear interpolation of an irregular series onto an even grid.
fn resample(times: &[f64], values: &[f64], rate_hz: f64) -> Vec<f64> {
    let (Some(&first), Some(&last)) = (times.first(), times.last()) else {
        return Vec::new();
    };
    let step = 1.0 / rate_hz;
    let count = ((last - first) / step).floor() as usize + 1;

    let mut out = Vec::with_capacity(count);
    let mut j = 0;
    for k in 0..count {
        let t = first + k as f64 * step;
        while j + 1 < times.len() - 1 && times[j + 1] < t {
            j += 1;
        }
        if j + 1 >= times.len() {
            out.push(values[j]);
            continue;
        }
        let (t0, t1) = (times[j], times[j + 1]);
        let v = if t1 > t0 {
            values[j] + (values[j + 1] - values[j]) * ((t - t0) / (t1 - t0)).clamp(0.0, 1.0)
        } else {
            values[j]
        };
        out.push(v);
    }
    out
}

/// One-sided Hann-windowed periodogram (units²/Hz).
fn periodogram(series: &[f64], fs: f64) -> (Vec<f64>, Vec<f64>) {
    let n = series.len();
    let mean = series.iter().mean();
    let window: Vec<f64> = (0..n)
        .map(|k| 0.5 - 0.5 * (2.0 * PI * k as f64 / (n - 1) as f64).cos())
        .collect();
    let scale = fs * window.iter().map(|w| w * w).sum::<f64>();
    let mut buffer: Vec<Complex64> = series
        .iter()
        .zip(&window)
        .map(|(x, w)| Complex64::new((x - mean) * w, 0.0))
        .collect();

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(n);
    fft.process(&mut buffer);

    let bins = n / 2 + 1;
    let freqs = (0..bins).map(|k| k as f64 * fs / n as f64).collect();
    let power = buffer
        .iter()
        .take(bins)
        .enumerate()
        .map(|(k, c)| {
            let p = c.norm_sqr() / scale;
            let nyquist = n % 2 == 0 && k == n / 2;
            if k != 0 && !nyquist {
                p * 2.0
            } else {
                p
            }
        })
        .collect();
    (freqs, power)
}

fn band_power(freqs: &[f64], power: &[f64], (lo, hi): (f64, f64)) -> f64 {
    let df = if freqs.len() > 1 { freqs[1] - freqs[0] } else { 0.0 };
    freqs
        .iter()
        .zip(power)
        .filter(|(f, _)| **f >= lo && **f < hi)
        .map(|(_, p)| p * df)
        .sum()
}
