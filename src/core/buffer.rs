//! Rolling sample store with a fixed-length trailing window.
//!
//! Samples are appended in time order and never removed during a session;
//! only the most recent `n` samples are ever read back.

use crate::collector::types::Sample;
use thiserror::Error;

/// The buffer does not yet hold enough samples for the requested window.
///
/// This is the normal warm-up state, not a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("insufficient data: need {needed} samples, have {available}")]
pub struct InsufficientData {
    pub needed: usize,
    pub available: usize,
}

/// A borrowed view over the trailing samples of a [`SampleBuffer`].
#[derive(Debug, Clone, Copy)]
pub struct Window<'a> {
    /// Raw sample values, oldest first
    pub values: &'a [f64],
    /// Matching timestamps in seconds
    pub times: &'a [f64],
}

impl Window<'_> {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Time span covered by the window in seconds.
    pub fn span_secs(&self) -> f64 {
        match (self.times.first(), self.times.last()) {
            (Some(first), Some(last)) => last - first,
            _ => 0.0,
        }
    }
}

/// Append-only store of samples.
///
/// Values and timestamps live in parallel vectors so a window is two
/// contiguous slices.
#[derive(Debug, Default)]
pub struct SampleBuffer {
    values: Vec<f64>,
    times: Vec<f64>,
    clamped: u64,
}

impl SampleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a buffer with room for `capacity` samples before reallocating.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity),
            times: Vec::with_capacity(capacity),
            clamped: 0,
        }
    }

    /// Append a sample.
    ///
    /// A timestamp earlier than the last stored one is clamped up to it so
    /// the timeline never runs backwards.
    pub fn append(&mut self, sample: Sample) {
        let timestamp = match self.times.last() {
            Some(&last) if sample.timestamp < last => {
                self.clamped += 1;
                last
            }
            _ => sample.timestamp,
        };
        self.values.push(sample.value);
        self.times.push(timestamp);
    }

    /// The most recent `n` samples in time order.
    pub fn trailing_window(&self, n: usize) -> Result<Window<'_>, InsufficientData> {
        let available = self.values.len();
        if available < n {
            return Err(InsufficientData {
                needed: n,
                available,
            });
        }
        let start = available - n;
        Ok(Window {
            values: &self.values[start..],
            times: &self.times[start..],
        })
    }

    /// All stored values, oldest first.
    pub fn samples(&self) -> &[f64] {
        &self.values
    }

    /// All stored timestamps, oldest first.
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of samples whose timestamp had to be clamped.
    pub fn clamped_count(&self) -> u64 {
        self.clamped
    }

    /// Timestamp of the newest sample.
    pub fn last_timestamp(&self) -> Option<f64> {
        self.times.last().copied()
    }
}

impl Extend<Sample> for SampleBuffer {
    fn extend<I: IntoIterator<Item = Sample>>(&mut self, iter: I) {
        for sample in iter {
            self.append(sample);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(n: usize) -> SampleBuffer {
        let mut buffer = SampleBuffer::new();
        for i in 0..n {
            buffer.append(Sample::new(i as f64, i as f64 * 10.0));
        }
        buffer
    }

    #[test]
    fn test_window_not_ready() {
        let buffer = filled(3);
        let err = buffer.trailing_window(5).unwrap_err();
        assert_eq!(
            err,
            InsufficientData {
                needed: 5,
                available: 3
            }
        );
    }

    #[test]
    fn test_window_is_most_recent_in_order() {
        let buffer = filled(10);
        let window = buffer.trailing_window(4).unwrap();

        assert_eq!(window.len(), 4);
        assert_eq!(window.values, &[60.0, 70.0, 80.0, 90.0]);
        assert_eq!(window.times, &[6.0, 7.0, 8.0, 9.0]);
        assert_eq!(window.span_secs(), 3.0);
    }

    #[test]
    fn test_exact_fill_is_ready() {
        let buffer = filled(4);
        assert_eq!(buffer.trailing_window(4).unwrap().len(), 4);
    }

    #[test]
    fn test_backwards_timestamp_clamped() {
        let mut buffer = SampleBuffer::new();
        buffer.append(Sample::new(2.0, 1.0));
        buffer.append(Sample::new(1.5, 2.0));
        buffer.append(Sample::new(3.0, 3.0));

        assert_eq!(buffer.times(), &[2.0, 2.0, 3.0]);
        assert_eq!(buffer.clamped_count(), 1);
        assert!(buffer.times().windows(2).all(|w| w[0] <= w[1]));
    }
}
