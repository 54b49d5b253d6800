//! Replay of a recorded PPG trace at real-time pace.
//!
//! Lets a full session run without an oximeter attached: samples become
//! visible to the loop as the session clock passes their timestamp.

use crate::clock::Clock;
use crate::collector::types::Sample;
use crate::collector::{CollectorError, SensorDriver};
use crate::core::buffer::SampleBuffer;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Sensor driver that plays back stored values.
pub struct ReplayDriver<C: Clock> {
    label: String,
    values: Vec<f64>,
    sample_rate_hz: u32,
    clock: C,
    started_at: Option<Duration>,
    next: usize,
    closed: bool,
}

impl<C: Clock> ReplayDriver<C> {
    pub fn new(values: Vec<f64>, sample_rate_hz: u32, clock: C) -> Self {
        Self {
            label: "memory".to_string(),
            values,
            sample_rate_hz,
            clock,
            started_at: None,
            next: 0,
            closed: false,
        }
    }

    /// Load a trace file.
    ///
    /// Each line contributes its last comma-separated field if that field is
    /// numeric; headers and blank lines are skipped.
    pub fn from_file(path: &Path, sample_rate_hz: u32, clock: C) -> Result<Self, CollectorError> {
        let content = std::fs::read_to_string(path).map_err(|e| CollectorError::Open {
            device: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let values = parse_trace(&content);
        if values.is_empty() {
            return Err(CollectorError::Replay(format!(
                "no numeric samples in {}",
                path.display()
            )));
        }
        info!(file = %path.display(), samples = values.len(), "loaded replay trace");

        let mut driver = Self::new(values, sample_rate_hz, clock);
        driver.label = path.display().to_string();
        Ok(driver)
    }

    /// Samples not yet delivered.
    pub fn remaining(&self) -> usize {
        self.values.len() - self.next
    }
}

/// Extract one value per line from a trace file.
pub fn parse_trace(content: &str) -> Vec<f64> {
    content
        .lines()
        .filter_map(|line| line.rsplit(',').next())
        .filter_map(|field| field.trim().parse::<f64>().ok())
        .collect()
}

impl<C: Clock> SensorDriver for ReplayDriver<C> {
    fn drain_into(&mut self, buffer: &mut SampleBuffer) -> Result<usize, CollectorError> {
        if self.closed {
            return Err(CollectorError::Disconnected(self.label.clone()));
        }

        let now = self.clock.now();
        let started_at = *self.started_at.get_or_insert(now);
        let elapsed = now.saturating_sub(started_at).as_secs_f64();

        // Sample i is due at i / rate, so sample 0 is available immediately.
        let due = (elapsed * f64::from(self.sample_rate_hz)).floor() as usize + 1;
        let due = due.min(self.values.len());

        let from = self.next;
        for index in from..due {
            buffer.append(Sample::at_index(
                index as u64,
                self.sample_rate_hz,
                self.values[index],
            ));
        }
        self.next = due.max(from);
        Ok(self.next - from)
    }

    fn sample_rate_hz(&self) -> u32 {
        self.sample_rate_hz
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn describe(&self) -> String {
        format!("replay {}", self.label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::io::Write;

    #[test]
    fn test_paced_by_clock() {
        let clock = ManualClock::new();
        let mut driver = ReplayDriver::new((0..100).map(f64::from).collect(), 10, clock.clone());
        let mut buffer = SampleBuffer::new();

        assert_eq!(driver.drain_into(&mut buffer).unwrap(), 1);

        clock.advance(Duration::from_secs(1));
        assert_eq!(driver.drain_into(&mut buffer).unwrap(), 10);
        assert_eq!(buffer.len(), 11);

        clock.advance(Duration::from_secs(60));
        assert_eq!(driver.drain_into(&mut buffer).unwrap(), 89);
        assert_eq!(driver.remaining(), 0);
        assert_eq!(driver.drain_into(&mut buffer).unwrap(), 0);
    }

    #[test]
    fn test_closed_driver_reports_disconnect() {
        let mut driver = ReplayDriver::new(vec![1.0], 10, ManualClock::new());
        driver.close();
        assert!(driver.drain_into(&mut SampleBuffer::new()).is_err());
    }

    #[test]
    fn test_parse_trace_skips_headers() {
        let values = parse_trace("time,ppg\n0.00,512\n0.01, 515\n\n0.02,bad\n");
        assert_eq!(values, vec![512.0, 515.0]);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "100\n101\n102").unwrap();

        let driver = ReplayDriver::from_file(file.path(), 75, ManualClock::new()).unwrap();
        assert_eq!(driver.remaining(), 3);
    }

    #[test]
    fn test_from_file_without_numbers_fails() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "nothing here").unwrap();

        let result = ReplayDriver::from_file(file.path(), 75, ManualClock::new());
        assert!(matches!(result, Err(CollectorError::Replay(_))));
    }
}
