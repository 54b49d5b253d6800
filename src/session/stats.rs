//! Counters describing how a session went.

use serde::{Deserialize, Serialize};

/// Tick-level statistics for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    /// RUNNING ticks executed
    pub ticks: u64,
    /// Ticks where the window was not yet full
    pub warmup_ticks: u64,
    /// Ticks where no feature could be computed
    pub skipped_ticks: u64,
    /// Ticks that produced a feature value
    pub feature_ticks: u64,
    /// Samples moved into the buffer
    pub samples: u64,
    /// Control messages delivered to the audio output
    pub messages_sent: u64,
    /// Control messages the transport rejected
    pub transport_failures: u64,
    /// Per-tick log lines that could not be written
    pub log_failures: u64,
    /// Times the sensor stream was found disconnected
    pub sensor_disconnects: u64,
}

impl SessionStats {
    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        format!(
            "Session Statistics:\n\
             - Ticks run: {}\n\
             - Feature values: {}\n\
             - Warm-up ticks (window not full): {}\n\
             - Skipped ticks (no estimate): {}\n\
             - Samples received: {}\n\
             - Control messages sent: {}\n\
             - Transport failures: {}\n\
             - Log write failures: {}",
            self.ticks,
            self.feature_ticks,
            self.warmup_ticks,
            self.skipped_ticks,
            self.samples,
            self.messages_sent,
            self.transport_failures,
            self.log_failures,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_lists_counts() {
        let stats = SessionStats {
            ticks: 12,
            skipped_ticks: 3,
            ..SessionStats::default()
        };
        let summary = stats.summary();
        assert!(summary.contains("Ticks run: 12"));
        assert!(summary.contains("Skipped ticks (no estimate): 3"));
    }
}
