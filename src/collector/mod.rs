//! Sensor acquisition for the biofeedback loop.
//!
//! A driver owns the physical (or replayed) sensor connection and moves
//! whatever samples have arrived into the session's [`SampleBuffer`] when the
//! control loop asks. Draining never blocks.

pub mod nonin;
pub mod oximeter;
pub mod replay;
pub mod types;

use crate::core::buffer::SampleBuffer;
use thiserror::Error;

pub use nonin::PacketDecoder;
pub use oximeter::SerialOximeter;
pub use replay::ReplayDriver;
pub use types::Sample;

/// Errors raised by sensor drivers.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// The sensor could not be opened. Fatal at session start.
    #[error("failed to open sensor {device}: {reason}")]
    Open { device: String, reason: String },

    /// The reader side went away mid-session.
    #[error("sensor {0} disconnected")]
    Disconnected(String),

    #[error("replay file error: {0}")]
    Replay(String),
}

/// A source of PPG samples.
pub trait SensorDriver {
    /// Move every sample that has arrived since the last call into `buffer`
    /// and return how many were moved.
    fn drain_into(&mut self, buffer: &mut SampleBuffer) -> Result<usize, CollectorError>;

    /// Nominal sampling rate in Hz.
    fn sample_rate_hz(&self) -> u32;

    /// Release the underlying connection. Safe to call more than once.
    fn close(&mut self);

    /// Human-readable name for logs.
    fn describe(&self) -> String;
}

impl<T: SensorDriver + ?Sized> SensorDriver for Box<T> {
    fn drain_into(&mut self, buffer: &mut SampleBuffer) -> Result<usize, CollectorError> {
        (**self).drain_into(buffer)
    }

    fn sample_rate_hz(&self) -> u32 {
        (**self).sample_rate_hz()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}
