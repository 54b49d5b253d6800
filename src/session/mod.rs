//! One biofeedback session, end to end.
//!
//! - [`context`]: participant, condition, output paths
//! - [`lock`]: exclusive hold on the devices
//! - [`control`]: the tick loop and its teardown
//! - [`recorder`], [`stats`]: what the session leaves behind
//!
//! Resources are acquired in a fixed order (lock, rendezvous socket, sensor,
//! audio output). If any step fails, everything acquired before it is
//! released as it goes out of scope. The logging condition sends no control
//! messages and never opens an audio output.

pub mod cancel;
pub mod context;
pub mod control;
pub mod lock;
pub mod recorder;
pub mod stats;

use crate::actuator::memory::RecordingSink;
use crate::actuator::midi::MidiSink;
use crate::actuator::AudioSink;
use crate::clock::SystemClock;
use crate::collector::{ReplayDriver, SensorDriver, SerialOximeter};
use crate::error::Result;
use crate::sync::{NoSync, Rendezvous, SyncGate};
use std::path::PathBuf;
use tracing::info;

pub use cancel::{install_ctrlc_handler, CancellationToken};
pub use context::{counterbalanced_order, SessionContext, SessionPaths};
pub use control::{ControlLoop, LoopState, SessionOutcome, SessionReport, SessionSummary};
pub use lock::SessionLock;
pub use recorder::{SessionRecord, SessionRecorder};
pub use stats::SessionStats;

/// Where PPG samples come from.
#[derive(Debug, Clone)]
pub enum SensorSource {
    /// Pulse oximeter on a serial device
    Serial(PathBuf),
    /// Recorded trace played back in real time
    Replay(PathBuf),
}

/// Where control messages go.
#[derive(Debug, Clone)]
pub enum AudioTarget {
    /// MIDI output whose name contains the filter, or the first one
    Midi(Option<String>),
    /// Messages are kept in memory and logged only
    DryRun,
}

/// Everything a session holds exclusively while it runs.
pub struct SessionResources {
    pub lock: Option<SessionLock>,
    pub rendezvous: Box<dyn Rendezvous>,
    pub sensor: Box<dyn SensorDriver>,
    pub audio: Option<Box<dyn AudioSink>>,
}

/// Acquire the lock, rendezvous socket, sensor and audio output for `ctx`.
pub fn acquire(
    ctx: &SessionContext,
    source: &SensorSource,
    audio: &AudioTarget,
) -> Result<SessionResources> {
    let config = &ctx.config;
    let lock = SessionLock::acquire(&config.data_dir, &ctx.session_id.to_string())?;

    let rendezvous: Box<dyn Rendezvous> = if config.sync.disabled {
        info!("pacer rendezvous disabled");
        Box::new(NoSync)
    } else {
        Box::new(SyncGate::bind(config.sync.address, config.sync.token.clone())?)
    };

    let rate = config.sensor.sample_rate_hz;
    let sensor: Box<dyn SensorDriver> = match source {
        SensorSource::Serial(path) => Box::new(SerialOximeter::open(path, rate)?),
        SensorSource::Replay(path) => {
            Box::new(ReplayDriver::from_file(path, rate, SystemClock::new())?)
        }
    };
    info!(sensor = %sensor.describe(), "sensor connected");

    let audio: Option<Box<dyn AudioSink>> = if ctx.mode.drives_audio() {
        let sink: Box<dyn AudioSink> = match audio {
            AudioTarget::Midi(filter) => Box::new(MidiSink::connect(filter.as_deref())?),
            AudioTarget::DryRun => Box::new(RecordingSink::new()),
        };
        info!(audio = %sink.describe(), "audio output connected");
        Some(sink)
    } else {
        info!("logging condition; audio output not opened");
        None
    };

    Ok(SessionResources {
        lock: Some(lock),
        rendezvous,
        sensor,
        audio,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::core::Mode;
    use crate::error::SessionError;

    fn context_in(dir: &std::path::Path) -> SessionContext {
        context_for(dir, Mode::Modulated)
    }

    fn context_for(dir: &std::path::Path, mode: Mode) -> SessionContext {
        let mut config = Config::default();
        config.data_dir = dir.to_path_buf();
        config.sync.disabled = true;
        let folder = context::open_participant_folder(dir, 1).unwrap();
        SessionContext::new(1, mode, folder, config).unwrap()
    }

    #[test]
    fn test_failed_sensor_releases_lock() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_in(dir.path());

        let missing = SensorSource::Serial(dir.path().join("no-such-device"));
        let result = acquire(&ctx, &missing, &AudioTarget::DryRun);
        assert!(matches!(
            result,
            Err(SessionError::ConnectionFailure { resource: "sensor", .. })
        ));

        // The lock taken before the sensor failed was released.
        assert!(SessionLock::acquire(dir.path(), "next").is_ok());
    }

    #[test]
    fn test_second_session_refused_while_first_holds_resources() {
        let dir = tempfile::tempdir().unwrap();
        let trace = dir.path().join("trace.csv");
        std::fs::write(&trace, "1\n2\n3\n").unwrap();
        let ctx = context_in(dir.path());

        let source = SensorSource::Replay(trace);
        let first = acquire(&ctx, &source, &AudioTarget::DryRun).unwrap();
        assert!(matches!(
            acquire(&ctx, &source, &AudioTarget::DryRun),
            Err(SessionError::AlreadyRunning(_))
        ));

        drop(first);
        assert!(acquire(&ctx, &source, &AudioTarget::DryRun).is_ok());
    }

    #[test]
    fn test_logging_condition_opens_no_audio_output() {
        let dir = tempfile::tempdir().unwrap();
        let trace = dir.path().join("trace.csv");
        std::fs::write(&trace, "1\n2\n3\n").unwrap();
        let ctx = context_for(dir.path(), Mode::Logging);

        // No port by this name exists; connecting would fail.
        let midi = AudioTarget::Midi(Some("no-such-midi-port-7f3a".to_string()));
        let resources = acquire(&ctx, &SensorSource::Replay(trace), &midi).unwrap();
        assert!(resources.audio.is_none());
    }
}
