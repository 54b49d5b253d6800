//! Session-level error taxonomy.
//!
//! Only failures that stop a session from starting live here. Per-tick
//! conditions (warm-up, unusable window, failed send) are absorbed by the
//! control loop and show up in its statistics instead.

use crate::actuator::TransportError;
use crate::collector::CollectorError;
use crate::config::ConfigError;
use crate::sync::SyncError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    /// A required connection could not be acquired.
    #[error("connection failure ({resource}): {reason}")]
    ConnectionFailure {
        resource: &'static str,
        reason: String,
    },

    /// Another session holds the sensor and audio output.
    #[error("another session is already running (lock file {0})")]
    AlreadyRunning(PathBuf),

    #[error("participant folder already exists: {0}")]
    ParticipantExists(PathBuf),

    /// This condition already has saved data for the participant.
    #[error("condition data already exists: {0}")]
    ConditionRecorded(PathBuf),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("rendezvous failed: {0}")]
    Sync(SyncError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CollectorError> for SessionError {
    fn from(e: CollectorError) -> Self {
        SessionError::ConnectionFailure {
            resource: "sensor",
            reason: e.to_string(),
        }
    }
}

impl From<TransportError> for SessionError {
    fn from(e: TransportError) -> Self {
        SessionError::ConnectionFailure {
            resource: "audio output",
            reason: e.to_string(),
        }
    }
}

impl From<SyncError> for SessionError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::Bind { .. } => SessionError::ConnectionFailure {
                resource: "rendezvous socket",
                reason: e.to_string(),
            },
            other => SessionError::Sync(other),
        }
    }
}

pub type Result<T, E = SessionError> = std::result::Result<T, E>;
