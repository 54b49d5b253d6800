//! Everything that identifies one session.
//!
//! Built once at session start and handed to the control loop; nothing reads
//! participant or folder information from anywhere else.

use crate::config::Config;
use crate::core::Mode;
use crate::error::{Result, SessionError};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Folder holding one participant's files.
pub fn participant_folder(data_dir: &Path, participant_id: u32) -> PathBuf {
    data_dir.join(format!("sub-{participant_id}"))
}

/// Create a fresh participant folder, refusing to reuse an existing one.
pub fn create_participant_folder(data_dir: &Path, participant_id: u32) -> Result<PathBuf> {
    let folder = participant_folder(data_dir, participant_id);
    if folder.exists() {
        return Err(SessionError::ParticipantExists(folder));
    }
    std::fs::create_dir_all(&folder)?;
    Ok(folder)
}

/// Open a participant folder, creating it if needed.
pub fn open_participant_folder(data_dir: &Path, participant_id: u32) -> Result<PathBuf> {
    let folder = participant_folder(data_dir, participant_id);
    std::fs::create_dir_all(&folder)?;
    Ok(folder)
}

/// Per-condition output files inside a participant folder.
#[derive(Debug, Clone)]
pub struct SessionPaths {
    /// Per-tick feature log
    pub log: PathBuf,
    /// Per-tick records
    pub records: PathBuf,
    /// Session summary
    pub summary: PathBuf,
}

impl SessionPaths {
    pub fn new(folder: &Path, mode: Mode) -> Self {
        let c = mode.condition_id();
        Self {
            log: folder.join(format!("log_{c}.txt")),
            records: folder.join(format!("ppg_data_cond_{c}.csv")),
            summary: folder.join(format!("session_cond_{c}.json")),
        }
    }
}

/// Identity and settings of a single session.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: Uuid,
    pub participant_id: u32,
    pub mode: Mode,
    pub folder: PathBuf,
    pub paths: SessionPaths,
    pub created_at: DateTime<Local>,
    pub config: Config,
}

impl SessionContext {
    /// Context for `mode` in an existing participant folder.
    ///
    /// Fails if this condition already has saved records there.
    pub fn new(participant_id: u32, mode: Mode, folder: PathBuf, config: Config) -> Result<Self> {
        config.validate()?;

        let paths = SessionPaths::new(&folder, mode);
        if paths.records.exists() {
            return Err(SessionError::ConditionRecorded(paths.records));
        }

        Ok(Self {
            session_id: Uuid::new_v4(),
            participant_id,
            mode,
            folder,
            paths,
            created_at: Local::now(),
            config,
        })
    }

    pub fn condition_id(&self) -> u8 {
        self.mode.condition_id()
    }
}

/// Condition order for a participant: odd ids start with logging, even ids
/// with modulation.
pub fn counterbalanced_order(participant_id: u32) -> [Mode; 2] {
    if participant_id % 2 == 1 {
        [Mode::Logging, Mode::Modulated]
    } else {
        [Mode::Modulated, Mode::Logging]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_refuses_existing_folder() {
        let dir = tempfile::tempdir().unwrap();
        let folder = create_participant_folder(dir.path(), 7).unwrap();
        assert!(folder.ends_with("sub-7"));

        let again = create_participant_folder(dir.path(), 7);
        assert!(matches!(again, Err(SessionError::ParticipantExists(_))));
    }

    #[test]
    fn test_context_refuses_recorded_condition() {
        let dir = tempfile::tempdir().unwrap();
        let folder = open_participant_folder(dir.path(), 3).unwrap();
        std::fs::write(folder.join("ppg_data_cond_2.csv"), "id\n").unwrap();

        let config = Config::default();
        assert!(SessionContext::new(3, Mode::Logging, folder.clone(), config.clone()).is_ok());
        assert!(matches!(
            SessionContext::new(3, Mode::Modulated, folder, config),
            Err(SessionError::ConditionRecorded(_))
        ));
    }

    #[test]
    fn test_invalid_config_rejected_at_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.policy.reverb_max = 250;

        let result = SessionContext::new(1, Mode::Modulated, dir.path().to_path_buf(), config);
        assert!(matches!(result, Err(SessionError::Config(_))));
    }

    #[test]
    fn test_counterbalancing() {
        assert_eq!(counterbalanced_order(1), [Mode::Logging, Mode::Modulated]);
        assert_eq!(counterbalanced_order(4), [Mode::Modulated, Mode::Logging]);
    }

    #[test]
    fn test_paths_use_condition_number() {
        let paths = SessionPaths::new(Path::new("/data/sub-1"), Mode::Modulated);
        assert_eq!(paths.log, Path::new("/data/sub-1/log_2.txt"));
        assert_eq!(paths.records, Path::new("/data/sub-1/ppg_data_cond_2.csv"));
    }
}
