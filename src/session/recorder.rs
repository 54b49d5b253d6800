//! Per-tick records and their persistence.
//!
//! Two outputs per condition:
//! - a line log appended every tick (`{timestamp} - LF Power: {value}`),
//!   best-effort, so a failed write never stops the session;
//! - a CSV of every record, written once when the session ends.

use crate::core::{Band, Mode};
use crate::session::context::SessionContext;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// One row per RUNNING tick that produced a feature value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub participant_id: u32,
    pub condition: u8,
    pub tick_time: DateTime<Local>,
    /// Seconds since RUNNING began
    pub elapsed_secs: f64,
    pub lf_power: f64,
    /// Classifier band (logging condition)
    pub band: Option<Band>,
    /// Volume sent (modulated condition)
    pub volume: Option<u8>,
    /// Reverb level after the tick (modulated condition)
    pub reverb_level: Option<u8>,
}

impl SessionRecord {
    fn csv_header(mode: Mode) -> &'static str {
        match mode {
            Mode::Logging => "id,condition,time,lf_power,band",
            Mode::Modulated => "id,condition,time,lf_power,volume,reverb_level",
        }
    }

    fn csv_row(&self, mode: Mode) -> String {
        let base = format!(
            "{},{},{},{}",
            self.participant_id,
            self.condition,
            self.tick_time.format("%H:%M:%S"),
            self.lf_power
        );
        match mode {
            Mode::Logging => format!(
                "{base},{}",
                self.band
                    .and_then(Band::label)
                    .map(|l| l.to_string())
                    .unwrap_or_default()
            ),
            Mode::Modulated => format!(
                "{base},{},{}",
                opt(self.volume),
                opt(self.reverb_level)
            ),
        }
    }
}

fn opt(value: Option<u8>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Format of one feature log line.
pub fn log_line(at: DateTime<Local>, value: f64) -> String {
    format!("{} - LF Power: {value:.4}", at.format("%Y-%m-%d %H:%M:%S%.6f"))
}

/// Accumulates records for the session and writes them out at the end.
pub struct SessionRecorder {
    participant_id: u32,
    mode: Mode,
    records: Vec<SessionRecord>,
    log_path: Option<PathBuf>,
    log: Option<File>,
    csv_path: Option<PathBuf>,
    summary_path: Option<PathBuf>,
    log_failures: u64,
}

impl SessionRecorder {
    /// Recorder writing into the context's participant folder.
    pub fn for_context(ctx: &SessionContext) -> Self {
        Self {
            log_path: Some(ctx.paths.log.clone()),
            csv_path: Some(ctx.paths.records.clone()),
            summary_path: Some(ctx.paths.summary.clone()),
            ..Self::in_memory(ctx.participant_id, ctx.mode)
        }
    }

    /// Recorder that only keeps records in memory.
    pub fn in_memory(participant_id: u32, mode: Mode) -> Self {
        Self {
            participant_id,
            mode,
            records: Vec::new(),
            log_path: None,
            log: None,
            csv_path: None,
            summary_path: None,
            log_failures: 0,
        }
    }

    /// Start a record for this session's participant and condition.
    pub fn new_record(&self, tick_time: DateTime<Local>, elapsed_secs: f64, lf_power: f64) -> SessionRecord {
        SessionRecord {
            participant_id: self.participant_id,
            condition: self.mode.condition_id(),
            tick_time,
            elapsed_secs,
            lf_power,
            band: None,
            volume: None,
            reverb_level: None,
        }
    }

    pub fn append(&mut self, record: SessionRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[SessionRecord] {
        &self.records
    }

    pub fn log_failures(&self) -> u64 {
        self.log_failures
    }

    /// Append one line to the feature log. Returns false if the write failed.
    pub fn log_feature(&mut self, at: DateTime<Local>, value: f64) -> bool {
        let Some(path) = self.log_path.as_deref() else {
            return true;
        };

        if self.log.is_none() {
            match OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => self.log = Some(file),
                Err(e) => {
                    self.log_failures += 1;
                    warn!(path = %path.display(), error = %e, "cannot open feature log");
                    return false;
                }
            }
        }

        let line = log_line(at, value);
        let written = self
            .log
            .as_mut()
            .map(|file| writeln!(file, "{line}"))
            .unwrap_or(Ok(()));
        if let Err(e) = written {
            self.log_failures += 1;
            warn!(error = %e, "feature log write failed");
            // Reopen on the next tick.
            self.log = None;
            return false;
        }
        true
    }

    /// Write every record as CSV. Returns the file written, if any.
    pub fn flush(&mut self) -> std::io::Result<Option<PathBuf>> {
        self.log = None;

        let Some(path) = self.csv_path.clone() else {
            return Ok(None);
        };
        write_csv(&path, self.mode, &self.records)?;
        info!(path = %path.display(), rows = self.records.len(), "session records saved");
        Ok(Some(path))
    }

    /// Write a JSON summary next to the records.
    pub fn write_summary<T: Serialize>(&self, summary: &T) -> std::io::Result<Option<PathBuf>> {
        let Some(path) = self.summary_path.clone() else {
            return Ok(None);
        };
        let json = serde_json::to_string_pretty(summary).map_err(std::io::Error::other)?;
        std::fs::write(&path, json)?;
        Ok(Some(path))
    }
}

fn write_csv(path: &Path, mode: Mode, records: &[SessionRecord]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut out = BufWriter::new(File::create(path)?);
    writeln!(out, "{}", SessionRecord::csv_header(mode))?;
    for record in records {
        writeln!(out, "{}", record.csv_row(mode))?;
    }
    out.flush()
}
