//! The session control loop.
//!
//! ```text
//!   WAITING_FOR_SYNC ──start──▶ WARMUP ──warmup elapsed──▶ RUNNING ──deadline──▶ FINISHED
//!          │              (modulated only)                    │
//!          └──────────────────── cancel ──────────────────────┴──────────────▶ INTERRUPTED
//! ```
//!
//! Each RUNNING tick drains the sensor, takes the trailing window, extracts
//! the feature, asks the mode's [`Decider`] what to do and records the
//! result. A tick that cannot produce a feature changes nothing but the
//! buffer, and neither does a tick whose window holds no sample newer than
//! the previous tick's. Every exit path runs the same teardown.

use crate::actuator::{Actuator, AudioSink};
use crate::clock::{Clock, SystemClock};
use crate::collector::SensorDriver;
use crate::core::{
    Decider, Decision, FeatureExtractor, HrvEstimator, Mode, PolicyState, SampleBuffer,
    SpectralHrv,
};
use crate::error::{Result, SessionError};
use crate::session::cancel::CancellationToken;
use crate::session::context::SessionContext;
use crate::session::lock::SessionLock;
use crate::session::recorder::{SessionRecord, SessionRecorder};
use crate::session::stats::SessionStats;
use crate::session::SessionResources;
use crate::sync::{Rendezvous, SyncError, SyncOutcome};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Granularity of blocking waits; cancellation is seen within one step.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Where the loop is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    WaitingForSync,
    Warmup,
    Running,
    Finished,
    Interrupted,
}

/// How a session that got past startup ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    /// Ran until the session deadline
    Finished,
    /// Stopped by the operator
    Interrupted,
}

/// What [`ControlLoop::run`] hands back.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub outcome: SessionOutcome,
    pub sync: Option<SyncOutcome>,
    pub stats: SessionStats,
    pub records: Vec<SessionRecord>,
    /// Final policy state (modulated condition)
    pub policy: Option<PolicyState>,
}

/// JSON summary written next to the session records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub participant_id: u32,
    pub condition: u8,
    pub mode: Mode,
    pub outcome: SessionOutcome,
    pub started_at: DateTime<Local>,
    pub ended_at: DateTime<Local>,
    pub sync: String,
    pub stats: SessionStats,
    pub final_reverb_level: Option<u8>,
}

fn describe_sync(sync: Option<&SyncOutcome>) -> String {
    match sync {
        Some(SyncOutcome::Started { from }) => format!("started by {from}"),
        Some(SyncOutcome::UnexpectedSignal { from, payload }) => {
            format!("unexpected payload {payload:?} from {from}")
        }
        Some(SyncOutcome::Skipped) => "skipped".to_string(),
        None => "never received".to_string(),
    }
}

/// Drives one session from rendezvous to teardown.
pub struct ControlLoop {
    ctx: SessionContext,
    sensor: Box<dyn SensorDriver>,
    actuator: Option<Actuator<Box<dyn AudioSink>>>,
    rendezvous: Box<dyn Rendezvous>,
    lock: Option<SessionLock>,
    clock: Box<dyn Clock>,
    extractor: FeatureExtractor<Box<dyn HrvEstimator>>,
    decider: Decider,
    buffer: SampleBuffer,
    recorder: SessionRecorder,
    stats: SessionStats,
    cancel: CancellationToken,
    state: LoopState,
    sync: Option<SyncOutcome>,
    poll_interval: Duration,
    sensor_lost: bool,
    /// Newest sample timestamp seen by the last tick that got a full window
    last_window_end: Option<f64>,
}

impl ControlLoop {
    /// Build a loop over acquired resources, using the wall clock and the
    /// built-in spectral estimator.
    pub fn new(ctx: SessionContext, resources: SessionResources, cancel: CancellationToken) -> Self {
        let config = &ctx.config;
        let sample_rate = resources.sensor.sample_rate_hz();
        let extractor = FeatureExtractor::new(
            Box::new(SpectralHrv::default()) as Box<dyn HrvEstimator>,
            config.feature,
            sample_rate,
        );
        let decider = Decider::for_mode(ctx.mode, config.classifier, config.policy.clone());
        // The logging condition never touches the audio output.
        let audio = resources.audio.filter(|_| ctx.mode.drives_audio());
        let actuator = audio.map(|sink| {
            Actuator::new(
                sink,
                config.audio.controls.clone(),
                config.audio.channel,
                config.audio.reverb_baseline,
            )
        });
        let capacity = (config.session_duration + config.warmup + config.window).as_secs() as usize
            * sample_rate as usize;
        let recorder = SessionRecorder::for_context(&ctx);

        Self {
            sensor: resources.sensor,
            actuator,
            rendezvous: resources.rendezvous,
            lock: resources.lock,
            clock: Box::new(SystemClock::new()),
            extractor,
            decider,
            buffer: SampleBuffer::with_capacity(capacity),
            recorder,
            stats: SessionStats::default(),
            cancel,
            state: LoopState::WaitingForSync,
            sync: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            sensor_lost: false,
            last_window_end: None,
            ctx,
        }
    }

    /// Replace the session clock.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Replace the HRV estimator.
    pub fn with_estimator(mut self, estimator: impl HrvEstimator + 'static) -> Self {
        let rate = self.sensor.sample_rate_hz();
        let estimator: Box<dyn HrvEstimator> = Box::new(estimator);
        self.extractor = FeatureExtractor::new(estimator, self.ctx.config.feature, rate);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    /// Run the session to completion.
    ///
    /// Cancellation is not an error: it ends the session with
    /// [`SessionOutcome::Interrupted`] after the normal teardown. A failed
    /// rendezvous is reported as [`SessionError::Sync`], also after teardown.
    pub fn run(mut self) -> Result<SessionReport> {
        let started_at = Local::now();
        info!(
            session_id = %self.ctx.session_id,
            participant = self.ctx.participant_id,
            mode = %self.ctx.mode,
            "session starting"
        );

        let result = self.drive();
        let outcome = match &result {
            Ok(outcome) => *outcome,
            Err(_) => SessionOutcome::Interrupted,
        };
        self.state = match outcome {
            SessionOutcome::Finished => LoopState::Finished,
            SessionOutcome::Interrupted => LoopState::Interrupted,
        };
        self.teardown(outcome, started_at);

        if let Err(e) = result {
            return Err(SessionError::from(e));
        }

        info!(outcome = ?outcome, "session ended");
        Ok(SessionReport {
            session_id: self.ctx.session_id,
            outcome,
            sync: self.sync.take(),
            stats: self.stats.clone(),
            records: self.recorder.records().to_vec(),
            policy: match &self.decider {
                Decider::Modulated(policy) => Some(policy.state().clone()),
                Decider::Logging(_) => None,
            },
        })
    }

    fn drive(&mut self) -> std::result::Result<SessionOutcome, SyncError> {
        if self.ctx.mode.drives_audio() {
            if let Some(actuator) = self.actuator.as_mut() {
                actuator.reset_reverb_to_baseline();
            }
        }

        self.state = LoopState::WaitingForSync;
        let timeout = self.ctx.config.sync.timeout;
        match self.rendezvous.await_start(timeout, &self.cancel) {
            Ok(outcome) => self.sync = Some(outcome),
            Err(SyncError::Cancelled) => return Ok(SessionOutcome::Interrupted),
            Err(e) => return Err(e),
        }

        // Samples that queued up before the start signal are not part of the session.
        let mut stale = SampleBuffer::new();
        if let Ok(dropped) = self.sensor.drain_into(&mut stale) {
            debug!(dropped, "discarded samples from before the start signal");
        }

        if self.ctx.mode.drives_audio() {
            if let Some(actuator) = self.actuator.as_mut() {
                actuator.playback_start();
            }
            self.state = LoopState::Warmup;
            let warmup = self.ctx.config.warmup;
            info!(secs = warmup.as_secs_f64(), "warming up");
            let until = self.clock.now() + warmup;
            if !self.wait_until(until) {
                return Ok(SessionOutcome::Interrupted);
            }
        }

        self.state = LoopState::Running;
        let interval = self.ctx.config.tick_interval;
        let duration = self.ctx.config.session_duration;
        let start = self.clock.now();
        let mut next_tick = start;
        info!(secs = duration.as_secs_f64(), "session running");

        loop {
            if self.cancel.is_cancelled() {
                return Ok(SessionOutcome::Interrupted);
            }
            let now = self.clock.now();
            let elapsed = now.saturating_sub(start);
            if elapsed > duration {
                return Ok(SessionOutcome::Finished);
            }

            self.tick(elapsed);

            next_tick += interval;
            let now = self.clock.now();
            if next_tick < now {
                debug!(behind = ?(now - next_tick), "tick overran its interval");
                next_tick = now;
            }
            if !self.wait_until(next_tick) {
                return Ok(SessionOutcome::Interrupted);
            }
        }
    }

    fn tick(&mut self, elapsed: Duration) {
        self.drain_sensor();
        self.stats.ticks += 1;

        let window_len = self.ctx.config.window_samples();
        let window = match self.buffer.trailing_window(window_len) {
            Ok(window) => window,
            Err(e) => {
                self.stats.warmup_ticks += 1;
                debug!(needed = e.needed, available = e.available, "window not full yet");
                return;
            }
        };

        let window_end = self.buffer.last_timestamp();
        if window_end == self.last_window_end {
            self.stats.skipped_ticks += 1;
            debug!("no new samples since the last tick");
            return;
        }
        self.last_window_end = window_end;

        let feature = match self.extractor.extract(&window) {
            Ok(feature) => feature,
            Err(e) => {
                self.stats.skipped_ticks += 1;
                debug!(error = %e, "no feature this tick");
                return;
            }
        };
        let value = feature.value;
        let tick_time = Local::now();
        let mut record = self
            .recorder
            .new_record(tick_time, elapsed.as_secs_f64(), value);

        match self.decider.decide(value, elapsed) {
            Decision::Label(band) => {
                record.band = Some(band);
                info!(lf = value, %band, "tick");
            }
            Decision::Actuate(output) => {
                if let Some(actuator) = self.actuator.as_mut() {
                    actuator.set_volume(output.volume);
                    if let Some(level) = output.reverb {
                        actuator.set_reverb(level);
                        info!(level, zone = ?output.zone, "reverb changed");
                    }
                }
                record.volume = Some(output.volume);
                record.reverb_level = Some(output.reverb_level);
                info!(
                    lf = value,
                    volume = output.volume,
                    reverb = output.reverb_level,
                    "tick"
                );
            }
        }

        self.recorder.log_feature(tick_time, value);
        self.recorder.append(record);
        self.stats.feature_ticks += 1;
    }

    /// Keep draining the sensor until `deadline`. Returns false if cancelled.
    fn wait_until(&mut self, deadline: Duration) -> bool {
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            self.drain_sensor();
            let now = self.clock.now();
            if now >= deadline {
                return true;
            }
            self.clock.sleep(self.poll_interval.min(deadline - now));
        }
    }

    fn drain_sensor(&mut self) {
        match self.sensor.drain_into(&mut self.buffer) {
            Ok(moved) => self.stats.samples += moved as u64,
            Err(e) => {
                if !self.sensor_lost {
                    warn!(error = %e, "sensor stream lost; ticks will skip until the session ends");
                    self.stats.sensor_disconnects += 1;
                    self.sensor_lost = true;
                }
            }
        }
    }

    fn teardown(&mut self, outcome: SessionOutcome, started_at: DateTime<Local>) {
        if let Some(actuator) = self.actuator.as_mut() {
            actuator.close();
            self.stats.messages_sent = actuator.messages_sent();
            self.stats.transport_failures = actuator.transport_failures();
        }
        self.sensor.close();
        self.rendezvous.close();
        self.stats.log_failures = self.recorder.log_failures();

        // Nothing was recorded if the pacer never started the session.
        if self.sync.is_some() {
            if let Err(e) = self.recorder.flush() {
                warn!(error = %e, "could not save session records");
            }

            let summary = SessionSummary {
                session_id: self.ctx.session_id,
                participant_id: self.ctx.participant_id,
                condition: self.ctx.condition_id(),
                mode: self.ctx.mode,
                outcome,
                started_at,
                ended_at: Local::now(),
                sync: describe_sync(self.sync.as_ref()),
                stats: self.stats.clone(),
                final_reverb_level: match &self.decider {
                    Decider::Modulated(policy) => Some(policy.state().reverb_level),
                    Decider::Logging(_) => None,
                },
            };
            if let Err(e) = self.recorder.write_summary(&summary) {
                warn!(error = %e, "could not save session summary");
            }
        }

        if let Some(lock) = self.lock.take() {
            debug!(path = %lock.path().display(), "releasing session lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::memory::RecordingSink;
    use crate::clock::ManualClock;
    use crate::collector::ReplayDriver;
    use crate::config::Config;
    use crate::core::{BandPowers, FeatureBand, FeatureError};
    use crate::sync::NoSync;

    struct Constant(f64);

    impl HrvEstimator for Constant {
        fn band_powers(&self, _: &[f64], _: u32) -> std::result::Result<BandPowers, FeatureError> {
            Ok(BandPowers {
                vlf: 0.0,
                lf: self.0,
                hf: 0.0,
                peak_count: 10,
            })
        }
    }

    fn small_config(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.data_dir = dir.to_path_buf();
        config.sensor.sample_rate_hz = 4;
        config.window = Duration::from_secs(2);
        config.warmup = Duration::from_secs(2);
        config.session_duration = Duration::from_secs(5);
        config.feature = FeatureBand::LfPower;
        config
    }

    fn build(mode: Mode, config: Config, dir: &std::path::Path) -> (ControlLoop, RecordingSink) {
        let clock = ManualClock::new();
        let sink = RecordingSink::new();
        let ctx = SessionContext::new(1, mode, dir.to_path_buf(), config).unwrap();
        let resources = SessionResources {
            lock: None,
            rendezvous: Box::new(NoSync),
            sensor: Box::new(ReplayDriver::new(vec![0.0; 400], 4, clock.clone())),
            audio: Some(Box::new(sink.clone())),
        };
        let control = ControlLoop::new(ctx, resources, CancellationToken::new())
            .with_clock(clock)
            .with_estimator(Constant(50.0))
            .with_poll_interval(Duration::from_millis(250));
        (control, sink)
    }

    #[test]
    fn test_runs_until_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let (control, _sink) = build(Mode::Modulated, small_config(dir.path()), dir.path());

        let report = control.run().unwrap();
        assert_eq!(report.outcome, SessionOutcome::Finished);
        // Ticks at 0..=5 s of RUNNING.
        assert_eq!(report.stats.ticks, 6);
        assert_eq!(report.records.len(), 6);
    }

    #[test]
    fn test_pre_cancelled_session_is_interrupted() {
        let dir = tempfile::tempdir().unwrap();
        let (control, sink) = build(Mode::Modulated, small_config(dir.path()), dir.path());
        control.cancel.cancel();

        let report = control.run().unwrap();
        assert_eq!(report.outcome, SessionOutcome::Interrupted);
        assert!(report.records.is_empty());
        assert!(sink.is_closed());
    }

    #[test]
    fn test_describe_sync() {
        assert_eq!(describe_sync(None), "never received");
        assert_eq!(describe_sync(Some(&SyncOutcome::Skipped)), "skipped");
    }
}
