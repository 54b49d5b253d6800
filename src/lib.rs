//! HRV Biofeedback - closed-loop audio feedback driven by heart-rate variability.
//!
//! This library reads a PPG stream from a pulse oximeter, estimates the
//! low-frequency share of heart-rate variability over a trailing window once
//! per second, and either logs it (condition 1) or maps it onto the volume
//! and reverb of an audio engine over MIDI (condition 2).
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                          Control Loop                             │
//! ├───────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐              │
//! │  │  Collector  │──▶│   Sample    │──▶│  Features   │              │
//! │  │ (oximeter)  │   │   Buffer    │   │ (LF power)  │              │
//! │  └─────────────┘   └─────────────┘   └─────────────┘              │
//! │                                            │                      │
//! │                                            ▼                      │
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐              │
//! │  │  Recorder   │◀──│  Actuator   │◀──│  Decider    │              │
//! │  │ (log, csv)  │   │   (MIDI)    │   │(band/policy)│              │
//! │  └─────────────┘   └─────────────┘   └─────────────┘              │
//! │         ▲                                                         │
//! │  ┌─────────────┐                                                  │
//! │  │  Sync Gate  │  (UDP start signal from the breathing pacer)     │
//! │  └─────────────┘                                                  │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use hrv_biofeedback::{config::Config, core::Mode, session};
//!
//! let config = Config::load().unwrap_or_default();
//! let folder = session::context::open_participant_folder(&config.data_dir, 1)?;
//! let ctx = session::SessionContext::new(1, Mode::Logging, folder, config.clone())?;
//!
//! let source = session::SensorSource::Serial(config.sensor.device.clone());
//! let resources = session::acquire(&ctx, &source, &session::AudioTarget::DryRun)?;
//! let report = session::ControlLoop::new(ctx, resources, session::CancellationToken::new()).run()?;
//! println!("{}", report.stats.summary());
//! # Ok::<(), hrv_biofeedback::SessionError>(())
//! ```

pub mod actuator;
pub mod clock;
pub mod collector;
pub mod config;
pub mod core;
pub mod error;
pub mod session;
pub mod sync;

// Re-export key types at crate root for convenience
pub use actuator::{Actuator, AudioSink, ControlMap, ControlMessage, TransportError};
pub use clock::{Clock, ManualClock, SystemClock};
pub use collector::{CollectorError, Sample, SensorDriver};
pub use config::Config;
pub use core::{Band, FeatureBand, Mode};
pub use error::SessionError;
pub use session::{ControlLoop, SessionContext, SessionOutcome, SessionReport};
pub use sync::{SyncError, SyncGate, SyncOutcome};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
