//! HRV Biofeedback CLI
//!
//! Runs biofeedback sessions and the small utilities around them.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use hrv_biofeedback::{
    actuator::MidiSink,
    clock::{Clock, SystemClock},
    collector::{SensorDriver, SerialOximeter},
    config::Config,
    core::{hrv::detect_peaks, Mode, SampleBuffer},
    session::{
        self,
        context::{create_participant_folder, open_participant_folder},
        counterbalanced_order, install_ctrlc_handler, AudioTarget, CancellationToken,
        ControlLoop, SensorSource, SessionContext, SessionOutcome, SessionReport,
    },
    sync::send_start,
    VERSION,
};
use std::io::BufRead;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hrv-feedback")]
#[command(version = VERSION)]
#[command(about = "Closed-loop HRV biofeedback with audio modulation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single condition for one participant
    Session {
        /// Participant number
        #[arg(long)]
        participant: u32,

        /// Condition: 1 (logging) or 2 (modulated)
        #[arg(long)]
        condition: Mode,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Run both conditions in counterbalanced order
    Protocol {
        /// Participant number
        #[arg(long)]
        participant: u32,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Read the oximeter briefly and report what arrives
    Check {
        /// Serial device (defaults to the configured one)
        #[arg(long)]
        device: Option<PathBuf>,

        /// How long to read, in seconds
        #[arg(long, default_value = "5")]
        secs: u64,
    },

    /// List MIDI output ports
    Ports,

    /// Send the start signal the pacer would send
    Signal {
        /// Rendezvous address (defaults to the configured one)
        #[arg(long)]
        address: Option<SocketAddr>,

        /// Payload to send
        #[arg(long)]
        token: Option<String>,
    },

    /// Show configuration
    Config,
}

/// Per-run overrides of the stored configuration.
#[derive(Args, Clone, Debug)]
struct Overrides {
    /// Serial device of the oximeter
    #[arg(long)]
    device: Option<PathBuf>,

    /// Play back a recorded PPG trace instead of reading the oximeter
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Substring of the MIDI output port name
    #[arg(long)]
    midi_port: Option<String>,

    /// Keep control messages in memory instead of sending them
    #[arg(long)]
    dry_run: bool,

    /// Length of the running phase, in seconds
    #[arg(long)]
    duration: Option<f64>,

    /// Give up waiting for the pacer after this many seconds
    #[arg(long)]
    sync_timeout: Option<f64>,

    /// Start without waiting for the pacer
    #[arg(long)]
    no_sync: bool,
}

impl Overrides {
    fn apply(&self, config: &mut Config) -> Result<()> {
        if let Some(device) = &self.device {
            config.sensor.device = device.clone();
        }
        if let Some(port) = &self.midi_port {
            config.audio.port = Some(port.clone());
        }
        if let Some(secs) = self.duration {
            config.session_duration =
                Duration::try_from_secs_f64(secs).context("--duration must be a positive number")?;
        }
        if let Some(secs) = self.sync_timeout {
            config.sync.timeout = Some(
                Duration::try_from_secs_f64(secs)
                    .context("--sync-timeout must be a positive number")?,
            );
        }
        if self.no_sync {
            config.sync.disabled = true;
        }
        Ok(())
    }

    fn sensor_source(&self, config: &Config) -> SensorSource {
        match &self.replay {
            Some(path) => SensorSource::Replay(path.clone()),
            None => SensorSource::Serial(config.sensor.device.clone()),
        }
    }

    fn audio_target(&self, config: &Config) -> AudioTarget {
        if self.dry_run {
            AudioTarget::DryRun
        } else {
            AudioTarget::Midi(config.audio.port.clone())
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("hrv_biofeedback=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Session {
            participant,
            condition,
            overrides,
        } => cmd_session(participant, condition, &overrides),
        Commands::Protocol {
            participant,
            overrides,
        } => cmd_protocol(participant, &overrides),
        Commands::Check { device, secs } => cmd_check(device, secs),
        Commands::Ports => cmd_ports(),
        Commands::Signal { address, token } => cmd_signal(address, token),
        Commands::Config => cmd_config(),
    }
}

/// Load the stored configuration with the command-line overrides applied.
fn load_config(overrides: &Overrides) -> Result<Config> {
    let mut config = Config::load().unwrap_or_default();
    overrides.apply(&mut config)?;
    config.validate().context("invalid configuration")?;
    config
        .ensure_directories()
        .context("could not create the data directory")?;
    Ok(config)
}

fn cancellation() -> Result<CancellationToken> {
    let cancel = CancellationToken::new();
    install_ctrlc_handler(&cancel).context("Error setting Ctrl+C handler")?;
    Ok(cancel)
}

fn cmd_session(participant: u32, mode: Mode, overrides: &Overrides) -> Result<()> {
    let config = load_config(overrides)?;
    let cancel = cancellation()?;

    println!("HRV Biofeedback v{VERSION}");
    println!();

    let folder = open_participant_folder(&config.data_dir, participant)?;
    run_condition(participant, mode, folder, config, overrides, &cancel)?;
    Ok(())
}

fn cmd_protocol(participant: u32, overrides: &Overrides) -> Result<()> {
    let config = load_config(overrides)?;
    let cancel = cancellation()?;

    println!("HRV Biofeedback v{VERSION}");
    println!();

    let folder = create_participant_folder(&config.data_dir, participant)
        .context("choose a new participant number")?;
    let order = counterbalanced_order(participant);
    println!(
        "Participant {participant}: condition {} then condition {}",
        order[0].condition_id(),
        order[1].condition_id()
    );

    for (index, mode) in order.into_iter().enumerate() {
        if index > 0 {
            println!();
            println!(
                "Press Enter to start condition {} ({mode})...",
                mode.condition_id()
            );
            let mut line = String::new();
            std::io::stdin()
                .lock()
                .read_line(&mut line)
                .context("could not read from stdin")?;
        }

        cancel.reset();
        let report = run_condition(
            participant,
            mode,
            folder.clone(),
            config.clone(),
            overrides,
            &cancel,
        )?;
        if report.outcome == SessionOutcome::Interrupted {
            println!("Protocol stopped after an interrupted session.");
            return Ok(());
        }
    }

    println!();
    println!("Protocol complete. Data saved in {}", folder.display());
    Ok(())
}

fn run_condition(
    participant: u32,
    mode: Mode,
    folder: PathBuf,
    config: Config,
    overrides: &Overrides,
    cancel: &CancellationToken,
) -> Result<SessionReport> {
    let source = overrides.sensor_source(&config);
    let audio = overrides.audio_target(&config);
    let ctx = SessionContext::new(participant, mode, folder, config)?;
    let config = &ctx.config;

    println!("Condition {} ({mode})", ctx.condition_id());
    println!("  Session ID: {}", ctx.session_id);
    println!("  Participant folder: {}", ctx.folder.display());
    println!("  Window: {}s", config.window.as_secs_f64());
    println!("  Duration: {}s", config.session_duration.as_secs_f64());
    if mode.drives_audio() {
        println!("  Warm-up: {}s", config.warmup.as_secs_f64());
    }
    if config.sync.disabled {
        println!("  Pacer rendezvous: disabled");
    } else {
        println!("  Pacer rendezvous: {}", config.sync.address);
    }
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let resources =
        session::acquire(&ctx, &source, &audio).context("could not start the session")?;
    let report = ControlLoop::new(ctx, resources, cancel.clone()).run()?;

    println!();
    match report.outcome {
        SessionOutcome::Finished => println!("Session finished."),
        SessionOutcome::Interrupted => println!("Session interrupted."),
    }
    println!("{}", report.stats.summary());
    if let Some(policy) = &report.policy {
        println!("  - Final reverb level: {}", policy.reverb_level);
    }
    Ok(report)
}

fn cmd_check(device: Option<PathBuf>, secs: u64) -> Result<()> {
    let config = Config::load().unwrap_or_default();
    let device = device.unwrap_or_else(|| config.sensor.device.clone());
    let rate = config.sensor.sample_rate_hz;
    let cancel = cancellation()?;

    println!("Reading {} for {secs}s...", device.display());

    let mut oximeter = SerialOximeter::open(&device, rate)?;
    let mut buffer = SampleBuffer::new();
    let clock = SystemClock::new();
    let until = Duration::from_secs(secs);

    while clock.now() < until && !cancel.is_cancelled() {
        if let Err(e) = oximeter.drain_into(&mut buffer) {
            eprintln!("Warning: {e}");
            break;
        }
        clock.sleep(Duration::from_millis(100));
    }
    oximeter.close();

    let peaks = detect_peaks(buffer.samples(), f64::from(rate), 0.75);
    println!();
    println!("Samples received: {}", buffer.len());
    println!("Heartbeats detected: {}", peaks.len());

    let expected = secs * u64::from(rate);
    if buffer.is_empty() {
        bail!("no data from {}; check the sensor is on and connected", device.display());
    }
    if (buffer.len() as u64) < expected / 2 {
        eprintln!("Warning: expected about {expected} samples at {rate} Hz");
    }
    Ok(())
}

fn cmd_ports() -> Result<()> {
    let ports = MidiSink::list_ports()?;
    if ports.is_empty() {
        println!("No MIDI output ports found.");
        return Ok(());
    }
    println!("MIDI output ports:");
    for port in ports {
        println!("  {}: {}", port.index, port.name);
    }
    Ok(())
}

fn cmd_signal(address: Option<SocketAddr>, token: Option<String>) -> Result<()> {
    let config = Config::load().unwrap_or_default();
    let address = address.unwrap_or(config.sync.address);
    let token = token.unwrap_or(config.sync.token);

    send_start(address, &token).with_context(|| format!("could not signal {address}"))?;
    println!("Sent {token:?} to {address}");
    Ok(())
}

fn cmd_config() -> Result<()> {
    let config = Config::load().unwrap_or_default();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
