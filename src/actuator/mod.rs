//! Actuation: policy outputs → control messages to the audio engine.
//!
//! The sink is fire-and-forget. A failed send is logged and counted, never
//! propagated; the session keeps its timing even if audio degrades.

pub mod memory;
pub mod midi;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

pub use memory::RecordingSink;
pub use midi::MidiSink;

/// Transport-level failures talking to the audio engine.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not open the output. Fatal at session start.
    #[error("audio output unavailable: {0}")]
    Connect(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("audio output closed")]
    Closed,
}

/// One control-change message. Values are 7-bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMessage {
    pub channel: u8,
    pub control: u8,
    pub value: u8,
}

impl ControlMessage {
    pub fn new(channel: u8, control: u8, value: u8) -> Self {
        Self {
            channel: channel & 0x0F,
            control: control & 0x7F,
            value: value.min(127),
        }
    }

    /// MIDI control-change bytes.
    pub fn to_bytes(self) -> [u8; 3] {
        [0xB0 | self.channel, self.control, self.value]
    }
}

/// Anything that accepts control messages.
pub trait AudioSink {
    fn send(&mut self, message: ControlMessage) -> Result<(), TransportError>;

    /// Release the connection. Safe to call more than once.
    fn close(&mut self) {}

    fn describe(&self) -> String;
}

impl<T: AudioSink + ?Sized> AudioSink for Box<T> {
    fn send(&mut self, message: ControlMessage) -> Result<(), TransportError> {
        (**self).send(message)
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Controller numbers the audio engine is mapped to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMap {
    pub playback_start: u8,
    pub playback_stop: u8,
    pub group_volume: u8,
    /// Per-track volume controls
    pub tracks: Vec<u8>,
    /// Per-track reverb sends
    pub reverbs: Vec<u8>,
}

impl Default for ControlMap {
    fn default() -> Self {
        Self {
            playback_start: 20,
            playback_stop: 19,
            group_volume: 40,
            tracks: (21..=26).collect(),
            reverbs: (31..=36).collect(),
        }
    }
}

/// Value sent on the transport markers.
const TRIGGER: u8 = 127;

/// Translates levels into messages and drops redundant volume sends.
pub struct Actuator<S> {
    sink: S,
    controls: ControlMap,
    channel: u8,
    reverb_baseline: u8,
    last_volume: Option<u8>,
    last_reverb: Option<u8>,
    playing: bool,
    sent: u64,
    failures: u64,
}

impl<S: AudioSink> Actuator<S> {
    pub fn new(sink: S, controls: ControlMap, channel: u8, reverb_baseline: u8) -> Self {
        Self {
            sink,
            controls,
            channel,
            reverb_baseline,
            last_volume: None,
            last_reverb: None,
            playing: false,
            sent: 0,
            failures: 0,
        }
    }

    /// Set the group volume. Returns whether a message went out.
    pub fn set_volume(&mut self, level: u8) -> bool {
        if self.last_volume == Some(level) {
            return false;
        }
        let control = self.controls.group_volume;
        if self.send(control, level) {
            self.last_volume = Some(level);
            true
        } else {
            false
        }
    }

    /// Set every reverb send to `level`.
    pub fn set_reverb(&mut self, level: u8) {
        let controls = self.controls.reverbs.clone();
        let mut all_ok = true;
        for control in controls {
            all_ok &= self.send(control, level);
        }
        if all_ok {
            self.last_reverb = Some(level);
        }
        debug!(level, "reverb set");
    }

    pub fn playback_start(&mut self) {
        let control = self.controls.playback_start;
        if self.send(control, TRIGGER) {
            self.playing = true;
            info!(sink = %self.sink.describe(), "playback started");
        }
    }

    /// Stop playback if it was started.
    pub fn playback_stop(&mut self) {
        if !self.playing {
            return;
        }
        let control = self.controls.playback_stop;
        self.send(control, TRIGGER);
        self.playing = false;
        info!("playback stopped");
    }

    /// Put every reverb send back at the baseline level.
    pub fn reset_reverb_to_baseline(&mut self) {
        self.set_reverb(self.reverb_baseline);
        info!(baseline = self.reverb_baseline, "reverb reset to baseline");
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn last_volume(&self) -> Option<u8> {
        self.last_volume
    }

    pub fn last_reverb(&self) -> Option<u8> {
        self.last_reverb
    }

    pub fn messages_sent(&self) -> u64 {
        self.sent
    }

    pub fn transport_failures(&self) -> u64 {
        self.failures
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Stop playback and release the sink.
    pub fn close(&mut self) {
        self.playback_stop();
        self.sink.close();
    }

    fn send(&mut self, control: u8, value: u8) -> bool {
        let message = ControlMessage::new(self.channel, control, value);
        match self.sink.send(message) {
            Ok(()) => {
                self.sent += 1;
                true
            }
            Err(e) => {
                self.failures += 1;
                warn!(control, value, error = %e, "control message not delivered");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actuator() -> (Actuator<RecordingSink>, RecordingSink) {
        let sink = RecordingSink::new();
        let actuator = Actuator::new(sink.clone(), ControlMap::default(), 0, 20);
        (actuator, sink)
    }

    #[test]
    fn test_duplicate_volume_suppressed() {
        let (mut actuator, sink) = actuator();

        assert!(actuator.set_volume(64));
        assert!(!actuator.set_volume(64));
        assert!(actuator.set_volume(65));

        assert_eq!(
            sink.messages(),
            vec![ControlMessage::new(0, 40, 64), ControlMessage::new(0, 40, 65)]
        );
    }

    #[test]
    fn test_reverb_goes_to_every_send() {
        let (mut actuator, sink) = actuator();
        actuator.set_reverb(35);

        let controls: Vec<u8> = sink.messages().iter().map(|m| m.control).collect();
        assert_eq!(controls, vec![31, 32, 33, 34, 35, 36]);
        assert!(sink.messages().iter().all(|m| m.value == 35));
        assert_eq!(actuator.last_reverb(), Some(35));
    }

    #[test]
    fn test_stop_only_after_start() {
        let (mut actuator, sink) = actuator();
        actuator.playback_stop();
        assert!(sink.messages().is_empty());

        actuator.playback_start();
        actuator.close();
        assert_eq!(
            sink.messages(),
            vec![ControlMessage::new(0, 20, 127), ControlMessage::new(0, 19, 127)]
        );
        assert!(!actuator.is_playing());
    }

    #[test]
    fn test_failed_volume_retried_next_tick() {
        let (mut actuator, sink) = actuator();
        sink.fail_next(1);

        assert!(!actuator.set_volume(50));
        assert_eq!(actuator.transport_failures(), 1);
        assert!(actuator.set_volume(50));
        assert_eq!(sink.messages().len(), 1);
    }

    #[test]
    fn test_message_bytes() {
        assert_eq!(ControlMessage::new(0, 40, 90).to_bytes(), [0xB0, 40, 90]);
        assert_eq!(ControlMessage::new(2, 31, 200).to_bytes(), [0xB2, 31, 127]);
    }
}
