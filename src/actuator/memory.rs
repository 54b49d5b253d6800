//! In-memory sink for dry runs and tests.

use crate::actuator::{AudioSink, ControlMessage, TransportError};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug, Default)]
struct Recorded {
    messages: Vec<ControlMessage>,
    fail_next: usize,
    closed: bool,
}

/// Sink that keeps every message it receives.
///
/// Clones share the same record, so a test can keep one handle while the
/// actuator owns the other.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    inner: Arc<Mutex<Recorded>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Everything delivered so far.
    pub fn messages(&self) -> Vec<ControlMessage> {
        self.lock().messages.clone()
    }

    /// Messages sent to one controller.
    pub fn values_for(&self, control: u8) -> Vec<u8> {
        self.lock()
            .messages
            .iter()
            .filter(|m| m.control == control)
            .map(|m| m.value)
            .collect()
    }

    /// Make the next `count` sends fail.
    pub fn fail_next(&self, count: usize) {
        self.lock().fail_next = count;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl AudioSink for RecordingSink {
    fn send(&mut self, message: ControlMessage) -> Result<(), TransportError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(TransportError::Closed);
        }
        if inner.fail_next > 0 {
            inner.fail_next -= 1;
            return Err(TransportError::Send("injected failure".to_string()));
        }
        debug!(?message, "recorded");
        inner.messages.push(message);
        Ok(())
    }

    fn close(&mut self) {
        self.lock().closed = true;
    }

    fn describe(&self) -> String {
        "recording sink".to_string()
    }
}
