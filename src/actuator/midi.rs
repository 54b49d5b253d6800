//! MIDI output to the audio engine via `midir`.

use crate::actuator::{AudioSink, ControlMessage, TransportError};
use midir::{MidiOutput, MidiOutputConnection};
use tracing::info;

const CLIENT_NAME: &str = "hrv-feedback";
const PORT_NAME: &str = "hrv-feedback-out";

/// Information about an available MIDI output port.
#[derive(Debug, Clone)]
pub struct MidiPortInfo {
    pub index: usize,
    pub name: String,
}

/// An open MIDI output connection.
pub struct MidiSink {
    connection: Option<MidiOutputConnection>,
    port_name: String,
}

impl MidiSink {
    /// List the output ports the system exposes.
    pub fn list_ports() -> Result<Vec<MidiPortInfo>, TransportError> {
        let output =
            MidiOutput::new(CLIENT_NAME).map_err(|e| TransportError::Connect(e.to_string()))?;
        Ok(output
            .ports()
            .iter()
            .enumerate()
            .filter_map(|(index, port)| {
                output
                    .port_name(port)
                    .ok()
                    .map(|name| MidiPortInfo { index, name })
            })
            .collect())
    }

    /// Connect to the first port whose name contains `filter`, or the first
    /// port when no filter is given.
    pub fn connect(filter: Option<&str>) -> Result<Self, TransportError> {
        let output =
            MidiOutput::new(CLIENT_NAME).map_err(|e| TransportError::Connect(e.to_string()))?;
        let ports = output.ports();

        let port = match filter {
            Some(wanted) => ports.iter().find(|port| {
                output
                    .port_name(port)
                    .map(|name| name.contains(wanted))
                    .unwrap_or(false)
            }),
            None => ports.first(),
        }
        .cloned()
        .ok_or_else(|| {
            TransportError::Connect(match filter {
                Some(wanted) => format!("no MIDI output matching '{wanted}'"),
                None => "no MIDI output ports available".to_string(),
            })
        })?;

        let port_name = output
            .port_name(&port)
            .unwrap_or_else(|_| "Unknown".to_string());
        let connection = output
            .connect(&port, PORT_NAME)
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        info!(port = %port_name, "MIDI output connected");
        Ok(Self {
            connection: Some(connection),
            port_name,
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

impl AudioSink for MidiSink {
    fn send(&mut self, message: ControlMessage) -> Result<(), TransportError> {
        let connection = self.connection.as_mut().ok_or(TransportError::Closed)?;
        connection
            .send(&message.to_bytes())
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
            info!(port = %self.port_name, "MIDI output closed");
        }
    }

    fn describe(&self) -> String {
        format!("MIDI {}", self.port_name)
    }
}

impl Drop for MidiSink {
    fn drop(&mut self) {
        self.close();
    }
}
