//! Rendezvous with the breathing pacer.
//!
//! The pacer sends one UDP datagram when the participant starts the real
//! session. The controller binds the rendezvous address before the pacer can
//! send, then blocks until that datagram arrives. Only its arrival time
//! matters: a payload other than the expected token is reported but still
//! starts the session.

use crate::session::cancel::CancellationToken;
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

/// Default start token.
pub const START_TOKEN: &str = "start";

/// How often a blocked wait re-checks cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

const MAX_DATAGRAM: usize = 1024;

#[derive(Debug, Error)]
pub enum SyncError {
    /// The rendezvous address could not be bound. Fatal at session start.
    #[error("cannot bind rendezvous socket {addr}: {reason}")]
    Bind { addr: SocketAddr, reason: String },

    #[error("no start signal within {0:?}")]
    Timeout(Duration),

    #[error("cancelled while waiting for the pacer")]
    Cancelled,

    #[error("rendezvous socket error: {0}")]
    Io(#[from] std::io::Error),
}

/// How the wait ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The expected token arrived.
    Started { from: SocketAddr },
    /// Something else arrived. The session proceeds anyway.
    UnexpectedSignal { from: SocketAddr, payload: String },
    /// No rendezvous was configured.
    Skipped,
}

/// Anything the control loop can wait on before starting.
pub trait Rendezvous {
    fn await_start(
        &mut self,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome, SyncError>;

    /// Release the underlying socket. Safe to call more than once.
    fn close(&mut self) {}
}

/// Rendezvous that starts immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSync;

impl Rendezvous for NoSync {
    fn await_start(
        &mut self,
        _timeout: Option<Duration>,
        _cancel: &CancellationToken,
    ) -> Result<SyncOutcome, SyncError> {
        Ok(SyncOutcome::Skipped)
    }
}

/// UDP rendezvous gate.
pub struct SyncGate {
    socket: Option<UdpSocket>,
    addr: SocketAddr,
    token: String,
}

impl SyncGate {
    /// Bind the rendezvous address.
    pub fn bind(addr: SocketAddr, token: impl Into<String>) -> Result<Self, SyncError> {
        let socket = UdpSocket::bind(addr).map_err(|e| SyncError::Bind {
            addr,
            reason: e.to_string(),
        })?;
        socket.set_read_timeout(Some(POLL_INTERVAL))?;
        let addr = socket.local_addr()?;
        info!(%addr, "rendezvous socket bound");
        Ok(Self {
            socket: Some(socket),
            addr,
            token: token.into(),
        })
    }

    /// The bound address (useful when binding port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Rendezvous for SyncGate {
    fn await_start(
        &mut self,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome, SyncError> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| SyncError::Io(ErrorKind::NotConnected.into()))?;
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut buf = [0u8; MAX_DATAGRAM];

        info!(addr = %self.addr, "waiting for signal from pacer");
        loop {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            if let (Some(deadline), Some(limit)) = (deadline, timeout) {
                if Instant::now() >= deadline {
                    return Err(SyncError::Timeout(limit));
                }
            }

            match socket.recv_from(&mut buf) {
                Ok((len, from)) => {
                    let payload = String::from_utf8_lossy(&buf[..len]).into_owned();
                    if payload == self.token {
                        info!(%from, "received start from pacer");
                        return Ok(SyncOutcome::Started { from });
                    }
                    warn!(%from, %payload, "unexpected rendezvous payload, starting anyway");
                    return Ok(SyncOutcome::UnexpectedSignal { from, payload });
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(SyncError::Io(e)),
            }
        }
    }

    fn close(&mut self) {
        if self.socket.take().is_some() {
            info!(addr = %self.addr, "rendezvous socket released");
        }
    }
}

/// Pacer side: send the start token to the rendezvous address.
pub fn send_start(target: SocketAddr, token: &str) -> std::io::Result<()> {
    let bind: SocketAddr = if target.is_ipv4() {
        SocketAddr::from(([0, 0, 0, 0], 0))
    } else {
        SocketAddr::from(([0u16; 8], 0))
    };
    let socket = UdpSocket::bind(bind)?;
    socket.send_to(token.as_bytes(), target)?;
    Ok(())
}
