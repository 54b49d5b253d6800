//! Serial pulse oximeter driver.
//!
//! A background thread reads the device, decodes Nonin frames and forwards
//! samples over a bounded channel. The control loop drains the channel with
//! `try_recv`, so reading never stalls a tick.

use crate::collector::nonin::PacketDecoder;
use crate::collector::types::Sample;
use crate::collector::{CollectorError, SensorDriver};
use crate::core::buffer::SampleBuffer;
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use serialport::{DataBits, FlowControl, Parity, StopBits};
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Samples buffered between the reader thread and the loop (over two
/// minutes at 75 Hz).
const CHANNEL_CAPACITY: usize = 10_000;

const READ_CHUNK: usize = 256;

/// Nonin 8000 series serial format: 9600 baud, 8N1, no flow control.
const NONIN_BAUD_RATE: u32 = 9600;

/// Bounds each blocking read so the reader thread notices `close`.
const READ_TIMEOUT: Duration = Duration::from_millis(200);

/// Oximeter on a serial character device.
pub struct SerialOximeter {
    label: String,
    sample_rate_hz: u32,
    receiver: Option<Receiver<Sample>>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SerialOximeter {
    /// Open the serial port at `path` and configure it for the oximeter.
    ///
    /// The port is put in raw mode at 9600 8N1 with no flow control and a
    /// bounded read timeout. Failure to open or configure is a connection
    /// failure.
    pub fn open(path: &Path, sample_rate_hz: u32) -> Result<Self, CollectorError> {
        let device = path.display().to_string();
        let port = serialport::new(path.to_string_lossy(), NONIN_BAUD_RATE)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|e| CollectorError::Open {
                device: device.clone(),
                reason: e.to_string(),
            })?;
        info!(device = %device, baud = NONIN_BAUD_RATE, "oximeter initialized");
        Ok(Self::from_reader(port, sample_rate_hz, device))
    }

    /// Start decoding frames from any byte stream.
    pub fn from_reader<R>(reader: R, sample_rate_hz: u32, label: impl Into<String>) -> Self
    where
        R: Read + Send + 'static,
    {
        let (sender, receiver) = bounded(CHANNEL_CAPACITY);
        let running = Arc::new(AtomicBool::new(true));
        let label = label.into();

        let thread_running = running.clone();
        let thread_label = label.clone();
        let handle = thread::Builder::new()
            .name("oximeter-reader".to_string())
            .spawn(move || {
                read_loop(reader, sender, thread_running, sample_rate_hz, thread_label)
            })
            .ok();

        if handle.is_none() {
            warn!(device = %label, "could not spawn oximeter reader thread");
        }

        Self {
            label,
            sample_rate_hz,
            receiver: Some(receiver),
            running,
            handle,
        }
    }

    /// Check if the reader thread is still delivering.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

fn read_loop<R: Read>(
    mut reader: R,
    sender: Sender<Sample>,
    running: Arc<AtomicBool>,
    sample_rate_hz: u32,
    label: String,
) {
    let mut decoder = PacketDecoder::new();
    let mut chunk = [0u8; READ_CHUNK];
    let mut index: u64 = 0;

    while running.load(Ordering::SeqCst) {
        match reader.read(&mut chunk) {
            Ok(0) => {
                debug!(device = %label, "oximeter stream ended");
                break;
            }
            Ok(n) => {
                for value in decoder.push(&chunk[..n]) {
                    let sample = Sample::at_index(index, sample_rate_hz, f64::from(value));
                    index += 1;
                    if sender.send(sample).is_err() {
                        running.store(false, Ordering::SeqCst);
                        return;
                    }
                }
            }
            // A timed-out read just means no frame this period.
            Err(e) if matches!(e.kind(), ErrorKind::Interrupted | ErrorKind::TimedOut) => continue,
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(5));
            }
            Err(e) => {
                warn!(device = %label, error = %e, "oximeter read failed");
                break;
            }
        }
    }

    if decoder.rejected_bytes() > 0 {
        debug!(
            device = %label,
            rejected = decoder.rejected_bytes(),
            "bytes dropped while resyncing"
        );
    }
    running.store(false, Ordering::SeqCst);
}

impl SensorDriver for SerialOximeter {
    fn drain_into(&mut self, buffer: &mut SampleBuffer) -> Result<usize, CollectorError> {
        let Some(receiver) = self.receiver.as_ref() else {
            return Err(CollectorError::Disconnected(self.label.clone()));
        };

        let mut moved = 0;
        loop {
            match receiver.try_recv() {
                Ok(sample) => {
                    buffer.append(sample);
                    moved += 1;
                }
                Err(TryRecvError::Empty) => return Ok(moved),
                Err(TryRecvError::Disconnected) => {
                    if moved > 0 {
                        return Ok(moved);
                    }
                    return Err(CollectorError::Disconnected(self.label.clone()));
                }
            }
        }
    }

    fn sample_rate_hz(&self) -> u32 {
        self.sample_rate_hz
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        // Dropping the receiver unblocks a reader stuck on a full channel.
        self.receiver = None;

        if let Some(handle) = self.handle.take() {
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                // A pending read returns within its timeout; the thread exits
                // then and drops the port.
                debug!(device = %self.label, "reader thread detached until next read returns");
            }
        }
    }

    fn describe(&self) -> String {
        format!("oximeter {}", self.label)
    }
}

impl Drop for SerialOximeter {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::nonin::encode_frame;
    use std::io::Cursor;
    use std::time::Instant;

    fn stream(values: &[u8]) -> Cursor<Vec<u8>> {
        let mut bytes = Vec::new();
        for &v in values {
            bytes.extend_from_slice(&encode_frame(v));
        }
        Cursor::new(bytes)
    }

    fn drain_until(oxi: &mut SerialOximeter, buffer: &mut SampleBuffer, want: usize) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while buffer.len() < want && Instant::now() < deadline {
            let _ = oxi.drain_into(buffer);
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_reader_delivers_decoded_samples() {
        let mut oxi = SerialOximeter::from_reader(stream(&[5, 6, 7, 8]), 75, "test");
        let mut buffer = SampleBuffer::new();

        drain_until(&mut oxi, &mut buffer, 4);

        assert_eq!(buffer.samples(), &[5.0, 6.0, 7.0, 8.0]);
        assert!((buffer.times()[3] - 3.0 / 75.0).abs() < 1e-12);
    }

    #[test]
    fn test_disconnect_reported_after_stream_ends() {
        let mut oxi = SerialOximeter::from_reader(stream(&[1]), 75, "test");
        let mut buffer = SampleBuffer::new();
        drain_until(&mut oxi, &mut buffer, 1);

        let deadline = Instant::now() + Duration::from_secs(2);
        let mut result = oxi.drain_into(&mut buffer);
        while result.is_ok() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
            result = oxi.drain_into(&mut buffer);
        }
        assert!(matches!(result, Err(CollectorError::Disconnected(_))));
    }

    #[test]
    fn test_open_missing_device_fails() {
        let result = SerialOximeter::open(Path::new("/nonexistent/tty.oximeter"), 75);
        assert!(matches!(result, Err(CollectorError::Open { .. })));
    }

    #[test]
    fn test_open_rejects_non_terminal_file() {
        // A plain file cannot be put in 9600 8N1 raw mode.
        let file = tempfile::NamedTempFile::new().unwrap();
        let result = SerialOximeter::open(file.path(), 75);
        assert!(matches!(result, Err(CollectorError::Open { .. })));
    }

    #[test]
    fn test_read_timeouts_keep_reader_alive() {
        struct TimesOut {
            left: usize,
            then: Cursor<Vec<u8>>,
        }
        impl Read for TimesOut {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                if self.left > 0 {
                    self.left -= 1;
                    return Err(ErrorKind::TimedOut.into());
                }
                self.then.read(buf)
            }
        }

        let reader = TimesOut {
            left: 3,
            then: stream(&[9, 10]),
        };
        let mut oxi = SerialOximeter::from_reader(reader, 75, "test");
        let mut buffer = SampleBuffer::new();

        drain_until(&mut oxi, &mut buffer, 2);

        assert_eq!(buffer.samples(), &[9.0, 10.0]);
    }
}
