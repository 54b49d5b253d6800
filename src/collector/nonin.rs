//! Decoder for the Nonin serial pulse oximeter stream.
//!
//! The device emits 5-byte frames at 75 Hz:
//!
//! ```text
//! [ status=0x01 | status2 | pleth | reserved(<=127) | checksum ]
//! ```
//!
//! The checksum is the sum of the first four bytes modulo 256. When a frame
//! fails validation the decoder drops one byte and tries again, which
//! re-aligns with the stream after a partial read.

/// Length of one frame on the wire.
pub const FRAME_LEN: usize = 5;

/// Incremental frame decoder. Feed it arbitrary byte chunks and collect the
/// pleth values it yields.
#[derive(Debug, Default)]
pub struct PacketDecoder {
    pending: Vec<u8>,
    rejected_bytes: u64,
}

impl PacketDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and return every pleth value that is now complete.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<u8> {
        self.pending.extend_from_slice(bytes);

        let mut values = Vec::new();
        let mut start = 0;
        while self.pending.len() - start >= FRAME_LEN {
            let frame = &self.pending[start..start + FRAME_LEN];
            if is_valid_frame(frame) {
                values.push(frame[2]);
                start += FRAME_LEN;
            } else {
                self.rejected_bytes += 1;
                start += 1;
            }
        }
        self.pending.drain(..start);
        values
    }

    /// Bytes discarded while hunting for frame alignment.
    pub fn rejected_bytes(&self) -> u64 {
        self.rejected_bytes
    }
}

/// Check a single frame against the sync byte, reserved byte and checksum.
pub fn is_valid_frame(frame: &[u8]) -> bool {
    if frame.len() < FRAME_LEN {
        return false;
    }
    if frame[0] != 1 || frame[3] > 127 {
        return false;
    }
    let sum: u32 = frame[..4].iter().map(|&b| u32::from(b)).sum();
    (sum % 256) as u8 == frame[4]
}

#[cfg(test)]
pub(crate) fn encode_frame(pleth: u8) -> [u8; FRAME_LEN] {
    let status2 = 0x80;
    let reserved = 0;
    let checksum = ((1u32 + status2 as u32 + pleth as u32 + reserved as u32) % 256) as u8;
    [1, status2, pleth, reserved, checksum]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decodes_aligned_frames() {
        let mut decoder = PacketDecoder::new();
        let mut bytes = Vec::new();
        for v in [10u8, 20, 30] {
            bytes.extend_from_slice(&encode_frame(v));
        }

        assert_eq!(decoder.push(&bytes), vec![10, 20, 30]);
        assert_eq!(decoder.rejected_bytes(), 0);
    }

    #[test]
    fn test_frames_split_across_reads() {
        let mut decoder = PacketDecoder::new();
        let frame = encode_frame(99);

        assert!(decoder.push(&frame[..2]).is_empty());
        assert_eq!(decoder.push(&frame[2..]), vec![99]);
    }

    #[test]
    fn test_resyncs_after_garbage() {
        let mut decoder = PacketDecoder::new();
        let mut bytes = vec![0xFF, 0x03];
        bytes.extend_from_slice(&encode_frame(42));
        bytes.extend_from_slice(&encode_frame(43));

        assert_eq!(decoder.push(&bytes), vec![42, 43]);
        assert_eq!(decoder.rejected_bytes(), 2);
    }

    #[test]
    fn test_bad_checksum_rejected() {
        let mut frame = encode_frame(50);
        frame[4] = frame[4].wrapping_add(1);
        assert!(!is_valid_frame(&frame));
    }
}
