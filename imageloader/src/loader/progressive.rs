//! Progressive decode state for one operation.
//!
//! The decoder accumulates bytes as they arrive and hands out snapshots to
//! decode. It never runs anything itself: the coordinator submits each
//! snapshot to the serial decode queue and reports back with
//! [`finish_attempt`](ProgressiveDecoder::finish_attempt), so at most one
//! attempt per operation is ever in flight.
//!
//! An attempt is offered when all of these hold:
//! - the decoder has been resumed (some task wants partial images)
//! - no attempt is currently executing
//! - at least `threshold` bytes have arrived
//! - bytes arrived since the previous attempt

use bytes::{Bytes, BytesMut};

pub(crate) struct ProgressiveDecoder {
    /// Distinguishes this decoder from a replaced one when results return.
    id: u64,
    buffer: BytesMut,
    threshold: usize,
    resumed: bool,
    executing: bool,
    /// Buffer length at the last attempt.
    attempted_len: usize,
}

impl ProgressiveDecoder {
    /// Creates a decoder that waits for `fraction` of `total` bytes (at
    /// least one byte) before its first attempt.
    pub fn new(id: u64, fraction: f64, total: u64) -> Self {
        let threshold = (fraction.clamp(0.0, 1.0) * total as f64).ceil() as usize;
        Self {
            id,
            buffer: BytesMut::new(),
            threshold: threshold.max(1),
            resumed: false,
            executing: false,
            attempted_len: 0,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn append(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    pub fn resume(&mut self) {
        self.resumed = true;
    }

    pub fn is_resumed(&self) -> bool {
        self.resumed
    }

    pub fn is_executing(&self) -> bool {
        self.executing
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Returns a snapshot to decode if an attempt is due, and marks the
    /// decoder as executing.
    pub fn next_attempt(&mut self) -> Option<Bytes> {
        let len = self.buffer.len();
        if !self.resumed || self.executing || len < self.threshold || len <= self.attempted_len {
            return None;
        }
        self.executing = true;
        self.attempted_len = len;
        Some(Bytes::copy_from_slice(&self.buffer))
    }

    /// Marks the executing attempt as done.
    pub fn finish_attempt(&mut self) {
        self.executing = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_is_rounded_up_with_floor() {
        assert_eq!(ProgressiveDecoder::new(0, 0.15, 100).threshold, 15);
        assert_eq!(ProgressiveDecoder::new(0, 0.15, 101).threshold, 16);
        assert_eq!(ProgressiveDecoder::new(0, 0.0, 100).threshold, 1);
        assert_eq!(ProgressiveDecoder::new(0, 0.5, 0).threshold, 1);
    }

    #[test]
    fn test_no_attempt_until_resumed() {
        let mut decoder = ProgressiveDecoder::new(0, 0.1, 10);
        decoder.append(b"abcdef");
        assert!(decoder.next_attempt().is_none());

        decoder.resume();
        assert_eq!(decoder.next_attempt().as_deref(), Some(&b"abcdef"[..]));
    }

    #[test]
    fn test_no_attempt_below_threshold() {
        let mut decoder = ProgressiveDecoder::new(0, 0.5, 10);
        decoder.resume();
        decoder.append(b"abcd");
        assert!(decoder.next_attempt().is_none());

        decoder.append(b"e");
        assert!(decoder.next_attempt().is_some());
    }

    #[test]
    fn test_one_attempt_at_a_time() {
        let mut decoder = ProgressiveDecoder::new(0, 0.1, 10);
        decoder.resume();
        decoder.append(b"ab");
        assert!(decoder.next_attempt().is_some());
        assert!(decoder.is_executing());

        decoder.append(b"cd");
        assert!(decoder.next_attempt().is_none());

        decoder.finish_attempt();
        assert_eq!(decoder.next_attempt().as_deref(), Some(&b"abcd"[..]));
    }

    #[test]
    fn test_no_repeat_attempt_without_new_bytes() {
        let mut decoder = ProgressiveDecoder::new(0, 0.1, 10);
        decoder.resume();
        decoder.append(b"ab");
        assert!(decoder.next_attempt().is_some());
        decoder.finish_attempt();

        assert!(decoder.next_attempt().is_none());
        assert_eq!(decoder.buffered(), 2);
    }
}
