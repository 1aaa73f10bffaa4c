//! Resequencing of the one tracked TCP stream. Segments land in an
//! out-of-order cache keyed by sequence number; only the segment at exactly
//! the expected sequence number is merged into the accumulation buffer, so
//! the buffer never grows anything but ordered, gap-free bytes.

use crate::protocol::frame::FRAME_LEN_CEILING;
use std::collections::HashMap;

/// Wraparound-aware "seq is not behind expected".
fn seq_at_or_after(seq: u32, expected: u32) -> bool {
    (expected.wrapping_sub(seq)) as i32 <= 0
}

#[derive(Debug, Default)]
pub struct TcpReassembler {
    next_seq: Option<u32>,
    cache: HashMap<u32, Vec<u8>>,
    /// Ordered, contiguous bytes ready for frame splitting.
    pub buf: Vec<u8>,
    last_data_ms: u64,
}

impl TcpReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.next_seq = None;
        self.cache.clear();
        self.buf.clear();
        self.last_data_ms = 0;
    }

    /// Primes the expected sequence number, used when the server locator has
    /// already consumed the matching segment.
    pub fn prime(&mut self, next_seq: u32) {
        self.next_seq = Some(next_seq);
    }

    /// Millis stamp of the last time ordered bytes were produced; 0 until
    /// the stream first advances.
    pub fn last_data_ms(&self) -> u64 {
        self.last_data_ms
    }

    pub fn cached_segments(&self) -> usize {
        self.cache.len()
    }

    pub fn push_segment(&mut self, seq: u32, payload: &[u8], now_ms: u64) {
        if payload.is_empty() {
            return;
        }

        if self.next_seq.is_none() {
            // Late (re)initialization: only trust a segment that looks like a
            // frame start, with a sane leading length field
            log::error!("Unexpected TCP capture state, expected sequence number unknown");
            if payload.len() > 4 {
                let head = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
                if head < FRAME_LEN_CEILING {
                    self.next_seq = Some(seq);
                }
            }
        }

        match self.next_seq {
            Some(expected) => {
                // Duplicate inserts for the same sequence number just replace
                // each other; segments behind the stream are dropped
                if seq_at_or_after(seq, expected) {
                    self.cache.insert(seq, payload.to_vec());
                }
            }
            None => {
                self.cache.insert(seq, payload.to_vec());
                return;
            }
        }

        // Merge every newly contiguous segment
        while let Some(expected) = self.next_seq {
            match self.cache.remove(&expected) {
                Some(segment) => {
                    self.next_seq = Some(expected.wrapping_add(segment.len() as u32));
                    self.buf.extend_from_slice(&segment);
                    self.last_data_ms = now_ms;
                }
                None => break,
            }
        }
    }
}
