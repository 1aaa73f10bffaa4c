//! IPv4 fragment reassembly. Fragments are grouped by the usual
//! (identification, source, destination, protocol) key and positioned into a
//! flat buffer by byte offset, never by arrival order. Groups that never
//! complete are reclaimed by the periodic sweep.

use std::collections::HashMap;

/// Groups untouched this long are dropped by the sweep.
pub const FRAGMENT_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct FragmentKey {
    pub ident: u16,
    pub src: [u8; 4],
    pub dst: [u8; 4],
    pub protocol: u8,
}

#[derive(Debug)]
struct FragmentGroup {
    parts: Vec<(usize, Vec<u8>)>,
    /// Fixed once the final (more-fragments clear) fragment arrives.
    total_len: Option<usize>,
    last_touch_ms: u64,
}

impl FragmentGroup {
    /// The datagram is only emitted once every byte of [0, total) is covered.
    /// A group whose early fragments were swept away stays incomplete forever
    /// and is reclaimed by the next sweep.
    fn covered(&self, total: usize) -> bool {
        let mut spans: Vec<(usize, usize)> = self
            .parts
            .iter()
            .map(|(offset, payload)| (*offset, offset + payload.len()))
            .collect();
        spans.sort_unstable();

        let mut end = 0usize;
        for (start, span_end) in spans {
            if start > end {
                return false;
            }
            end = end.max(span_end);
        }
        end >= total
    }

    fn assemble(&self, total: usize) -> Vec<u8> {
        let mut payload = vec![0u8; total];
        for (offset, part) in &self.parts {
            let end = (offset + part.len()).min(total);
            if *offset < end {
                payload[*offset..end].copy_from_slice(&part[..end - offset]);
            }
        }
        payload
    }
}

#[derive(Debug, Default)]
pub struct FragmentReassembler {
    groups: HashMap<FragmentKey, FragmentGroup>,
}

impl FragmentReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers one fragment and returns the reassembled datagram payload once
    /// all of it has arrived, in whatever order.
    pub fn push(
        &mut self,
        key: FragmentKey,
        offset: usize,
        more_fragments: bool,
        payload: &[u8],
        now_ms: u64,
    ) -> Option<Vec<u8>> {
        let group = self.groups.entry(key).or_insert_with(|| FragmentGroup {
            parts: Vec::new(),
            total_len: None,
            last_touch_ms: now_ms,
        });

        group.parts.push((offset, payload.to_vec()));
        group.last_touch_ms = now_ms;
        if !more_fragments {
            group.total_len = Some(offset + payload.len());
        }

        let total = group.total_len?;
        if !group.covered(total) {
            return None;
        }

        let assembled = group.assemble(total);
        self.groups.remove(&key);
        Some(assembled)
    }

    /// Drops groups untouched for FRAGMENT_TIMEOUT_MS, returning how many
    /// were reclaimed.
    pub fn sweep(&mut self, now_ms: u64) -> usize {
        let before = self.groups.len();
        self.groups
            .retain(|_, group| now_ms.saturating_sub(group.last_touch_ms) <= FRAGMENT_TIMEOUT_MS);
        before - self.groups.len()
    }

    pub fn clear(&mut self) {
        self.groups.clear();
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> FragmentKey {
        FragmentKey {
            ident: 0x1234,
            src: [10, 0, 0, 1],
            dst: [10, 0, 0, 2],
            protocol: 6,
        }
    }

    #[test]
    fn test_two_fragments_out_of_order() {
        let mut reassembler = FragmentReassembler::new();
        let first: Vec<u8> = (0..200).map(|i| (i % 251) as u8).collect();
        let second: Vec<u8> = (0..2800).map(|i| (i % 241) as u8).collect();

        // Final fragment arrives first; nothing must come out yet
        assert!(reassembler
            .push(key(), 200, false, &second, 0)
            .is_none());

        // First fragment completes the 3000 byte datagram
        let assembled = reassembler.push(key(), 0, true, &first, 1).unwrap();
        assert_eq!(assembled.len(), 3000);
        assert_eq!(&assembled[..200], &first[..]);
        assert_eq!(&assembled[200..], &second[..]);
        assert!(reassembler.is_empty());
    }

    #[test]
    fn test_order_invariance() {
        let parts: Vec<(usize, Vec<u8>)> = vec![
            (0, vec![1u8; 512]),
            (512, vec![2u8; 512]),
            (1024, vec![3u8; 100]),
        ];

        let deliver = |order: &[usize]| -> Option<Vec<u8>> {
            let mut reassembler = FragmentReassembler::new();
            let mut result = None;
            for &i in order {
                let (offset, ref payload) = parts[i];
                let more = i != parts.len() - 1;
                if let Some(assembled) = reassembler.push(key(), offset, more, payload, 0) {
                    result = Some(assembled);
                }
            }
            result
        };

        let a = deliver(&[0, 1, 2]).unwrap();
        let b = deliver(&[2, 0, 1]).unwrap();
        let c = deliver(&[1, 2, 0]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(a.len(), 1124);
    }

    #[test]
    fn test_sweep_reclaims_stale_groups() {
        let mut reassembler = FragmentReassembler::new();
        reassembler.push(key(), 0, true, &[0u8; 100], 0);

        // 31 seconds later the group is gone
        assert_eq!(reassembler.sweep(31_000), 1);
        assert!(reassembler.is_empty());

        // The completing fragment now opens a fresh group that can never
        // cover the datagram, and never emits
        assert!(reassembler
            .push(key(), 100, false, &[0u8; 100], 31_000)
            .is_none());
        assert_eq!(reassembler.len(), 1);
        assert_eq!(reassembler.sweep(62_001), 1);
    }

    #[test]
    fn test_duplicate_fragment_is_harmless() {
        let mut reassembler = FragmentReassembler::new();
        assert!(reassembler.push(key(), 0, true, &[7u8; 64], 0).is_none());
        assert!(reassembler.push(key(), 0, true, &[7u8; 64], 0).is_none());
        let assembled = reassembler.push(key(), 64, false, &[9u8; 64], 0).unwrap();
        assert_eq!(assembled.len(), 128);
        assert_eq!(assembled[0], 7);
        assert_eq!(assembled[127], 9);
    }

    #[test]
    fn test_self_contained_groups_do_not_mix() {
        let mut reassembler = FragmentReassembler::new();
        let other = FragmentKey {
            ident: 0x9999,
            ..key()
        };

        assert!(reassembler.push(key(), 0, true, &[1u8; 10], 0).is_none());
        // A different datagram completing does not touch the first group
        let assembled = reassembler.push(other, 0, false, &[2u8; 10], 0).unwrap();
        assert_eq!(assembled, vec![2u8; 10]);
        assert_eq!(reassembler.len(), 1);
    }
}
