//! Length-prefixed transport frame handling. Every frame starts with its own
//! total length (self-inclusive, big-endian) followed by a 16-bit type field
//! whose high bit flags zstd compression.

use byteorder::{BigEndian, ReadBytesExt};
use std::io::Cursor;

/// Sanity ceiling for a single frame. A declared length above this means the
/// stream is desynchronized beyond recovery.
pub const FRAME_LEN_CEILING: u32 = 0x000f_ffff;

/// Smallest valid frame: 4-byte length plus 2-byte type.
pub const MIN_FRAME_LEN: u32 = 6;

pub const COMPRESS_FLAG: u16 = 0x8000;
pub const KIND_MASK: u16 = 0x7fff;

#[derive(Debug, Clone, Copy)]
pub struct FrameHead {
    pub total_len: u32,
    pub kind: u16,
    pub compressed: bool,
}

/// Peeks the declared total length of the frame at the front of `buf`.
pub fn peek_len(buf: &[u8]) -> Option<u32> {
    if buf.len() < 4 {
        return None;
    }
    Some(u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]))
}

/// Reads the 6-byte frame head, leaving the cursor on the body.
pub fn read_head(cur: &mut Cursor<&[u8]>) -> Option<FrameHead> {
    let total_len = cur.read_u32::<BigEndian>().ok()?;
    let type_field = cur.read_u16::<BigEndian>().ok()?;
    Some(FrameHead {
        total_len,
        kind: type_field & KIND_MASK,
        compressed: type_field & COMPRESS_FLAG != 0,
    })
}

/// Inflates a compressed frame body. Failure drops just this frame.
pub fn decompress(payload: &[u8]) -> Option<Vec<u8>> {
    match zstd::decode_all(payload) {
        Ok(data) => Some(data),
        Err(e) => {
            log::warn!("Failed to zstd-decompress frame payload: {}", e);
            None
        }
    }
}
