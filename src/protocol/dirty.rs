//! Decoder for the "dirty" partial-update stream inside
//! SyncContainerDirtyData. The buffer has no schema framing at all: fields
//! are located by walking 4-byte little-endian words, expecting a literal
//! marker before each level, then a field index selecting the sub-structure.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

const STREAM_MARKER: u32 = 0xffff_fffe;

/// The single changed field extracted from one dirty buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum DirtyField {
    Name(String),
    FightPoint(u32),
    CurHp(u32),
    MaxHp(u32),
    ProfessionId(u32),
}

/// Marker word plus 4 padding bytes. The second marker word observed in
/// captures (0xfffffffd) is read but not enforced, matching server behavior
/// that is still under study.
fn read_identifier(cur: &mut Cursor<&[u8]>) -> Option<bool> {
    let identifier = cur.read_u32::<LittleEndian>().ok()?;
    cur.read_i32::<LittleEndian>().ok()?;
    if identifier != STREAM_MARKER {
        return Some(false);
    }
    cur.read_i32::<LittleEndian>().ok()?;
    cur.read_i32::<LittleEndian>().ok()?;
    Some(true)
}

/// Strings are u32-LE length, 4 padding bytes, the bytes, 4 padding bytes.
fn read_string(cur: &mut Cursor<&[u8]>) -> Option<String> {
    let length = cur.read_u32::<LittleEndian>().ok()? as usize;
    cur.read_i32::<LittleEndian>().ok()?;

    let pos = cur.position() as usize;
    let data = *cur.get_ref();
    if pos + length > data.len() {
        return None;
    }
    let text = String::from_utf8_lossy(&data[pos..pos + length]).into_owned();
    cur.set_position((pos + length) as u64);
    let _ = cur.read_i32::<LittleEndian>();
    Some(text)
}

fn read_field_index(cur: &mut Cursor<&[u8]>) -> Option<u32> {
    let index = cur.read_u32::<LittleEndian>().ok()?;
    cur.read_i32::<LittleEndian>().ok()?;
    Some(index)
}

/// Walks one dirty buffer and pulls out the one changed field it carries.
/// Anything unrecognized returns None and is skipped by the caller.
pub fn decode(buffer: &[u8]) -> Option<DirtyField> {
    let mut cur = Cursor::new(buffer);

    if !read_identifier(&mut cur)? {
        return None;
    }

    let field_index = read_field_index(&mut cur)?;
    match field_index {
        2 => {
            // CharBase
            if !read_identifier(&mut cur)? {
                return None;
            }
            match read_field_index(&mut cur)? {
                5 => {
                    let name = read_string(&mut cur)?;
                    if name.is_empty() {
                        return None;
                    }
                    Some(DirtyField::Name(name))
                }
                35 => {
                    let fight_point = cur.read_u32::<LittleEndian>().ok()?;
                    let _ = cur.read_i32::<LittleEndian>();
                    Some(DirtyField::FightPoint(fight_point))
                }
                other => {
                    log::debug!("Unhandled dirty CharBase field {}", other);
                    None
                }
            }
        }
        16 => {
            // UserFightAttr
            if !read_identifier(&mut cur)? {
                return None;
            }
            match read_field_index(&mut cur)? {
                1 => Some(DirtyField::CurHp(cur.read_u32::<LittleEndian>().ok()?)),
                2 => Some(DirtyField::MaxHp(cur.read_u32::<LittleEndian>().ok()?)),
                other => {
                    log::debug!("Unhandled dirty UserFightAttr field {}", other);
                    None
                }
            }
        }
        61 => {
            // ProfessionList
            if !read_identifier(&mut cur)? {
                return None;
            }
            match read_field_index(&mut cur)? {
                1 => {
                    let profession_id = cur.read_u32::<LittleEndian>().ok()?;
                    let _ = cur.read_i32::<LittleEndian>();
                    if profession_id == 0 {
                        return None;
                    }
                    Some(DirtyField::ProfessionId(profession_id))
                }
                other => {
                    log::debug!("Unhandled dirty ProfessionList field {}", other);
                    None
                }
            }
        }
        other => {
            log::debug!("Unhandled dirty container field {}", other);
            None
        }
    }
}
