//! Hand-rolled decoders for the protobuf-like payloads inside Notify frames.
//! Field numbers are reverse-engineered protocol constants; keep them in sync
//! with future server revisions.

use crate::protocol::types::{AttrKind, AttrValue};

pub(crate) fn read_varint(data: &[u8]) -> (u64, usize) {
    let mut value = 0u64;
    let mut shift = 0;
    let mut pos = 0;
    while pos < data.len() {
        let byte = data[pos];
        if shift >= 64 {
            return (value, pos);
        }
        value |= ((byte & 0x7F) as u64) << shift;
        pos += 1;
        if (byte & 0x80) == 0 {
            break;
        }
        shift += 7;
    }
    (value, pos)
}

pub(crate) fn skip_field(wire_type: u8, data: &[u8]) -> usize {
    match wire_type {
        0 => read_varint(data).1,
        1 => 8,
        2 => {
            let (len, read) = read_varint(data);
            read + len as usize
        }
        5 => 4,
        _ => 1,
    }
}

/// Reads a length-delimited sub-block, returning it and the bytes consumed.
fn read_block(data: &[u8]) -> (&[u8], usize) {
    let (len, read) = read_varint(data);
    let start = read;
    let end = (start + len as usize).min(data.len());
    (&data[start..end], end)
}

/// One entry of an AttrCollection: the attribute id plus its raw encoded
/// bytes. Interpretation of the bytes depends on the id.
#[derive(Debug, Default, Clone)]
pub struct AttrDelta<'a> {
    pub id: u32,
    pub raw: &'a [u8],
}

impl AttrDelta<'_> {
    /// Decodes the raw bytes per the fixed attribute-id table. The bytes are
    /// themselves protobuf scalar encodings: length-prefixed for strings,
    /// plain varint for int32.
    pub fn decode(&self, kind: AttrKind) -> Option<AttrValue> {
        match kind {
            AttrKind::Text => {
                let (block, _) = read_block(self.raw);
                Some(AttrValue::Text(String::from_utf8_lossy(block).into_owned()))
            }
            AttrKind::Int32 => {
                let (val, read) = read_varint(self.raw);
                if read == 0 && !self.raw.is_empty() {
                    return None;
                }
                Some(AttrValue::Int((val & 0xffff_ffff) as u32 as i32))
            }
        }
    }
}

/// One damage or heal event out of a SkillEffects list.
#[derive(Debug, Default, Clone)]
pub struct DamageInfo {
    pub skill_id: u32,
    pub attacker_uuid: u64,
    pub top_summoner_uuid: u64,
    pub value: u64,
    pub lucky_value: u64,
    pub type_flag: u32,
    pub is_miss: bool,
    pub damage_source: u32,
    pub property: u32,
    pub hp_lessen: u64,
    pub is_dead: bool,
    pub kind: u32,
}

/// An entity-scoped delta: attribute updates plus skill effect events.
#[derive(Debug, Default)]
pub struct AoiSyncDelta<'a> {
    pub uuid: u64,
    pub attrs: Vec<AttrDelta<'a>>,
    pub damages: Vec<DamageInfo>,
}

/// An appearing entity from SyncNearEntities.
#[derive(Debug, Default)]
pub struct EntityAppear<'a> {
    pub uuid: u64,
    pub ent_type: u32,
    pub attrs: Vec<AttrDelta<'a>>,
}

/// The container snapshot of the locally controlled character.
#[derive(Debug, Default)]
pub struct VData<'a> {
    pub char_id: u64,
    pub level: Option<u32>,
    pub cur_hp: Option<u64>,
    pub max_hp: Option<u64>,
    pub name: Option<String>,
    pub fight_point: Option<u32>,
    pub cur_profession_id: Option<u32>,
    pub dirty_blob: Option<&'a [u8]>,
}

fn parse_attr_collection<'a>(data: &'a [u8], out: &mut Vec<AttrDelta<'a>>) {
    let mut i = 0;
    while i < data.len() {
        let tag = data[i];
        let wire_type = tag & 0x07;
        i += 1;

        match tag {
            10 => {
                // Field 1, Wire 2 (one Attr block)
                let (block, consumed) = read_block(&data[i..]);
                let mut attr = AttrDelta::default();
                let mut j = 0;
                while j < block.len() {
                    let sub_tag = block[j];
                    let sub_wire = sub_tag & 0x07;
                    j += 1;
                    match sub_tag {
                        8 => {
                            // Field 1, Wire 0 (attribute id)
                            let (val, read) = read_varint(&block[j..]);
                            attr.id = val as u32;
                            j += read;
                        }
                        18 => {
                            // Field 2, Wire 2 (raw encoded value)
                            let (sub, sub_consumed) = read_block(&block[j..]);
                            attr.raw = sub;
                            j += sub_consumed;
                        }
                        _ => j += skip_field(sub_wire, &block[j..]),
                    }
                }
                out.push(attr);
                i += consumed;
            }
            _ => i += skip_field(wire_type, &data[i..]),
        }
    }
}

fn parse_damage_info(data: &[u8]) -> DamageInfo {
    let mut info = DamageInfo::default();
    let mut i = 0;
    while i < data.len() {
        let tag = data[i];
        let wire_type = tag & 0x07;
        i += 1;

        match tag {
            8 => {
                // Field 1 (owning skill/buff id)
                let (val, read) = read_varint(&data[i..]);
                info.skill_id = val as u32;
                i += read;
            }
            16 => {
                // Field 2 (attacker uuid)
                let (val, read) = read_varint(&data[i..]);
                info.attacker_uuid = val;
                i += read;
            }
            32 => {
                // Field 4 (value)
                let (val, read) = read_varint(&data[i..]);
                info.value = val;
                i += read;
            }
            40 => {
                // Field 5 (lucky value)
                let (val, read) = read_varint(&data[i..]);
                info.lucky_value = val;
                i += read;
            }
            48 => {
                // Field 6 (type flag, crit/lucky bits)
                let (val, read) = read_varint(&data[i..]);
                info.type_flag = val as u32;
                i += read;
            }
            56 => {
                // Field 7 (miss flag)
                let (val, read) = read_varint(&data[i..]);
                info.is_miss = val == 1;
                i += read;
            }
            64 => {
                // Field 8 (damage source)
                let (val, read) = read_varint(&data[i..]);
                info.damage_source = val as u32;
                i += read;
            }
            72 => {
                // Field 9 (damage property/element)
                let (val, read) = read_varint(&data[i..]);
                info.property = val as u32;
                i += read;
            }
            80 => {
                // Field 10 (hp lessen)
                let (val, read) = read_varint(&data[i..]);
                info.hp_lessen = val;
                i += read;
            }
            88 => {
                // Field 11 (dead flag)
                let (val, read) = read_varint(&data[i..]);
                info.is_dead = val == 1;
                i += read;
            }
            104 => {
                // Field 13 (top summoner uuid, wins over attacker)
                let (val, read) = read_varint(&data[i..]);
                info.top_summoner_uuid = val;
                i += read;
            }
            112 => {
                // Field 14 (EDamageType)
                let (val, read) = read_varint(&data[i..]);
                info.kind = val as u32;
                i += read;
            }
            _ => i += skip_field(wire_type, &data[i..]),
        }
    }
    info
}

fn parse_aoi_delta(data: &[u8]) -> AoiSyncDelta<'_> {
    let mut delta = AoiSyncDelta::default();
    let mut i = 0;
    while i < data.len() {
        let tag = data[i];
        let wire_type = tag & 0x07;
        i += 1;

        match tag {
            8 => {
                // Field 1, Wire 0 (entity uuid)
                let (val, read) = read_varint(&data[i..]);
                delta.uuid = val;
                i += read;
            }
            18 => {
                // Field 2, Wire 2 (AttrCollection)
                let (block, consumed) = read_block(&data[i..]);
                parse_attr_collection(block, &mut delta.attrs);
                i += consumed;
            }
            26 => {
                // Field 3, Wire 2 (SkillEffects)
                let (block, consumed) = read_block(&data[i..]);
                let mut j = 0;
                while j < block.len() {
                    let sub_tag = block[j];
                    let sub_wire = sub_tag & 0x07;
                    j += 1;
                    if sub_tag == 10 {
                        // Field 1, Wire 2 (one SyncDamageInfo)
                        let (dmg, sub_consumed) = read_block(&block[j..]);
                        delta.damages.push(parse_damage_info(dmg));
                        j += sub_consumed;
                    } else {
                        j += skip_field(sub_wire, &block[j..]);
                    }
                }
                i += consumed;
            }
            _ => i += skip_field(wire_type, &data[i..]),
        }
    }
    delta
}

/// SyncNearDeltaInfo: repeated AoiSyncDelta at field 1.
pub fn parse_sync_near_delta(data: &[u8]) -> Vec<AoiSyncDelta<'_>> {
    let mut deltas = Vec::new();
    let mut i = 0;
    while i < data.len() {
        let tag = data[i];
        let wire_type = tag & 0x07;
        i += 1;

        if tag == 10 {
            let (block, consumed) = read_block(&data[i..]);
            deltas.push(parse_aoi_delta(block));
            i += consumed;
        } else {
            i += skip_field(wire_type, &data[i..]);
        }
    }
    deltas
}

/// SyncToMeDeltaInfo: field 1 wraps an AoiSyncToMeDelta whose field 1 is the
/// base AoiSyncDelta for the local player.
pub fn parse_sync_to_me_delta(data: &[u8]) -> Option<AoiSyncDelta<'_>> {
    let mut i = 0;
    while i < data.len() {
        let tag = data[i];
        let wire_type = tag & 0x07;
        i += 1;

        if tag == 10 {
            let (wrapper, _) = read_block(&data[i..]);
            let mut j = 0;
            while j < wrapper.len() {
                let sub_tag = wrapper[j];
                let sub_wire = sub_tag & 0x07;
                j += 1;
                if sub_tag == 10 {
                    let (base, _) = read_block(&wrapper[j..]);
                    return Some(parse_aoi_delta(base));
                }
                j += skip_field(sub_wire, &wrapper[j..]);
            }
            return None;
        }
        i += skip_field(wire_type, &data[i..]);
    }
    None
}

/// SyncNearEntities: repeated Entity {uuid, ent_type, attrs} at field 1.
pub fn parse_sync_near_entities(data: &[u8]) -> Vec<EntityAppear<'_>> {
    let mut entities = Vec::new();
    let mut i = 0;
    while i < data.len() {
        let tag = data[i];
        let wire_type = tag & 0x07;
        i += 1;

        if tag == 10 {
            let (block, consumed) = read_block(&data[i..]);
            let mut entity = EntityAppear::default();
            let mut j = 0;
            while j < block.len() {
                let sub_tag = block[j];
                let sub_wire = sub_tag & 0x07;
                j += 1;
                match sub_tag {
                    8 => {
                        let (val, read) = read_varint(&block[j..]);
                        entity.uuid = val;
                        j += read;
                    }
                    16 => {
                        let (val, read) = read_varint(&block[j..]);
                        entity.ent_type = val as u32;
                        j += read;
                    }
                    26 => {
                        let (sub, sub_consumed) = read_block(&block[j..]);
                        parse_attr_collection(sub, &mut entity.attrs);
                        j += sub_consumed;
                    }
                    _ => j += skip_field(sub_wire, &block[j..]),
                }
            }
            entities.push(entity);
            i += consumed;
        } else {
            i += skip_field(wire_type, &data[i..]);
        }
    }
    entities
}

/// SyncContainerData / SyncContainerDirtyData: field 1 wraps the VData
/// container. Returns None when the structure is absent entirely, which the
/// caller treats as a decode failure worth dumping.
pub fn parse_sync_container(data: &[u8]) -> Option<VData<'_>> {
    let mut i = 0;
    while i < data.len() {
        let tag = data[i];
        let wire_type = tag & 0x07;
        i += 1;

        if tag == 10 {
            let (block, _) = read_block(&data[i..]);
            return Some(parse_v_data(block));
        }
        i += skip_field(wire_type, &data[i..]);
    }
    None
}

fn parse_v_data(data: &[u8]) -> VData<'_> {
    let mut v = VData::default();
    let mut i = 0;
    while i < data.len() {
        let tag = data[i];
        let wire_type = tag & 0x07;
        i += 1;

        match tag {
            8 => {
                // Field 1 (char id, already a uid)
                let (val, read) = read_varint(&data[i..]);
                v.char_id = val;
                i += read;
            }
            18 => {
                // Field 2 (RoleLevel)
                let (block, consumed) = read_block(&data[i..]);
                if let Some(val) = find_varint_by_tag(block, 8) {
                    v.level = Some(val as u32);
                }
                i += consumed;
            }
            26 => {
                // Field 3 (fight attributes: cur hp, max hp)
                let (block, consumed) = read_block(&data[i..]);
                if let Some(val) = find_varint_by_tag(block, 8) {
                    v.cur_hp = Some(val);
                }
                if let Some(val) = find_varint_by_tag(block, 16) {
                    v.max_hp = Some(val);
                }
                i += consumed;
            }
            34 => {
                // Field 4 (CharBase: name, fight point)
                let (block, consumed) = read_block(&data[i..]);
                if let Some(name) = find_string_by_tag(block, 10) {
                    v.name = Some(name);
                }
                if let Some(val) = find_varint_by_tag(block, 16) {
                    v.fight_point = Some(val as u32);
                }
                i += consumed;
            }
            42 => {
                // Field 5 (ProfessionList)
                let (block, consumed) = read_block(&data[i..]);
                if let Some(val) = find_varint_by_tag(block, 8) {
                    v.cur_profession_id = Some(val as u32);
                }
                i += consumed;
            }
            50 => {
                // Field 6 (raw dirty buffer)
                let (block, consumed) = read_block(&data[i..]);
                v.dirty_blob = Some(block);
                i += consumed;
            }
            _ => i += skip_field(wire_type, &data[i..]),
        }
    }
    v
}

fn find_string_by_tag(data: &[u8], target_tag: u8) -> Option<String> {
    let mut i = 0;
    while i < data.len() {
        let tag = data[i];
        if tag == target_tag {
            let (block, _) = read_block(&data[i + 1..]);
            if !block.is_empty() {
                return Some(String::from_utf8_lossy(block).into_owned());
            }
            return None;
        }
        let wire_type = tag & 0x07;
        i += 1 + skip_field(wire_type, &data[i + 1..]);
    }
    None
}

fn find_varint_by_tag(data: &[u8], target_tag: u8) -> Option<u64> {
    let mut i = 0;
    while i < data.len() {
        let tag = data[i];
        if tag == target_tag {
            let (val, _) = read_varint(&data[i + 1..]);
            return Some(val);
        }
        let wire_type = tag & 0x07;
        i += 1 + skip_field(wire_type, &data[i + 1..]);
    }
    None
}

#[cfg(test)]
pub(crate) fn write_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

#[cfg(test)]
pub(crate) fn write_block(buf: &mut Vec<u8>, tag: u8, block: &[u8]) {
    buf.push(tag);
    write_varint(buf, block.len() as u64);
    buf.extend_from_slice(block);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::{AttrKind, AttrValue};

    #[test]
    fn test_read_varint_multi_byte() {
        let mut buf = Vec::new();
        write_varint(&mut buf, 327744);
        let (val, read) = read_varint(&buf);
        assert_eq!(val, 327744);
        assert_eq!(read, buf.len());
    }

    #[test]
    fn test_read_varint_truncated() {
        // Continuation bit set but no further bytes
        let (val, read) = read_varint(&[0x80]);
        assert_eq!(val, 0);
        assert_eq!(read, 1);
    }

    #[test]
    fn test_parse_damage_info() {
        // 1. Build a SyncDamageInfo by hand
        let mut buf = Vec::new();
        buf.push(8); // skill id
        write_varint(&mut buf, 100);
        buf.push(16); // attacker uuid
        write_varint(&mut buf, (7u64 << 16) | 640);
        buf.push(32); // value
        write_varint(&mut buf, 500);
        buf.push(48); // type flag
        write_varint(&mut buf, 1);
        buf.push(88); // dead flag
        write_varint(&mut buf, 1);

        // 2. Decode
        let info = parse_damage_info(&buf);

        // 3. Assert
        assert_eq!(info.skill_id, 100);
        assert_eq!(info.attacker_uuid, (7u64 << 16) | 640);
        assert_eq!(info.value, 500);
        assert_eq!(info.type_flag, 1);
        assert!(info.is_dead);
        assert_eq!(info.lucky_value, 0);
    }

    #[test]
    fn test_parse_aoi_delta_with_attrs_and_damage() {
        let mut attr = Vec::new();
        attr.push(8);
        write_varint(&mut attr, 0x2c2e); // hp attribute
        let mut raw = Vec::new();
        write_varint(&mut raw, 4321);
        write_block(&mut attr, 18, &raw);

        let mut collection = Vec::new();
        write_block(&mut collection, 10, &attr);

        let mut dmg = Vec::new();
        dmg.push(8);
        write_varint(&mut dmg, 55302);
        dmg.push(32);
        write_varint(&mut dmg, 777);

        let mut effects = Vec::new();
        write_block(&mut effects, 10, &dmg);

        let mut delta = Vec::new();
        delta.push(8);
        write_varint(&mut delta, (9u64 << 16) | 640);
        write_block(&mut delta, 18, &collection);
        write_block(&mut delta, 26, &effects);

        let parsed = parse_aoi_delta(&delta);
        assert_eq!(parsed.uuid, (9u64 << 16) | 640);
        assert_eq!(parsed.attrs.len(), 1);
        assert_eq!(parsed.attrs[0].id, 0x2c2e);
        assert_eq!(
            parsed.attrs[0].decode(AttrKind::Int32),
            Some(AttrValue::Int(4321))
        );
        assert_eq!(parsed.damages.len(), 1);
        assert_eq!(parsed.damages[0].skill_id, 55302);
        assert_eq!(parsed.damages[0].value, 777);
    }

    #[test]
    fn test_attr_text_decode() {
        // Attribute raw bytes carry a length-prefixed string
        let mut raw = Vec::new();
        write_varint(&mut raw, 6);
        raw.extend_from_slice("星轨".as_bytes());

        let attr = AttrDelta { id: 0x01, raw: &raw };
        assert_eq!(
            attr.decode(AttrKind::Text),
            Some(AttrValue::Text("星轨".to_string()))
        );
    }

    #[test]
    fn test_parse_v_data() {
        let mut role_level = Vec::new();
        role_level.push(8);
        write_varint(&mut role_level, 60);

        let mut fight_attr = Vec::new();
        fight_attr.push(8);
        write_varint(&mut fight_attr, 15000);
        fight_attr.push(16);
        write_varint(&mut fight_attr, 20000);

        let mut char_base = Vec::new();
        write_block(&mut char_base, 10, "测试".as_bytes());
        char_base.push(16);
        write_varint(&mut char_base, 9999);

        let mut professions = Vec::new();
        professions.push(8);
        write_varint(&mut professions, 2);

        let mut v = Vec::new();
        v.push(8);
        write_varint(&mut v, 424242);
        write_block(&mut v, 18, &role_level);
        write_block(&mut v, 26, &fight_attr);
        write_block(&mut v, 34, &char_base);
        write_block(&mut v, 42, &professions);

        let mut msg = Vec::new();
        write_block(&mut msg, 10, &v);

        let parsed = parse_sync_container(&msg).unwrap();
        assert_eq!(parsed.char_id, 424242);
        assert_eq!(parsed.level, Some(60));
        assert_eq!(parsed.cur_hp, Some(15000));
        assert_eq!(parsed.max_hp, Some(20000));
        assert_eq!(parsed.name.as_deref(), Some("测试"));
        assert_eq!(parsed.fight_point, Some(9999));
        assert_eq!(parsed.cur_profession_id, Some(2));
    }

    #[test]
    fn test_unknown_fields_are_skipped() {
        let mut buf = Vec::new();
        // Field 12, wire 0 (unknown varint)
        buf.push((12 << 3) | 0);
        write_varint(&mut buf, 5);
        // Field 1 uuid after the junk
        buf.push(8);
        write_varint(&mut buf, (3u64 << 16) | 64);

        let parsed = parse_aoi_delta(&buf);
        assert_eq!(parsed.uuid, (3u64 << 16) | 64);
    }
}
