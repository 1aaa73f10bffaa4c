//! Turns decoded frames into statistics: routes Notify methods, applies
//! attribute deltas through the fixed decoder table, and feeds damage/heal
//! events into the user manager. One processor instance lives for the whole
//! capture session and remembers the local player's uuid.

use crate::protocol::dirty::{self, DirtyField};
use crate::protocol::frame::{self, MIN_FRAME_LEN};
use crate::protocol::pb::{self, AoiSyncDelta, AttrDelta, DamageInfo};
use crate::protocol::types::{
    attr, attr_kind, is_uuid_monster, is_uuid_player, uuid_to_uid, AttrValue, EDamageType,
    EEntityType, MessageType, NotifyMethod, SERVICE_UUID,
};
use crate::stats::manager::UserManager;
use crate::tables;
use byteorder::{BigEndian, ReadBytesExt};
use lazy_static::lazy_static;
use std::collections::HashSet;
use std::io::Cursor;
use std::sync::Mutex;

lazy_static! {
    // Attribute ids we already complained about, to keep the log readable
    static ref REPORTED_ATTR_IDS: Mutex<HashSet<u32>> = Mutex::new(HashSet::new());
}

fn log_unknown_attr(attr_id: u32, uid: u64, is_player: bool) {
    let mut reported = REPORTED_ATTR_IDS.lock().unwrap();
    if reported.insert(attr_id) {
        log::debug!(
            "Found unknown attr id {:#x} for {}{}",
            attr_id,
            if is_player { "" } else { "E" },
            uid
        );
    }
}

#[derive(Debug, Default)]
pub struct PacketProcessor {
    current_user_uuid: u64,
}

impl PacketProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_user_uuid(&self) -> u64 {
        self.current_user_uuid
    }

    /// Splits a chunk of one or more concatenated frames and dispatches each.
    /// FrameDown re-enters here with its nested bytes.
    pub fn process_packet(&mut self, data: &[u8], users: &mut UserManager, elite_only: bool) {
        let mut offset = 0usize;
        while data.len().saturating_sub(offset) > 4 {
            let size = u32::from_be_bytes([
                data[offset],
                data[offset + 1],
                data[offset + 2],
                data[offset + 3],
            ]) as usize;

            if size < MIN_FRAME_LEN as usize {
                log::debug!("Received invalid packet");
                return;
            }
            if offset + size > data.len() {
                log::debug!(
                    "Frame declares {} bytes but only {} remain",
                    size,
                    data.len() - offset
                );
                return;
            }

            let frame_bytes = &data[offset..offset + size];
            offset += size;
            let _ = self.process_frame(frame_bytes, users, elite_only);
        }
    }

    fn process_frame(
        &mut self,
        frame_bytes: &[u8],
        users: &mut UserManager,
        elite_only: bool,
    ) -> Option<()> {
        let mut cur = Cursor::new(frame_bytes);
        let head = frame::read_head(&mut cur)?;

        match head.kind {
            k if k == MessageType::Notify as u16 => {
                let body = &frame_bytes[cur.position() as usize..];
                let _ = self.process_notify(body, head.compressed, users, elite_only);
            }
            k if k == MessageType::FrameDown as u16 => {
                let _server_sequence_id = cur.read_u32::<BigEndian>().ok()?;
                let nested = &frame_bytes[cur.position() as usize..];
                if nested.is_empty() {
                    return Some(());
                }
                if head.compressed {
                    let inflated = frame::decompress(nested)?;
                    self.process_packet(&inflated, users, elite_only);
                } else {
                    self.process_packet(nested, users, elite_only);
                }
            }
            k if k == MessageType::Return as u16 => {
                log::debug!("Skipping Return frame");
            }
            other => {
                log::debug!("Ignoring frame with message type {}", other);
            }
        }
        Some(())
    }

    fn process_notify(
        &mut self,
        body: &[u8],
        compressed: bool,
        users: &mut UserManager,
        elite_only: bool,
    ) -> Option<()> {
        let mut cur = Cursor::new(body);
        let service_uuid = cur.read_u64::<BigEndian>().ok()?;
        let _stub_id = cur.read_u32::<BigEndian>().ok()?;
        let method_id = cur.read_u32::<BigEndian>().ok()?;

        if service_uuid != SERVICE_UUID {
            log::debug!("Skipping Notify with service id {:#x}", service_uuid);
            return Some(());
        }

        let rest = &body[cur.position() as usize..];
        let inflated;
        let payload: &[u8] = if compressed {
            inflated = frame::decompress(rest)?;
            &inflated
        } else {
            rest
        };

        match method_id {
            m if m == NotifyMethod::SyncNearEntities as u32 => {
                self.handle_sync_near_entities(payload, users)
            }
            m if m == NotifyMethod::SyncContainerData as u32 => {
                self.handle_container_data(payload, users)
            }
            m if m == NotifyMethod::SyncContainerDirtyData as u32 => {
                self.handle_container_dirty(payload, users)
            }
            m if m == NotifyMethod::SyncToMeDeltaInfo as u32 => {
                if let Some(delta) = pb::parse_sync_to_me_delta(payload) {
                    if delta.uuid != 0 && delta.uuid != self.current_user_uuid {
                        self.current_user_uuid = delta.uuid;
                        log::info!(
                            "Got player UUID! UUID: {} UID: {}",
                            delta.uuid,
                            uuid_to_uid(delta.uuid)
                        );
                    }
                    self.handle_aoi_delta(&delta, users, elite_only);
                }
            }
            m if m == NotifyMethod::SyncNearDeltaInfo as u32 => {
                for delta in pb::parse_sync_near_delta(payload) {
                    self.handle_aoi_delta(&delta, users, elite_only);
                }
            }
            m if m == NotifyMethod::SyncServerTime as u32 => {}
            other => {
                log::debug!("Skipping Notify with method id {:#x}", other);
            }
        }
        Some(())
    }

    fn handle_sync_near_entities(&mut self, payload: &[u8], users: &mut UserManager) {
        for entity in pb::parse_sync_near_entities(payload) {
            if entity.uuid == 0 {
                continue;
            }
            let uid = uuid_to_uid(entity.uuid);

            match entity.ent_type {
                t if t == EEntityType::EntMonster as u32 => {
                    self.process_enemy_attrs(uid, &entity.attrs, users)
                }
                t if t == EEntityType::EntChar as u32 => {
                    self.process_player_attrs(uid, &entity.attrs, users)
                }
                _ => {}
            }
        }
    }

    fn handle_container_data(&mut self, payload: &[u8], users: &mut UserManager) {
        let v_data = match pb::parse_sync_container(payload) {
            Some(v) => v,
            None => {
                // Dump the payload for offline diagnosis, abort just this
                // message
                if let Err(e) = std::fs::write("SyncContainerData.dat", payload) {
                    log::error!("Failed to dump SyncContainerData payload: {}", e);
                }
                log::warn!(
                    "Failed to decode SyncContainerData for player {}. Please report to developer",
                    uuid_to_uid(self.current_user_uuid)
                );
                return;
            }
        };

        if v_data.char_id == 0 {
            return;
        }
        let uid = v_data.char_id;

        if let Some(level) = v_data.level {
            users.set_attr(uid, "level", level as i64);
        }
        if let Some(hp) = v_data.cur_hp {
            users.set_attr(uid, "hp", hp as i64);
        }
        if let Some(max_hp) = v_data.max_hp {
            users.set_attr(uid, "max_hp", max_hp as i64);
        }
        if let Some(ref name) = v_data.name {
            users.set_name(uid, name);
        }
        if let Some(fight_point) = v_data.fight_point {
            users.set_fight_point(uid, fight_point as u64);
        }
        if let Some(profession_id) = v_data.cur_profession_id {
            users.set_profession(uid, tables::profession_name(profession_id));
        }
    }

    fn handle_container_dirty(&mut self, payload: &[u8], users: &mut UserManager) {
        if self.current_user_uuid == 0 {
            return;
        }
        let uid = uuid_to_uid(self.current_user_uuid);

        let blob = match pb::parse_sync_container(payload).and_then(|v| v.dirty_blob) {
            Some(blob) => blob,
            None => return,
        };

        match dirty::decode(blob) {
            Some(DirtyField::Name(name)) => users.set_name(uid, &name),
            Some(DirtyField::FightPoint(fight_point)) => {
                users.set_fight_point(uid, fight_point as u64)
            }
            Some(DirtyField::CurHp(hp)) => users.set_attr(uid, "hp", hp as i64),
            Some(DirtyField::MaxHp(max_hp)) => users.set_attr(uid, "max_hp", max_hp as i64),
            Some(DirtyField::ProfessionId(profession_id)) => {
                users.set_profession(uid, tables::profession_name(profession_id))
            }
            None => {}
        }
    }

    fn handle_aoi_delta(
        &mut self,
        delta: &AoiSyncDelta<'_>,
        users: &mut UserManager,
        elite_only: bool,
    ) {
        if delta.uuid == 0 {
            return;
        }
        let is_target_player = is_uuid_player(delta.uuid);
        let is_target_monster = is_uuid_monster(delta.uuid);
        let target_uid = uuid_to_uid(delta.uuid);

        if is_target_player {
            self.process_player_attrs(target_uid, &delta.attrs, users);
        } else if is_target_monster {
            self.process_enemy_attrs(target_uid, &delta.attrs, users);
        }

        for damage in &delta.damages {
            self.handle_damage_info(damage, delta.uuid, users, elite_only);
        }
    }

    fn handle_damage_info(
        &mut self,
        info: &DamageInfo,
        target_uuid: u64,
        users: &mut UserManager,
        elite_only: bool,
    ) {
        // Events without an owning skill or a resolvable attacker carry no
        // statistical meaning
        if info.skill_id == 0 {
            return;
        }
        let attacker_uuid = if info.top_summoner_uuid != 0 {
            info.top_summoner_uuid
        } else {
            info.attacker_uuid
        };
        if attacker_uuid == 0 {
            return;
        }

        let is_target_player = is_uuid_player(target_uuid);
        let target_uid = uuid_to_uid(target_uuid);
        let is_attacker_player = is_uuid_player(attacker_uuid);
        let attacker_uid = uuid_to_uid(attacker_uuid);

        let value = if info.value > 0 {
            info.value
        } else {
            info.lucky_value
        };
        if value == 0 {
            return;
        }

        // The server does not reliably set a dedicated crit boolean; the
        // type flag bits are reverse engineered (bit 0 crit, bit 2 cause
        // lucky) and still under observation
        let is_crit = info.type_flag & 0b1 != 0;
        let is_cause_lucky = info.type_flag & 0b100 != 0;
        let is_lucky = info.lucky_value > 0;
        let is_heal = info.kind == EDamageType::Heal as u32;
        let element = tables::damage_element(info.property);

        if is_target_player {
            if is_heal {
                let healer_uid = if is_attacker_player { attacker_uid } else { 0 };
                users.add_healing(
                    healer_uid, info.skill_id, element, value, is_crit, is_lucky, target_uid,
                );
            } else {
                users.add_taken_damage(target_uid, value, info.is_dead);
            }
            if info.is_dead {
                users.set_attr(target_uid, "hp", 0);
            }
        } else {
            if !is_heal && is_attacker_player {
                // Only player-dealt damage is statistically significant
                if !elite_only || users.is_elite_target(target_uid) {
                    users.add_damage(
                        attacker_uid,
                        info.skill_id,
                        element,
                        value,
                        is_crit,
                        is_lucky,
                        info.hp_lessen,
                    );
                }
            }
            if info.is_dead {
                users.set_enemy_hp(target_uid, 0);
            }
        }

        let mut extra: Vec<&str> = Vec::new();
        if is_crit {
            extra.push("Crit");
        }
        if is_lucky {
            extra.push("Lucky");
        }
        if is_cause_lucky {
            extra.push("CauseLucky");
        }
        if info.is_miss {
            extra.push("Miss");
        }
        if extra.is_empty() {
            extra.push("Normal");
        }

        let line = format!(
            "[{}] DS: {} SRC: {} TGT: {} ID: {} VAL: {} HPLSN: {} ELEM: {} EXT: {}",
            if is_heal { "HEAL" } else { "DMG" },
            tables::damage_source_name(info.damage_source),
            users.entity_label(attacker_uid, is_attacker_player),
            users.entity_label(target_uid, is_target_player),
            info.skill_id,
            value,
            info.hp_lessen,
            element.chars().last().unwrap_or('?'),
            extra.join("|"),
        );
        log::info!("{}", line);
        users.push_combat_log(line);
    }

    fn process_player_attrs(&self, uid: u64, attrs: &[AttrDelta<'_>], users: &mut UserManager) {
        for a in attrs {
            let kind = match attr_kind(a.id) {
                Some(kind) => kind,
                None => {
                    log_unknown_attr(a.id, uid, true);
                    continue;
                }
            };
            let value = match a.decode(kind) {
                Some(value) => value,
                None => continue,
            };

            match (a.id, value) {
                (attr::NAME, AttrValue::Text(name)) => users.set_name(uid, &name),
                (attr::PROFESSION_ID, AttrValue::Int(id)) => {
                    users.set_profession(uid, tables::profession_name(id as u32))
                }
                (attr::FIGHT_POINT, AttrValue::Int(fight_point)) => {
                    users.set_fight_point(uid, fight_point.max(0) as u64)
                }
                (attr::LEVEL, AttrValue::Int(level)) => {
                    users.set_attr(uid, "level", level as i64)
                }
                (attr::RANK_LEVEL, AttrValue::Int(rank)) => {
                    users.set_attr(uid, "rank_level", rank as i64)
                }
                (attr::CRI, AttrValue::Int(cri)) => users.set_attr(uid, "cri", cri as i64),
                (attr::LUCKY, AttrValue::Int(lucky)) => {
                    users.set_attr(uid, "lucky", lucky as i64)
                }
                (attr::HP, AttrValue::Int(hp)) => users.set_attr(uid, "hp", hp as i64),
                (attr::MAX_HP, AttrValue::Int(max_hp)) => {
                    users.set_attr(uid, "max_hp", max_hp as i64)
                }
                (attr::ELEMENT_FLAG, AttrValue::Int(flag)) => {
                    users.set_attr(uid, "element_flag", flag as i64)
                }
                (attr::ENERGY_FLAG, AttrValue::Int(flag)) => {
                    users.set_attr(uid, "energy_flag", flag as i64)
                }
                (attr::REDUCTION_LEVEL, AttrValue::Int(level)) => {
                    users.set_attr(uid, "reduction_level", level as i64)
                }
                _ => {}
            }
        }
    }

    fn process_enemy_attrs(&self, uid: u64, attrs: &[AttrDelta<'_>], users: &mut UserManager) {
        for a in attrs {
            let kind = match attr_kind(a.id) {
                Some(kind) => kind,
                None => {
                    log_unknown_attr(a.id, uid, false);
                    continue;
                }
            };
            let value = match a.decode(kind) {
                Some(value) => value,
                None => continue,
            };

            match (a.id, value) {
                (attr::NAME, AttrValue::Text(name)) => {
                    log::info!("Found monster name {} for id {}", name, uid);
                    users.set_enemy_name(uid, &name);
                }
                (attr::ID, AttrValue::Int(template_id)) => {
                    users.set_enemy_template_id(uid, template_id.max(0) as u32)
                }
                (attr::HP, AttrValue::Int(hp)) => users.set_enemy_hp(uid, hp.max(0) as u64),
                (attr::MAX_HP, AttrValue::Int(max_hp)) => {
                    users.set_enemy_max_hp(uid, max_hp.max(0) as u64)
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::pb::{write_block, write_varint};
    use crate::storage::cache::PlayerCache;
    use crate::tables::SkillBook;
    use std::collections::HashMap;

    fn manager() -> UserManager {
        UserManager::new(PlayerCache::empty(), SkillBook::default(), HashMap::new())
    }

    fn damage_info_bytes(
        skill_id: u32,
        attacker_uuid: u64,
        value: u64,
        type_flag: u32,
        kind: u32,
    ) -> Vec<u8> {
        let mut dmg = Vec::new();
        dmg.push(8);
        write_varint(&mut dmg, skill_id as u64);
        dmg.push(16);
        write_varint(&mut dmg, attacker_uuid);
        dmg.push(32);
        write_varint(&mut dmg, value);
        dmg.push(48);
        write_varint(&mut dmg, type_flag as u64);
        if kind != 0 {
            dmg.push(112);
            write_varint(&mut dmg, kind as u64);
        }
        dmg
    }

    fn aoi_delta_bytes(target_uuid: u64, damage: &[u8]) -> Vec<u8> {
        let mut effects = Vec::new();
        write_block(&mut effects, 10, damage);

        let mut delta = Vec::new();
        delta.push(8);
        write_varint(&mut delta, target_uuid);
        write_block(&mut delta, 26, &effects);
        delta
    }

    fn sync_to_me_bytes(delta: &[u8]) -> Vec<u8> {
        let mut wrapper = Vec::new();
        write_block(&mut wrapper, 10, delta);
        let mut msg = Vec::new();
        write_block(&mut msg, 10, &wrapper);
        msg
    }

    fn notify_frame(method_id: u32, payload: &[u8]) -> Vec<u8> {
        let mut frame = Vec::new();
        let total = 4 + 2 + 8 + 4 + 4 + payload.len();
        frame.extend_from_slice(&(total as u32).to_be_bytes());
        frame.extend_from_slice(&(MessageType::Notify as u16).to_be_bytes());
        frame.extend_from_slice(&SERVICE_UUID.to_be_bytes());
        frame.extend_from_slice(&1u32.to_be_bytes()); // stub id
        frame.extend_from_slice(&method_id.to_be_bytes());
        frame.extend_from_slice(payload);
        frame
    }

    #[test]
    fn test_crit_damage_scenario() {
        // Damage event: player 7 crits monster 5 with skill 100 for 500
        let attacker_uuid = (7u64 << 16) | 640;
        let target_uuid = (5u64 << 16) | 64;
        let dmg = damage_info_bytes(100, attacker_uuid, 500, 1, 0);
        let msg = sync_to_me_bytes(&aoi_delta_bytes(target_uuid, &dmg));
        let packet = notify_frame(NotifyMethod::SyncToMeDeltaInfo as u32, &msg);

        let mut users = manager();
        let mut processor = PacketProcessor::new();
        processor.process_packet(&packet, &mut users, false);

        let snapshot = users.snapshot();
        let attacker = &snapshot[&7u64];
        assert_eq!(attacker.total_damage.critical, 500);
        assert_eq!(attacker.total_count.critical, 1);
        assert_eq!(attacker.total_damage.total, 500);
    }

    #[test]
    fn test_sync_to_me_learns_player_uuid() {
        let uuid = (31u64 << 16) | 640;
        let dmg = damage_info_bytes(100, uuid, 1, 0, 0);
        let msg = sync_to_me_bytes(&aoi_delta_bytes((5u64 << 16) | 64, &dmg));

        // The delta's own uuid is the local player here
        let mut delta = aoi_delta_bytes(uuid, &dmg);
        delta.clear();
        delta.push(8);
        write_varint(&mut delta, uuid);
        let msg2 = sync_to_me_bytes(&delta);

        let mut users = manager();
        let mut processor = PacketProcessor::new();
        processor.process_packet(
            &notify_frame(NotifyMethod::SyncToMeDeltaInfo as u32, &msg2),
            &mut users,
            false,
        );
        assert_eq!(processor.current_user_uuid(), uuid);

        // Unrelated messages leave it alone
        processor.process_packet(
            &notify_frame(NotifyMethod::SyncNearDeltaInfo as u32, &msg),
            &mut users,
            false,
        );
        assert_eq!(processor.current_user_uuid(), uuid);
    }

    #[test]
    fn test_heal_routed_to_healer_and_target_hp() {
        let healer_uuid = (2u64 << 16) | 640;
        let target_uuid = (3u64 << 16) | 640;

        let mut users = manager();
        users.set_attr(3, "hp", 100);
        users.set_attr(3, "max_hp", 500);

        let heal = damage_info_bytes(20301, healer_uuid, 300, 0, EDamageType::Heal as u32);
        let mut near = Vec::new();
        write_block(&mut near, 10, &aoi_delta_bytes(target_uuid, &heal));
        let packet = notify_frame(NotifyMethod::SyncNearDeltaInfo as u32, &near);

        let mut processor = PacketProcessor::new();
        processor.process_packet(&packet, &mut users, false);

        let snapshot = users.snapshot();
        assert_eq!(snapshot[&2u64].total_healing.normal, 300);
        assert_eq!(snapshot[&3u64].hp, Some(400));
    }

    #[test]
    fn test_taken_damage_and_death() {
        let attacker_uuid = (9u64 << 16) | 64; // monster attacker
        let target_uuid = (4u64 << 16) | 640;

        let mut users = manager();
        users.set_attr(4, "hp", 1000);

        let mut dmg = damage_info_bytes(555, attacker_uuid, 1200, 0, 0);
        dmg.push(88); // dead flag
        write_varint(&mut dmg, 1);

        let mut near = Vec::new();
        write_block(&mut near, 10, &aoi_delta_bytes(target_uuid, &dmg));
        let packet = notify_frame(NotifyMethod::SyncNearDeltaInfo as u32, &near);

        let mut processor = PacketProcessor::new();
        processor.process_packet(&packet, &mut users, false);

        let snapshot = users.snapshot();
        assert_eq!(snapshot[&4u64].taken_damage, 1200);
        assert_eq!(snapshot[&4u64].dead_count, 1);
        assert_eq!(snapshot[&4u64].hp, Some(0));
    }

    #[test]
    fn test_zero_value_and_unowned_events_skipped() {
        let attacker_uuid = (7u64 << 16) | 640;
        let target_uuid = (5u64 << 16) | 64;

        let no_skill = damage_info_bytes(0, attacker_uuid, 500, 0, 0);
        let no_value = damage_info_bytes(100, attacker_uuid, 0, 0, 0);

        let mut users = manager();
        let mut processor = PacketProcessor::new();
        for dmg in [no_skill, no_value] {
            let mut near = Vec::new();
            write_block(&mut near, 10, &aoi_delta_bytes(target_uuid, &dmg));
            processor.process_packet(
                &notify_frame(NotifyMethod::SyncNearDeltaInfo as u32, &near),
                &mut users,
                false,
            );
        }

        assert!(users.snapshot().is_empty());
    }

    #[test]
    fn test_lucky_value_fallback() {
        let attacker_uuid = (7u64 << 16) | 640;
        let target_uuid = (5u64 << 16) | 64;

        // Value absent, lucky value carries the number
        let mut dmg = Vec::new();
        dmg.push(8);
        write_varint(&mut dmg, 100);
        dmg.push(16);
        write_varint(&mut dmg, attacker_uuid);
        dmg.push(40); // lucky value
        write_varint(&mut dmg, 888);

        let mut users = manager();
        let mut processor = PacketProcessor::new();
        let mut near = Vec::new();
        write_block(&mut near, 10, &aoi_delta_bytes(target_uuid, &dmg));
        processor.process_packet(
            &notify_frame(NotifyMethod::SyncNearDeltaInfo as u32, &near),
            &mut users,
            false,
        );

        let snapshot = users.snapshot();
        assert_eq!(snapshot[&7u64].total_damage.lucky, 888);
        assert_eq!(snapshot[&7u64].total_count.lucky, 1);
    }

    #[test]
    fn test_elite_only_gating() {
        let attacker_uuid = (7u64 << 16) | 640;
        let dummy_uuid = (50u64 << 16) | 64;
        let trash_uuid = (51u64 << 16) | 64;

        let mut users = manager();
        users.set_enemy_name(50, "训练木桩(精英)");
        users.set_enemy_name(51, "路边小怪");

        let mut processor = PacketProcessor::new();
        for &target in &[dummy_uuid, trash_uuid] {
            let dmg = damage_info_bytes(100, attacker_uuid, 250, 0, 0);
            let mut near = Vec::new();
            write_block(&mut near, 10, &aoi_delta_bytes(target, &dmg));
            processor.process_packet(
                &notify_frame(NotifyMethod::SyncNearDeltaInfo as u32, &near),
                &mut users,
                true,
            );
        }

        // Only the elite dummy hit counted
        assert_eq!(users.snapshot()[&7u64].total_damage.total, 250);
    }

    #[test]
    fn test_concatenated_frames_consume_exactly() {
        let attacker_uuid = (7u64 << 16) | 640;
        let target_uuid = (5u64 << 16) | 64;
        let dmg = damage_info_bytes(100, attacker_uuid, 100, 0, 0);
        let mut near = Vec::new();
        write_block(&mut near, 10, &aoi_delta_bytes(target_uuid, &dmg));
        let frame = notify_frame(NotifyMethod::SyncNearDeltaInfo as u32, &near);

        let mut chunk = frame.clone();
        chunk.extend_from_slice(&frame);

        let mut users = manager();
        let mut processor = PacketProcessor::new();
        processor.process_packet(&chunk, &mut users, false);

        // Both frames processed, nothing double-consumed
        assert_eq!(users.snapshot()[&7u64].total_damage.total, 200);
        assert_eq!(users.snapshot()[&7u64].total_count.total, 2);
    }

    #[test]
    fn test_frame_down_unwraps_nested_frames() {
        let attacker_uuid = (7u64 << 16) | 640;
        let target_uuid = (5u64 << 16) | 64;
        let dmg = damage_info_bytes(100, attacker_uuid, 150, 0, 0);
        let mut near = Vec::new();
        write_block(&mut near, 10, &aoi_delta_bytes(target_uuid, &dmg));
        let nested = notify_frame(NotifyMethod::SyncNearDeltaInfo as u32, &near);

        let mut frame = Vec::new();
        let total = 4 + 2 + 4 + nested.len();
        frame.extend_from_slice(&(total as u32).to_be_bytes());
        frame.extend_from_slice(&(MessageType::FrameDown as u16).to_be_bytes());
        frame.extend_from_slice(&42u32.to_be_bytes()); // server sequence id
        frame.extend_from_slice(&nested);

        let mut users = manager();
        let mut processor = PacketProcessor::new();
        processor.process_packet(&frame, &mut users, false);

        assert_eq!(users.snapshot()[&7u64].total_damage.total, 150);
    }

    #[test]
    fn test_compressed_notify_payload() {
        let attacker_uuid = (7u64 << 16) | 640;
        let target_uuid = (5u64 << 16) | 64;
        let dmg = damage_info_bytes(100, attacker_uuid, 300, 0, 0);
        let mut near = Vec::new();
        write_block(&mut near, 10, &aoi_delta_bytes(target_uuid, &dmg));
        let packed = zstd::encode_all(&near[..], 0).unwrap();

        let mut frame = Vec::new();
        let total = 4 + 2 + 8 + 4 + 4 + packed.len();
        frame.extend_from_slice(&(total as u32).to_be_bytes());
        frame.extend_from_slice(&(0x8000u16 | MessageType::Notify as u16).to_be_bytes());
        frame.extend_from_slice(&SERVICE_UUID.to_be_bytes());
        frame.extend_from_slice(&1u32.to_be_bytes());
        frame.extend_from_slice(&(NotifyMethod::SyncNearDeltaInfo as u32).to_be_bytes());
        frame.extend_from_slice(&packed);

        let mut users = manager();
        let mut processor = PacketProcessor::new();
        processor.process_packet(&frame, &mut users, false);

        assert_eq!(users.snapshot()[&7u64].total_damage.total, 300);
    }

    #[test]
    fn test_foreign_service_id_dropped(){
        let mut frame = Vec::new();
        let total = 4 + 2 + 8 + 4 + 4;
        frame.extend_from_slice(&(total as u32).to_be_bytes());
        frame.extend_from_slice(&(MessageType::Notify as u16).to_be_bytes());
        frame.extend_from_slice(&0x1122_3344u64.to_be_bytes());
        frame.extend_from_slice(&1u32.to_be_bytes());
        frame.extend_from_slice(&(NotifyMethod::SyncNearDeltaInfo as u32).to_be_bytes());

        let mut users = manager();
        let mut processor = PacketProcessor::new();
        processor.process_packet(&frame, &mut users, false);
        assert!(users.snapshot().is_empty());
    }

    #[test]
    fn test_near_entities_fill_enemy_cache() {
        let mut attr_hp = Vec::new();
        attr_hp.push(8);
        write_varint(&mut attr_hp, attr::HP as u64);
        let mut raw = Vec::new();
        write_varint(&mut raw, 6000);
        write_block(&mut attr_hp, 18, &raw);

        let mut collection = Vec::new();
        write_block(&mut collection, 10, &attr_hp);

        let mut entity = Vec::new();
        entity.push(8);
        write_varint(&mut entity, (66u64 << 16) | 64);
        entity.push(16);
        write_varint(&mut entity, EEntityType::EntMonster as u64);
        write_block(&mut entity, 26, &collection);

        let mut msg = Vec::new();
        write_block(&mut msg, 10, &entity);
        let packet = notify_frame(NotifyMethod::SyncNearEntities as u32, &msg);

        let mut users = manager();
        let mut processor = PacketProcessor::new();
        processor.process_packet(&packet, &mut users, false);

        let enemies = users.enemies_snapshot();
        assert_eq!(enemies[&66u64].hp, Some(6000));
    }
}
