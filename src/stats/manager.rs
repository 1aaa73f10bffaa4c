//! Session-wide aggregation: the per-player records, the enemy cache, the
//! combat log ring and the persisted name/profession cache all live here.
//! Everything is mutated from the single packet-processing path; readers only
//! get serialized copies.

use crate::now_ms;
use crate::stats::user::{SkillSummary, UserRecord, UserSummary};
use crate::storage::cache::PlayerCache;
use crate::storage::history::SessionDump;
use crate::tables::SkillBook;
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};

/// Upper bound for the in-memory combat log ring.
const COMBAT_LOG_CAP: usize = 10_000;

#[derive(Debug, Clone, Default, Serialize)]
pub struct EnemyInfo {
    pub name: String,
    pub hp: Option<u64>,
    pub max_hp: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct UserSkillData {
    pub uid: u64,
    pub name: String,
    pub profession: String,
    pub attr: HashMap<String, i64>,
    pub skills: IndexMap<u32, SkillSummary>,
}

pub struct UserManager {
    users: IndexMap<u64, UserRecord>,
    enemies: HashMap<u64, EnemyInfo>,
    pub cache: PlayerCache,
    // Max hp flips around too much to be worth persisting
    max_hp_cache: HashMap<u64, i64>,
    logs: VecDeque<String>,
    book: SkillBook,
    monster_names: HashMap<u32, String>,
    session_start_ms: Option<u64>,
    last_record_ms: u64,
    unsaved: bool,
}

impl UserManager {
    pub fn new(cache: PlayerCache, book: SkillBook, monster_names: HashMap<u32, String>) -> Self {
        Self {
            users: IndexMap::new(),
            enemies: HashMap::new(),
            cache,
            max_hp_cache: HashMap::new(),
            logs: VecDeque::new(),
            book,
            monster_names,
            session_start_ms: None,
            last_record_ms: 0,
            unsaved: false,
        }
    }

    /// Gets or lazily creates the record for a uid, pre-filling identity
    /// fields from the persisted cache.
    pub fn get_user(&mut self, uid: u64) -> &mut UserRecord {
        if !self.users.contains_key(&uid) {
            let mut user = UserRecord::new(uid);

            if let Some(cached) = self.cache.get(uid) {
                if !cached.name.is_empty() {
                    user.name = cached.name.clone();
                }
                if !cached.profession.is_empty() {
                    user.profession = cached.profession.clone();
                }
                user.fight_point = cached.fight_point;
            }
            if let Some(&max_hp) = self.max_hp_cache.get(&uid) {
                user.set_attr("max_hp", max_hp);
            }

            self.users.insert(uid, user);
        }
        self.users.get_mut(&uid).unwrap()
    }

    fn mark_activity(&mut self) {
        let now = now_ms();
        if self.session_start_ms.is_none() {
            self.session_start_ms = Some(now);
        }
        self.last_record_ms = now;
        self.unsaved = true;
    }

    pub fn add_damage(
        &mut self,
        uid: u64,
        skill_id: u32,
        element: &'static str,
        value: u64,
        is_crit: bool,
        is_lucky: bool,
        hp_lessen: u64,
    ) {
        self.get_user(uid)
            .add_damage(skill_id, element, value, is_crit, is_lucky, hp_lessen);
        self.mark_activity();
    }

    /// Healing is credited to the healer (uid 0 for non-player sources) and
    /// the target's hp climbs toward max_hp by the healed amount.
    pub fn add_healing(
        &mut self,
        uid: u64,
        skill_id: u32,
        element: &'static str,
        value: u64,
        is_crit: bool,
        is_lucky: bool,
        target_uid: u64,
    ) {
        self.get_user(uid)
            .add_healing(skill_id, element, value, is_crit, is_lucky);
        self.get_user(target_uid).apply_heal_to_hp(value);
        self.mark_activity();
    }

    pub fn add_taken_damage(&mut self, uid: u64, value: u64, is_dead: bool) {
        self.get_user(uid).add_taken_damage(value, is_dead);
        self.mark_activity();
    }

    pub fn set_name(&mut self, uid: u64, name: &str) {
        if name.is_empty() {
            return;
        }
        let user = self.get_user(uid);
        if user.name != name {
            user.name = name.to_string();
            log::info!("Found player name {} for uid {}", name, uid);
            self.cache.set_name(uid, name, now_ms());
        }
    }

    pub fn set_profession(&mut self, uid: u64, profession: &str) {
        if profession.is_empty() {
            return;
        }
        let user = self.get_user(uid);
        if user.profession != profession {
            user.set_profession(profession);
            log::info!("Found profession {} for uid {}", profession, uid);
            self.cache.set_profession(uid, profession, now_ms());
        }
    }

    pub fn set_fight_point(&mut self, uid: u64, fight_point: u64) {
        let user = self.get_user(uid);
        if user.fight_point != fight_point {
            user.fight_point = fight_point;
            log::info!("Found fight point {} for uid {}", fight_point, uid);
            self.cache.set_fight_point(uid, fight_point, now_ms());
        }
    }

    pub fn set_attr(&mut self, uid: u64, key: &str, value: i64) {
        self.get_user(uid).set_attr(key, value);
        if key == "max_hp" {
            self.max_hp_cache.insert(uid, value);
        }
    }

    pub fn set_enemy_name(&mut self, uid: u64, name: &str) {
        self.enemies.entry(uid).or_default().name = name.to_string();
    }

    /// Resolves a monster display name through the injected mapping.
    pub fn set_enemy_template_id(&mut self, uid: u64, template_id: u32) {
        if let Some(name) = self.monster_names.get(&template_id) {
            log::info!("Found monster name {} for id {}", name, uid);
            self.enemies.entry(uid).or_default().name = name.clone();
        }
    }

    pub fn set_enemy_hp(&mut self, uid: u64, hp: u64) {
        self.enemies.entry(uid).or_default().hp = Some(hp);
    }

    pub fn set_enemy_max_hp(&mut self, uid: u64, max_hp: u64) {
        self.enemies.entry(uid).or_default().max_hp = Some(max_hp);
    }

    pub fn enemy_name(&self, uid: u64) -> Option<&str> {
        self.enemies.get(&uid).map(|e| e.name.as_str())
    }

    /// Elite-only recording keys off the training dummy's display name.
    pub fn is_elite_target(&self, uid: u64) -> bool {
        self.enemy_name(uid)
            .map(|name| name.contains("木桩") && name.contains("精英"))
            .unwrap_or(false)
    }

    pub fn clear_enemies(&mut self) {
        self.enemies.clear();
    }

    pub fn push_combat_log(&mut self, line: String) {
        if self.logs.len() >= COMBAT_LOG_CAP {
            self.logs.pop_front();
        }
        self.logs.push_back(line);
    }

    /// Display label for combat log lines: name, uid and side.
    pub fn entity_label(&self, uid: u64, is_player: bool) -> String {
        if is_player {
            let name = self
                .users
                .get(&uid)
                .map(|u| u.name.as_str())
                .unwrap_or_default();
            format!("{}#{}(player)", name, uid)
        } else {
            let name = self.enemy_name(uid).unwrap_or_default();
            format!("{}#{}(enemy)", name, uid)
        }
    }

    pub fn update_all_realtime(&mut self) {
        for user in self.users.values_mut() {
            user.update_realtime();
        }
    }

    pub fn snapshot(&self) -> IndexMap<u64, UserSummary> {
        self.users
            .iter()
            .map(|(&uid, user)| (uid, user.summary()))
            .collect()
    }

    pub fn user_skill_data(&self, uid: u64) -> Option<UserSkillData> {
        let user = self.users.get(&uid)?;
        Some(UserSkillData {
            uid,
            name: user.name.clone(),
            profession: user.profession.clone(),
            attr: user.attrs.clone(),
            skills: user.skill_summary(&self.book),
        })
    }

    pub fn enemies_snapshot(&self) -> HashMap<u64, EnemyInfo> {
        self.enemies.clone()
    }

    pub fn last_record_ms(&self) -> u64 {
        self.last_record_ms
    }

    pub fn needs_save(&self) -> bool {
        self.unsaved && self.session_start_ms.is_some()
    }

    pub fn mark_saved(&mut self) {
        self.unsaved = false;
    }

    /// Serialized copy of the whole session for the history archive.
    pub fn session_dump(&self) -> Option<SessionDump> {
        let start_ms = self.session_start_ms?;
        if self.users.is_empty() {
            return None;
        }
        Some(SessionDump {
            start_ms,
            end_ms: self.last_record_ms.max(start_ms),
            users: self.snapshot(),
            skills: self
                .users
                .keys()
                .filter_map(|&uid| self.user_skill_data(uid).map(|d| (uid, d)))
                .collect(),
            logs: self.logs.iter().cloned().collect(),
        })
    }

    /// Session reset. Records are re-creatable from caches on next sight.
    pub fn clear_all(&mut self) {
        self.users.clear();
        self.logs.clear();
        self.session_start_ms = None;
        self.last_record_ms = 0;
        self.unsaved = false;
    }
}
