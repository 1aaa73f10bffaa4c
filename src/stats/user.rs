//! Per-player combat record: identity, attribute bag, and the damage,
//! healing and per-skill statistic blocks.

use crate::stats::statistic::{CountBuckets, StatisticBlock, ValueBuckets};
use crate::tables;
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkillKind {
    Damage,
    Heal,
}

impl SkillKind {
    pub fn label(self) -> &'static str {
        match self {
            SkillKind::Damage => "伤害",
            SkillKind::Heal => "治疗",
        }
    }
}

#[derive(Debug)]
pub struct SkillUsage {
    pub kind: SkillKind,
    pub element: &'static str,
    pub block: StatisticBlock,
}

#[derive(Debug)]
pub struct UserRecord {
    pub uid: u64,
    pub name: String,
    pub profession: String,
    pub sub_profession: String,
    pub fight_point: u64,
    pub attrs: HashMap<String, i64>,
    pub taken_damage: u64,
    pub dead_count: u32,
    pub damage: StatisticBlock,
    pub healing: StatisticBlock,
    pub skills: IndexMap<u32, SkillUsage>,
}

/// The live-snapshot row for one player, shaped for the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct UserSummary {
    pub realtime_dps: u64,
    pub realtime_dps_max: u64,
    pub total_dps: f64,
    pub total_damage: ValueBuckets,
    pub total_count: CountBuckets,
    pub realtime_hps: u64,
    pub realtime_hps_max: u64,
    pub total_hps: f64,
    pub total_healing: ValueBuckets,
    pub taken_damage: u64,
    pub dead_count: u32,
    pub profession: String,
    pub name: String,
    #[serde(rename = "fightPoint")]
    pub fight_point: u64,
    pub hp: Option<i64>,
    pub max_hp: Option<i64>,
}

/// One row of the per-user skill breakdown.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillSummary {
    pub display_name: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub elementype: String,
    pub total_damage: u64,
    pub total_count: u64,
    pub crit_count: u64,
    pub lucky_count: u64,
    pub crit_rate: f64,
    pub lucky_rate: f64,
    pub damage_breakdown: ValueBuckets,
    pub count_breakdown: CountBuckets,
}

impl UserRecord {
    pub fn new(uid: u64) -> Self {
        Self {
            uid,
            name: String::new(),
            profession: "未知".to_string(),
            sub_profession: String::new(),
            fight_point: 0,
            attrs: HashMap::new(),
            taken_damage: 0,
            dead_count: 0,
            damage: StatisticBlock::new(),
            healing: StatisticBlock::new(),
            skills: IndexMap::new(),
        }
    }

    pub fn add_damage(
        &mut self,
        skill_id: u32,
        element: &'static str,
        value: u64,
        is_crit: bool,
        is_lucky: bool,
        hp_lessen: u64,
    ) {
        self.damage.add_record(value, is_crit, is_lucky, hp_lessen);
        self.record_skill(skill_id, SkillKind::Damage, element, value, is_crit, is_lucky, hp_lessen);
    }

    pub fn add_healing(
        &mut self,
        skill_id: u32,
        element: &'static str,
        value: u64,
        is_crit: bool,
        is_lucky: bool,
    ) {
        self.healing.add_record(value, is_crit, is_lucky, 0);
        self.record_skill(skill_id, SkillKind::Heal, element, value, is_crit, is_lucky, 0);
    }

    fn record_skill(
        &mut self,
        skill_id: u32,
        kind: SkillKind,
        element: &'static str,
        value: u64,
        is_crit: bool,
        is_lucky: bool,
        hp_lessen: u64,
    ) {
        let usage = self.skills.entry(skill_id).or_insert_with(|| SkillUsage {
            kind,
            element,
            block: StatisticBlock::new(),
        });
        usage.block.add_record(value, is_crit, is_lucky, hp_lessen);
        // Skill blocks only report session totals, never their own rate
        usage.block.clear_window();

        let sub_profession = tables::sub_profession_by_skill(skill_id);
        if !sub_profession.is_empty() {
            self.sub_profession = sub_profession.to_string();
        }
    }

    pub fn add_taken_damage(&mut self, value: u64, is_dead: bool) {
        self.taken_damage += value;
        if is_dead {
            self.dead_count += 1;
        }
        if let Some(hp) = self.attrs.get_mut("hp") {
            *hp = (*hp - value as i64).max(0);
        }
    }

    /// Clamp hp toward max_hp by the healed amount.
    pub fn apply_heal_to_hp(&mut self, healing: u64) {
        let max_hp = self.attrs.get("max_hp").copied();
        if let Some(hp) = self.attrs.get_mut("hp") {
            *hp += healing as i64;
            if let Some(max_hp) = max_hp {
                if *hp > max_hp {
                    *hp = max_hp;
                }
            }
        }
    }

    pub fn set_profession(&mut self, profession: &str) {
        if self.profession != profession {
            self.sub_profession.clear();
        }
        self.profession = profession.to_string();
    }

    pub fn set_attr(&mut self, key: &str, value: i64) {
        self.attrs.insert(key.to_string(), value);
    }

    pub fn update_realtime(&mut self) {
        self.damage.update_realtime();
        self.healing.update_realtime();
    }

    /// Damage and healing event counts merged, as shown on the dashboard.
    fn total_count(&self) -> CountBuckets {
        CountBuckets {
            normal: self.damage.count.normal + self.healing.count.normal,
            critical: self.damage.count.critical + self.healing.count.critical,
            lucky: self.damage.count.lucky + self.healing.count.lucky,
            total: self.damage.count.total + self.healing.count.total,
        }
    }

    pub fn summary(&self) -> UserSummary {
        let profession = if self.sub_profession.is_empty() {
            self.profession.clone()
        } else {
            format!("{}-{}", self.profession, self.sub_profession)
        };

        UserSummary {
            realtime_dps: self.damage.realtime_value,
            realtime_dps_max: self.damage.realtime_max,
            total_dps: self.damage.total_per_second(),
            total_damage: self.damage.stats.clone(),
            total_count: self.total_count(),
            realtime_hps: self.healing.realtime_value,
            realtime_hps_max: self.healing.realtime_max,
            total_hps: self.healing.total_per_second(),
            total_healing: self.healing.stats.clone(),
            taken_damage: self.taken_damage,
            dead_count: self.dead_count,
            profession,
            name: self.name.clone(),
            fight_point: self.fight_point,
            hp: self.attrs.get("hp").copied(),
            max_hp: self.attrs.get("max_hp").copied(),
        }
    }

    pub fn skill_summary(&self, book: &tables::SkillBook) -> IndexMap<u32, SkillSummary> {
        let mut skills = IndexMap::new();
        for (&skill_id, usage) in &self.skills {
            let stat = &usage.block;
            let crit_rate = if stat.count.total > 0 {
                stat.count.critical as f64 / stat.count.total as f64
            } else {
                0.0
            };
            let lucky_rate = if stat.count.total > 0 {
                stat.count.lucky as f64 / stat.count.total as f64
            } else {
                0.0
            };

            let elementype = {
                let configured = book.element(skill_id);
                if configured.is_empty() {
                    usage.element.to_string()
                } else {
                    configured.to_string()
                }
            };

            skills.insert(
                skill_id,
                SkillSummary {
                    display_name: book.display_name(skill_id),
                    kind: usage.kind.label(),
                    elementype,
                    total_damage: stat.stats.total,
                    total_count: stat.count.total,
                    crit_count: stat.count.critical,
                    lucky_count: stat.count.lucky,
                    crit_rate,
                    lucky_rate,
                    damage_breakdown: stat.stats.clone(),
                    count_breakdown: stat.count.clone(),
                },
            );
        }
        skills
    }
}
