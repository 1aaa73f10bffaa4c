use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Display name for a profession id carried in player attributes.
/// Unknown ids map to an empty string and leave the previous value alone.
pub fn profession_name(profession_id: u32) -> &'static str {
    match profession_id {
        1 => "雷影剑士",
        2 => "冰魔导师",
        3 => "涤罪恶火·战斧",
        4 => "青岚骑士",
        5 => "森语者",
        8 => "雷霆一闪·手炮",
        9 => "巨刃守护者",
        10 => "暗灵祈舞·仪刀/仪仗",
        11 => "神射手",
        12 => "神盾骑士",
        13 => "灵魂乐手",
        _ => "",
    }
}

/// Sub-profession is not on the wire anywhere; it is inferred from which
/// signature skills a player has used.
pub fn sub_profession_by_skill(skill_id: u32) -> &'static str {
    match skill_id {
        1241 => "射线",
        55302 => "协奏",
        20301 | 21418 => "愈合",
        1518 | 1541 => "惩戒",
        2306 => "狂音",
        120902 => "冰矛",
        1714 | 1734 => "居合",
        44701 => "月刃",
        220112 | 2203622 => "鹰弓",
        1700827 => "狼弓",
        1419 => "空枪",
        1405 | 1418 => "重装",
        2405 => "防盾",
        2406 => "光盾",
        199902 => "岩盾",
        _ => "",
    }
}

/// EDamageProperty on the damage event, rendered the way the dashboard
/// expects it.
pub fn damage_element(property: u32) -> &'static str {
    match property {
        0 => "⚔️物",
        1 => "🔥火",
        2 => "❄️冰",
        3 => "⚡雷",
        4 => "🍀森",
        5 => "💨风",
        6 => "⛰️岩",
        7 => "🌟光",
        8 => "🌑暗",
        9 => "❓？",
        _ => "⚔️物",
    }
}

/// EDamageSource, for the combat log only.
pub fn damage_source_name(source: u32) -> &'static str {
    match source {
        0 => "Skill",
        1 => "Bullet",
        2 => "Buff",
        3 => "Fall",
        4 => "FBullet",
        100 => "Other",
        _ => "Unknown",
    }
}

fn element_tag(element: &str) -> &'static str {
    match element {
        "fire" => "🔥火",
        "ice" => "❄️冰",
        "thunder" => "⚡雷",
        "earth" => "🍀森",
        "wind" => "💨风",
        "light" => "✨光",
        "dark" => "🌙暗",
        "physics" => "⚔️",
        _ => "",
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
struct SkillDef {
    name: String,
    #[serde(default)]
    element: String,
}

#[derive(Deserialize, Debug, Default)]
struct SkillConfigFile {
    #[serde(default)]
    skills: HashMap<u32, SkillDef>,
}

/// Skill id to display name/element mapping, injected from skill_config.json.
/// The meter works without it, falling back to the raw skill id.
#[derive(Debug, Default)]
pub struct SkillBook {
    skills: HashMap<u32, SkillDef>,
}

impl SkillBook {
    pub fn load(path: &Path) -> Self {
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => {
                log::warn!("No skill_config.json found, skill names fall back to ids");
                return Self::default();
            }
        };

        match serde_json::from_str::<SkillConfigFile>(&content) {
            Ok(file) => {
                log::info!("Loaded {} skill definitions", file.skills.len());
                Self { skills: file.skills }
            }
            Err(e) => {
                log::error!("Failed to parse skill_config.json: {}", e);
                Self::default()
            }
        }
    }

    pub fn display_name(&self, skill_id: u32) -> String {
        match self.skills.get(&skill_id) {
            Some(def) => def.name.clone(),
            None => skill_id.to_string(),
        }
    }

    /// Element tag from the config, if the skill is known and tagged.
    pub fn element(&self, skill_id: u32) -> &'static str {
        self.skills
            .get(&skill_id)
            .map(|def| element_tag(&def.element))
            .unwrap_or("")
    }
}

/// Monster id to display name mapping, injected from monster_names.json.
pub fn load_monster_names(path: &Path) -> HashMap<u32, String> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return HashMap::new(),
    };

    match serde_json::from_str::<HashMap<u32, String>>(&content) {
        Ok(names) => {
            log::info!("Loaded {} monster names", names.len());
            names
        }
        Err(e) => {
            log::error!("Failed to parse monster_names.json: {}", e);
            HashMap::new()
        }
    }
}
