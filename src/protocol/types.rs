/// Transport frame kinds. The low 15 bits of the frame type field select one
/// of these; the high bit flags zstd compression of the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Call = 1,
    Notify = 2,
    Return = 3,
    Echo = 4,
    FrameUp = 5,
    FrameDown = 6,
}

/// The one service this meter understands. Notify frames for any other
/// service id are dropped.
pub const SERVICE_UUID: u64 = 0x0000_0000_6333_5342;

/// Method ids inside a Notify frame for SERVICE_UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyMethod {
    SyncNearEntities = 0x0000_0006,
    SyncContainerData = 0x0000_0015,
    SyncContainerDirtyData = 0x0000_0016,
    SyncServerTime = 0x0000_002b,
    SyncNearDeltaInfo = 0x0000_002d,
    SyncToMeDeltaInfo = 0x0000_002e,
}

/// Attribute ids carried in AttrCollection deltas.
pub mod attr {
    pub const NAME: u32 = 0x01;
    pub const ID: u32 = 0x0a;
    pub const PROFESSION_ID: u32 = 0xdc;
    pub const LEVEL: u32 = 0x2710;
    pub const FIGHT_POINT: u32 = 0x272e;
    pub const RANK_LEVEL: u32 = 0x274c;
    pub const CRI: u32 = 0x2b66;
    pub const LUCKY: u32 = 0x2b7a;
    pub const HP: u32 = 0x2c2e;
    pub const MAX_HP: u32 = 0x2c38;
    pub const REDUCTION_LEVEL: u32 = 0x64696d;
    pub const ELEMENT_FLAG: u32 = 0x646d6c;
    pub const ENERGY_FLAG: u32 = 0x543c_d3c6;
}

/// How an attribute's raw bytes decode. The table below is the single source
/// of truth for which ids we understand at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrKind {
    Text,
    Int32,
}

/// A decoded attribute value, uniform for downstream handling.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Text(String),
    Int(i32),
}

pub fn attr_kind(attr_id: u32) -> Option<AttrKind> {
    match attr_id {
        attr::NAME => Some(AttrKind::Text),
        attr::ID
        | attr::PROFESSION_ID
        | attr::LEVEL
        | attr::FIGHT_POINT
        | attr::RANK_LEVEL
        | attr::CRI
        | attr::LUCKY
        | attr::HP
        | attr::MAX_HP
        | attr::REDUCTION_LEVEL
        | attr::ELEMENT_FLAG
        | attr::ENERGY_FLAG => Some(AttrKind::Int32),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EDamageType {
    Damage = 0,
    Heal = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EEntityType {
    EntChar = 1,
    EntMonster = 2,
}

/// The low 16 bits of an entity uuid are a category tag; the actual uid used
/// everywhere else is the remaining high bits.
pub const UUID_PLAYER_TAG: u64 = 640;
pub const UUID_MONSTER_TAG: u64 = 64;

pub fn is_uuid_player(uuid: u64) -> bool {
    uuid & 0xffff == UUID_PLAYER_TAG
}

pub fn is_uuid_monster(uuid: u64) -> bool {
    uuid & 0xffff == UUID_MONSTER_TAG
}

pub fn uuid_to_uid(uuid: u64) -> u64 {
    uuid >> 16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_category_tags() {
        let player = (12345u64 << 16) | UUID_PLAYER_TAG;
        let monster = (777u64 << 16) | UUID_MONSTER_TAG;

        assert!(is_uuid_player(player));
        assert!(!is_uuid_monster(player));
        assert!(is_uuid_monster(monster));
        assert_eq!(uuid_to_uid(player), 12345);
        assert_eq!(uuid_to_uid(monster), 777);
    }

    #[test]
    fn test_attr_table() {
        assert_eq!(attr_kind(attr::NAME), Some(AttrKind::Text));
        assert_eq!(attr_kind(attr::MAX_HP), Some(AttrKind::Int32));
        assert_eq!(attr_kind(0xdeadbeef), None);
    }
}
