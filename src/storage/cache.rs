//! Persisted player identity cache (users.json): uid to name, profession and
//! fight point. Reloaded at startup so names show up before the first
//! attribute sync, written back with a debounce so bursts of attribute
//! traffic don't hammer the disk.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

/// Quiet period after the last mutation before the cache hits the disk.
pub const SAVE_DEBOUNCE_MS: u64 = 2000;

#[derive(Serialize, Deserialize, Default, Clone, Debug)]
#[serde(default)]
pub struct CachedPlayer {
    pub name: String,
    pub profession: String,
    #[serde(rename = "fightPoint")]
    pub fight_point: u64,
}

/// A serialized cache write, handed out so the actual file IO can happen
/// outside the session lock.
#[derive(Debug)]
pub struct PendingFlush {
    pub path: PathBuf,
    pub json: String,
}

impl PendingFlush {
    pub fn write(&self) {
        if let Err(e) = fs::write(&self.path, &self.json) {
            log::error!("Failed to save user cache: {}", e);
        }
    }
}

pub struct PlayerCache {
    path: PathBuf,
    entries: HashMap<u64, CachedPlayer>,
    dirty_since_ms: Option<u64>,
}

impl PlayerCache {
    pub fn load(path: PathBuf) -> Self {
        let entries = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<HashMap<u64, CachedPlayer>>(&content) {
                Ok(entries) => {
                    log::info!("Loaded {} user cache entries", entries.len());
                    entries
                }
                Err(e) => {
                    log::error!("Failed to load user cache: {}", e);
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };

        Self {
            path,
            entries,
            dirty_since_ms: None,
        }
    }

    pub fn empty() -> Self {
        Self {
            path: PathBuf::from("users.json"),
            entries: HashMap::new(),
            dirty_since_ms: None,
        }
    }

    pub fn get(&self, uid: u64) -> Option<&CachedPlayer> {
        self.entries.get(&uid)
    }

    pub fn set_name(&mut self, uid: u64, name: &str, now_ms: u64) {
        self.entries.entry(uid).or_default().name = name.to_string();
        self.dirty_since_ms = Some(now_ms);
    }

    pub fn set_profession(&mut self, uid: u64, profession: &str, now_ms: u64) {
        self.entries.entry(uid).or_default().profession = profession.to_string();
        self.dirty_since_ms = Some(now_ms);
    }

    pub fn set_fight_point(&mut self, uid: u64, fight_point: u64, now_ms: u64) {
        self.entries.entry(uid).or_default().fight_point = fight_point;
        self.dirty_since_ms = Some(now_ms);
    }

    fn serialize(&self) -> Option<String> {
        match serde_json::to_string_pretty(&self.entries) {
            Ok(json) => Some(json),
            Err(e) => {
                log::error!("Failed to serialize user cache: {}", e);
                None
            }
        }
    }

    /// Returns the pending write once the debounce window has passed.
    pub fn take_flush(&mut self, now_ms: u64) -> Option<PendingFlush> {
        let dirty_since = self.dirty_since_ms?;
        if now_ms.saturating_sub(dirty_since) < SAVE_DEBOUNCE_MS {
            return None;
        }
        self.take_flush_forced()
    }

    /// Immediate flush for shutdown, ignoring the debounce window.
    pub fn take_flush_forced(&mut self) -> Option<PendingFlush> {
        self.dirty_since_ms.take()?;
        Some(PendingFlush {
            path: self.path.clone(),
            json: self.serialize()?,
        })
    }
}
