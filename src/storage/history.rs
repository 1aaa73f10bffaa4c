//! Session archives: one directory per combat session keyed by its start
//! timestamp, holding a summary, the aggregate snapshot, per-user detail
//! files and the combat log text.

use crate::stats::manager::UserSkillData;
use crate::stats::user::UserSummary;
use chrono::{Local, TimeZone};
use indexmap::IndexMap;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::PathBuf;

/// A fully serialized copy of one session, detached from the live state.
#[derive(Debug, Serialize)]
pub struct SessionDump {
    pub start_ms: u64,
    pub end_ms: u64,
    pub users: IndexMap<u64, UserSummary>,
    pub skills: IndexMap<u64, UserSkillData>,
    pub logs: Vec<String>,
}

#[derive(Debug, Serialize)]
struct SessionSummary {
    start_ms: u64,
    end_ms: u64,
    duration_ms: u64,
    user_count: usize,
}

pub struct HistoryWriter {
    root: PathBuf,
}

impl HistoryWriter {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn session_dir(&self, start_ms: u64) -> PathBuf {
        let key = match Local.timestamp_millis_opt(start_ms as i64).single() {
            Some(ts) => ts.format("%Y%m%d-%H%M%S").to_string(),
            None => start_ms.to_string(),
        };
        self.root.join(key)
    }

    /// Writes (or rewrites) the archive of one session. Saving the same
    /// session again later just updates its directory in place.
    pub fn save(&self, dump: &SessionDump) -> io::Result<PathBuf> {
        let dir = self.session_dir(dump.start_ms);
        let users_dir = dir.join("users");
        fs::create_dir_all(&users_dir)?;

        let summary = SessionSummary {
            start_ms: dump.start_ms,
            end_ms: dump.end_ms,
            duration_ms: dump.end_ms.saturating_sub(dump.start_ms),
            user_count: dump.users.len(),
        };
        fs::write(
            dir.join("summary.json"),
            serde_json::to_string_pretty(&summary)?,
        )?;
        fs::write(
            dir.join("snapshot.json"),
            serde_json::to_string_pretty(&dump.users)?,
        )?;

        for (uid, data) in &dump.skills {
            fs::write(
                users_dir.join(format!("{}.json", uid)),
                serde_json::to_string_pretty(data)?,
            )?;
        }

        let mut log_text = dump.logs.join("\n");
        if !log_text.is_empty() {
            log_text.push('\n');
        }
        fs::write(dir.join("combat.log"), log_text)?;

        Ok(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "resonance-meter-history-{}-{}",
            tag,
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_save_writes_all_files() {
        let root = temp_root("save");
        let writer = HistoryWriter::new(root.clone());

        let dump = SessionDump {
            start_ms: 1_700_000_000_000,
            end_ms: 1_700_000_090_000,
            users: IndexMap::new(),
            skills: IndexMap::new(),
            logs: vec!["[DMG] SRC: a TGT: b".to_string()],
        };

        let dir = writer.save(&dump).unwrap();
        assert!(dir.join("summary.json").exists());
        assert!(dir.join("snapshot.json").exists());
        assert!(dir.join("users").is_dir());

        let log = fs::read_to_string(dir.join("combat.log")).unwrap();
        assert_eq!(log, "[DMG] SRC: a TGT: b\n");

        let summary: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.join("summary.json")).unwrap()).unwrap();
        assert_eq!(summary["duration_ms"], 90_000);

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_resave_is_idempotent() {
        let root = temp_root("resave");
        let writer = HistoryWriter::new(root.clone());

        let dump = SessionDump {
            start_ms: 1_700_000_000_000,
            end_ms: 1_700_000_001_000,
            users: IndexMap::new(),
            skills: IndexMap::new(),
            logs: Vec::new(),
        };

        let first = writer.save(&dump).unwrap();
        let second = writer.save(&dump).unwrap();
        assert_eq!(first, second);

        let _ = fs::remove_dir_all(&root);
    }
}
