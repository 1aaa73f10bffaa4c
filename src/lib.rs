use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

pub mod capture;
pub mod config;
pub mod protocol;
pub mod server;
pub mod session;
pub mod stats;
pub mod storage;
pub mod tables;

use config::Settings;
use session::Session;
use stats::manager::UserManager;
use storage::cache::PlayerCache;
use storage::history::HistoryWriter;
use tables::SkillBook;

/// Everything the capture loop, the periodic tasks and the WebSocket layer
/// share. The whole reassembly/statistics pipeline lives behind one mutex so
/// at most one frame is ever being processed; readers only ever take
/// serialized copies out of it.
pub struct AppState {
    pub session: Mutex<Session>,
    pub settings: Mutex<Settings>,
    pub paused: AtomicBool,
    pub history: HistoryWriter,
    settings_path: PathBuf,
}

impl AppState {
    pub fn new(data_dir: &Path) -> Self {
        let settings_path = data_dir.join("settings.json");
        let settings = Settings::load(&settings_path);

        let cache = PlayerCache::load(data_dir.join("users.json"));
        let book = SkillBook::load(&data_dir.join("skill_config.json"));
        let monsters = tables::load_monster_names(&data_dir.join("monster_names.json"));
        let users = UserManager::new(cache, book, monsters);

        Self {
            session: Mutex::new(Session::new(users)),
            settings: Mutex::new(settings),
            paused: AtomicBool::new(false),
            history: HistoryWriter::new(data_dir.join("sessions")),
            settings_path,
        }
    }

    pub fn save_settings(&self, settings: &Settings) {
        settings.save(&self.settings_path);
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
