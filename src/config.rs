use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Runtime-changeable behavior, kept next to the executable as settings.json.
/// The dashboard reads and writes this over the control channel.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Archive and clear the current fight when a new scene server is matched.
    pub auto_clear_on_server_change: bool,
    /// Archive and clear the current fight when the connection goes idle.
    pub auto_clear_on_timeout: bool,
    /// Only count damage dealt to the elite training dummy.
    pub only_record_elite_dummy: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_clear_on_server_change: true,
            auto_clear_on_timeout: false,
            only_record_elite_dummy: false,
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            // Create default if missing
            let default_settings = Self::default();
            default_settings.save(path);
            return default_settings;
        }

        match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self, path: &Path) {
        if let Ok(json) = serde_json::to_string_pretty(self) {
            if let Err(e) = fs::write(path, json) {
                log::error!("Failed to save settings: {}", e);
            }
        }
    }
}
