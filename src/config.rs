use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

const APP_QUALIFIER: &str = "com";
const APP_ORGANIZATION: &str = "chat";
const APP_NAME: &str = "chat_core";
const PREFS_FILE: &str = "prefs.json";

/// User preferences persisted between runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientPrefs {
    pub endpoint: String,
    pub device_ip: String,
    pub dark_mode: bool,
}

impl Default for ClientPrefs {
    fn default() -> Self {
        Self {
            endpoint: "ws://localhost:3000".to_string(),
            device_ip: "127.0.0.1".to_string(),
            dark_mode: false,
        }
    }
}

impl ClientPrefs {
    /// Get the preferences file path
    fn get_prefs_path() -> Option<PathBuf> {
        if let Ok(test_path) = std::env::var("CHAT_TEST_CONFIG_DIR") {
            return Some(PathBuf::from(test_path).join(PREFS_FILE));
        }

        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.config_dir().join(PREFS_FILE))
    }

    /// Load preferences from disk or return default
    pub fn load() -> Self {
        let path = match Self::get_prefs_path() {
            Some(p) => p,
            None => return Self::default(),
        };

        match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }

    /// Save preferences to disk
    pub fn save(&self) {
        let path = match Self::get_prefs_path() {
            Some(p) => p,
            None => return,
        };

        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }

        if let Ok(json) = serde_json::to_string_pretty(self) {
            let _ = fs::write(path, json);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefs_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        // not parallel-safe with other env-var tests, none exist in this crate
        unsafe {
            std::env::set_var("CHAT_TEST_CONFIG_DIR", dir.path());
        }

        let prefs = ClientPrefs {
            endpoint: "ws://example.test:9000".to_string(),
            device_ip: "192.168.1.7".to_string(),
            dark_mode: true,
        };
        prefs.save();

        let loaded = ClientPrefs::load();
        assert_eq!(loaded.endpoint, "ws://example.test:9000");
        assert_eq!(loaded.device_ip, "192.168.1.7");
        assert!(loaded.dark_mode);

        unsafe {
            std::env::remove_var("CHAT_TEST_CONFIG_DIR");
        }
    }

    #[test]
    fn test_default_prefs() {
        let prefs = ClientPrefs::default();
        assert_eq!(prefs.endpoint, "ws://localhost:3000");
        assert!(!prefs.dark_mode);
    }
}
