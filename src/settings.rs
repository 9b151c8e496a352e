//! Shared settings for the chat-copilot CLI.
//! Persisted in the platform-specific config directory via `directories::ProjectDirs`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Application settings that can be saved and loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Decision service API base URL
    pub decision_base_url: String,
    /// Decision service API key
    pub decision_api_key: String,
    /// Decision service model name
    pub decision_model: String,
    /// Reply-generation service API base URL
    pub reply_base_url: String,
    /// Reply-generation service API key
    pub reply_api_key: String,
    /// Reply-generation service model name
    pub reply_model: String,
    /// Device-operating agent base URL
    pub device_base_url: String,
    /// Device-operating agent API key
    pub device_api_key: String,
    /// Use the offline keyword-rule classifier instead of the decision service
    pub rule_classifier: bool,
    /// Maximum retries for model requests
    pub max_retries: u32,
    /// Retry delay in seconds
    pub retry_delay: u64,
    /// Continuous-reply cycle cap
    pub max_cycle_times: u32,
    /// Pause between polls in seconds
    pub wait_interval_secs: u64,
    /// Extraction retry budget per poll
    pub max_retry_times: u32,
    /// Consecutive empty-round cap
    pub max_idle_rounds: u32,
    /// History file path
    pub history_path: String,
    /// Forever-memory file path
    pub forever_memory_path: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            decision_base_url: "http://localhost:8000/v1".to_string(),
            decision_api_key: "EMPTY".to_string(),
            decision_model: "glm-4-flash".to_string(),
            reply_base_url: "http://localhost:8000/v1".to_string(),
            reply_api_key: "EMPTY".to_string(),
            reply_model: "glm-4-flash".to_string(),
            device_base_url: "http://localhost:9000".to_string(),
            device_api_key: "EMPTY".to_string(),
            rule_classifier: false,
            max_retries: 3,
            retry_delay: 2,
            max_cycle_times: 10,
            wait_interval_secs: 5,
            max_retry_times: 3,
            max_idle_rounds: 60,
            history_path: "chat_history.json".to_string(),
            forever_memory_path: "forever_memory.txt".to_string(),
        }
    }
}

impl AppSettings {
    /// Get the config directory path.
    pub fn config_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "chatcopilot", "chat-copilot")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the settings file path.
    pub fn settings_path() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join("settings.json"))
    }

    /// Load settings from the config file, falling back to defaults.
    pub fn load() -> Self {
        Self::settings_path()
            .and_then(|path| fs::read_to_string(&path).ok())
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default()
    }

    /// Save settings to the config file.
    pub fn save(&self) -> Result<(), String> {
        let dir = Self::config_dir().ok_or("Cannot determine config directory")?;

        fs::create_dir_all(&dir)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;

        let path = dir.join("settings.json");
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize settings: {}", e))?;

        fs::write(&path, content).map_err(|e| format!("Failed to write settings file: {}", e))?;

        Ok(())
    }
}
