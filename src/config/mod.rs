//! Configuration management for supportchat

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::scroll::ScrollPolicy;
use crate::streaming::{DeltaExtractor, DEFAULT_DELTA_FIELDS};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub stream: StreamConfig,
    pub scroll: ScrollConfig,
    pub uploads: UploadConfig,
    pub identity: IdentityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub connect_timeout_secs: u64,
    /// Timeout for history and upload requests (not for reply streams)
    pub request_timeout_secs: u64,
    /// A reply stream that stays silent this long is treated as broken
    pub stream_chunk_timeout_secs: u64,
    pub history_page_size: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080/api".to_string(),
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
            stream_chunk_timeout_secs: 60,
            history_page_size: 20,
        }
    }
}

impl ApiConfig {
    pub fn stream_chunk_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_chunk_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Fields tried in order for the delta text; `/`-prefixed entries are JSON pointers
    pub delta_fields: Vec<String>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            delta_fields: DEFAULT_DELTA_FIELDS.iter().map(|f| f.to_string()).collect(),
        }
    }
}

impl StreamConfig {
    pub fn extractor(&self) -> DeltaExtractor {
        DeltaExtractor::new(self.delta_fields.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrollConfig {
    pub near_bottom_threshold: f32,
    pub auto_scroll_guard_ms: u64,
}

impl Default for ScrollConfig {
    fn default() -> Self {
        Self {
            near_bottom_threshold: 100.0,
            auto_scroll_guard_ms: 300,
        }
    }
}

impl ScrollConfig {
    pub fn policy(&self) -> ScrollPolicy {
        ScrollPolicy::new(
            self.near_bottom_threshold,
            Duration::from_millis(self.auto_scroll_guard_ms),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// How long a finished job stays visible
    pub display_ms: u64,
    pub max_file_bytes: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            display_ms: 3000,
            max_file_bytes: 10 * 1024 * 1024, // 10MB
        }
    }
}

impl UploadConfig {
    pub fn display_for(&self) -> Duration {
        Duration::from_millis(self.display_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct IdentityConfig {
    pub user_id: Option<String>,
}

impl Config {
    /// Load configuration from default location or create default
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Config::default())
        }
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        Ok(config)
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "supportchat") {
            let config_dir = proj_dirs.config_dir();
            std::fs::create_dir_all(config_dir)?;
            Ok(config_dir.join("config.toml"))
        } else {
            Ok(PathBuf::from("config.toml"))
        }
    }

    /// Save configuration to default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[api]\nbase_url = \"https://help.example.com/api\"\n\n[uploads]\ndisplay_ms = 1500\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.api.base_url, "https://help.example.com/api");
        assert_eq!(config.api.stream_chunk_timeout_secs, 60);
        assert_eq!(config.uploads.display_ms, 1500);
        assert_eq!(config.scroll.near_bottom_threshold, 100.0);
        assert_eq!(config.identity.user_id, None);
    }

    #[test]
    fn test_save_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::default();
        config.identity.user_id = Some("visitor-42".to_string());
        config.stream.delta_fields = vec!["token".to_string()];
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.identity.user_id.as_deref(), Some("visitor-42"));
        assert_eq!(loaded.stream.delta_fields, vec!["token".to_string()]);
    }

    #[test]
    fn test_invalid_toml_reports_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[api\nbase_url = 1").unwrap();
        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("broken.toml"));
    }
}
