use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use backend::BackendConfig;
use timeline::EditorSettings;

use crate::{Result, StudioError};

/// Persistent client settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudioConfig {
    pub backend: BackendConfig,
    pub editor: EditorSettings,
}

impl StudioConfig {
    /// `<config dir>/episode_studio/config.json`
    pub fn default_path() -> PathBuf {
        let base = dirs::config_dir().unwrap_or_else(std::env::temp_dir);
        base.join("episode_studio").join("config.json")
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.backend = self.backend.with_base_url(url);
        self
    }

    /// Load configuration from JSON. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file; using defaults");
            return Ok(Self::default());
        }
        let json = std::fs::read_to_string(path)
            .map_err(|e| StudioError::Config(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&json)
            .map_err(|e| StudioError::Config(format!("{}: {e}", path.display())))
    }

    /// Save configuration to JSON, creating the parent directory.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StudioError::Config(format!("{}: {e}", parent.display())))?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| StudioError::Config(e.to_string()))?;
        std::fs::write(path, json)
            .map_err(|e| StudioError::Config(format!("{}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = StudioConfig::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config, StudioConfig::default());
    }

    #[test]
    fn save_then_load_keeps_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = StudioConfig::default().with_base_url("http://studio.local/api");
        config.editor.pixels_per_second = 45.0;
        config.save(&path).unwrap();
        assert_eq!(StudioConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"editor": {"pixels_per_second": 60.0}}"#).unwrap();
        let config = StudioConfig::load(&path).unwrap();
        assert_eq!(config.editor.pixels_per_second, 60.0);
        assert_eq!(config.editor.min_clip_duration_ms, 500);
        assert_eq!(config.backend, BackendConfig::default());
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            StudioConfig::load(&path),
            Err(StudioError::Config(_))
        ));
    }
}
