use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Result, anyhow};

use crate::ai::gemini::{DEFAULT_API_BASE, DEFAULT_MODEL};
use crate::camera::CommandCamera;

const DEFAULT_CAMERA_DEVICE: &str = "/dev/video0";
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Environment variables checked, in order, before the config file's key
pub const API_KEY_VARS: [&str; 2] = ["GEMINI_API_KEY", "API_KEY"];

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub api_base: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub camera_device: Option<String>,
    pub camera_user_device: Option<String>,
    pub camera_command: Option<Vec<String>>,
    pub request_timeout_secs: Option<u64>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::get_config_path()?)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Ok(Self::new());
        }

        let config_content = fs::read_to_string(config_path)?;
        let config: Config = serde_json::from_str(&config_content)?;
        Ok(config)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        // Create config directory if it doesn't exist
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let config_content = serde_json::to_string_pretty(self)?;
        fs::write(config_path, config_content)?;
        Ok(())
    }

    pub fn save_default_model(model: &str) -> Result<()> {
        Self::save_default_model_to(&Self::get_config_path()?, model)
    }

    /// Update only the model, keeping every other setting in the file
    pub fn save_default_model_to(config_path: &Path, model: &str) -> Result<()> {
        let mut config = Self::load_from(config_path).unwrap_or_else(|_| Self::new());
        config.model = Some(model.to_string());
        config.save_to(config_path)
    }

    pub fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("studysphere").join("config.json"))
    }

    /// Credential from the environment first, then the config file.
    /// Absence is fatal at startup.
    pub fn resolve_api_key(&self) -> Result<String> {
        self.resolve_api_key_with(|name| std::env::var(name).ok())
    }

    fn resolve_api_key_with(&self, lookup: impl Fn(&str) -> Option<String>) -> Result<String> {
        API_KEY_VARS
            .iter()
            .find_map(|name| lookup(name))
            .or_else(|| self.api_key.clone())
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                anyhow!(
                    "API key not configured. Set GEMINI_API_KEY or add \"api_key\" to {}",
                    Self::get_config_path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|_| "config.json".to_string())
                )
            })
    }

    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    pub fn api_base(&self) -> &str {
        self.api_base.as_deref().unwrap_or(DEFAULT_API_BASE)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }

    /// Where history and logs live; `~/.local/share/studysphere` on Linux
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow!("Could not determine data directory"))?;
        Ok(data_dir.join("studysphere"))
    }

    pub fn camera(&self) -> CommandCamera {
        let device = self.camera_device.as_deref().unwrap_or(DEFAULT_CAMERA_DEVICE);
        let command = self
            .camera_command
            .clone()
            .unwrap_or_else(CommandCamera::default_command);
        let camera = CommandCamera::new(device, command);
        match &self.camera_user_device {
            Some(user_device) => camera.with_user_device(user_device),
            None => camera,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, Config::new());
        assert_eq!(config.model(), "gemini-2.5-flash");
        assert_eq!(config.request_timeout(), Duration::from_secs(120));
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = Config {
            model: Some("gemini-2.5-pro".to_string()),
            data_dir: Some(dir.path().join("data")),
            request_timeout_secs: Some(30),
            ..Config::new()
        };
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.data_dir().unwrap(), dir.path().join("data"));
    }

    #[test]
    fn test_partial_file_parses() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"model": "gemini-2.0-flash"}"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.model(), "gemini-2.0-flash");
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_save_default_model_keeps_other_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let config = Config {
            api_key: Some("secret".to_string()),
            request_timeout_secs: Some(45),
            ..Config::new()
        };
        config.save_to(&path).unwrap();

        Config::save_default_model_to(&path, "gemini-2.5-pro").unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.model(), "gemini-2.5-pro");
        assert_eq!(loaded.api_key.as_deref(), Some("secret"));
        assert_eq!(loaded.request_timeout(), Duration::from_secs(45));
    }

    #[test]
    fn test_save_default_model_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fresh").join("config.json");

        Config::save_default_model_to(&path, "gemini-2.0-flash").unwrap();
        assert_eq!(Config::load_from(&path).unwrap().model(), "gemini-2.0-flash");
    }

    #[test]
    fn test_api_key_precedence() {
        let config = Config {
            api_key: Some("from-file".to_string()),
            ..Config::new()
        };

        let key = config
            .resolve_api_key_with(|name| (name == "API_KEY").then(|| "from-env".to_string()))
            .unwrap();
        assert_eq!(key, "from-env");

        let key = config.resolve_api_key_with(|_| None).unwrap();
        assert_eq!(key, "from-file");
    }

    #[test]
    fn test_missing_api_key_is_an_error() {
        let config = Config {
            api_key: Some("   ".to_string()),
            ..Config::new()
        };
        assert!(config.resolve_api_key_with(|_| None).is_err());
    }
}
