//! Tool settings
//!
//! Stored as plain JSON (`settings.json`) in the platform config directory,
//! or at the path given with `--config`. A missing file means defaults.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use openapi_contract::{ConversionOptions, LintSettings};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Runtime client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientSettings {
    /// Overrides the document's first server
    pub base_url: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Fail on contract violations instead of logging them
    pub strict: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: 30,
            strict: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Settings file version
    pub version: u32,
    pub lint: LintSettings,
    pub conversion: ConversionOptions,
    pub client: ClientSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: 1,
            lint: LintSettings::default(),
            conversion: ConversionOptions::default(),
            client: ClientSettings::default(),
        }
    }
}

/// Settings manager
pub struct SettingsManager {
    settings: Settings,
}

impl SettingsManager {
    /// Load `settings.json` from a directory
    pub fn new(config_dir: &Path) -> Result<Self> {
        Self::from_file(config_dir.join("settings.json"))
    }

    /// Load a specific settings file
    pub fn from_file(settings_file: PathBuf) -> Result<Self> {
        let settings = Self::load_from_file(&settings_file)?;
        Ok(Self { settings })
    }

    /// Load from `--config` if given, else from the platform config directory
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::from_file(path.to_path_buf()),
            None => Self::new(&Self::default_config_dir()?),
        }
    }

    fn default_config_dir() -> Result<PathBuf> {
        ProjectDirs::from("com", "esign-contract", "esign-contract")
            .map(|dirs| dirs.config_dir().to_path_buf())
            .context("Could not determine config directory")
    }

    fn load_from_file(path: &Path) -> Result<Settings> {
        if !path.exists() {
            debug!("No settings file at {:?}, using defaults", path);
            return Ok(Settings::default());
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        let settings: Settings = serde_json::from_str(&contents)
            .with_context(|| format!("Invalid settings file {}", path.display()))?;
        debug!("Loaded settings from {:?}", path);
        Ok(settings)
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_settings_default() {
        let temp_dir = TempDir::new().unwrap();
        let manager = SettingsManager::new(temp_dir.path()).unwrap();

        let settings = manager.get();
        assert_eq!(settings.version, 1);
        assert_eq!(settings.client.timeout_secs, 30);
        assert!(settings.client.strict);
        assert!(settings.lint.require_operation_ids);
        assert_eq!(
            settings.conversion.connector_metadata.as_ref().unwrap().categories,
            vec!["eSignature".to_string()]
        );
    }

    #[test]
    fn test_partial_settings_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("custom.json");
        std::fs::write(
            &path,
            concat!(
                r#"{"lint": {"allowedContentTypes": ["application/*"]}, "#,
                r#""conversion": {"connectorMetadata": null}}"#,
            ),
        )
        .unwrap();

        let manager = SettingsManager::discover(Some(&path)).unwrap();
        assert_eq!(manager.get().lint.allowed_content_types, vec!["application/*".to_string()]);
        assert!(manager.get().conversion.connector_metadata.is_none());
        assert_eq!(manager.get().conversion.security_visibility, "important");
        assert_eq!(manager.get().client.timeout_secs, 30);
    }

    #[test]
    fn test_malformed_settings_file() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("settings.json"), "{not json").unwrap();

        assert!(SettingsManager::new(temp_dir.path()).is_err());
    }
}
