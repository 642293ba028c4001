//! Configuration management for the power-map engine
//!
//! Handles loading, validation, and profile management of engine settings.
//! Retention, decay, and merge-policy knobs live here so the graph builder
//! stays a pure function of its inputs.

use crate::error::{PowerMapError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub engine: EngineConfig,
    pub ingestion: IngestionConfig,
    pub narrative: NarrativeConfig,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Policy for merging a manual informal edge weight with the decayed
/// communication-derived weight of the same pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergePolicy {
    /// Effective weight is the maximum of the two (manual input is a floor)
    Max,
    /// Effective weight is the sum of the two
    Sum,
    /// Manual weight overrides the derived weight entirely
    Override,
}

/// Graph builder and metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Communication events older than this are dropped before graph influence
    pub retention_days: u32,
    /// Half-life of the exponential decay applied to event contributions
    pub half_life_days: u32,
    /// Number of entries per ranked insight list
    pub top_k: usize,
    /// Manual/derived weight merge policy
    pub merge_policy: MergePolicy,
    /// Fixed weight assigned to formal reports-to edges
    pub formal_edge_weight: f64,
    /// Default weight hint for message events
    pub message_weight: f64,
    /// Default weight hint for meeting events
    pub meeting_weight: f64,
    /// Factor applied to the message hint for CC recipients
    pub cc_weight_factor: f64,
}

/// Source ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    /// Per-source deadline, e.g. "10s"
    pub source_deadline: String,
    /// Maximum raw records accepted per batch
    pub max_batch: usize,
}

/// Narrative synthesis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrativeConfig {
    /// When false, reports carry template narratives only
    pub enabled: bool,
    /// "template" or "api"
    pub provider: String,
    /// Endpoint for the api provider
    pub endpoint: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub model: String,
    pub temperature: f32,
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention_days: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub half_life_days: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub narrative_enabled: Option<bool>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PowerMapError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| PowerMapError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        // Apply environment variable overrides
        config.apply_env_overrides();

        // Validate configuration
        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| PowerMapError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Load configuration with a specific profile applied
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_profile(profile)?;
        Ok(config)
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        if let Some(overrides) = self.profiles.get(profile) {
            if let Some(days) = overrides.retention_days {
                self.engine.retention_days = days;
            }
            if let Some(days) = overrides.half_life_days {
                self.engine.half_life_days = days;
            }
            if let Some(enabled) = overrides.narrative_enabled {
                self.narrative.enabled = enabled;
            }
        }
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: POWERMAP_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("POWERMAP_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        // Simple implementation for common overrides
        match path {
            "ENGINE__RETENTION_DAYS" => {
                self.engine.retention_days =
                    value.parse().map_err(|_| PowerMapError::InvalidConfigValue {
                        path: path.to_string(),
                        message: format!("Cannot parse '{}' as integer", value),
                    })?;
            }
            "ENGINE__HALF_LIFE_DAYS" => {
                self.engine.half_life_days =
                    value.parse().map_err(|_| PowerMapError::InvalidConfigValue {
                        path: path.to_string(),
                        message: format!("Cannot parse '{}' as integer", value),
                    })?;
            }
            "ENGINE__TOP_K" => {
                self.engine.top_k =
                    value.parse().map_err(|_| PowerMapError::InvalidConfigValue {
                        path: path.to_string(),
                        message: format!("Cannot parse '{}' as integer", value),
                    })?;
            }
            "NARRATIVE__ENABLED" => {
                self.narrative.enabled =
                    value.parse().map_err(|_| PowerMapError::InvalidConfigValue {
                        path: path.to_string(),
                        message: format!("Cannot parse '{}' as boolean", value),
                    })?;
            }
            "NARRATIVE__MODEL" => {
                self.narrative.model = value.to_string();
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| PowerMapError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("powermap").join("config.toml"))
    }

    /// Parse the ingestion source deadline into a Duration
    pub fn source_deadline(&self) -> Result<std::time::Duration> {
        parse_duration(&self.ingestion.source_deadline).ok_or_else(|| {
            PowerMapError::InvalidConfigValue {
                path: "ingestion.source_deadline".to_string(),
                message: format!("Invalid duration: {}", self.ingestion.source_deadline),
            }
        })
    }
}

/// Parse a duration string like "10s", "2m", "1h"
fn parse_duration(s: &str) -> Option<std::time::Duration> {
    let s = s.trim();
    let (value, multiplier): (&str, u64) = if let Some(v) = s.strip_suffix('h') {
        (v, 3600)
    } else if let Some(v) = s.strip_suffix('m') {
        (v, 60)
    } else if let Some(v) = s.strip_suffix('s') {
        (v, 1)
    } else {
        (s, 1)
    };
    value
        .parse::<u64>()
        .ok()
        .map(|v| std::time::Duration::from_secs(v * multiplier))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meta: MetaConfig {
                schema_version: "1.0.0".to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            engine: EngineConfig::default(),
            ingestion: IngestionConfig {
                source_deadline: "10s".to_string(),
                max_batch: 5000,
            },
            narrative: NarrativeConfig {
                enabled: false,
                provider: "template".to_string(),
                endpoint: "http://localhost:11434".to_string(),
                api_key_env: "POWERMAP_API_KEY".to_string(),
                model: "claude-3-5-sonnet-20241022".to_string(),
                temperature: 0.1,
            },
            profiles: HashMap::new(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retention_days: 90,
            half_life_days: 30,
            top_k: 5,
            merge_policy: MergePolicy::Max,
            formal_edge_weight: 10.0,
            message_weight: 1.0,
            meeting_weight: 2.0,
            cc_weight_factor: 0.5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(ConfigValidator::validate(&config).is_ok());
        assert_eq!(config.engine.retention_days, 90);
        assert_eq!(config.engine.half_life_days, 30);
        assert_eq!(config.engine.top_k, 5);
        assert_eq!(config.engine.merge_policy, MergePolicy::Max);
    }

    #[test]
    fn test_config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.engine.retention_days = 30;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.engine.retention_days, 30);
        assert_eq!(loaded.meta.schema_version, "1.0.0");
    }

    #[test]
    fn test_profile_overrides() {
        let mut config = Config::default();
        config.profiles.insert(
            "short".to_string(),
            ProfileOverrides {
                retention_days: Some(7),
                half_life_days: None,
                narrative_enabled: Some(true),
            },
        );

        config.apply_profile("short").unwrap();
        assert_eq!(config.engine.retention_days, 7);
        assert_eq!(config.engine.half_life_days, 30);
        assert!(config.narrative.enabled);
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(
            parse_duration("10s"),
            Some(std::time::Duration::from_secs(10))
        );
        assert_eq!(
            parse_duration("2m"),
            Some(std::time::Duration::from_secs(120))
        );
        assert_eq!(parse_duration("bogus"), None);
    }
}
