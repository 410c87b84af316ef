//! Configuration management for SimpleEQ
//!
//! This module provides:
//! - [`EqConfig`], the TOML configuration of the offline driver
//! - [`PresetStore`], named parameter presets stored as TOML files

use crate::domain::params::ParameterSnapshot;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, instrument};

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur during configuration operations
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Preset not found: {0}")]
    PresetNotFound(String),
}

/// Supported sample-rate range (Hz)
pub const SAMPLE_RATE_RANGE: std::ops::RangeInclusive<u32> = 8_000..=384_000;
/// Largest accepted processing block
pub const MAX_BLOCK_SIZE: usize = 65_536;
/// Largest accepted response width
pub const MAX_DISPLAY_WIDTH: usize = 16_384;

/// Audio processing settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate
    pub sample_rate: u32,

    /// Processing block size in frames
    pub block_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            block_size: 512,
        }
    }
}

/// Response display settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Number of response points
    pub width: usize,

    /// Update polling rate in Hz
    pub refresh_hz: u32,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 600,
            refresh_hz: 60,
        }
    }
}

/// Preset storage settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresetConfig {
    /// Preset directory
    pub dir: PathBuf,
}

impl Default for PresetConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("presets"),
        }
    }
}

/// Complete SimpleEQ configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EqConfig {
    pub audio: AudioConfig,
    pub display: DisplayConfig,
    pub presets: PresetConfig,
    pub parameters: ParameterSnapshot,
}

impl EqConfig {
    /// Load configuration from TOML file
    #[instrument(skip(path))]
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = fs::read_to_string(path).await?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;

        debug!("Configuration loaded successfully");
        Ok(config)
    }

    /// Save configuration to TOML file
    #[instrument(skip(self, path))]
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        info!(path = %path.display(), "Saving configuration");

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let toml_str = toml::to_string_pretty(self)?;
        fs::write(path, toml_str).await?;

        debug!("Configuration saved successfully");
        Ok(())
    }

    /// Reject settings the processing path cannot run with
    ///
    /// Parameter values are not checked here; they are clamped on use.
    pub fn validate(&self) -> Result<()> {
        if !SAMPLE_RATE_RANGE.contains(&self.audio.sample_rate) {
            return Err(ConfigError::Invalid(format!(
                "sample_rate {} outside {}..={}",
                self.audio.sample_rate,
                SAMPLE_RATE_RANGE.start(),
                SAMPLE_RATE_RANGE.end()
            )));
        }
        if self.audio.block_size == 0 || self.audio.block_size > MAX_BLOCK_SIZE {
            return Err(ConfigError::Invalid(format!(
                "block_size {} outside 1..={MAX_BLOCK_SIZE}",
                self.audio.block_size
            )));
        }
        if self.display.width == 0 || self.display.width > MAX_DISPLAY_WIDTH {
            return Err(ConfigError::Invalid(format!(
                "display width {} outside 1..={MAX_DISPLAY_WIDTH}",
                self.display.width
            )));
        }
        if self.display.refresh_hz == 0 {
            return Err(ConfigError::Invalid("refresh_hz must be positive".to_string()));
        }
        Ok(())
    }

    pub fn sample_rate(&self) -> f64 {
        f64::from(self.audio.sample_rate)
    }
}

/// Named parameter presets, one TOML file per preset
pub struct PresetStore {
    preset_dir: PathBuf,
}

impl PresetStore {
    pub fn new(preset_dir: PathBuf) -> Self {
        Self { preset_dir }
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ' '));
        if !valid {
            return Err(ConfigError::Invalid(format!("invalid preset name: {name:?}")));
        }
        Ok(self.preset_dir.join(format!("{}.toml", name)))
    }

    /// List all available presets
    #[instrument(skip(self))]
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut presets = Vec::new();

        if !fs::try_exists(&self.preset_dir).await? {
            return Ok(presets);
        }

        let mut entries = fs::read_dir(&self.preset_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|e| e == "toml").unwrap_or(false) {
                if let Some(name) = path.file_stem().and_then(|n| n.to_str()) {
                    presets.push(name.to_string());
                }
            }
        }

        presets.sort();
        debug!(count = presets.len(), "Listed presets");
        Ok(presets)
    }

    /// Load a preset by name
    #[instrument(skip(self))]
    pub async fn load(&self, name: &str) -> Result<ParameterSnapshot> {
        let path = self.path_for(name)?;

        if !fs::try_exists(&path).await? {
            return Err(ConfigError::PresetNotFound(name.to_string()));
        }

        let contents = fs::read_to_string(&path).await?;
        let snapshot: ParameterSnapshot = toml::from_str(&contents)?;
        Ok(snapshot.sanitized())
    }

    /// Save a preset by name, replacing any existing one
    #[instrument(skip(self, snapshot))]
    pub async fn save(&self, name: &str, snapshot: &ParameterSnapshot) -> Result<()> {
        let path = self.path_for(name)?;
        fs::create_dir_all(&self.preset_dir).await?;

        let toml_str = toml::to_string_pretty(snapshot)?;
        fs::write(&path, toml_str).await?;

        info!(name, "Preset saved");
        Ok(())
    }

    /// Delete a preset by name
    #[instrument(skip(self))]
    pub async fn delete(&self, name: &str) -> Result<()> {
        let path = self.path_for(name)?;

        if !fs::try_exists(&path).await? {
            return Err(ConfigError::PresetNotFound(name.to_string()));
        }

        fs::remove_file(&path).await?;
        info!(name, "Preset deleted");
        Ok(())
    }
}
