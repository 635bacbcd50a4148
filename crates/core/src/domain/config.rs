//! Configuration management for Recast
//!
//! This module provides:
//! - Mix settings (block size, alignment tolerance, channel override)
//! - Job files describing the recorded streams to reconstruct
//! - TOML serialization with async file I/O
//! - A manager for the global configuration file with corrupt-file recovery

use crate::domain::audio::{ticks_from_millis, ticks_from_secs_f64, Ticks};
use crate::domain::mixer::MixTarget;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, error, info, instrument};

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Default alignment tolerance window
pub const DEFAULT_TOLERANCE_MS: u64 = 100;
const MAX_TOLERANCE_MS: u64 = 10_000;

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

    #[error("Job file not found: {0}")]
    JobNotFound(String),
}

/// Settings of a mix session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixSettings {
    /// Output block size in bytes (rounded down to whole frames)
    pub block_bytes: usize,

    /// Maximum distance between a source sample and the mix position
    pub tolerance_ms: u64,

    /// Output channel count; the dominant format's count when unset
    pub target_channels: Option<u16>,

    /// Output format when no source reported a concrete format
    pub fallback_target: MixTarget,

    /// Duration of the chunks read from segment files
    pub chunk_ms: u64,
}

impl Default for MixSettings {
    fn default() -> Self {
        Self {
            block_bytes: 4096,
            tolerance_ms: DEFAULT_TOLERANCE_MS,
            target_channels: None,
            fallback_target: MixTarget::new(48000, 16, 2),
            chunk_ms: 100,
        }
    }
}

impl MixSettings {
    pub fn tolerance_ticks(&self) -> Ticks {
        ticks_from_millis(self.tolerance_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.block_bytes == 0 {
            return Err(ConfigError::Invalid("block_bytes must be positive".to_string()));
        }
        if self.tolerance_ms > MAX_TOLERANCE_MS {
            return Err(ConfigError::Invalid(format!(
                "tolerance_ms {} exceeds {MAX_TOLERANCE_MS}",
                self.tolerance_ms
            )));
        }
        if self.chunk_ms == 0 {
            return Err(ConfigError::Invalid("chunk_ms must be positive".to_string()));
        }
        if self.target_channels == Some(0) {
            return Err(ConfigError::Invalid("target_channels must be positive".to_string()));
        }
        self.fallback_target
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("fallback_target: {e}")))
    }
}

/// Where mixed output goes by default
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Directory for jobs that give a relative output path
    pub directory: PathBuf,

    /// Replace an existing output file
    pub overwrite: bool,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            overwrite: false,
        }
    }
}

/// Global Recast configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecastConfig {
    #[serde(default)]
    pub mix: MixSettings,
    #[serde(default)]
    pub output: OutputSettings,
}

impl RecastConfig {
    /// Load configuration from TOML file
    #[instrument(skip(path))]
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = fs::read_to_string(path).await?;
        let config: Self = toml::from_str(&contents)?;
        config.mix.validate()?;

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
}

/// One recorded segment of a stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentSpec {
    /// WAV file holding the segment's PCM
    pub path: PathBuf,
    pub source_id: String,
    #[serde(default)]
    pub display_name: String,
    /// Position of the segment's first sample on the timeline
    pub start_secs: f64,
}

impl SegmentSpec {
    pub fn start_ticks(&self) -> Ticks {
        ticks_from_secs_f64(self.start_secs)
    }
}

/// An independently captured stream, possibly with gaps between segments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSpec {
    pub name: String,
    pub segments: Vec<SegmentSpec>,
}

/// A reconstruction job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    pub name: String,

    /// Output WAV file
    pub output: PathBuf,

    /// Overrides of the global mix settings
    #[serde(default)]
    pub mix: Option<MixSettings>,

    #[serde(default)]
    pub streams: Vec<StreamSpec>,
}

impl JobConfig {
    /// Load a job file; relative segment paths are resolved against the job
    /// file's directory
    #[instrument(skip(path))]
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::JobNotFound(path.display().to_string()));
        }
        info!(path = %path.display(), "Loading job");

        let contents = fs::read_to_string(path).await?;
        let mut job: Self = toml::from_str(&contents)?;
        job.validate()?;

        if let Some(base) = path.parent() {
            job.resolve_paths(base);
        }

        debug!(streams = job.streams.len(), "Job loaded");
        Ok(job)
    }

    #[instrument(skip(self, path))]
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, toml::to_string_pretty(self)?).await?;
        info!(path = %path.display(), "Job saved");
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.streams.is_empty() {
            return Err(ConfigError::Invalid(format!("job '{}' has no streams", self.name)));
        }

        for stream in &self.streams {
            if stream.segments.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "stream '{}' has no segments",
                    stream.name
                )));
            }
            for segment in &stream.segments {
                if segment.source_id.is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "segment {} in stream '{}' has no source id",
                        segment.path.display(),
                        stream.name
                    )));
                }
                if !segment.start_secs.is_finite() || segment.start_secs < 0.0 {
                    return Err(ConfigError::Invalid(format!(
                        "segment {} has invalid start {}",
                        segment.path.display(),
                        segment.start_secs
                    )));
                }
            }
        }

        match &self.mix {
            Some(mix) => mix.validate(),
            None => Ok(()),
        }
    }

    /// Job settings, falling back to the global defaults
    pub fn effective_mix(&self, defaults: &MixSettings) -> MixSettings {
        self.mix.clone().unwrap_or_else(|| defaults.clone())
    }

    /// Make relative segment paths relative to `base`
    pub fn resolve_paths(&mut self, base: &Path) {
        for segment in self.streams.iter_mut().flat_map(|s| s.segments.iter_mut()) {
            if segment.path.is_relative() {
                segment.path = base.join(&segment.path);
            }
        }
    }

    /// Output file; a relative path is placed in the configured directory
    pub fn output_path(&self, output: &OutputSettings) -> PathBuf {
        if self.output.is_relative() {
            output.directory.join(&self.output)
        } else {
            self.output.clone()
        }
    }

    /// Example job written by `recast init-job`
    pub fn sample() -> Self {
        Self {
            name: "lecture-2024-03-12".to_string(),
            output: PathBuf::from("lecture.wav"),
            mix: None,
            streams: vec![
                StreamSpec {
                    name: "podium".to_string(),
                    segments: vec![
                        SegmentSpec {
                            path: PathBuf::from("podium-part1.wav"),
                            source_id: "podium-1".to_string(),
                            display_name: "Podium microphone".to_string(),
                            start_secs: 0.0,
                        },
                        SegmentSpec {
                            path: PathBuf::from("podium-part2.wav"),
                            source_id: "podium-2".to_string(),
                            display_name: "Podium microphone (restart)".to_string(),
                            start_secs: 1800.0,
                        },
                    ],
                },
                StreamSpec {
                    name: "room".to_string(),
                    segments: vec![SegmentSpec {
                        path: PathBuf::from("room.wav"),
                        source_id: "room".to_string(),
                        display_name: "Room capture".to_string(),
                        start_secs: 2.5,
                    }],
                },
            ],
        }
    }
}

/// Manager for the global configuration file
///
/// The file lives at `~/.config/recast/config.toml` on Linux and macOS and
/// `%APPDATA%\recast\config.toml` on Windows.
pub struct ConfigManager {
    config_dir: PathBuf,
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new(config_dir: PathBuf) -> Self {
        let config_path = config_dir.join("config.toml");
        Self {
            config_dir,
            config_path,
        }
    }

    pub fn default_config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join("recast"))
            .ok_or_else(|| ConfigError::Invalid("Could not determine config directory".to_string()))
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load configuration from file
    ///
    /// If the config file doesn't exist, the default is written and returned.
    /// If the config file is corrupt, it is backed up and the default is used.
    #[instrument(skip(self))]
    pub async fn load(&self) -> RecastConfig {
        if !self.config_path.exists() {
            info!(
                path = %self.config_path.display(),
                "Config file not found, creating default"
            );

            let config = RecastConfig::default();
            if let Err(e) = config.save_to_file(&self.config_path).await {
                error!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Failed to save default config"
                );
            }
            return config;
        }

        match RecastConfig::load_from_file(&self.config_path).await {
            Ok(config) => config,
            Err(e) => {
                error!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Failed to load config, using default"
                );

                let backup_path = self.config_path.with_extension("toml.corrupt");
                if let Err(copy_err) = fs::copy(&self.config_path, &backup_path).await {
                    error!(
                        path = %backup_path.display(),
                        error = %copy_err,
                        "Failed to backup corrupt config"
                    );
                }

                RecastConfig::default()
            }
        }
    }

    #[instrument(skip(self, config))]
    pub async fn save(&self, config: &RecastConfig) -> Result<()> {
        fs::create_dir_all(&self.config_dir).await?;
        config.save_to_file(&self.config_path).await
    }

    pub fn exists(&self) -> bool {
        self.config_path.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_serialization() {
        let mut config = RecastConfig::default();
        config.mix.target_channels = Some(1);

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: RecastConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(parsed.mix, config.mix);
        assert_eq!(parsed.output.directory, config.output.directory);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: RecastConfig = toml::from_str("[mix]\ntolerance_ms = 250\n").unwrap();
        assert_eq!(parsed.mix.tolerance_ms, 250);
        assert_eq!(parsed.mix.block_bytes, 4096);
        assert_eq!(parsed.mix.tolerance_ticks(), 2_500_000);
        assert!(!parsed.output.overwrite);
    }

    #[test]
    fn test_mix_settings_validation() {
        assert!(MixSettings::default().validate().is_ok());

        let zero_block = MixSettings {
            block_bytes: 0,
            ..MixSettings::default()
        };
        assert!(zero_block.validate().is_err());

        let huge_tolerance = MixSettings {
            tolerance_ms: 60_000,
            ..MixSettings::default()
        };
        assert!(huge_tolerance.validate().is_err());

        let bad_fallback = MixSettings {
            fallback_target: MixTarget::new(48000, 12, 2),
            ..MixSettings::default()
        };
        assert!(bad_fallback.validate().is_err());
    }

    #[test]
    fn test_job_validation() {
        let job = JobConfig::sample();
        assert!(job.validate().is_ok());

        let mut empty = job.clone();
        empty.streams.clear();
        assert!(empty.validate().is_err());

        let mut negative = job.clone();
        negative.streams[0].segments[0].start_secs = -1.0;
        assert!(negative.validate().is_err());

        let mut anonymous = job;
        anonymous.streams[1].segments[0].source_id.clear();
        assert!(anonymous.validate().is_err());
    }

    #[test]
    fn test_effective_mix() {
        let defaults = MixSettings::default();
        let mut job = JobConfig::sample();
        assert_eq!(job.effective_mix(&defaults), defaults);

        job.mix = Some(MixSettings {
            tolerance_ms: 40,
            ..MixSettings::default()
        });
        assert_eq!(job.effective_mix(&defaults).tolerance_ms, 40);
    }

    #[tokio::test]
    async fn test_job_round_trip_resolves_paths() {
        let temp_dir = TempDir::new().unwrap();
        let job_path = temp_dir.path().join("job.toml");

        JobConfig::sample().save_to_file(&job_path).await.unwrap();
        let loaded = JobConfig::load_from_file(&job_path).await.unwrap();

        assert_eq!(loaded.output, PathBuf::from("lecture.wav"));
        assert_eq!(
            loaded.streams[0].segments[1].path,
            temp_dir.path().join("podium-part2.wav")
        );
        assert_eq!(loaded.streams[0].segments[1].start_ticks(), 18_000_000_000);
    }

    #[test]
    fn test_output_path() {
        let mut job = JobConfig::sample();
        let output = OutputSettings {
            directory: PathBuf::from("/srv/mixes"),
            overwrite: false,
        };
        assert_eq!(job.output_path(&output), PathBuf::from("/srv/mixes/lecture.wav"));

        job.output = PathBuf::from("/tmp/elsewhere.wav");
        assert_eq!(job.output_path(&output), PathBuf::from("/tmp/elsewhere.wav"));
    }

    #[tokio::test]
    async fn test_missing_job_file() {
        let temp_dir = TempDir::new().unwrap();
        let result = JobConfig::load_from_file(temp_dir.path().join("nope.toml")).await;
        assert!(matches!(result, Err(ConfigError::JobNotFound(_))));
    }

    #[tokio::test]
    async fn test_save_and_load_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let mut config = RecastConfig::default();
        config.mix.block_bytes = 8192;
        config.save_to_file(&config_path).await.unwrap();

        let loaded = RecastConfig::load_from_file(&config_path).await.unwrap();
        assert_eq!(loaded.mix.block_bytes, 8192);
    }

    #[tokio::test]
    async fn test_manager_writes_default_when_missing() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::new(temp_dir.path().to_path_buf());

        assert!(!manager.exists());
        let config = manager.load().await;
        assert_eq!(config.mix, MixSettings::default());
        assert!(manager.exists());
    }

    #[tokio::test]
    async fn test_manager_backs_up_corrupt_config() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::new(temp_dir.path().to_path_buf());
        tokio::fs::write(manager.config_path(), "mix = [[[").await.unwrap();

        let config = manager.load().await;
        assert_eq!(config.mix, MixSettings::default());
        assert!(temp_dir.path().join("config.toml.corrupt").exists());
    }
}
