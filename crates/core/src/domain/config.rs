//! Configuration management for fwpcm
//!
//! This module provides:
//! - Device profiles (per-direction mode tables) with TOML serialization
//! - A profile directory manager
//! - The main config file with factory-default fallback
//! - Hot-reload notifications via file system watcher

use crate::domain::mode::{ModeTable, StreamFormats};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument};

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

    #[error("File watch error: {0}")]
    WatchError(#[from] notify::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Profile not found: {0}")]
    ProfileNotFound(String),
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory holding device profiles
    pub profile_dir: PathBuf,

    /// Profile used when none is given on the command line
    #[serde(default)]
    pub default_profile: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile_dir: PathBuf::from("profiles"),
            default_profile: None,
        }
    }
}

/// Capabilities of one device model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub name: String,
    pub formats: StreamFormats,
}

impl DeviceProfile {
    /// Load a profile from a TOML file
    #[instrument(skip(path))]
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading device profile");

        let contents = fs::read_to_string(path).await?;
        let profile: Self = toml::from_str(&contents)?;

        debug!(name = %profile.name, "Device profile loaded");
        Ok(profile)
    }

    /// Save a profile to a TOML file
    #[instrument(skip(self, path))]
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        info!(path = %path.display(), "Saving device profile");

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let toml_str = toml::to_string_pretty(self)?;
        fs::write(path, toml_str).await?;

        Ok(())
    }

    /// Three-mode interface with ADAT channels in the low and mid modes
    pub fn factory_default() -> Self {
        let tx = ModeTable::from_clock_rates(&[(10, 8), (10, 4), (6, 0)]).with_midi_ports(1);
        let rx = ModeTable::from_clock_rates(&[(8, 8), (8, 4), (4, 0)]).with_midi_ports(1);

        Self {
            name: "FireWire Interface".to_string(),
            formats: StreamFormats::new(tx, rx),
        }
    }

    /// Stereo interface without MIDI or a high-rate mode
    pub fn stereo() -> Self {
        let tx = ModeTable::from_clock_rates(&[(2, 0), (2, 2), (0, 0)]);
        let rx = ModeTable::from_clock_rates(&[(2, 0), (2, 0), (0, 0)]);

        Self {
            name: "Stereo Interface".to_string(),
            formats: StreamFormats::new(tx, rx),
        }
    }
}

/// Complete fwpcm configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FwpcmConfig {
    pub app: AppConfig,
    pub device: DeviceProfile,
}

impl Default for FwpcmConfig {
    fn default() -> Self {
        Self {
            app: AppConfig::default(),
            device: DeviceProfile::factory_default(),
        }
    }
}

impl FwpcmConfig {
    /// Load configuration from TOML file
    #[instrument(skip(path))]
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = fs::read_to_string(path).await?;
        let config: Self = toml::from_str(&contents)?;

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

/// File system watcher for profile hot-reload
pub struct ProfileWatcher {
    _watcher: notify::RecommendedWatcher,
    changes_tx: broadcast::Sender<PathBuf>,
}

impl ProfileWatcher {
    /// Watch `profile_dir` for created or modified TOML files
    pub async fn new(profile_dir: PathBuf) -> Result<Self> {
        use notify::Watcher;

        let (changes_tx, _changes_rx) = broadcast::channel(32);

        fs::create_dir_all(&profile_dir).await?;

        let tx_clone = changes_tx.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                if matches!(
                    event.kind,
                    notify::EventKind::Create(_) | notify::EventKind::Modify(_)
                ) {
                    for path in event.paths {
                        if path.extension().and_then(|e| e.to_str()) == Some("toml") {
                            // No subscriber is not an error
                            let _ = tx_clone.send(path);
                        }
                    }
                }
            }
        })?;

        watcher.watch(&profile_dir, notify::RecursiveMode::NonRecursive)?;

        info!(path = %profile_dir.display(), "Profile watcher started");

        Ok(Self {
            _watcher: watcher,
            changes_tx,
        })
    }

    /// Subscribe to profile change events
    pub fn subscribe(&self) -> broadcast::Receiver<PathBuf> {
        self.changes_tx.subscribe()
    }
}

/// Device profile directory
pub struct ProfileManager {
    profile_dir: PathBuf,
}

impl ProfileManager {
    pub fn new(profile_dir: PathBuf) -> Self {
        Self { profile_dir }
    }

    pub fn profile_path(&self, name: &str) -> PathBuf {
        self.profile_dir.join(format!("{}.toml", name))
    }

    /// List all available profiles
    #[instrument(skip(self))]
    pub async fn list_profiles(&self) -> Result<Vec<String>> {
        let mut profiles = Vec::new();

        if !self.profile_dir.exists() {
            return Ok(profiles);
        }

        let mut entries = fs::read_dir(&self.profile_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|e| e == "toml").unwrap_or(false) {
                if let Some(name) = path.file_stem().and_then(|n| n.to_str()) {
                    profiles.push(name.to_string());
                }
            }
        }

        profiles.sort();
        debug!(count = profiles.len(), "Listed profiles");
        Ok(profiles)
    }

    #[instrument(skip(self))]
    pub async fn load_profile(&self, name: &str) -> Result<DeviceProfile> {
        let path = self.profile_path(name);

        if !path.exists() {
            return Err(ConfigError::ProfileNotFound(name.to_string()));
        }

        DeviceProfile::load_from_file(&path).await
    }

    #[instrument(skip(self, profile))]
    pub async fn save_profile(&self, name: &str, profile: &DeviceProfile) -> Result<()> {
        profile.save_to_file(self.profile_path(name)).await
    }

    #[instrument(skip(self))]
    pub async fn delete_profile(&self, name: &str) -> Result<()> {
        let path = self.profile_path(name);

        if !path.exists() {
            return Err(ConfigError::ProfileNotFound(name.to_string()));
        }

        fs::remove_file(&path).await?;
        info!(name, "Profile deleted");
        Ok(())
    }

    pub async fn profile_exists(&self, name: &str) -> bool {
        self.profile_path(name).exists()
    }
}

/// Main configuration file at `~/.config/fwpcm/config.toml`
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

    /// `~/.config/fwpcm` on Linux/Mac, `%APPDATA%\fwpcm` on Windows
    pub fn default_config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join("fwpcm"))
            .ok_or_else(|| ConfigError::Invalid("Could not determine config directory".to_string()))
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load configuration from file
    ///
    /// A missing file yields the factory default, which is then saved. A
    /// corrupt file is backed up to `config.toml.corrupt` and replaced by the
    /// factory default in memory.
    #[instrument(skip(self))]
    pub async fn load(&self) -> FwpcmConfig {
        if !self.config_path.exists() {
            info!(
                path = %self.config_path.display(),
                "Config file not found, creating factory default"
            );

            let mut config = FwpcmConfig::default();
            config.app.profile_dir = self.config_dir.join("profiles");

            if let Err(e) = self.save(&config).await {
                error!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Failed to save factory default config"
                );
            }

            return config;
        }

        match FwpcmConfig::load_from_file(&self.config_path).await {
            Ok(config) => config,
            Err(e) => {
                error!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Failed to load config, using factory default"
                );

                let backup_path = self.config_path.with_extension("toml.corrupt");
                if let Err(copy_err) = fs::copy(&self.config_path, &backup_path).await {
                    error!(
                        path = %backup_path.display(),
                        error = %copy_err,
                        "Failed to backup corrupt config"
                    );
                }

                FwpcmConfig::default()
            }
        }
    }

    #[instrument(skip(self, config))]
    pub async fn save(&self, config: &FwpcmConfig) -> Result<()> {
        fs::create_dir_all(&self.config_dir).await?;
        config.save_to_file(&self.config_path).await
    }

    pub fn exists(&self) -> bool {
        self.config_path.exists()
    }
}
