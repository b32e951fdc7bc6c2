use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::controller::PlayerOptions;
use crate::session::DEFAULT_VOLUME;

pub const CONFIG_VERSION: u32 = 1;
pub const CONFIG_ENV: &str = "TUNEDECK_CONFIG";

const DEFAULT_LIBRARY_PATH: &str = "library.redb";
const DEFAULT_SESSION_PATH: &str = "session.yaml";
const DEFAULT_RESTART_THRESHOLD_SECS: f64 = 3.0;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub version: u32,
    pub library_path: String,
    pub session_path: String,
    pub default_volume: f32,
    /// Elapsed time after which "previous" restarts the current track.
    pub restart_threshold_secs: f64,
    pub persist_position: bool,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            library_path: DEFAULT_LIBRARY_PATH.to_string(),
            session_path: DEFAULT_SESSION_PATH.to_string(),
            default_volume: DEFAULT_VOLUME,
            restart_threshold_secs: DEFAULT_RESTART_THRESHOLD_SECS,
            persist_position: true,
        }
    }
}

impl PlayerConfig {
    pub fn library_path(&self, config_path: &Path) -> PathBuf {
        resolve_path(config_path, &self.library_path)
    }

    pub fn session_path(&self, config_path: &Path) -> PathBuf {
        resolve_path(config_path, &self.session_path)
    }

    pub fn options(&self, config_path: &Path) -> PlayerOptions {
        PlayerOptions {
            session_path: Some(self.session_path(config_path)),
            default_volume: self.default_volume,
            restart_threshold: Duration::from_secs_f64(self.restart_threshold_secs),
            persist_position: self.persist_position,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "io error: {}", err),
            ConfigError::Yaml(err) => write!(f, "yaml error: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Yaml(err)
    }
}

pub fn config_path_from_env() -> PathBuf {
    match env::var(CONFIG_ENV) {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => default_config_path(),
    }
}

fn default_config_path() -> PathBuf {
    match env::current_exe() {
        Ok(exe) => exe
            .parent()
            .map(|dir| dir.join("player.yaml"))
            .unwrap_or_else(|| PathBuf::from("player.yaml")),
        Err(_) => PathBuf::from("player.yaml"),
    }
}

/// Loads the config at `path`, writing defaults first if it does not exist.
/// The flag is true when the file was created.
pub fn load_or_create_config(path: &Path) -> Result<(PlayerConfig, bool), ConfigError> {
    if path.exists() {
        let contents = fs::read_to_string(path)?;
        let mut config: PlayerConfig = serde_yaml::from_str(&contents)?;
        if config.version < CONFIG_VERSION {
            config.version = CONFIG_VERSION;
        }
        if config.library_path.trim().is_empty() {
            config.library_path = DEFAULT_LIBRARY_PATH.to_string();
        }
        if config.session_path.trim().is_empty() {
            config.session_path = DEFAULT_SESSION_PATH.to_string();
        }
        if !config.default_volume.is_finite() {
            config.default_volume = DEFAULT_VOLUME;
        }
        config.default_volume = config.default_volume.clamp(0.0, 1.0);
        if !config.restart_threshold_secs.is_finite() || config.restart_threshold_secs < 0.0 {
            config.restart_threshold_secs = DEFAULT_RESTART_THRESHOLD_SECS;
        }
        return Ok((config, false));
    }

    let config = PlayerConfig::default();
    save_config(path, &config)?;
    Ok((config, true))
}

pub fn save_config(path: &Path, config: &PlayerConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let contents = serde_yaml::to_string(config)?;
    fs::write(path, contents)?;
    Ok(())
}

pub fn resolve_path(config_path: &Path, value: &str) -> PathBuf {
    let raw = PathBuf::from(value);
    if raw.is_absolute() {
        return raw;
    }
    let base = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    base.join(raw)
}
