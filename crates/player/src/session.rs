use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Version 1 is the pair of loosely typed records handled by
/// [`Session::from_legacy_records`].
pub const SESSION_VERSION: u32 = 2;
pub const DEFAULT_VOLUME: f32 = 0.7;

pub const LEGACY_SESSION_KEY: &str = "musicPlayerSession";
pub const LEGACY_STATE_KEY: &str = "musicPlayerState";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Session {
    pub version: u32,
    pub volume: f32,
    pub shuffle: bool,
    pub repeat: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<PlaybackPosition>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            version: SESSION_VERSION,
            volume: DEFAULT_VOLUME,
            shuffle: false,
            repeat: false,
            position: None,
        }
    }
}

/// Where playback stood inside an album when the session was last saved.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlaybackPosition {
    pub album_id: String,
    pub track_index: usize,
    #[serde(default)]
    pub elapsed_secs: f64,
    #[serde(default)]
    pub playing: bool,
}

impl Session {
    pub fn with_volume(volume: f32) -> Self {
        Self {
            volume: clamp_volume(volume),
            ..Self::default()
        }
    }

    /// Brings a decoded session up to the current version and clamps values
    /// that are out of range.
    pub fn migrate(mut self) -> Self {
        if self.version < SESSION_VERSION {
            info!(
                "Upgrading session from version {} to {}",
                self.version, SESSION_VERSION
            );
            self.version = SESSION_VERSION;
        } else if self.version > SESSION_VERSION {
            warn!(
                "Session version {} is newer than {}, reading best-effort",
                self.version, SESSION_VERSION
            );
        }
        self.volume = clamp_volume(self.volume);
        if let Some(position) = &mut self.position {
            if !position.elapsed_secs.is_finite() || position.elapsed_secs < 0.0 {
                position.elapsed_secs = 0.0;
            }
        }
        if matches!(&self.position, Some(position) if position.album_id.trim().is_empty()) {
            self.position = None;
        }
        self
    }

    /// Builds a session from the two records stored under
    /// [`LEGACY_SESSION_KEY`] and [`LEGACY_STATE_KEY`]. Each record is
    /// applied independently; one that fails to parse is skipped.
    pub fn from_legacy_records(session_json: Option<&str>, state_json: Option<&str>) -> Self {
        let mut session = Session {
            version: 1,
            ..Session::default()
        };

        if let Some(raw) = session_json {
            match serde_json::from_str::<LegacyPreferences>(raw) {
                Ok(preferences) => {
                    if let Some(volume) = preferences.volume {
                        session.volume = volume as f32;
                    }
                    session.shuffle = preferences.shuffle.unwrap_or(false);
                    session.repeat = preferences.repeat.unwrap_or(false);
                }
                Err(err) => warn!("Ignoring malformed {} record: {}", LEGACY_SESSION_KEY, err),
            }
        }

        if let Some(raw) = state_json {
            match serde_json::from_str::<LegacyPlaybackState>(raw) {
                Ok(state) if state.track_index >= 0 => {
                    session.position = Some(PlaybackPosition {
                        album_id: state.album_id,
                        track_index: state.track_index as usize,
                        elapsed_secs: state.current_time,
                        playing: state.is_playing,
                    });
                }
                Ok(_) => debug!("{} has no selected track", LEGACY_STATE_KEY),
                Err(err) => warn!("Ignoring malformed {} record: {}", LEGACY_STATE_KEY, err),
            }
        }

        session.migrate()
    }
}

fn clamp_volume(volume: f32) -> f32 {
    if volume.is_finite() {
        volume.clamp(0.0, 1.0)
    } else {
        DEFAULT_VOLUME
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LegacyPreferences {
    volume: Option<f64>,
    shuffle: Option<bool>,
    repeat: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct LegacyPlaybackState {
    #[serde(rename = "albumId")]
    album_id: String,
    #[serde(rename = "trackIndex")]
    track_index: i64,
    #[serde(rename = "currentTime", default)]
    current_time: f64,
    #[serde(rename = "isPlaying", default)]
    is_playing: bool,
}

#[derive(Debug)]
pub enum SessionError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Io(err) => write!(f, "io error: {}", err),
            SessionError::Yaml(err) => write!(f, "yaml error: {}", err),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        SessionError::Io(err)
    }
}

impl From<serde_yaml::Error> for SessionError {
    fn from(err: serde_yaml::Error) -> Self {
        SessionError::Yaml(err)
    }
}

/// YAML file holding the [`Session`] between runs.
#[derive(Clone, Debug)]
pub struct SessionFile {
    path: PathBuf,
}

impl SessionFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored session, or defaults when the file is missing or unreadable.
    pub fn load(&self) -> Session {
        self.load_existing().unwrap_or_default()
    }

    /// Stored session, `None` when the file is missing or unreadable.
    pub fn load_existing(&self) -> Option<Session> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("No session at {:?}", self.path);
                return None;
            }
            Err(err) => {
                warn!("Failed to read session {:?}: {}", self.path, err);
                return None;
            }
        };
        match serde_yaml::from_str::<Session>(&contents) {
            Ok(session) => Some(session.migrate()),
            Err(err) => {
                warn!("Ignoring malformed session {:?}: {}", self.path, err);
                None
            }
        }
    }

    pub fn save(&self, session: &Session) -> Result<(), SessionError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut session = session.clone();
        session.version = SESSION_VERSION;
        let contents = serde_yaml::to_string(&session)?;
        fs::write(&self.path, contents)?;
        Ok(())
    }
}
