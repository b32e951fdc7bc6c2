use serde::Serialize;

/// State changes published by the controller. Views subscribe to these and
/// re-read [`crate::PlayerState`] as needed.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlayerEvent {
    AlbumLoaded { album_id: String, track_count: usize },
    AlbumUnloaded { album_id: String },
    TrackChanged { index: usize, track_id: String },
    PlaybackChanged { playing: bool },
    Seeked { position_secs: f64 },
    ShuffleChanged { enabled: bool, next_index: Option<usize> },
    RepeatChanged { enabled: bool },
    VolumeChanged { volume: f32 },
}

/// Read-only view of the controller.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PlayerState {
    pub album_id: Option<String>,
    pub album_name: Option<String>,
    pub album_artist: Option<String>,
    pub track_count: usize,
    pub current_index: Option<usize>,
    pub next_index: Option<usize>,
    pub current_title: Option<String>,
    pub next_title: Option<String>,
    pub playing: bool,
    pub shuffle: bool,
    pub repeat: bool,
    pub volume: f32,
    pub elapsed_secs: f64,
    pub duration_secs: Option<f64>,
    pub has_artwork: bool,
}
