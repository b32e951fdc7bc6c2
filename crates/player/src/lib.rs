mod config;
mod controller;
mod events;
pub mod output;
mod session;

pub use config::{
    config_path_from_env, load_or_create_config, resolve_path, save_config, ConfigError,
    PlayerConfig, CONFIG_ENV, CONFIG_VERSION,
};
pub use controller::{PlaybackController, PlayerError, PlayerOptions};
pub use events::{PlayerEvent, PlayerState};
pub use output::{AudioOutput, MemoryOutput, OutputError};
pub use session::{
    PlaybackPosition, Session, SessionError, SessionFile, DEFAULT_VOLUME, LEGACY_SESSION_KEY,
    LEGACY_STATE_KEY, SESSION_VERSION,
};

#[cfg(feature = "rodio")]
pub use output::RodioOutput;
