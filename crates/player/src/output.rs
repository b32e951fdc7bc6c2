use std::time::Duration;

use common::Track;

#[cfg(feature = "rodio")]
mod rodio_output;

#[cfg(feature = "rodio")]
pub use rodio_output::RodioOutput;

/// The single playback handle driven by the controller.
pub trait AudioOutput {
    /// Replaces the current source with `track`, paused at the beginning.
    fn load(&mut self, track: &Track) -> Result<(), OutputError>;
    fn play(&mut self) -> Result<(), OutputError>;
    fn pause(&mut self);
    fn stop(&mut self);
    fn seek(&mut self, position: Duration) -> Result<(), OutputError>;
    fn position(&self) -> Duration;
    fn duration(&self) -> Option<Duration>;
    fn set_volume(&mut self, volume: f32);
    /// True once a playing source has run out.
    fn is_finished(&self) -> bool;
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutputError {
    NotLoaded,
    Decode(String),
    Seek(String),
    Device(String),
}

impl std::fmt::Display for OutputError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputError::NotLoaded => write!(f, "no track loaded"),
            OutputError::Decode(reason) => write!(f, "decode error: {}", reason),
            OutputError::Seek(reason) => write!(f, "seek error: {}", reason),
            OutputError::Device(reason) => write!(f, "output device error: {}", reason),
        }
    }
}

impl std::error::Error for OutputError {}

#[derive(Debug, Clone)]
struct LoadedSource {
    track_id: String,
    duration: Option<Duration>,
}

/// Headless output without a clock: position only moves through
/// [`MemoryOutput::advance`].
#[derive(Debug, Clone)]
pub struct MemoryOutput {
    source: Option<LoadedSource>,
    playing: bool,
    position: Duration,
    volume: f32,
    fallback_duration: Option<Duration>,
}

impl Default for MemoryOutput {
    fn default() -> Self {
        Self {
            source: None,
            playing: false,
            position: Duration::ZERO,
            volume: 1.0,
            fallback_duration: None,
        }
    }
}

impl MemoryOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Duration reported for tracks whose record has none, as a decoder
    /// would after probing the stream.
    pub fn with_fallback_duration(duration: Duration) -> Self {
        Self {
            fallback_duration: Some(duration),
            ..Self::default()
        }
    }

    pub fn advance(&mut self, by: Duration) {
        if !self.playing {
            return;
        }
        let mut position = self.position.saturating_add(by);
        if let Some(duration) = self.duration() {
            position = position.min(duration);
        }
        self.position = position;
    }

    pub fn loaded_track(&self) -> Option<&str> {
        self.source.as_ref().map(|source| source.track_id.as_str())
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }
}

impl AudioOutput for MemoryOutput {
    fn load(&mut self, track: &Track) -> Result<(), OutputError> {
        self.stop();
        if track.data.is_empty() {
            return Err(OutputError::Decode(format!("{} has no audio data", track.file_name)));
        }
        let duration = track
            .duration_secs
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(Duration::from_secs_f64)
            .or(self.fallback_duration);
        self.source = Some(LoadedSource {
            track_id: track.id.clone(),
            duration,
        });
        Ok(())
    }

    fn play(&mut self) -> Result<(), OutputError> {
        if self.source.is_none() {
            return Err(OutputError::NotLoaded);
        }
        self.playing = true;
        Ok(())
    }

    fn pause(&mut self) {
        self.playing = false;
    }

    fn stop(&mut self) {
        self.source = None;
        self.playing = false;
        self.position = Duration::ZERO;
    }

    fn seek(&mut self, position: Duration) -> Result<(), OutputError> {
        if self.source.is_none() {
            return Err(OutputError::NotLoaded);
        }
        self.position = match self.duration() {
            Some(duration) => position.min(duration),
            None => position,
        };
        Ok(())
    }

    fn position(&self) -> Duration {
        self.position
    }

    fn duration(&self) -> Option<Duration> {
        self.source.as_ref().and_then(|source| source.duration)
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
    }

    fn is_finished(&self) -> bool {
        match self.duration() {
            Some(duration) => self.source.is_some() && self.position >= duration,
            None => false,
        }
    }
}
