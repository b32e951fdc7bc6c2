use std::path::PathBuf;
use std::time::Duration;

use common::{Album, Artwork, Track};
use library::{Library, LibraryError};
use rand::Rng;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::events::{PlayerEvent, PlayerState};
use crate::output::{AudioOutput, OutputError};
use crate::session::{PlaybackPosition, Session, SessionFile, DEFAULT_VOLUME};

const EVENT_CAPACITY: usize = 64;

#[derive(Clone, Debug)]
pub struct PlayerOptions {
    /// Session file to restore from and save to. `None` keeps the session in
    /// memory only.
    pub session_path: Option<PathBuf>,
    pub default_volume: f32,
    pub restart_threshold: Duration,
    pub persist_position: bool,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            session_path: None,
            default_volume: DEFAULT_VOLUME,
            restart_threshold: Duration::from_secs(3),
            persist_position: true,
        }
    }
}

#[derive(Debug)]
pub enum PlayerError {
    Library(LibraryError),
    Output(OutputError),
    AlbumNotFound(String),
}

impl std::fmt::Display for PlayerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlayerError::Library(err) => write!(f, "library error: {}", err),
            PlayerError::Output(err) => write!(f, "output error: {}", err),
            PlayerError::AlbumNotFound(id) => write!(f, "album not found: {}", id),
        }
    }
}

impl std::error::Error for PlayerError {}

impl From<LibraryError> for PlayerError {
    fn from(err: LibraryError) -> Self {
        PlayerError::Library(err)
    }
}

impl From<OutputError> for PlayerError {
    fn from(err: OutputError) -> Self {
        PlayerError::Output(err)
    }
}

/// Drives one [`AudioOutput`] through the tracks of the active album.
pub struct PlaybackController<O: AudioOutput> {
    library: Library,
    output: O,
    session_file: Option<SessionFile>,
    session: Session,
    album: Option<Album>,
    artwork: Option<Artwork>,
    tracks: Vec<Track>,
    current: Option<usize>,
    next: Option<usize>,
    playing: bool,
    restart_threshold: Duration,
    persist_position: bool,
    events: broadcast::Sender<PlayerEvent>,
}

impl<O: AudioOutput> PlaybackController<O> {
    pub fn new(library: Library, mut output: O, options: PlayerOptions) -> Self {
        let session_file = options.session_path.map(SessionFile::new);
        let session = session_file
            .as_ref()
            .and_then(|file| file.load_existing())
            .unwrap_or_else(|| Session::with_volume(options.default_volume));
        output.set_volume(session.volume);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        info!(
            "Player ready (volume {:.2}, shuffle {}, repeat {})",
            session.volume, session.shuffle, session.repeat
        );
        Self {
            library,
            output,
            session_file,
            session,
            album: None,
            artwork: None,
            tracks: Vec::new(),
            current: None,
            next: None,
            playing: false,
            restart_threshold: options.restart_threshold,
            persist_position: options.persist_position,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    pub fn load_album(&mut self, album_id: &str) -> Result<(), PlayerError> {
        let album = self
            .library
            .get_album(album_id)?
            .ok_or_else(|| PlayerError::AlbumNotFound(album_id.to_string()))?;

        self.output.stop();
        if self.playing {
            self.playing = false;
            self.emit(PlayerEvent::PlaybackChanged { playing: false });
        }
        let mut tracks = self.library.album_tracks(album_id)?;
        match self.library.backfill_durations(&mut tracks) {
            Ok(0) => {}
            Ok(count) => debug!("Backfilled {} durations for {}", count, album_id),
            Err(err) => warn!("Duration backfill failed for {}: {}", album_id, err),
        }
        let artwork = self.library.get_artwork(album_id)?;

        info!("Loaded album {} ({} tracks)", album.name, tracks.len());
        self.tracks = tracks;
        self.album = Some(album);
        self.artwork = artwork;
        self.current = None;
        self.next = None;
        self.emit(PlayerEvent::AlbumLoaded {
            album_id: album_id.to_string(),
            track_count: self.tracks.len(),
        });

        if self.tracks.is_empty() {
            self.persist();
            return Ok(());
        }

        let track_count = self.tracks.len();
        let restored = self
            .session
            .position
            .clone()
            .filter(|position| position.album_id == album_id && position.track_index < track_count);
        let selected = match restored {
            Some(position) => self.restore(position),
            None => self.select(0),
        };
        match selected {
            Ok(()) => {}
            Err(PlayerError::Output(err)) => {
                warn!("Album {} loaded without a playable track: {}", album_id, err);
            }
            Err(err) => return Err(err),
        }
        self.persist();
        Ok(())
    }

    /// Starts `index` from the beginning. Out-of-range indices are ignored.
    pub fn play(&mut self, index: usize) -> Result<(), PlayerError> {
        if index >= self.tracks.len() {
            debug!("Ignoring play of track {} ({} loaded)", index, self.tracks.len());
            return Ok(());
        }
        self.select(index)?;
        self.start()?;
        self.persist();
        Ok(())
    }

    pub fn toggle_playback(&mut self) -> Result<(), PlayerError> {
        if self.playing {
            self.pause();
            Ok(())
        } else {
            self.resume()
        }
    }

    pub fn pause(&mut self) {
        if !self.playing {
            return;
        }
        self.output.pause();
        self.playing = false;
        self.emit(PlayerEvent::PlaybackChanged { playing: false });
        self.persist();
    }

    pub fn resume(&mut self) -> Result<(), PlayerError> {
        if self.playing || self.tracks.is_empty() {
            return Ok(());
        }
        if self.current.is_none() {
            return self.play(0);
        }
        self.start()?;
        self.persist();
        Ok(())
    }

    pub fn next(&mut self) -> Result<(), PlayerError> {
        if self.tracks.is_empty() {
            return Ok(());
        }
        let index = match (self.current, self.next) {
            (Some(_), Some(next)) => next,
            _ => self.pick_next().unwrap_or(0),
        };
        self.play(index)
    }

    pub fn previous(&mut self) -> Result<(), PlayerError> {
        let len = self.tracks.len();
        let current = match self.current {
            Some(current) if len > 0 => current,
            _ => return self.play(0),
        };
        if self.output.position() > self.restart_threshold {
            return self.restart();
        }
        self.play((current + len - 1) % len)
    }

    pub fn on_track_end(&mut self) -> Result<(), PlayerError> {
        let current = match self.current {
            Some(current) => current,
            None => return Ok(()),
        };
        if self.session.repeat {
            self.play(current)
        } else {
            self.next()
        }
    }

    /// Advances past a finished track. Returns true when it did.
    pub fn poll(&mut self) -> Result<bool, PlayerError> {
        self.backfill_duration();
        if self.playing && self.output.is_finished() {
            self.on_track_end()?;
            return Ok(true);
        }
        Ok(false)
    }

    pub fn seek(&mut self, secs: f64) -> Result<(), PlayerError> {
        if self.current.is_none() {
            return Ok(());
        }
        let mut secs = if secs.is_finite() { secs.max(0.0) } else { 0.0 };
        if let Some(duration) = self.output.duration() {
            secs = secs.min(duration.as_secs_f64());
        }
        self.output.seek(Duration::from_secs_f64(secs))?;
        self.emit(PlayerEvent::Seeked { position_secs: secs });
        self.persist();
        Ok(())
    }

    pub fn set_volume(&mut self, volume: f32) {
        if !volume.is_finite() {
            return;
        }
        let volume = volume.clamp(0.0, 1.0);
        self.session.volume = volume;
        self.output.set_volume(volume);
        self.emit(PlayerEvent::VolumeChanged { volume });
        self.persist();
    }

    pub fn toggle_shuffle(&mut self) {
        self.session.shuffle = !self.session.shuffle;
        self.next = self.pick_next();
        self.emit(PlayerEvent::ShuffleChanged {
            enabled: self.session.shuffle,
            next_index: self.next,
        });
        self.persist();
    }

    pub fn toggle_repeat(&mut self) {
        self.session.repeat = !self.session.repeat;
        self.emit(PlayerEvent::RepeatChanged {
            enabled: self.session.repeat,
        });
        self.persist();
    }

    /// Deletes the album from the library and unloads it if it is active.
    pub fn delete_album(&mut self, album_id: &str) -> Result<bool, PlayerError> {
        let deleted = self.library.delete_album(album_id)?;
        if self.album.as_ref().map(|album| album.id.as_str()) == Some(album_id) {
            self.output.stop();
            self.album = None;
            self.artwork = None;
            self.tracks.clear();
            self.current = None;
            self.next = None;
            if self.playing {
                self.playing = false;
                self.emit(PlayerEvent::PlaybackChanged { playing: false });
            }
            self.emit(PlayerEvent::AlbumUnloaded {
                album_id: album_id.to_string(),
            });
        }
        if matches!(&self.session.position, Some(position) if position.album_id == album_id) {
            self.session.position = None;
        }
        self.persist();
        Ok(deleted)
    }

    pub fn snapshot(&self) -> PlayerState {
        let current_track = self.current_track();
        let next_track = self.next.and_then(|index| self.tracks.get(index));
        PlayerState {
            album_id: self.album.as_ref().map(|album| album.id.clone()),
            album_name: self.album.as_ref().map(|album| album.name.clone()),
            album_artist: self.album.as_ref().map(|album| album.artist.clone()),
            track_count: self.tracks.len(),
            current_index: self.current,
            next_index: self.next,
            current_title: current_track.map(|track| track.title.clone()),
            next_title: next_track.map(|track| track.title.clone()),
            playing: self.playing,
            shuffle: self.session.shuffle,
            repeat: self.session.repeat,
            volume: self.session.volume,
            elapsed_secs: self.output.position().as_secs_f64(),
            duration_secs: current_track
                .and_then(|track| track.duration_secs)
                .or_else(|| self.output.duration().map(|duration| duration.as_secs_f64())),
            has_artwork: self.artwork.is_some(),
        }
    }

    /// Saves the session one last time.
    pub fn shutdown(&mut self) {
        self.persist();
        info!("Player stopped");
    }

    pub fn album(&self) -> Option<&Album> {
        self.album.as_ref()
    }

    pub fn artwork(&self) -> Option<&Artwork> {
        self.artwork.as_ref()
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn next_index(&self) -> Option<usize> {
        self.next
    }

    pub fn current_track(&self) -> Option<&Track> {
        self.current.and_then(|index| self.tracks.get(index))
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut O {
        &mut self.output
    }

    /// Loads `index` into the output, paused at the beginning.
    fn select(&mut self, index: usize) -> Result<(), PlayerError> {
        let track = match self.tracks.get(index) {
            Some(track) => track,
            None => return Ok(()),
        };
        let track_id = track.id.clone();
        let was_playing = self.playing;
        self.current = Some(index);
        self.playing = false;
        self.next = self.pick_next();
        let loaded = self.output.load(track);
        if was_playing {
            self.emit(PlayerEvent::PlaybackChanged { playing: false });
        }
        self.emit(PlayerEvent::TrackChanged { index, track_id });
        loaded?;
        Ok(())
    }

    fn restore(&mut self, position: PlaybackPosition) -> Result<(), PlayerError> {
        debug!(
            "Restoring track {} at {:.1}s",
            position.track_index, position.elapsed_secs
        );
        self.select(position.track_index)?;
        if position.elapsed_secs > 0.0 {
            if let Err(err) = self
                .output
                .seek(Duration::from_secs_f64(position.elapsed_secs))
            {
                warn!("Failed to restore position: {}", err);
            }
        }
        if position.playing {
            self.start()?;
        }
        Ok(())
    }

    fn start(&mut self) -> Result<(), PlayerError> {
        self.output.play()?;
        self.playing = true;
        self.emit(PlayerEvent::PlaybackChanged { playing: true });
        Ok(())
    }

    fn restart(&mut self) -> Result<(), PlayerError> {
        self.output.seek(Duration::ZERO)?;
        self.emit(PlayerEvent::Seeked { position_secs: 0.0 });
        self.persist();
        Ok(())
    }

    fn pick_next(&self) -> Option<usize> {
        let len = self.tracks.len();
        if len == 0 {
            return None;
        }
        let current = match self.current {
            Some(current) => current,
            None => return Some(0),
        };
        if self.session.shuffle {
            Some(random_other(current, len))
        } else {
            Some((current + 1) % len)
        }
    }

    fn backfill_duration(&mut self) {
        let index = match self.current {
            Some(index) => index,
            None => return,
        };
        let duration = match self.output.duration() {
            Some(duration) if !duration.is_zero() => duration.as_secs_f64(),
            _ => return,
        };
        let track = match self.tracks.get_mut(index) {
            Some(track) if track.duration_secs.is_none() => track,
            _ => return,
        };
        match self.library.set_track_duration(&track.id, duration) {
            Ok(_) => track.duration_secs = Some(duration),
            Err(err) => warn!("Failed to store duration for {}: {}", track.id, err),
        }
    }

    fn persist(&mut self) {
        if !self.persist_position {
            self.session.position = None;
        } else if let (Some(album), Some(index)) = (&self.album, self.current) {
            self.session.position = Some(PlaybackPosition {
                album_id: album.id.clone(),
                track_index: index,
                elapsed_secs: self.output.position().as_secs_f64(),
                playing: self.playing,
            });
        }
        if let Some(file) = &self.session_file {
            if let Err(err) = file.save(&self.session) {
                warn!("Failed to save session to {:?}: {}", file.path(), err);
            }
        }
    }

    fn emit(&self, event: PlayerEvent) {
        let _ = self.events.send(event);
    }
}

/// Uniform pick from `0..len` excluding `current`, or `current` itself for
/// single-track albums.
fn random_other(current: usize, len: usize) -> usize {
    if len <= 1 {
        return 0;
    }
    let pick = rand::rng().random_range(0..len - 1);
    if pick >= current {
        pick + 1
    } else {
        pick
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::MemoryOutput;
    use common::{album_id, track_id, Codec, TrackSlot};
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        _dir: TempDir,
        library: Library,
        session_path: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let library = Library::open(&dir.path().join("library.redb")).unwrap();
        let session_path = dir.path().join("session.yaml");
        Fixture {
            _dir: dir,
            library,
            session_path,
        }
    }

    fn add_album(library: &Library, name: &str, count: u16) -> String {
        let id = album_id(name, "Artist");
        let mut track_ids = Vec::new();
        for number in 1..=count {
            let track = Track {
                id: track_id(&id, TrackSlot::Number(number)),
                album_id: id.clone(),
                title: format!("{} {}", name, number),
                artist: "Artist".to_string(),
                album: name.to_string(),
                track_no: Some(number),
                year: None,
                genre: None,
                duration_secs: Some(200.0),
                codec: Codec::Mp3,
                media_type: None,
                file_name: format!("{:02}.mp3", number),
                data: vec![number as u8; 16],
            };
            library.put_track(&track).unwrap();
            track_ids.push(track.id);
        }
        library
            .put_album(&Album {
                id: id.clone(),
                name: name.to_string(),
                artist: "Artist".to_string(),
                genre: None,
                year: None,
                track_count: track_ids.len(),
                track_ids,
                total_size: None,
            })
            .unwrap();
        id
    }

    fn controller(fixture: &Fixture) -> PlaybackController<MemoryOutput> {
        let options = PlayerOptions {
            session_path: Some(fixture.session_path.clone()),
            ..PlayerOptions::default()
        };
        PlaybackController::new(fixture.library.clone(), MemoryOutput::new(), options)
    }

    fn advance(player: &mut PlaybackController<MemoryOutput>, secs: u64) {
        player.output_mut().advance(Duration::from_secs(secs));
    }

    #[test]
    fn fresh_session_uses_defaults() {
        let fixture = fixture();
        let player = controller(&fixture);
        let state = player.snapshot();
        assert_eq!(state.volume, 0.7);
        assert!(!state.shuffle);
        assert!(!state.repeat);
        assert_eq!(state.current_index, None);
        assert_eq!(player.output().volume(), 0.7);
    }

    #[test]
    fn load_album_selects_first_track_without_playing() {
        let fixture = fixture();
        let id = add_album(&fixture.library, "First", 3);
        let mut player = controller(&fixture);
        player.load_album(&id).unwrap();
        assert_eq!(player.current_index(), Some(0));
        assert_eq!(player.next_index(), Some(1));
        assert!(!player.is_playing());
        assert_eq!(player.tracks().len(), 3);
        assert_eq!(player.output().loaded_track(), Some(player.tracks()[0].id.as_str()));

        let err = player.load_album("missing").unwrap_err();
        assert!(matches!(err, PlayerError::AlbumNotFound(_)));
    }

    #[test]
    fn next_wraps_in_order() {
        let fixture = fixture();
        let id = add_album(&fixture.library, "Order", 4);
        let mut player = controller(&fixture);
        player.load_album(&id).unwrap();
        for index in 0..4 {
            player.play(index).unwrap();
            player.next().unwrap();
            assert_eq!(player.current_index(), Some((index + 1) % 4));
            assert!(player.is_playing());
        }
    }

    #[test]
    fn shuffle_never_repeats_current_track() {
        let fixture = fixture();
        let id = add_album(&fixture.library, "Shuffled", 5);
        let mut player = controller(&fixture);
        player.load_album(&id).unwrap();
        player.toggle_shuffle();
        for _ in 0..50 {
            let before = player.current_index().unwrap();
            let predicted = player.next_index().unwrap();
            player.next().unwrap();
            let after = player.current_index().unwrap();
            assert_ne!(before, after);
            assert!(after < 5);
            assert_eq!(after, predicted);
        }
    }

    #[test]
    fn shuffle_with_single_track_stays_put() {
        let fixture = fixture();
        let id = add_album(&fixture.library, "Single", 1);
        let mut player = controller(&fixture);
        player.load_album(&id).unwrap();
        player.toggle_shuffle();
        player.next().unwrap();
        assert_eq!(player.current_index(), Some(0));
    }

    #[test]
    fn previous_restarts_after_threshold() {
        let fixture = fixture();
        let id = add_album(&fixture.library, "Back", 3);
        let mut player = controller(&fixture);
        player.load_album(&id).unwrap();

        player.play(1).unwrap();
        advance(&mut player, 5);
        player.previous().unwrap();
        assert_eq!(player.current_index(), Some(1));
        assert_eq!(player.output().position(), Duration::ZERO);

        advance(&mut player, 2);
        player.previous().unwrap();
        assert_eq!(player.current_index(), Some(0));

        player.previous().unwrap();
        assert_eq!(player.current_index(), Some(2));
    }

    #[test]
    fn previous_at_exact_threshold_moves_back() {
        let fixture = fixture();
        let id = add_album(&fixture.library, "Edge", 3);
        let mut player = controller(&fixture);
        player.load_album(&id).unwrap();

        player.play(2).unwrap();
        advance(&mut player, 3);
        assert_eq!(player.output().position(), Duration::from_secs(3));
        player.previous().unwrap();
        assert_eq!(player.current_index(), Some(1));
        assert_eq!(player.output().position(), Duration::ZERO);
    }

    #[test]
    fn play_out_of_range_is_ignored() {
        let fixture = fixture();
        let id = add_album(&fixture.library, "Bounds", 2);
        let mut player = controller(&fixture);
        player.load_album(&id).unwrap();
        player.play(7).unwrap();
        assert_eq!(player.current_index(), Some(0));
        assert!(!player.is_playing());
    }

    #[test]
    fn empty_album_controls_are_noops() {
        let fixture = fixture();
        let id = add_album(&fixture.library, "Empty", 0);
        let mut player = controller(&fixture);
        player.load_album(&id).unwrap();
        player.next().unwrap();
        player.resume().unwrap();
        player.on_track_end().unwrap();
        assert_eq!(player.current_index(), None);
        assert!(!player.is_playing());
    }

    #[test]
    fn track_end_advances_or_repeats() {
        let fixture = fixture();
        let id = add_album(&fixture.library, "Ends", 3);
        let mut player = controller(&fixture);
        player.load_album(&id).unwrap();

        player.play(1).unwrap();
        advance(&mut player, 500);
        assert!(player.poll().unwrap());
        assert_eq!(player.current_index(), Some(2));
        assert!(player.is_playing());

        player.toggle_repeat();
        advance(&mut player, 500);
        assert!(player.poll().unwrap());
        assert_eq!(player.current_index(), Some(2));
        assert_eq!(player.output().position(), Duration::ZERO);
        assert!(player.is_playing());

        assert!(!player.poll().unwrap());
    }

    #[test]
    fn toggle_playback_resumes_first_track() {
        let fixture = fixture();
        let id = add_album(&fixture.library, "Toggle", 2);
        let mut player = controller(&fixture);
        player.load_album(&id).unwrap();
        player.toggle_playback().unwrap();
        assert!(player.is_playing());
        assert!(player.output().is_playing());
        player.toggle_playback().unwrap();
        assert!(!player.is_playing());
        assert!(!player.output().is_playing());
    }

    #[test]
    fn session_restores_album_position() {
        let fixture = fixture();
        let id = add_album(&fixture.library, "Resume", 4);
        {
            let mut player = controller(&fixture);
            player.load_album(&id).unwrap();
            player.set_volume(0.3);
            player.toggle_shuffle();
            player.play(2).unwrap();
            advance(&mut player, 42);
            player.shutdown();
        }

        let mut player = controller(&fixture);
        assert!(player.session().shuffle);
        assert!((player.session().volume - 0.3).abs() < f32::EPSILON);
        player.load_album(&id).unwrap();
        assert_eq!(player.current_index(), Some(2));
        assert_eq!(player.output().position(), Duration::from_secs(42));
        assert!(player.is_playing());
    }

    #[test]
    fn saved_position_for_other_album_is_not_applied() {
        let fixture = fixture();
        let first = add_album(&fixture.library, "One", 3);
        let second = add_album(&fixture.library, "Two", 3);
        {
            let mut player = controller(&fixture);
            player.load_album(&first).unwrap();
            player.play(2).unwrap();
            player.shutdown();
        }
        let mut player = controller(&fixture);
        player.load_album(&second).unwrap();
        assert_eq!(player.current_index(), Some(0));
        assert!(!player.is_playing());
    }

    #[test]
    fn volume_is_clamped() {
        let fixture = fixture();
        let mut player = controller(&fixture);
        player.set_volume(1.8);
        assert_eq!(player.snapshot().volume, 1.0);
        player.set_volume(-0.5);
        assert_eq!(player.output().volume(), 0.0);
        player.set_volume(f32::NAN);
        assert_eq!(player.snapshot().volume, 0.0);
    }

    #[test]
    fn deleting_active_album_unloads_it() {
        let fixture = fixture();
        let id = add_album(&fixture.library, "Gone", 2);
        let mut player = controller(&fixture);
        player.load_album(&id).unwrap();
        player.play(1).unwrap();

        assert!(player.delete_album(&id).unwrap());
        assert_eq!(player.current_index(), None);
        assert!(player.tracks().is_empty());
        assert!(!player.is_playing());
        assert_eq!(player.output().loaded_track(), None);
        assert_eq!(fixture.library.get_album(&id).unwrap(), None);
        assert_eq!(player.session().position, None);
        assert!(!player.delete_album(&id).unwrap());
    }

    #[test]
    fn undecodable_track_leaves_player_stopped() {
        let fixture = fixture();
        let id = add_album(&fixture.library, "Broken", 2);
        let mut track = fixture.library.album_tracks(&id).unwrap().remove(1);
        track.data.clear();
        fixture.library.put_track(&track).unwrap();

        let mut player = controller(&fixture);
        player.load_album(&id).unwrap();
        let err = player.play(1).unwrap_err();
        assert!(matches!(err, PlayerError::Output(OutputError::Decode(_))));
        assert_eq!(player.current_index(), Some(1));
        assert!(!player.is_playing());
    }

    #[test]
    fn album_with_unplayable_first_track_still_loads() {
        let fixture = fixture();
        let old = add_album(&fixture.library, "Old", 2);
        let new = add_album(&fixture.library, "New", 1);
        let mut track = fixture.library.album_tracks(&new).unwrap().remove(0);
        track.data.clear();
        fixture.library.put_track(&track).unwrap();

        let mut player = controller(&fixture);
        player.load_album(&old).unwrap();
        player.play(1).unwrap();

        player.load_album(&new).unwrap();
        assert_eq!(player.album().map(|album| album.id.as_str()), Some(new.as_str()));
        assert_eq!(player.current_index(), Some(0));
        assert!(!player.is_playing());
        assert_eq!(player.output().loaded_track(), None);

        let saved = SessionFile::new(&fixture.session_path).load();
        let position = saved.position.unwrap();
        assert_eq!(position.album_id, new);
        assert_eq!(position.track_index, 0);
        assert!(!position.playing);

        let err = player.toggle_playback().unwrap_err();
        assert!(matches!(err, PlayerError::Output(OutputError::NotLoaded)));
        assert!(!player.is_playing());
    }

    #[test]
    fn output_duration_is_backfilled() {
        let fixture = fixture();
        let id = add_album(&fixture.library, "Untimed", 1);
        let mut track = fixture.library.album_tracks(&id).unwrap().remove(0);
        track.duration_secs = None;
        fixture.library.put_track(&track).unwrap();

        let options = PlayerOptions::default();
        let output = MemoryOutput::with_fallback_duration(Duration::from_secs(99));
        let mut player = PlaybackController::new(fixture.library.clone(), output, options);
        player.load_album(&id).unwrap();
        player.poll().unwrap();

        let stored = fixture.library.get_track(&track.id).unwrap().unwrap();
        assert_eq!(stored.duration_secs, Some(99.0));
        assert_eq!(player.snapshot().duration_secs, Some(99.0));
    }

    #[test]
    fn state_changes_are_published() {
        let fixture = fixture();
        let id = add_album(&fixture.library, "Events", 2);
        let mut player = controller(&fixture);
        let mut events = player.subscribe();
        player.load_album(&id).unwrap();
        player.play(1).unwrap();
        player.toggle_repeat();

        let received: Vec<PlayerEvent> = std::iter::from_fn(|| events.try_recv().ok()).collect();
        assert_eq!(
            received.first(),
            Some(&PlayerEvent::AlbumLoaded {
                album_id: id.clone(),
                track_count: 2,
            })
        );
        assert!(received.contains(&PlayerEvent::PlaybackChanged { playing: true }));
        assert!(received.iter().any(|event| matches!(
            event,
            PlayerEvent::TrackChanged { index: 1, .. }
        )));
        assert_eq!(
            received.last(),
            Some(&PlayerEvent::RepeatChanged { enabled: true })
        );
    }

    #[test]
    fn position_is_not_saved_when_disabled() {
        let fixture = fixture();
        let id = add_album(&fixture.library, "Private", 2);
        let options = PlayerOptions {
            session_path: Some(fixture.session_path.clone()),
            persist_position: false,
            ..PlayerOptions::default()
        };
        let mut player =
            PlaybackController::new(fixture.library.clone(), MemoryOutput::new(), options);
        player.load_album(&id).unwrap();
        player.play(1).unwrap();
        player.shutdown();
        assert_eq!(SessionFile::new(&fixture.session_path).load().position, None);
    }
}
