mod import;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use bincode;
use common::{Album, Artwork, Track};
use metadata::{probe_duration, MetadataError};
use redb::{
    CommitError, Database, DatabaseError, ReadableTable, StorageError, TableDefinition, TableError,
    TransactionError, WriteTransaction,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub use import::{collect_audio_files, ImportFile, ImportReport, RejectedFile};

const SCHEMA_VERSION: u32 = 1;

const META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");
const ALBUMS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("albums");
const TRACKS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("tracks");
const ARTWORK_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("artwork");

const META_VERSION_KEY: &str = "version";

/// Local record store with three collections: albums, tracks (with their
/// audio payload) and artwork, all keyed by identifier.
#[derive(Clone)]
pub struct Library {
    db: Arc<Database>,
}

impl Library {
    pub fn open(db_path: &Path) -> Result<Self, LibraryError> {
        let db = Self::open_db(db_path)?;
        let library = Self::with_db(db)?;
        info!("Opened library at {:?}", db_path);
        Ok(library)
    }

    pub fn with_db(db: Arc<Database>) -> Result<Self, LibraryError> {
        let library = Self { db };
        library.ensure_schema()?;
        Ok(library)
    }

    pub fn open_db(path: &Path) -> Result<Arc<Database>, LibraryError> {
        let db = open_or_create_db(path)?;
        Ok(Arc::new(db))
    }

    fn ensure_schema(&self) -> Result<(), LibraryError> {
        let version = read_version(&self.db)?;
        let write_txn = self.db.begin_write()?;
        match version {
            Some(version) if version == SCHEMA_VERSION => {}
            Some(version) => {
                warn!("Library schema version mismatch ({}); clearing collections", version);
                clear_table(&write_txn, ALBUMS_TABLE)?;
                clear_table(&write_txn, TRACKS_TABLE)?;
                clear_table(&write_txn, ARTWORK_TABLE)?;
            }
            None => debug!("Initialising empty library"),
        }
        {
            let _ = write_txn.open_table(ALBUMS_TABLE)?;
            let _ = write_txn.open_table(TRACKS_TABLE)?;
            let _ = write_txn.open_table(ARTWORK_TABLE)?;
            let mut meta_table = write_txn.open_table(META_TABLE)?;
            let version_bytes = encode_value(&SCHEMA_VERSION)?;
            meta_table.insert(META_VERSION_KEY, version_bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn stats(&self) -> Result<LibraryStats, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let albums = read_txn.open_table(ALBUMS_TABLE)?.len()? as usize;
        let tracks = read_txn.open_table(TRACKS_TABLE)?.len()? as usize;
        let artwork = read_txn.open_table(ARTWORK_TABLE)?.len()? as usize;
        Ok(LibraryStats {
            albums,
            tracks,
            artwork,
        })
    }

    pub fn get_album(&self, album_id: &str) -> Result<Option<Album>, LibraryError> {
        get_record(&self.db, ALBUMS_TABLE, album_id)
    }

    /// Every album, ordered by artist then name.
    pub fn list_albums(&self) -> Result<Vec<Album>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(ALBUMS_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut albums = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            let album: Album = decode_value(entry.1.value())?;
            albums.push(album);
        }
        albums.sort_by(|a, b| {
            a.artist
                .to_lowercase()
                .cmp(&b.artist.to_lowercase())
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(albums)
    }

    pub fn put_album(&self, album: &Album) -> Result<(), LibraryError> {
        put_record(&self.db, ALBUMS_TABLE, &album.id, album)
    }

    /// Removes the album record only. Use [`Library::delete_album`] to cascade.
    pub fn delete_album_record(&self, album_id: &str) -> Result<bool, LibraryError> {
        remove_record(&self.db, ALBUMS_TABLE, album_id)
    }

    pub fn get_track(&self, track_id: &str) -> Result<Option<Track>, LibraryError> {
        get_record(&self.db, TRACKS_TABLE, track_id)
    }

    pub fn put_track(&self, track: &Track) -> Result<(), LibraryError> {
        put_record(&self.db, TRACKS_TABLE, &track.id, track)
    }

    pub fn delete_track(&self, track_id: &str) -> Result<bool, LibraryError> {
        remove_record(&self.db, TRACKS_TABLE, track_id)
    }

    /// Tracks of an album in the album's listed order.
    pub fn album_tracks(&self, album_id: &str) -> Result<Vec<Track>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let album_table = read_txn.open_table(ALBUMS_TABLE)?;
        let track_table = read_txn.open_table(TRACKS_TABLE)?;

        let album: Album = match album_table.get(album_id)? {
            Some(value) => decode_value(value.value())?,
            None => return Err(LibraryError::NotFound(album_id.to_string())),
        };

        let mut tracks = Vec::with_capacity(album.track_ids.len());
        for track_id in &album.track_ids {
            match track_table.get(track_id.as_str())? {
                Some(value) => tracks.push(decode_value(value.value())?),
                None => warn!("Album {} lists missing track {}", album_id, track_id),
            }
        }
        Ok(tracks)
    }

    pub fn get_artwork(&self, album_id: &str) -> Result<Option<Artwork>, LibraryError> {
        get_record(&self.db, ARTWORK_TABLE, album_id)
    }

    pub fn put_artwork(&self, artwork: &Artwork) -> Result<(), LibraryError> {
        put_record(&self.db, ARTWORK_TABLE, &artwork.album_id, artwork)
    }

    pub fn delete_artwork(&self, album_id: &str) -> Result<bool, LibraryError> {
        remove_record(&self.db, ARTWORK_TABLE, album_id)
    }

    /// Deletes the album, every track it lists and its artwork in a single
    /// write transaction. Returns `false` when the album does not exist.
    pub fn delete_album(&self, album_id: &str) -> Result<bool, LibraryError> {
        let write_txn = self.db.begin_write()?;
        let removed_tracks = {
            let mut album_table = write_txn.open_table(ALBUMS_TABLE)?;
            let album: Album = match album_table.get(album_id)? {
                Some(value) => decode_value(value.value())?,
                None => return Ok(false),
            };

            let mut track_table = write_txn.open_table(TRACKS_TABLE)?;
            let mut removed = 0usize;
            for track_id in &album.track_ids {
                if track_table.remove(track_id.as_str())?.is_some() {
                    removed += 1;
                }
            }

            let mut artwork_table = write_txn.open_table(ARTWORK_TABLE)?;
            artwork_table.remove(album_id)?;
            album_table.remove(album_id)?;
            removed
        };
        write_txn.commit()?;
        info!("Deleted album {} ({} tracks)", album_id, removed_tracks);
        Ok(true)
    }

    /// Byte size of an album, computed from its tracks on first request and
    /// cached on the album record. `None` when the album does not exist.
    pub fn album_size(&self, album_id: &str) -> Result<Option<u64>, LibraryError> {
        match self.get_album(album_id)? {
            Some(album) => {
                if let Some(size) = album.total_size {
                    return Ok(Some(size));
                }
            }
            None => return Ok(None),
        }

        let write_txn = self.db.begin_write()?;
        let size = {
            let mut album_table = write_txn.open_table(ALBUMS_TABLE)?;
            let track_table = write_txn.open_table(TRACKS_TABLE)?;
            let mut album: Album = match album_table.get(album_id)? {
                Some(value) => decode_value(value.value())?,
                None => return Ok(None),
            };

            let mut total = 0u64;
            for track_id in &album.track_ids {
                if let Some(value) = track_table.get(track_id.as_str())? {
                    let track: Track = decode_value(value.value())?;
                    total = total.saturating_add(track.size());
                }
            }

            album.total_size = Some(total);
            let album_bytes = encode_value(&album)?;
            album_table.insert(album_id, album_bytes.as_slice())?;
            total
        };
        write_txn.commit()?;
        Ok(Some(size))
    }

    /// Stores a duration for a track that has none yet. Returns whether the
    /// record changed.
    pub fn set_track_duration(&self, track_id: &str, secs: f64) -> Result<bool, LibraryError> {
        if !secs.is_finite() || secs <= 0.0 {
            return Ok(false);
        }

        let write_txn = self.db.begin_write()?;
        let updated = {
            let mut track_table = write_txn.open_table(TRACKS_TABLE)?;
            let mut track: Track = match track_table.get(track_id)? {
                Some(value) => decode_value(value.value())?,
                None => return Ok(false),
            };
            if track.duration_secs.is_some() {
                false
            } else {
                track.duration_secs = Some(secs);
                let track_bytes = encode_value(&track)?;
                track_table.insert(track_id, track_bytes.as_slice())?;
                true
            }
        };

        if updated {
            write_txn.commit()?;
        }
        Ok(updated)
    }

    /// Probes every track of the album that lacks a duration and stores what
    /// could be determined. Returns the number of tracks updated.
    pub fn probe_missing_durations(&self, album_id: &str) -> Result<usize, LibraryError> {
        let mut tracks = self.album_tracks(album_id)?;
        self.backfill_durations(&mut tracks)
    }

    /// Probes the given tracks that lack a duration, stores what could be
    /// determined and updates the tracks in place.
    pub fn backfill_durations(&self, tracks: &mut [Track]) -> Result<usize, LibraryError> {
        let mut updated = 0usize;
        for track in tracks.iter_mut().filter(|track| track.duration_secs.is_none()) {
            match probe_duration(&track.data) {
                Some(secs) => {
                    if self.set_track_duration(&track.id, secs)? {
                        updated += 1;
                    }
                    track.duration_secs = Some(secs);
                }
                None => debug!("Could not probe duration of {}", track.file_name),
            }
        }
        Ok(updated)
    }

    pub fn db(&self) -> Arc<Database> {
        Arc::clone(&self.db)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LibraryStats {
    pub albums: usize,
    pub tracks: usize,
    pub artwork: usize,
}

#[derive(Debug)]
pub enum LibraryError {
    Io(std::io::Error),
    Metadata(MetadataError),
    Redb(redb::Error),
    Bincode(Box<bincode::ErrorKind>),
    NotFound(String),
}

impl std::fmt::Display for LibraryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LibraryError::Io(err) => write!(f, "io error: {}", err),
            LibraryError::Metadata(err) => write!(f, "metadata error: {}", err),
            LibraryError::Redb(err) => write!(f, "db error: {}", err),
            LibraryError::Bincode(err) => write!(f, "bincode error: {}", err),
            LibraryError::NotFound(id) => write!(f, "not found: {}", id),
        }
    }
}

impl std::error::Error for LibraryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LibraryError::Io(err) => Some(err),
            LibraryError::Metadata(err) => Some(err),
            LibraryError::Redb(err) => Some(err),
            LibraryError::Bincode(err) => Some(err),
            LibraryError::NotFound(_) => None,
        }
    }
}

impl From<std::io::Error> for LibraryError {
    fn from(err: std::io::Error) -> Self {
        LibraryError::Io(err)
    }
}

impl From<MetadataError> for LibraryError {
    fn from(err: MetadataError) -> Self {
        LibraryError::Metadata(err)
    }
}

impl From<redb::Error> for LibraryError {
    fn from(err: redb::Error) -> Self {
        LibraryError::Redb(err)
    }
}

impl From<DatabaseError> for LibraryError {
    fn from(err: DatabaseError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<TableError> for LibraryError {
    fn from(err: TableError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<TransactionError> for LibraryError {
    fn from(err: TransactionError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<StorageError> for LibraryError {
    fn from(err: StorageError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<CommitError> for LibraryError {
    fn from(err: CommitError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<Box<bincode::ErrorKind>> for LibraryError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        LibraryError::Bincode(err)
    }
}

fn open_or_create_db(path: &Path) -> Result<Database, LibraryError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    if path.exists() {
        Ok(Database::open(path)?)
    } else {
        Ok(Database::create(path)?)
    }
}

fn read_version(db: &Database) -> Result<Option<u32>, LibraryError> {
    let read_txn = db.begin_read()?;
    let table = match read_txn.open_table(META_TABLE) {
        Ok(table) => table,
        Err(TableError::TableDoesNotExist(_)) => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let version = match table.get(META_VERSION_KEY)? {
        Some(value) => Some(decode_value(value.value())?),
        None => None,
    };
    Ok(version)
}

fn get_record<T: for<'de> Deserialize<'de>>(
    db: &Database,
    definition: TableDefinition<&str, &[u8]>,
    key: &str,
) -> Result<Option<T>, LibraryError> {
    let read_txn = db.begin_read()?;
    let table = match read_txn.open_table(definition) {
        Ok(table) => table,
        Err(TableError::TableDoesNotExist(_)) => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let record = match table.get(key)? {
        Some(value) => Some(decode_value(value.value())?),
        None => None,
    };
    Ok(record)
}

fn put_record<T: Serialize>(
    db: &Database,
    definition: TableDefinition<&str, &[u8]>,
    key: &str,
    record: &T,
) -> Result<(), LibraryError> {
    let bytes = encode_value(record)?;
    let write_txn = db.begin_write()?;
    {
        let mut table = write_txn.open_table(definition)?;
        table.insert(key, bytes.as_slice())?;
    }
    write_txn.commit()?;
    Ok(())
}

fn remove_record(
    db: &Database,
    definition: TableDefinition<&str, &[u8]>,
    key: &str,
) -> Result<bool, LibraryError> {
    let write_txn = db.begin_write()?;
    let removed = {
        let mut table = write_txn.open_table(definition)?;
        let removed = table.remove(key)?.is_some();
        removed
    };
    write_txn.commit()?;
    Ok(removed)
}

fn clear_table(
    txn: &WriteTransaction,
    table: TableDefinition<&str, &[u8]>,
) -> Result<(), LibraryError> {
    match txn.delete_table(table) {
        Ok(_) => Ok(()),
        Err(TableError::TableDoesNotExist(_)) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>, LibraryError> {
    Ok(bincode::serialize(value)?)
}

fn decode_value<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, LibraryError> {
    Ok(bincode::deserialize(bytes)?)
}
