use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use common::{album_id, media_type_for, track_id, Album, Artwork, Codec, Track, TrackSlot};
use metadata::{fallback_tags, title_from_file_name, CoverArt, LoftyReader, TagInfo, TagReader, UNKNOWN};
use redb::ReadableTable;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::{decode_value, encode_value, Library, LibraryError, ALBUMS_TABLE, ARTWORK_TABLE, TRACKS_TABLE};

/// A user-selected file waiting to be imported.
#[derive(Clone, Debug)]
pub struct ImportFile {
    pub name: String,
    pub media_type: Option<String>,
    pub data: Vec<u8>,
}

impl ImportFile {
    pub fn new(name: impl Into<String>, media_type: Option<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            media_type,
            data,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, LibraryError> {
        let data = fs::read(path)?;
        let name = path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());
        Ok(Self {
            name,
            media_type: None,
            data,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RejectedFile {
    pub name: String,
    pub reason: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ImportReport {
    /// Ids of every album created or extended, in import order.
    pub albums: Vec<String>,
    pub imported: usize,
    pub rejected: Vec<RejectedFile>,
}

struct TrackDraft {
    file: ImportFile,
    codec: Codec,
    tags: TagInfo,
    title: String,
    artist: String,
    album: String,
}

impl TrackDraft {
    fn new(file: ImportFile, codec: Codec, tags: TagInfo) -> Self {
        let title = tags
            .title
            .clone()
            .unwrap_or_else(|| title_from_file_name(&file.name));
        let artist = tags
            .artist
            .clone()
            .or_else(|| tags.album_artist.clone())
            .unwrap_or_else(|| UNKNOWN.to_string());
        let album = tags.album.clone().unwrap_or_else(|| UNKNOWN.to_string());
        Self {
            file,
            codec,
            tags,
            title,
            artist,
            album,
        }
    }

    fn sort_key(&self) -> u16 {
        self.tags.track_no.unwrap_or(0)
    }
}

struct AlbumGroup {
    name: String,
    drafts: Vec<TrackDraft>,
}

/// Partitions drafts by album name in first-seen order and sorts each group
/// by track number, missing numbers counting as 0.
fn group_by_album(drafts: Vec<TrackDraft>) -> Vec<AlbumGroup> {
    let mut groups: Vec<AlbumGroup> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for draft in drafts {
        match index.get(&draft.album) {
            Some(&idx) => groups[idx].drafts.push(draft),
            None => {
                index.insert(draft.album.clone(), groups.len());
                groups.push(AlbumGroup {
                    name: draft.album.clone(),
                    drafts: vec![draft],
                });
            }
        }
    }
    for group in &mut groups {
        group.drafts.sort_by_key(TrackDraft::sort_key);
    }
    groups
}

fn track_slots(drafts: &[TrackDraft]) -> Vec<TrackSlot> {
    let mut seen: HashMap<u16, usize> = HashMap::new();
    for draft in drafts {
        if let Some(number) = draft.tags.track_no.filter(|n| *n > 0) {
            *seen.entry(number).or_default() += 1;
        }
    }
    drafts
        .iter()
        .enumerate()
        .map(|(position, draft)| match draft.tags.track_no {
            Some(number) if number > 0 && seen.get(&number) == Some(&1) => TrackSlot::Number(number),
            _ => TrackSlot::Position(position + 1),
        })
        .collect()
}

/// Track ids for a group. Positional slots skip ids the album already lists,
/// so untagged tracks added later never replace earlier ones.
fn assign_track_ids(album_key: &str, slots: &[TrackSlot], existing: &[String]) -> Vec<String> {
    let mut taken: HashSet<String> = existing.iter().cloned().collect();
    slots
        .iter()
        .map(|slot| match *slot {
            TrackSlot::Number(_) => track_id(album_key, *slot),
            TrackSlot::Position(start) => {
                let mut position = start;
                loop {
                    let id = track_id(album_key, TrackSlot::Position(position));
                    if taken.insert(id.clone()) {
                        break id;
                    }
                    position += 1;
                }
            }
        })
        .collect()
}

impl Library {
    pub fn import(&self, files: Vec<ImportFile>) -> Result<ImportReport, LibraryError> {
        self.import_with(files, &LoftyReader)
    }

    /// Imports a batch through the given tag reader. Unsupported files are
    /// reported, unreadable tags fall back to file-name defaults.
    pub fn import_with(
        &self,
        files: Vec<ImportFile>,
        reader: &dyn TagReader,
    ) -> Result<ImportReport, LibraryError> {
        let mut report = ImportReport::default();
        let mut drafts = Vec::new();

        for file in files {
            let codec = match Codec::detect(&file.name, file.media_type.as_deref()) {
                Some(codec) => codec,
                None => {
                    warn!("Skipping unsupported file {:?}", file.name);
                    report.rejected.push(RejectedFile {
                        name: file.name,
                        reason: "unsupported file type".to_string(),
                    });
                    continue;
                }
            };

            let tags = match reader.read_tags(&file.name, &file.data) {
                Ok(tags) => tags,
                Err(err) => {
                    warn!("Failed to read tags for {:?}: {}", file.name, err);
                    fallback_tags(&file.name)
                }
            };
            drafts.push(TrackDraft::new(file, codec, tags));
        }

        for group in group_by_album(drafts) {
            let (album_id, count) = self.store_group(group, reader)?;
            report.imported += count;
            if !report.albums.contains(&album_id) {
                report.albums.push(album_id);
            }
        }

        info!(
            "Imported {} tracks into {} albums ({} rejected)",
            report.imported,
            report.albums.len(),
            report.rejected.len()
        );
        Ok(report)
    }

    fn store_group(
        &self,
        group: AlbumGroup,
        reader: &dyn TagReader,
    ) -> Result<(String, usize), LibraryError> {
        let first = match group.drafts.first() {
            Some(first) => first,
            None => return Err(LibraryError::NotFound(group.name)),
        };
        let artist = first
            .tags
            .album_artist
            .clone()
            .unwrap_or_else(|| first.artist.clone());
        let album_key = album_id(&group.name, &artist);
        let genre = group.drafts.iter().find_map(|draft| draft.tags.genre.clone());
        let year = group.drafts.iter().find_map(|draft| draft.tags.year);

        let cover = if self.get_artwork(&album_key)?.is_none() {
            find_cover(&group.drafts, reader)
        } else {
            None
        };

        let write_txn = self.db.begin_write()?;
        let count = {
            let mut track_table = write_txn.open_table(TRACKS_TABLE)?;
            let mut order: Vec<(String, u16)> = Vec::new();

            let mut album_table = write_txn.open_table(ALBUMS_TABLE)?;
            let existing: Option<Album> = match album_table.get(album_key.as_str())? {
                Some(value) => Some(decode_value(value.value())?),
                None => None,
            };

            let slots = track_slots(&group.drafts);
            let existing_ids = existing
                .as_ref()
                .map(|album| album.track_ids.as_slice())
                .unwrap_or(&[]);
            let ids = assign_track_ids(&album_key, &slots, existing_ids);
            let tracks: Vec<Track> = group
                .drafts
                .into_iter()
                .zip(ids)
                .map(|(draft, id)| {
                    let media_type = media_type_for(&draft.file.name, draft.file.media_type.as_deref(), draft.codec);
                    Track {
                        id,
                        album_id: album_key.clone(),
                        title: draft.title,
                        artist: draft.artist,
                        album: draft.album,
                        track_no: draft.tags.track_no,
                        year: draft.tags.year,
                        genre: draft.tags.genre,
                        duration_secs: draft.tags.duration_secs,
                        codec: draft.codec,
                        media_type: Some(media_type),
                        file_name: draft.file.name,
                        data: draft.file.data,
                    }
                })
                .collect();
            if let Some(existing) = &existing {
                for track_id in &existing.track_ids {
                    if let Some(value) = track_table.get(track_id.as_str())? {
                        let track: Track = decode_value(value.value())?;
                        order.push((track.id, track.track_no.unwrap_or(0)));
                    }
                }
            }

            for track in &tracks {
                let track_bytes = encode_value(track)?;
                track_table.insert(track.id.as_str(), track_bytes.as_slice())?;
                debug!("Stored track {:?} as {}", track.file_name, track.id);
                if !order.iter().any(|(id, _)| id == &track.id) {
                    order.push((track.id.clone(), track.track_no.unwrap_or(0)));
                }
            }
            order.sort_by_key(|(_, number)| *number);
            let track_ids: Vec<String> = order.into_iter().map(|(id, _)| id).collect();

            let album = match existing {
                Some(mut album) => {
                    if album.genre.is_none() {
                        album.genre = genre;
                    }
                    if album.year.is_none() {
                        album.year = year;
                    }
                    album.track_count = track_ids.len();
                    album.track_ids = track_ids;
                    album.total_size = None;
                    album
                }
                None => Album {
                    id: album_key.clone(),
                    name: group.name,
                    artist,
                    genre,
                    year,
                    track_count: track_ids.len(),
                    track_ids,
                    total_size: None,
                },
            };
            let album_bytes = encode_value(&album)?;
            album_table.insert(album_key.as_str(), album_bytes.as_slice())?;

            if let Some(cover) = cover {
                let mut artwork_table = write_txn.open_table(ARTWORK_TABLE)?;
                if artwork_table.get(album_key.as_str())?.is_none() {
                    let artwork = Artwork {
                        album_id: album_key.clone(),
                        mime: cover.mime,
                        data: cover.data,
                    };
                    let artwork_bytes = encode_value(&artwork)?;
                    artwork_table.insert(album_key.as_str(), artwork_bytes.as_slice())?;
                }
            }
            tracks.len()
        };
        write_txn.commit()?;

        Ok((album_key, count))
    }
}

fn find_cover(drafts: &[TrackDraft], reader: &dyn TagReader) -> Option<CoverArt> {
    for draft in drafts.iter().filter(|draft| draft.tags.has_embedded_cover) {
        match reader.read_cover(&draft.file.name, &draft.file.data) {
            Ok(Some(cover)) => return Some(cover),
            Ok(None) => {}
            Err(err) => warn!("Failed to read cover from {:?}: {}", draft.file.name, err),
        }
    }
    None
}

/// Every supported audio file below `root`, sorted by path.
pub fn collect_audio_files(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if Codec::from_path(path).is_some() {
            files.push(path.to_path_buf());
        }
    }
    files.sort();
    files
}
