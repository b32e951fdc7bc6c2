use std::io::Cursor;
use std::path::Path;

use lofty::error::LoftyError;
use lofty::file::TaggedFile;
use lofty::picture::{Picture, PictureType};
use lofty::prelude::{AudioFile, ItemKey, TaggedFileExt};
use lofty::probe::Probe;

/// Placeholder used for artist and album when a file carries no usable tag.
pub const UNKNOWN: &str = "Unknown";

#[derive(Debug, Default, Clone, PartialEq)]
pub struct TagInfo {
    pub artist: Option<String>,
    pub album_artist: Option<String>,
    pub album: Option<String>,
    pub title: Option<String>,
    pub track_no: Option<u16>,
    pub year: Option<i32>,
    pub genre: Option<String>,
    pub duration_secs: Option<f64>,
    pub has_embedded_cover: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoverArt {
    pub data: Vec<u8>,
    pub mime: Option<String>,
}

#[derive(Debug)]
pub enum MetadataError {
    Io(std::io::Error),
    Lofty(LoftyError),
    Unreadable(String),
}

impl std::fmt::Display for MetadataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataError::Io(err) => write!(f, "io error: {}", err),
            MetadataError::Lofty(err) => write!(f, "tag error: {}", err),
            MetadataError::Unreadable(reason) => write!(f, "unreadable: {}", reason),
        }
    }
}

impl std::error::Error for MetadataError {}

impl From<std::io::Error> for MetadataError {
    fn from(err: std::io::Error) -> Self {
        MetadataError::Io(err)
    }
}

impl From<LoftyError> for MetadataError {
    fn from(err: LoftyError) -> Self {
        MetadataError::Lofty(err)
    }
}

/// Source of tag information for imported payloads.
pub trait TagReader {
    fn read_tags(&self, file_name: &str, data: &[u8]) -> Result<TagInfo, MetadataError>;

    fn read_cover(&self, _file_name: &str, _data: &[u8]) -> Result<Option<CoverArt>, MetadataError> {
        Ok(None)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LoftyReader;

impl TagReader for LoftyReader {
    fn read_tags(&self, _file_name: &str, data: &[u8]) -> Result<TagInfo, MetadataError> {
        read_tags_from_bytes(data)
    }

    fn read_cover(&self, _file_name: &str, data: &[u8]) -> Result<Option<CoverArt>, MetadataError> {
        read_cover_from_bytes(data)
    }
}

impl<F> TagReader for F
where
    F: Fn(&str, &[u8]) -> Result<TagInfo, MetadataError>,
{
    fn read_tags(&self, file_name: &str, data: &[u8]) -> Result<TagInfo, MetadataError> {
        self(file_name, data)
    }
}

fn probe(data: &[u8]) -> Result<TaggedFile, MetadataError> {
    if data.is_empty() {
        return Err(MetadataError::Unreadable("empty payload".to_string()));
    }
    let tagged_file = Probe::new(Cursor::new(data)).guess_file_type()?.read()?;
    Ok(tagged_file)
}

pub fn read_tags_from_bytes(data: &[u8]) -> Result<TagInfo, MetadataError> {
    let tagged_file = probe(data)?;
    let properties = tagged_file.properties();

    let mut info = TagInfo::default();

    let duration = properties.duration();
    if !duration.is_zero() {
        info.duration_secs = Some(duration.as_secs_f64());
    }

    if let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
        info.title = tag.get_string(&ItemKey::TrackTitle).and_then(clean_text);
        info.album = tag.get_string(&ItemKey::AlbumTitle).and_then(clean_text);
        let album_artist = tag.get_string(&ItemKey::AlbumArtist).and_then(clean_text);
        let track_artist = tag.get_string(&ItemKey::TrackArtist).and_then(clean_text);
        info.artist = track_artist.or_else(|| album_artist.clone());
        info.album_artist = album_artist;
        info.track_no = tag
            .get_string(&ItemKey::TrackNumber)
            .and_then(parse_u16);
        info.year = tag
            .get_string(&ItemKey::Year)
            .or_else(|| tag.get_string(&ItemKey::RecordingDate))
            .and_then(parse_year);
        info.genre = tag.get_string(&ItemKey::Genre).and_then(clean_text);
        info.has_embedded_cover = !tag.pictures().is_empty();
    }

    Ok(info)
}

pub fn read_cover_from_bytes(data: &[u8]) -> Result<Option<CoverArt>, MetadataError> {
    let tagged_file = probe(data)?;
    let tag = match tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
        Some(tag) => tag,
        None => return Ok(None),
    };

    let picture = match pick_picture(tag.pictures()) {
        Some(picture) => picture,
        None => return Ok(None),
    };

    let data = picture.data().to_vec();
    let mime = guess_mime(&data);
    Ok(Some(CoverArt { data, mime }))
}

/// Tags used when a payload cannot be read: title from the file name,
/// artist and album unknown, no track number.
pub fn fallback_tags(file_name: &str) -> TagInfo {
    TagInfo {
        title: Some(title_from_file_name(file_name)),
        artist: Some(UNKNOWN.to_string()),
        album: Some(UNKNOWN.to_string()),
        ..TagInfo::default()
    }
}

/// File name without directories and extension.
pub fn title_from_file_name(file_name: &str) -> String {
    let base = file_name
        .rsplit(&['/', '\\'][..])
        .next()
        .unwrap_or(file_name);
    let stem = Path::new(base)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    if stem.trim().is_empty() {
        base.to_string()
    } else {
        stem
    }
}

/// Duration of an in-memory payload, `None` when it cannot be determined.
pub fn probe_duration(data: &[u8]) -> Option<f64> {
    let tagged_file = probe(data).ok()?;
    let duration = tagged_file.properties().duration();
    if duration.is_zero() {
        None
    } else {
        Some(duration.as_secs_f64())
    }
}

fn clean_text(text: &str) -> Option<String> {
    let trimmed = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_u16(text: &str) -> Option<u16> {
    let head = text.split('/').next().unwrap_or(text).trim();
    head.parse().ok()
}

fn parse_year(text: &str) -> Option<i32> {
    let mut digits = String::new();
    for ch in text.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            if digits.len() == 4 {
                break;
            }
        } else if !digits.is_empty() {
            break;
        }
    }
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}

fn pick_picture(pictures: &[Picture]) -> Option<&Picture> {
    for picture in pictures {
        if picture.pic_type() == PictureType::CoverFront {
            return Some(picture);
        }
    }
    pictures.first()
}

pub fn guess_mime(bytes: &[u8]) -> Option<String> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg".to_string())
    } else if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
        Some("image/png".to_string())
    } else if bytes.starts_with(b"GIF8") {
        Some("image/gif".to_string())
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp".to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_track_numbers() {
        assert_eq!(parse_u16("3"), Some(3));
        assert_eq!(parse_u16(" 7/12 "), Some(7));
        assert_eq!(parse_u16("A1"), None);
        assert_eq!(parse_u16(""), None);
    }

    #[test]
    fn parses_years_from_dates() {
        assert_eq!(parse_year("1997"), Some(1997));
        assert_eq!(parse_year("2004-05-01"), Some(2004));
        assert_eq!(parse_year("unknown"), None);
    }

    #[test]
    fn cleans_padded_text() {
        assert_eq!(clean_text("  Song\0"), Some("Song".to_string()));
        assert_eq!(clean_text(" \0 "), None);
    }

    #[test]
    fn fallback_uses_file_name() {
        let tags = fallback_tags("music/disc/02 Song.flac");
        assert_eq!(tags.title.as_deref(), Some("02 Song"));
        assert_eq!(tags.artist.as_deref(), Some(UNKNOWN));
        assert_eq!(tags.album.as_deref(), Some(UNKNOWN));
        assert_eq!(tags.track_no, None);
        assert_eq!(title_from_file_name("noext"), "noext");
        assert_eq!(title_from_file_name("C:\\rips\\01 Intro.mp3"), "01 Intro");
    }

    #[test]
    fn garbage_payload_is_an_error() {
        assert!(read_tags_from_bytes(b"definitely not audio").is_err());
        assert!(read_tags_from_bytes(&[]).is_err());
        assert_eq!(probe_duration(b"definitely not audio"), None);
    }

    #[test]
    fn sniffs_image_types() {
        assert_eq!(guess_mime(&[0xFF, 0xD8, 0xFF, 0xE0]).as_deref(), Some("image/jpeg"));
        assert_eq!(guess_mime(&[0x89, 0x50, 0x4E, 0x47, 0x0D]).as_deref(), Some("image/png"));
        assert_eq!(guess_mime(b"RIFF\0\0\0\0WEBPVP8 ").as_deref(), Some("image/webp"));
        assert_eq!(guess_mime(b"text"), None);
    }

    #[test]
    fn closures_act_as_readers() {
        let reader = |name: &str, _data: &[u8]| -> Result<TagInfo, MetadataError> {
            Ok(TagInfo {
                title: Some(name.to_string()),
                ..TagInfo::default()
            })
        };
        let info = reader.read_tags("a.mp3", &[]).unwrap();
        assert_eq!(info.title.as_deref(), Some("a.mp3"));
        assert_eq!(reader.read_cover("a.mp3", &[]).unwrap(), None);
    }
}
