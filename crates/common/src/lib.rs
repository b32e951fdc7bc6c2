use serde::{Deserialize, Serialize};
use std::path::Path;

const ID_SEP: char = '_';

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Album {
    pub id: String,
    pub name: String,
    pub artist: String,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    pub track_count: usize,
    pub track_ids: Vec<String>,
    /// Sum of the payload sizes of every listed track. `None` until computed.
    #[serde(default)]
    pub total_size: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub album_id: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub track_no: Option<u16>,
    pub year: Option<i32>,
    pub genre: Option<String>,
    pub duration_secs: Option<f64>,
    pub codec: Codec,
    pub media_type: Option<String>,
    pub file_name: String,
    pub data: Vec<u8>,
}

impl Track {
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Artwork {
    pub album_id: String,
    pub mime: Option<String>,
    pub data: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    Mp3,
    M4a,
    Flac,
}

impl Codec {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_string_lossy().to_ascii_lowercase();
        match ext.as_str() {
            "mp3" => Some(Codec::Mp3),
            "m4a" => Some(Codec::M4a),
            "flac" => Some(Codec::Flac),
            _ => None,
        }
    }

    pub fn from_media_type(media_type: &str) -> Option<Self> {
        let essence = media_type
            .split(';')
            .next()
            .unwrap_or(media_type)
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "audio/mpeg" | "audio/mp3" | "audio/mpeg3" => Some(Codec::Mp3),
            "audio/mp4" | "audio/m4a" | "audio/x-m4a" | "audio/aac" => Some(Codec::M4a),
            "audio/flac" | "audio/x-flac" => Some(Codec::Flac),
            _ => None,
        }
    }

    /// Extension wins over the declared media type when both are present.
    pub fn detect(file_name: &str, media_type: Option<&str>) -> Option<Self> {
        Codec::from_path(Path::new(file_name)).or_else(|| media_type.and_then(Codec::from_media_type))
    }

    pub fn default_media_type(self) -> &'static str {
        match self {
            Codec::Mp3 => "audio/mpeg",
            Codec::M4a => "audio/mp4",
            Codec::Flac => "audio/flac",
        }
    }
}

/// Media type to hand to a playback backend: the declared one, a guess from
/// the file name, or the codec default.
pub fn media_type_for(file_name: &str, declared: Option<&str>, codec: Codec) -> String {
    if let Some(declared) = declared.map(str::trim).filter(|value| !value.is_empty()) {
        return declared.to_string();
    }
    match mime_guess::from_path(file_name).first_raw() {
        Some(guess) if guess.starts_with("audio/") => guess.to_string(),
        _ => codec.default_media_type().to_string(),
    }
}

pub fn stable_id(input: &str) -> String {
    blake3::hash(input.as_bytes()).to_hex().to_string()
}

/// Lowercases and keeps alphanumeric characters only.
pub fn normalize_key(input: &str) -> String {
    input
        .chars()
        .filter(|ch| ch.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Deterministic album id. Two (name, artist) pairs whose normalized forms
/// are equal map to the same id.
pub fn album_id(name: &str, artist: &str) -> String {
    let mut key = normalize_key(name);
    key.push(ID_SEP);
    key.push_str(&normalize_key(artist));
    stable_id(&key)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackSlot {
    Number(u16),
    Position(usize),
}

pub fn track_id(album_id: &str, slot: TrackSlot) -> String {
    let mut key = String::with_capacity(album_id.len() + 8);
    key.push_str(album_id);
    key.push(ID_SEP);
    match slot {
        TrackSlot::Number(number) => key.push_str(&number.to_string()),
        TrackSlot::Position(position) => {
            key.push_str("pos");
            key.push_str(&position.to_string());
        }
    }
    stable_id(&key)
}
