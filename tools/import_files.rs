use std::env;
use std::path::PathBuf;

use library::{collect_audio_files, ImportFile, Library};
use player::{config_path_from_env, load_or_create_config};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let inputs: Vec<PathBuf> = env::args().skip(1).map(PathBuf::from).collect();
    if inputs.is_empty() {
        return Err("usage: import_files <file-or-directory>...".into());
    }

    let config_path = config_path_from_env();
    let (config, created) = load_or_create_config(&config_path)?;
    if created {
        info!("Wrote default config to {:?}", config_path);
    }
    let library = Library::open(&config.library_path(&config_path))?;

    let mut files = Vec::new();
    for input in &inputs {
        if input.is_dir() {
            for path in collect_audio_files(input) {
                match ImportFile::from_path(&path) {
                    Ok(file) => files.push(file),
                    Err(err) => warn!("Skipping {:?}: {}", path, err),
                }
            }
        } else {
            match ImportFile::from_path(input) {
                Ok(file) => files.push(file),
                Err(err) => warn!("Skipping {:?}: {}", input, err),
            }
        }
    }

    let report = library.import(files)?;
    for rejected in &report.rejected {
        println!("rejected {} ({})", rejected.name, rejected.reason);
    }

    for album_id in &report.albums {
        let album = match library.get_album(album_id)? {
            Some(album) => album,
            None => continue,
        };
        let size = library.album_size(album_id)?.unwrap_or(0);
        println!(
            "{} - {}: {} tracks, {:.1} MiB",
            album.artist,
            album.name,
            album.track_count,
            size as f64 / (1024.0 * 1024.0)
        );
    }

    let stats = library.stats()?;
    println!(
        "Library: {} albums, {} tracks, {} artwork",
        stats.albums, stats.tracks, stats.artwork
    );

    Ok(())
}
