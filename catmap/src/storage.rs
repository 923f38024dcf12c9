//! Durable on-disk layout.
//!
//! ```text
//! <root>/
//!   log/                     rolling log files
//!   maps/
//!     <map>/
//!       properties.txt       optional map descriptor
//!       <z>/<row>/<col>.png  or .jpeg
//!   tracks/
//!     <name>.gpx
//!     current/
//!       <timestamp>.tmp      track being recorded
//! ```
//!
//! All methods are blocking; async callers go through `spawn_blocking`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::coord::TileCoord;
use crate::logging::LogOnce;

/// Name of the map descriptor inside a map directory.
pub const MAP_PROPERTIES_FILE: &str = "properties.txt";

/// Extension of saved tracks.
pub const TRACK_EXTENSION: &str = "gpx";

/// File name of the sample track written on first run.
pub const SAMPLE_TRACK_NAME: &str = "cat.gpx";

/// Local-time file name pattern of in-progress tracks.
const CURRENT_TRACK_NAME_FORMAT: &str = "%Y-%m-%dT%H-%M-%S.tmp";

/// Errors from the durable layout.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Cannot create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid name: {0:?}")]
    InvalidName(String),
}

/// Raster encodings a tile can be stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileFormat {
    Png,
    Jpeg,
}

impl TileFormat {
    /// Lookup order when reading tiles.
    pub const ALL: [TileFormat; 2] = [TileFormat::Png, TileFormat::Jpeg];

    pub fn extension(self) -> &'static str {
        match self {
            TileFormat::Png => "png",
            TileFormat::Jpeg => "jpeg",
        }
    }

    /// Format named by a `Content-Type` such as `image/png`.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let mime = content_type.split(';').next()?.trim();
        let subtype = mime.rsplit('/').next()?.to_ascii_lowercase();
        match subtype.as_str() {
            "png" => Some(TileFormat::Png),
            "jpeg" | "jpg" => Some(TileFormat::Jpeg),
            _ => None,
        }
    }

    /// Format guessed from the leading bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        match image::guess_format(bytes).ok()? {
            image::ImageFormat::Png => Some(TileFormat::Png),
            image::ImageFormat::Jpeg => Some(TileFormat::Jpeg),
            _ => None,
        }
    }

    /// Content type first, then the bytes, then JPEG.
    pub fn detect(content_type: Option<&str>, bytes: &[u8]) -> Self {
        content_type
            .and_then(Self::from_content_type)
            .or_else(|| Self::sniff(bytes))
            .unwrap_or(TileFormat::Jpeg)
    }
}

/// Handle on the data root.
#[derive(Debug)]
pub struct Storage {
    root: PathBuf,
    maps: PathBuf,
    tracks: PathBuf,
    current: PathBuf,
    log: PathBuf,
    log_once: LogOnce,
}

impl Storage {
    /// Opens the layout under `root`, creating missing directories.
    ///
    /// A fresh `maps/` directory is seeded with the default maps and a fresh
    /// `tracks/` directory with the sample track.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        let storage = Self {
            maps: root.join("maps"),
            tracks: root.join("tracks"),
            current: root.join("tracks").join("current"),
            log: root.join("log"),
            root,
            log_once: LogOnce::new(),
        };

        create_dir(&storage.root)?;
        create_dir(&storage.log)?;

        if !storage.maps.is_dir() {
            create_dir(&storage.maps)?;
            info!(path = %storage.maps.display(), "Installing default maps");
            crate::map::install_defaults(&storage);
        }

        if !storage.tracks.is_dir() {
            create_dir(&storage.tracks)?;
            let sample = storage.tracks.join(SAMPLE_TRACK_NAME);
            if let Err(e) = crate::track::gpx::write_sample_track(&sample) {
                warn!(path = %sample.display(), error = %e, "Cannot write sample track");
            }
        }
        create_dir(&storage.current)?;

        Ok(storage)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn maps_dir(&self) -> &Path {
        &self.maps
    }

    pub fn tracks_dir(&self) -> &Path {
        &self.tracks
    }

    pub fn current_dir(&self) -> &Path {
        &self.current
    }

    pub fn log_dir(&self) -> &Path {
        &self.log
    }

    /// Shared once-per-cause failure reporter.
    pub fn log_once(&self) -> &LogOnce {
        &self.log_once
    }

    // ---- maps ----

    /// Sorted names of the map directories.
    pub fn map_names(&self) -> Vec<String> {
        let mut names: Vec<String> = match fs::read_dir(&self.maps) {
            Ok(entries) => entries
                .flatten()
                .filter(|e| e.path().is_dir())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect(),
            Err(e) => {
                self.log_once.warn(
                    "storage.map_names",
                    format!("Cannot list {}: {}", self.maps.display(), e),
                );
                Vec::new()
            }
        };
        names.sort();
        names
    }

    pub fn map_dir(&self, map: &str) -> PathBuf {
        self.maps.join(map)
    }

    /// Contents of the map descriptor.
    ///
    /// `None` when the map directory does not exist, an empty string when
    /// the map has no descriptor.
    pub fn read_map_properties(&self, map: &str) -> Option<String> {
        let dir = self.map_dir(map);
        if !dir.is_dir() {
            return None;
        }
        let file = dir.join(MAP_PROPERTIES_FILE);
        if !file.is_file() {
            return Some(String::new());
        }
        match fs::read_to_string(&file) {
            Ok(text) => Some(text),
            Err(e) => {
                warn!(path = %file.display(), error = %e, "Cannot read map properties");
                Some(String::new())
            }
        }
    }

    /// Creates a map directory with the given descriptor.
    ///
    /// An existing name gets a `_1`, `_2`, ... suffix. Returns the name
    /// actually used.
    pub fn add_map(&self, name: &str, properties: &str) -> Result<String, StorageError> {
        validate_name(name)?;
        let mut actual = name.to_string();
        let mut i = 1;
        while self.map_dir(&actual).exists() {
            actual = format!("{}_{}", name, i);
            i += 1;
        }

        let dir = self.map_dir(&actual);
        create_dir(&dir)?;
        let file = dir.join(MAP_PROPERTIES_FILE);
        fs::write(&file, properties).map_err(|source| StorageError::Io { path: file, source })?;
        debug!(map = %actual, "Map added");
        Ok(actual)
    }

    // ---- tiles ----

    fn tile_stem(&self, map: &str, tile: TileCoord) -> PathBuf {
        self.maps
            .join(map)
            .join(tile.zoom.to_string())
            .join(tile.row.to_string())
            .join(tile.col.to_string())
    }

    /// Path of an existing tile file, PNG preferred over JPEG.
    pub fn tile_path(&self, map: &str, tile: TileCoord) -> Option<PathBuf> {
        let stem = self.tile_stem(map, tile);
        TileFormat::ALL
            .iter()
            .map(|format| stem.with_extension(format.extension()))
            .find(|path| path.is_file())
    }

    /// Path of the tile if it exists, otherwise the path without extension.
    pub fn tile_path_or_stem(&self, map: &str, tile: TileCoord) -> PathBuf {
        self.tile_path(map, tile)
            .unwrap_or_else(|| self.tile_stem(map, tile))
    }

    /// Raw bytes of a stored tile.
    pub fn read_tile(&self, map: &str, tile: TileCoord) -> Option<Vec<u8>> {
        let path = self.tile_path(map, tile)?;
        match fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                self.log_once.warn(
                    "storage.read_tile",
                    format!("Cannot read tile {}: {}", path.display(), e),
                );
                None
            }
        }
    }

    /// Writes downloaded tile bytes as `<map>/<z>/<row>/<col>.<ext>`.
    pub fn save_tile(
        &self,
        map: &str,
        tile: TileCoord,
        format: TileFormat,
        bytes: &[u8],
    ) -> Result<PathBuf, StorageError> {
        let path = self.tile_stem(map, tile).with_extension(format.extension());
        if let Some(parent) = path.parent() {
            create_dir(parent)?;
        }
        fs::write(&path, bytes).map_err(|source| StorageError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    // ---- tracks ----

    /// Names of saved tracks, reverse sorted so the newest come first.
    pub fn track_names(&self) -> Vec<String> {
        let mut names: Vec<String> = match fs::read_dir(&self.tracks) {
            Ok(entries) => entries
                .flatten()
                .filter(|e| e.path().is_file())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .filter(|name| {
                    Path::new(name)
                        .extension()
                        .is_some_and(|ext| ext == TRACK_EXTENSION)
                })
                .collect(),
            Err(e) => {
                self.log_once.warn(
                    "storage.track_names",
                    format!("Cannot list {}: {}", self.tracks.display(), e),
                );
                Vec::new()
            }
        };
        names.sort_unstable_by(|a, b| b.cmp(a));
        names
    }

    pub fn track_path(&self, name: &str) -> PathBuf {
        self.tracks.join(name)
    }

    pub fn delete_track(&self, name: &str) -> Result<(), StorageError> {
        validate_name(name)?;
        let path = self.track_path(name);
        fs::remove_file(&path).map_err(|source| StorageError::Io { path, source })
    }

    /// The newest unfinished in-progress track, if any.
    pub fn last_current_track(&self) -> Option<PathBuf> {
        let mut names: Vec<String> = fs::read_dir(&self.current)
            .ok()?
            .flatten()
            .filter(|e| e.path().is_file())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".tmp"))
            .collect();
        names.sort();
        names.pop().map(|name| self.current.join(name))
    }

    /// Path for a new in-progress track named after the local time.
    pub fn new_current_track_path(&self) -> PathBuf {
        let name = chrono::Local::now()
            .format(CURRENT_TRACK_NAME_FORMAT)
            .to_string();
        self.current.join(name)
    }
}

fn create_dir(path: &Path) -> Result<(), StorageError> {
    fs::create_dir_all(path).map_err(|source| StorageError::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}

/// Names are single path components.
fn validate_name(name: &str) -> Result<(), StorageError> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
    {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> (tempfile::TempDir, Storage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path().join("cat")).unwrap();
        (dir, storage)
    }

    #[test]
    fn test_open_creates_layout_and_defaults() {
        let (_dir, storage) = storage();
        assert!(storage.maps_dir().is_dir());
        assert!(storage.current_dir().is_dir());
        assert!(storage.log_dir().is_dir());
        assert!(storage.map_names().contains(&"osm".to_string()));
        assert_eq!(storage.track_names(), vec![SAMPLE_TRACK_NAME.to_string()]);
    }

    #[test]
    fn test_open_twice_keeps_user_changes() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        storage.delete_track(SAMPLE_TRACK_NAME).unwrap();

        let reopened = Storage::open(dir.path()).unwrap();
        assert!(reopened.track_names().is_empty());
    }

    #[test]
    fn test_tile_path_prefers_png() {
        let (_dir, storage) = storage();
        let tile = TileCoord::new(2, 3, 4).unwrap();
        assert!(storage.tile_path("osm", tile).is_none());

        storage.save_tile("osm", tile, TileFormat::Jpeg, b"j").unwrap();
        let path = storage.tile_path("osm", tile).unwrap();
        assert!(path.ends_with("maps/osm/4/2/3.jpeg"));

        storage.save_tile("osm", tile, TileFormat::Png, b"p").unwrap();
        let path = storage.tile_path("osm", tile).unwrap();
        assert!(path.ends_with("maps/osm/4/2/3.png"));
        assert_eq!(storage.read_tile("osm", tile).unwrap(), b"p");
    }

    #[test]
    fn test_tile_path_or_stem() {
        let (_dir, storage) = storage();
        let tile = TileCoord::new(0, 1, 1).unwrap();
        assert!(storage
            .tile_path_or_stem("osm", tile)
            .ends_with("maps/osm/1/0/1"));
    }

    #[test]
    fn test_add_map_uniquifies_name() {
        let (_dir, storage) = storage();
        assert_eq!(storage.add_map("mine", "{}").unwrap(), "mine");
        assert_eq!(storage.add_map("mine", "{}").unwrap(), "mine_1");
        assert_eq!(storage.add_map("mine", "{}").unwrap(), "mine_2");
        assert!(matches!(
            storage.add_map("../evil", "{}"),
            Err(StorageError::InvalidName(_))
        ));
    }

    #[test]
    fn test_read_map_properties() {
        let (_dir, storage) = storage();
        assert!(storage.read_map_properties("absent").is_none());
        fs::create_dir_all(storage.map_dir("bare")).unwrap();
        assert_eq!(storage.read_map_properties("bare").unwrap(), "");
        storage.add_map("full", "{\"url\": \"x\"}").unwrap();
        assert_eq!(
            storage.read_map_properties("full").unwrap(),
            "{\"url\": \"x\"}"
        );
    }

    #[test]
    fn test_track_names_reverse_sorted_gpx_only() {
        let (_dir, storage) = storage();
        for name in ["2023-01-01.gpx", "2024-05-05.gpx", "notes.txt"] {
            fs::write(storage.track_path(name), "").unwrap();
        }
        assert_eq!(
            storage.track_names(),
            vec!["cat.gpx", "2024-05-05.gpx", "2023-01-01.gpx"]
        );
    }

    #[test]
    fn test_current_track_lifecycle() {
        let (_dir, storage) = storage();
        assert!(storage.last_current_track().is_none());

        let older = storage.current_dir().join("2023-01-01T10-00-00.tmp");
        let newer = storage.current_dir().join("2023-01-02T10-00-00.tmp");
        fs::write(&older, "").unwrap();
        fs::write(&newer, "").unwrap();
        fs::write(storage.current_dir().join("notes.txt"), "").unwrap();
        assert_eq!(storage.last_current_track().unwrap(), newer);

        fs::remove_file(&newer).unwrap();
        assert_eq!(storage.last_current_track().unwrap(), older);
    }

    #[test]
    fn test_new_current_track_path_shape() {
        let (_dir, storage) = storage();
        let path = storage.new_current_track_path();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.ends_with(".tmp"));
        assert_eq!(name.len(), "2023-01-20T11-28-00.tmp".len());
        assert!(path.starts_with(storage.current_dir()));
    }

    #[test]
    fn test_tile_format_detection() {
        assert_eq!(
            TileFormat::from_content_type("image/png"),
            Some(TileFormat::Png)
        );
        assert_eq!(
            TileFormat::from_content_type("image/jpeg; charset=binary"),
            Some(TileFormat::Jpeg)
        );
        assert_eq!(TileFormat::from_content_type("text/html"), None);

        let png_magic = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        assert_eq!(TileFormat::detect(None, &png_magic), TileFormat::Png);
        assert_eq!(TileFormat::detect(Some("text/plain"), b"??"), TileFormat::Jpeg);
        assert_eq!(
            TileFormat::detect(Some("image/jpeg"), &png_magic),
            TileFormat::Jpeg
        );
    }
}
