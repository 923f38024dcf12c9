//! Map sources.
//!
//! A map is a directory under `maps/` holding cached tiles and an optional
//! `properties.txt` JSON descriptor:
//!
//! ```json
//! {
//!    "url": "https://example/x=%1$d/y=%2$d/z=%3$d",
//!    "projection": "ellipsoid"
//! }
//! ```
//!
//! Without a `url` the map is offline only. Without a `projection` it is
//! spherical Mercator.

mod url;

pub use url::UrlTemplate;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::coord::{MapProjection, TileCoord};
use crate::storage::{Storage, StorageError};

/// Map used when none is named or the named one is missing.
pub const DEFAULT_MAP: &str = "osm";

/// Default tile edge in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 256;

/// Maps installed on first run: name, URL template, projection.
pub const DEFAULT_MAPS: &[(&str, &str, MapProjection)] = &[
    (
        "mende",
        "http://cat.aqoleg.com/maps/mende/%3$d/%2$d/%1$d.jpeg",
        MapProjection::Spherical,
    ),
    (
        "osm",
        "http://a.tile.openstreetmap.org/%3$d/%1$d/%2$d.png",
        MapProjection::Spherical,
    ),
    (
        "otm",
        "https://a.tile.opentopomap.org/%3$d/%1$d/%2$d.png",
        MapProjection::Spherical,
    ),
    (
        "topo",
        "https://maps.marshruty.ru/ml.ashx?al=1&x=%1$d&y=%2$d&z=%3$d",
        MapProjection::Spherical,
    ),
    (
        "gsat",
        "https://khms0.googleapis.com/kh?v=937&hl=en&x=%1$d&y=%2$d&z=%3$d",
        MapProjection::Spherical,
    ),
    (
        "gmap",
        "http://mt0.google.com/vt/lyrs=m&hl=en&x=%1$d&y=%2$d&z=%3$d",
        MapProjection::Spherical,
    ),
    (
        "yasat",
        "https://sat01.maps.yandex.net/tiles?l=sat&x=%1$d&y=%2$d&z=%3$d&g=Gagarin",
        MapProjection::Ellipsoid,
    ),
    (
        "arcsat",
        "https://services.arcgisonline.com/ArcGIS/rest/services/World_Imagery/MapServer/tile/%3$d/%2$d/%1$d",
        MapProjection::Spherical,
    ),
    (
        "arctopo",
        "https://services.arcgisonline.com/ArcGIS/rest/services/World_Topo_Map/MapServer/tile/%3$d/%2$d/%1$d",
        MapProjection::Spherical,
    ),
];

/// Errors creating or reading map sources.
#[derive(Debug, Error)]
pub enum MapError {
    #[error("Invalid URL template {template:?}: {reason}")]
    InvalidTemplate { template: String, reason: String },

    #[error("URL template {template:?} does not form a URL: {reason}")]
    InvalidUrl { template: String, reason: String },

    #[error("Invalid map descriptor: {0}")]
    Descriptor(#[from] serde_json::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// On-disk shape of `properties.txt`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projection: Option<String>,
}

/// A loaded map source.
#[derive(Debug, Clone, PartialEq)]
pub struct MapSource {
    name: Arc<str>,
    url: Option<UrlTemplate>,
    projection: MapProjection,
    tile_size: u32,
}

impl MapSource {
    pub fn new(
        name: impl Into<Arc<str>>,
        url: Option<UrlTemplate>,
        projection: MapProjection,
    ) -> Self {
        Self {
            name: name.into(),
            url,
            projection,
            tile_size: DEFAULT_TILE_SIZE,
        }
    }

    pub fn with_tile_size(mut self, tile_size: u32) -> Self {
        self.tile_size = tile_size.max(1);
        self
    }

    /// An offline spherical map with no descriptor.
    pub fn offline(name: impl Into<Arc<str>>) -> Self {
        Self::new(name, None, MapProjection::Spherical)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shared handle on the name, used as the tile cache key.
    pub fn name_arc(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    pub fn projection(&self) -> MapProjection {
        self.projection
    }

    pub fn is_ellipsoid(&self) -> bool {
        self.projection.is_ellipsoid()
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    pub fn url_template(&self) -> Option<&UrlTemplate> {
        self.url.as_ref()
    }

    /// True when missing tiles can be downloaded.
    pub fn can_download(&self) -> bool {
        self.url.is_some()
    }

    /// Download URL of a tile, if the map has a template.
    pub fn tile_url(&self, tile: TileCoord) -> Option<String> {
        self.url
            .as_ref()
            .map(|t| t.format(tile.col, tile.row, tile.zoom))
    }

    /// Descriptor to persist for this map.
    pub fn descriptor(&self) -> MapDescriptor {
        MapDescriptor {
            name: None,
            url: self.url.as_ref().map(|u| u.as_str().to_string()),
            size: (self.tile_size != DEFAULT_TILE_SIZE).then_some(self.tile_size),
            projection: self
                .projection
                .is_ellipsoid()
                .then(|| MapProjection::Ellipsoid.tag().to_string()),
        }
    }

    /// Builds a source from descriptor text.
    ///
    /// Unknown projection tags and broken URL templates degrade to the
    /// spherical, offline defaults.
    pub fn from_descriptor(name: &str, text: &str) -> Result<Self, MapError> {
        let mut source = Self::offline(name);
        if text.trim().is_empty() {
            return Ok(source);
        }
        let descriptor: MapDescriptor = serde_json::from_str(text)?;

        if let Some(raw) = descriptor.url.as_deref() {
            match UrlTemplate::parse(raw) {
                Ok(template) => source.url = Some(template),
                Err(e) => warn!(map = name, error = %e, "Ignoring map URL"),
            }
        }
        if let Some(tag) = descriptor.projection.as_deref() {
            match tag.parse::<MapProjection>() {
                Ok(projection) => source.projection = projection,
                Err(e) => warn!(map = name, error = %e, "Using spherical projection"),
            }
        }
        if let Some(size) = descriptor.size {
            source = source.with_tile_size(size);
        }
        Ok(source)
    }
}

/// Reads and creates map sources in storage.
#[derive(Debug, Clone)]
pub struct MapRegistry {
    storage: Arc<Storage>,
}

impl MapRegistry {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Sorted names of the available maps.
    pub fn names(&self) -> Vec<String> {
        self.storage.map_names()
    }

    /// Loads `name`, falling back to [`DEFAULT_MAP`] when `None` or missing.
    ///
    /// Never fails: an unreadable descriptor yields an offline spherical map.
    pub fn load(&self, name: Option<&str>) -> MapSource {
        let mut name = name.unwrap_or(DEFAULT_MAP).to_string();
        let mut properties = self.storage.read_map_properties(&name);
        if properties.is_none() {
            name = DEFAULT_MAP.to_string();
            properties = self.storage.read_map_properties(&name);
        }

        let text = properties.unwrap_or_default();
        match MapSource::from_descriptor(&name, &text) {
            Ok(source) => source,
            Err(e) => {
                self.storage.log_once().warn(
                    "map.load",
                    format!("Cannot read properties of {}: {}", name, e),
                );
                MapSource::offline(name)
            }
        }
    }

    /// Validates and saves a new map; returns the name actually used.
    ///
    /// An unknown projection tag is logged and replaced by spherical.
    pub fn add(
        &self,
        name: &str,
        url: &str,
        projection: Option<&str>,
    ) -> Result<String, MapError> {
        let template = UrlTemplate::parse(url)?;
        let projection = match projection {
            None => MapProjection::Spherical,
            Some(tag) => tag.parse::<MapProjection>().unwrap_or_else(|e| {
                warn!(map = name, error = %e, "Using spherical projection");
                MapProjection::Spherical
            }),
        };
        let source = MapSource::new(name, Some(template), projection);
        save_source(&self.storage, &source)
    }
}

fn save_source(storage: &Storage, source: &MapSource) -> Result<String, MapError> {
    let text = serde_json::to_string_pretty(&source.descriptor())?;
    Ok(storage.add_map(source.name(), &text)?)
}

/// Writes [`DEFAULT_MAPS`] into a fresh `maps/` directory.
pub(crate) fn install_defaults(storage: &Storage) {
    for (name, url, projection) in DEFAULT_MAPS {
        let result = UrlTemplate::parse(url)
            .map(|template| MapSource::new(*name, Some(template), *projection))
            .and_then(|source| save_source(storage, &source));
        match result {
            Ok(actual) => info!(map = %actual, "Default map installed"),
            Err(e) => warn!(map = name, error = %e, "Cannot install default map"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> (tempfile::TempDir, MapRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::open(dir.path()).unwrap());
        (dir, MapRegistry::new(storage))
    }

    #[test]
    fn test_defaults_installed_and_loadable() {
        let (_dir, registry) = registry();
        let names = registry.names();
        assert_eq!(names.len(), DEFAULT_MAPS.len());

        let osm = registry.load(Some("osm"));
        assert_eq!(osm.name(), "osm");
        assert!(!osm.is_ellipsoid());
        assert_eq!(
            osm.tile_url(TileCoord::new(325, 546, 10).unwrap()).unwrap(),
            "http://a.tile.openstreetmap.org/10/546/325.png"
        );

        let yasat = registry.load(Some("yasat"));
        assert!(yasat.is_ellipsoid());
    }

    #[test]
    fn test_load_falls_back_to_osm() {
        let (_dir, registry) = registry();
        assert_eq!(registry.load(None).name(), DEFAULT_MAP);
        assert_eq!(registry.load(Some("missing")).name(), DEFAULT_MAP);
    }

    #[test]
    fn test_load_without_descriptor_is_offline() {
        let (_dir, registry) = registry();
        std::fs::create_dir_all(registry.storage.map_dir("local")).unwrap();
        let local = registry.load(Some("local"));
        assert_eq!(local.name(), "local");
        assert!(!local.can_download());
        assert_eq!(local.tile_size(), DEFAULT_TILE_SIZE);
    }

    #[test]
    fn test_load_broken_descriptor_is_offline() {
        let (_dir, registry) = registry();
        registry.storage.add_map("broken", "{ not json").unwrap();
        let broken = registry.load(Some("broken"));
        assert_eq!(broken.name(), "broken");
        assert!(!broken.can_download());
    }

    #[test]
    fn test_add_validates_and_uniquifies() {
        let (_dir, registry) = registry();
        assert!(matches!(
            registry.add("bad", "http://h/%s", None),
            Err(MapError::InvalidTemplate { .. })
        ));

        let name = registry
            .add("osm", "https://h/%3$d/%1$d/%2$d.png", Some("ellipsoid"))
            .unwrap();
        assert_eq!(name, "osm_1");
        assert!(registry.load(Some("osm_1")).is_ellipsoid());

        let name = registry
            .add("odd", "https://h/%3$d/%1$d/%2$d.png", Some("utm"))
            .unwrap();
        assert!(!registry.load(Some(&name)).is_ellipsoid());
    }

    #[test]
    fn test_descriptor_size_and_projection() {
        let source = MapSource::from_descriptor(
            "big",
            r#"{"name": "Big", "url": "https://h/%1$d", "size": 512, "projection": "ellipsoid"}"#,
        )
        .unwrap();
        assert_eq!(source.tile_size(), 512);
        assert!(source.is_ellipsoid());

        let text = serde_json::to_string(&source.descriptor()).unwrap();
        assert_eq!(
            text,
            r#"{"url":"https://h/%1$d","size":512,"projection":"ellipsoid"}"#
        );
    }
}
