//! One running map session.
//!
//! [`Session`] owns everything a map view needs: storage, the selected map,
//! the viewport, the tile cache, the track selection, the opened track, the
//! point of interest and the recording. It is built once from an
//! [`AppConfig`] and a saved [`SessionState`], driven from a single
//! foreground context, and fed back by background work through
//! [`Session::poll_events`] or [`Session::next_event`].

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::coord::{self, TileCoord, MAX_ZOOM};
use crate::map::{MapError, MapRegistry, MapSource};
use crate::provider::{HttpClient, HttpError, ReqwestClient};
use crate::storage::{Storage, StorageError};
use crate::tile::{Bitmap, CacheStats, TileCache, TileEvent, TileEvents};
use crate::track::{
    track_cache, CloseOutcome, CurrentTrack, Fix, IndexEvent, OpenedTrack, PointSequence,
    RecordOutcome, Toggle, Track, TrackIndex, TrackRecorder,
};
use crate::viewport::{Viewport, VisibleTile};

/// Errors starting or driving a session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Cannot create HTTP client: {0}")]
    Http(#[from] HttpError),

    #[error(transparent)]
    Map(#[from] MapError),

    #[error("Cannot {action} the current track: {source}")]
    Recording {
        action: &'static str,
        #[source]
        source: io::Error,
    },
}

/// A geographic position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub longitude: f64,
    pub latitude: f64,
}

impl GeoPoint {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
        }
    }
}

/// What survives between sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionState {
    pub map: Option<String>,
    pub zoom: u8,
    pub center: GeoPoint,
    /// Last known position.
    pub location: Option<GeoPoint>,
    /// Path or encoded string of the opened track.
    pub opened_track: Option<String>,
    pub selected_tracks: Vec<String>,
    pub point: Option<GeoPoint>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            map: None,
            zoom: 0,
            center: GeoPoint::new(0.0, 0.0),
            location: None,
            opened_track: None,
            selected_tracks: Vec::new(),
            point: None,
        }
    }
}

impl SessionState {
    /// Reads saved state; a missing or unreadable file gives the default.
    pub fn load(path: &Path) -> Self {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot read session state");
                return Self::default();
            }
        };
        serde_json::from_str(&text).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "Ignoring corrupt session state");
            Self::default()
        })
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        let text = serde_json::to_string_pretty(self).map_err(io::Error::other)?;
        fs::write(path, text)
    }
}

/// Something the view should redraw for.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Tile(TileEvent),
    Tracks(IndexEvent),
}

struct Recording {
    track: CurrentTrack,
    recorder: TrackRecorder,
}

/// A running map session.
pub struct Session {
    storage: Arc<Storage>,
    registry: MapRegistry,
    map: MapSource,
    view: Viewport,
    tiles: TileCache,
    tile_events: TileEvents,
    index: TrackIndex,
    opened: Option<OpenedTrack>,
    point: Option<GeoPoint>,
    location: Option<GeoPoint>,
    recording: Option<Recording>,
}

impl Session {
    /// Starts a session downloading tiles over HTTP.
    pub fn start(config: &AppConfig, state: SessionState, runtime: Handle) -> Result<Self, SessionError> {
        let http = ReqwestClient::from_config(&config.network)?;
        Self::start_with_client(config, state, Arc::new(http), runtime)
    }

    /// Starts a session with a custom HTTP client.
    pub fn start_with_client(
        config: &AppConfig,
        state: SessionState,
        http: Arc<dyn HttpClient>,
        runtime: Handle,
    ) -> Result<Self, SessionError> {
        let storage = Arc::new(Storage::open(&config.data_dir)?);
        let registry = MapRegistry::new(Arc::clone(&storage));
        let map = registry.load(state.map.as_deref());
        let ellipsoid = map.is_ellipsoid();

        let view = Viewport::default()
            .with_tile_size(map.tile_size())
            .with_zoom(state.zoom)
            .with_center(
                coord::to_x(coord::normalize_longitude(state.center.longitude)),
                coord::to_y(coord::normalize_latitude(state.center.latitude), ellipsoid),
            );

        let (tiles, tile_events) = TileCache::new(
            &config.tile_cache,
            map.tile_size(),
            Arc::clone(&storage),
            http,
            runtime.clone(),
        );
        let mut index = TrackIndex::new(
            Arc::clone(&storage),
            track_cache(config.track_cache_points),
            runtime,
        );
        index.load(&state.selected_tracks);

        let opened = state.opened_track.as_deref().and_then(OpenedTrack::open);
        info!(map = map.name(), zoom = view.zoom, "Session started");

        Ok(Self {
            storage,
            registry,
            map,
            view,
            tiles,
            tile_events,
            index,
            opened,
            point: state.point,
            location: state.location,
            recording: None,
        })
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn map(&self) -> &MapSource {
        &self.map
    }

    pub fn map_names(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Saves a new map source; returns the name actually used.
    pub fn add_map(&self, name: &str, url: &str, projection: Option<&str>) -> Result<String, SessionError> {
        Ok(self.registry.add(name, url, projection)?)
    }

    fn ellipsoid(&self) -> bool {
        self.map.is_ellipsoid()
    }

    pub fn viewport(&self) -> &Viewport {
        &self.view
    }

    pub fn resize(&mut self, width_px: u32, height_px: u32) {
        self.view.width_px = width_px;
        self.view.height_px = height_px;
    }

    pub fn set_center(&mut self, x: f64, y: f64) {
        self.view.set_center(x, y);
    }

    pub fn pan(&mut self, dx_px: f64, dy_px: f64) {
        self.view.pan(dx_px, dy_px);
    }

    /// The cached bitmap for a tile of the current map and zoom.
    pub fn tile(&self, row: u32, col: u32) -> Option<Bitmap> {
        let tile = TileCoord::new(row, col, self.view.zoom).ok()?;
        self.tiles.get_tile(&self.map, tile)
    }

    /// Every tile on screen with whatever bitmap is cached for it.
    pub fn draw_tiles(&self) -> Vec<(VisibleTile, Option<Bitmap>)> {
        self.view
            .visible_tiles()
            .into_iter()
            .map(|v| {
                let bitmap = self.tiles.get_tile(&self.map, v.tile);
                (v, bitmap)
            })
            .collect()
    }

    /// Path of the center tile on disk, or where it would be saved.
    pub fn center_tile_path(&self) -> PathBuf {
        self.storage
            .tile_path_or_stem(self.map.name(), self.view.center_tile())
    }

    pub fn tile_cache_stats(&self) -> CacheStats {
        self.tiles.stats()
    }

    /// Switches maps, keeping the same place in view.
    pub fn select_map(&mut self, name: &str) {
        let was_ellipsoid = self.ellipsoid();
        self.map = self.registry.load(Some(name));
        self.view.tile_size = self.map.tile_size();
        self.tiles.fit_tile_size(self.view.tile_size);
        let ellipsoid = self.ellipsoid();
        if ellipsoid != was_ellipsoid {
            let latitude = coord::to_latitude(self.view.center_y, was_ellipsoid);
            self.view.center_y = coord::to_y(latitude, ellipsoid);
        }
        debug!(map = self.map.name(), "Map selected");
    }

    /// Changes zoom by `delta`, clamped to `0..=17`. Returns the new zoom.
    pub fn change_zoom(&mut self, delta: i32) -> u8 {
        let zoom = (self.view.zoom as i32 + delta).clamp(0, MAX_ZOOM as i32);
        self.view.zoom = zoom as u8;
        self.view.zoom
    }

    /// Opens a file or encoded track and centers on its end.
    ///
    /// Returns false, keeping the previous track, when nothing usable was
    /// found.
    pub fn open_track(&mut self, path_or_encoded: &str) -> bool {
        let Some(track) = OpenedTrack::open(path_or_encoded) else {
            return false;
        };
        let ellipsoid = self.ellipsoid();
        self.view.set_center(track.end_x(), track.end_y(ellipsoid));
        self.opened = Some(track);
        true
    }

    pub fn close_opened_track(&mut self) {
        self.opened = None;
    }

    pub fn opened_track(&self) -> Option<&OpenedTrack> {
        self.opened.as_ref()
    }

    /// Sets the point of interest from normalized coordinates.
    pub fn select_point(&mut self, x: f64, y: f64) {
        self.point = Some(GeoPoint::new(
            coord::to_longitude(x),
            coord::to_latitude(y, self.ellipsoid()),
        ));
    }

    pub fn deselect_point(&mut self) {
        self.point = None;
    }

    /// The point of interest in the current projection.
    pub fn point(&self) -> Option<(f64, f64)> {
        self.point.map(|p| {
            (
                coord::to_x(p.longitude),
                coord::to_y(p.latitude, self.ellipsoid()),
            )
        })
    }

    /// The last known position in the current projection.
    pub fn location(&self) -> Option<(f64, f64)> {
        self.location.map(|p| {
            (
                coord::to_x(p.longitude),
                coord::to_y(p.latitude, self.ellipsoid()),
            )
        })
    }

    /// Centers on the last known position.
    pub fn center_on_location(&mut self) -> bool {
        match self.location() {
            Some((x, y)) => {
                self.view.set_center(x, y);
                true
            }
            None => false,
        }
    }

    /// Bearing from the point to the position, bearing from the position
    /// to the point, and the distance between them in meters.
    pub fn bearing_and_distance(&self) -> Option<(f64, f64, f64)> {
        let (point, location) = (self.point?, self.location?);
        let here = Fix::new(location.longitude, location.latitude, 0.0, 0);
        let there = Fix::new(point.longitude, point.latitude, 0.0, 0);
        Some((there.bearing_to(&here), here.bearing_to(&there), here.distance_to(&there)))
    }

    /// Flips a saved track in the selection, centering on it when it is
    /// already loaded.
    pub fn toggle_track(&mut self, name: &str) -> Toggle {
        let toggle = self.index.toggle_visibility(name);
        if let Toggle::Shown(track) = &toggle {
            self.center_on_track(track);
        }
        toggle
    }

    fn center_on_track(&mut self, track: &Track) {
        let x = track.start_x();
        if !x.is_nan() {
            let y = track.start_y(self.ellipsoid());
            self.view.set_center(x, y);
        }
    }

    /// Selects every saved track crossing the view.
    pub fn search_visible_tracks(&mut self) {
        let boundaries = self.view.boundaries();
        let ellipsoid = self.ellipsoid();
        self.index.search(None, boundaries, ellipsoid);
    }

    /// Searches only `names`.
    pub fn search_tracks(&mut self, names: Vec<String>) {
        let boundaries = self.view.boundaries();
        let ellipsoid = self.ellipsoid();
        self.index.search(Some(names), boundaries, ellipsoid);
    }

    pub fn deselect_all_tracks(&mut self) {
        self.index.deselect_all();
    }

    pub fn delete_selected_tracks(&mut self) -> usize {
        self.index.delete_selected()
    }

    pub fn is_track_selected(&self, name: &str) -> bool {
        self.index.is_selected(name)
    }

    pub fn selected_tracks(&self) -> Vec<String> {
        self.index.selected_names()
    }

    pub fn track_cache_len(&self) -> u64 {
        self.index.cache_len()
    }

    /// Loaded selected tracks to draw.
    pub fn visible_tracks(&mut self) -> Vec<Arc<Track>> {
        self.index.visible_tracks()
    }

    /// Starts recording, resuming an unfinished track when one exists.
    pub fn begin_recording(&mut self) -> Result<(), SessionError> {
        if self.recording.is_some() {
            return Ok(());
        }
        let track = match self.storage.last_current_track() {
            Some(path) => CurrentTrack::resume(&path),
            None => CurrentTrack::create(&self.storage.new_current_track_path()),
        }
        .map_err(|source| SessionError::Recording {
            action: "open",
            source,
        })?;
        info!(path = %track.path().display(), "Recording started");
        self.recording = Some(Recording {
            track,
            recorder: TrackRecorder::new(),
        });
        Ok(())
    }

    /// Finishes the recording, if any.
    pub fn end_recording(&mut self) -> Result<Option<CloseOutcome>, SessionError> {
        let Some(recording) = self.recording.take() else {
            return Ok(None);
        };
        let outcome = recording
            .track
            .close(self.storage.tracks_dir())
            .map_err(|source| SessionError::Recording {
                action: "close",
                source,
            })?;
        Ok(Some(outcome))
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    pub fn current_track(&self) -> Option<&CurrentTrack> {
        self.recording.as_ref().map(|r| &r.track)
    }

    /// Takes a new position; records it when recording.
    pub fn update_fix(&mut self, fix: Fix) -> Result<Option<RecordOutcome>, SessionError> {
        self.location = Some(GeoPoint::new(fix.longitude, fix.latitude));
        let Some(recording) = self.recording.as_mut() else {
            return Ok(None);
        };
        let outcome = recording
            .recorder
            .update(fix, &mut recording.track)
            .map_err(|source| SessionError::Recording {
                action: "write",
                source,
            })?;
        Ok(Some(outcome))
    }

    /// Total and local recorded distance in meters.
    pub fn distances(&self) -> (f64, f64) {
        self.recording
            .as_ref()
            .map_or((0.0, 0.0), |r| (r.recorder.total_distance(), r.recorder.local_distance()))
    }

    pub fn reset_local_distance(&mut self) {
        if let Some(recording) = self.recording.as_mut() {
            recording.recorder.reset_local();
        }
    }

    /// The recording so far in the compact encoding.
    pub fn encoded_current_track(&self) -> Option<String> {
        self.recording.as_ref()?.track.encode()
    }

    /// Applies finished background work without waiting.
    pub fn poll_events(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.tile_events.try_recv() {
            events.push(SessionEvent::Tile(event));
        }
        for event in self.index.apply_updates() {
            self.on_index_event(&event);
            events.push(SessionEvent::Tracks(event));
        }
        events
    }

    /// Waits for the next piece of background work to finish.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        let event = tokio::select! {
            Some(event) = self.tile_events.recv() => SessionEvent::Tile(event),
            Some(event) = self.index.next_update() => SessionEvent::Tracks(event),
            else => return None,
        };
        if let SessionEvent::Tracks(event) = &event {
            self.on_index_event(event);
        }
        Some(event)
    }

    fn on_index_event(&mut self, event: &IndexEvent) {
        if let IndexEvent::CenterOn(track) = event {
            self.center_on_track(track);
        }
    }

    /// Snapshot to restore the session later.
    pub fn state(&self) -> SessionState {
        let ellipsoid = self.ellipsoid();
        SessionState {
            map: Some(self.map.name().to_string()),
            zoom: self.view.zoom,
            center: GeoPoint::new(
                coord::to_longitude(self.view.center_x),
                coord::to_latitude(self.view.center_y, ellipsoid),
            ),
            location: self.location,
            opened_track: self.opened.as_ref().map(|t| t.source().to_string()),
            selected_tracks: self.index.selected_names(),
            point: self.point,
        }
    }

    /// Cancels all background work. An active recording stays unfinished
    /// on disk and is resumed by the next session.
    pub fn teardown(&mut self) {
        self.tiles.unload();
        self.index.unload();
        self.recording = None;
        debug!("Session torn down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TileCacheConfig;
    use crate::map::DEFAULT_MAP;
    use crate::provider::MockHttpClient;

    fn start(dir: &Path, state: SessionState) -> Session {
        let config = AppConfig::new(dir.to_path_buf());
        let http = Arc::new(MockHttpClient::failing(404));
        Session::start_with_client(&config, state, http, Handle::current()).unwrap()
    }

    #[tokio::test]
    async fn test_fresh_session_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let session = start(dir.path(), SessionState::default());

        assert_eq!(session.map().name(), DEFAULT_MAP);
        assert!(session.map_names().len() > 1);
        assert_eq!(session.viewport().zoom, 0);
        assert!((session.viewport().center_x - 0.5).abs() < 1e-12);
        assert!(session.opened_track().is_none());
    }

    #[tokio::test]
    async fn test_change_zoom_clamps() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = start(dir.path(), SessionState::default());

        assert_eq!(session.change_zoom(-3), 0);
        assert_eq!(session.change_zoom(10), 10);
        assert_eq!(session.change_zoom(10), MAX_ZOOM);
    }

    #[tokio::test]
    async fn test_select_map_reprojects_center() {
        let dir = tempfile::tempdir().unwrap();
        let state = SessionState {
            center: GeoPoint::new(30.0, 60.0),
            zoom: 8,
            ..SessionState::default()
        };
        let mut session = start(dir.path(), state);
        assert!(!session.map().is_ellipsoid());

        session.select_map("yasat");
        assert!(session.map().is_ellipsoid());
        assert!((session.viewport().center_y - coord::to_y(60.0, true)).abs() < 1e-9);

        let center = session.state().center;
        assert!((center.latitude - 60.0).abs() < 1e-6);
        assert!((center.longitude - 30.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_select_map_resizes_tile_cache() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = start(dir.path(), SessionState::default());
        let slots = session.tile_cache_stats().capacity;
        assert_eq!(slots, TileCacheConfig::default().slots_for(256));

        Storage::open(dir.path())
            .unwrap()
            .add_map("big", r#"{"url": "https://h/%3$d/%1$d/%2$d.png", "size": 512}"#)
            .unwrap();
        session.select_map("big");
        assert_eq!(session.viewport().tile_size, 512);
        assert_eq!(session.tile_cache_stats().capacity, slots / 4);

        session.select_map(DEFAULT_MAP);
        assert_eq!(session.tile_cache_stats().capacity, slots);
    }

    #[tokio::test]
    async fn test_point_survives_map_change() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = start(dir.path(), SessionState::default());
        session.select_point(coord::to_x(10.0), coord::to_y(50.0, false));

        session.select_map("yasat");
        let (x, y) = session.point().unwrap();
        assert!((x - coord::to_x(10.0)).abs() < 1e-9);
        assert!((y - coord::to_y(50.0, true)).abs() < 1e-9);

        session.deselect_point();
        assert!(session.point().is_none());
    }

    #[tokio::test]
    async fn test_open_track_centers_on_end() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = start(dir.path(), SessionState::default());

        assert!(!session.open_track("x1y1"));
        assert!(session.open_track("x1y1x2y2x3y3"));
        assert!((session.viewport().center_x - coord::to_x(3.0)).abs() < 1e-12);
        assert_eq!(session.state().opened_track.as_deref(), Some("x1y1x2y2x3y3"));
    }

    #[tokio::test]
    async fn test_toggle_sample_track_centers() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = start(dir.path(), SessionState::default());

        assert!(matches!(session.toggle_track("cat.gpx"), Toggle::Pending));
        let event = session.next_event().await.unwrap();
        assert!(matches!(event, SessionEvent::Tracks(IndexEvent::CenterOn(_))));
        assert!((session.viewport().center_x - coord::to_x(-105.0)).abs() < 1e-9);
        assert_eq!(session.selected_tracks(), vec!["cat.gpx".to_string()]);
    }

    #[tokio::test]
    async fn test_recording_is_resumed() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = start(dir.path(), SessionState::default());

        session.begin_recording().unwrap();
        let t0 = 1_700_000_000_000;
        session.update_fix(Fix::new(10.0, 50.0, 5.0, t0)).unwrap();
        let outcome = session.update_fix(Fix::new(10.0, 50.0, 5.0, t0 + 9_000)).unwrap();
        assert!(matches!(outcome, Some(RecordOutcome::Recorded { .. })));
        let path = session.current_track().unwrap().path().to_path_buf();
        session.teardown();

        let mut session = start(dir.path(), SessionState::default());
        session.begin_recording().unwrap();
        assert_eq!(session.current_track().unwrap().path(), path);
        assert_eq!(session.current_track().unwrap().point_count(), 1);
        assert!(matches!(session.end_recording().unwrap(), Some(CloseOutcome::Deleted)));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_state_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let state = SessionState {
            map: Some("otm".to_string()),
            zoom: 12,
            center: GeoPoint::new(-70.0, 41.0),
            location: Some(GeoPoint::new(-70.1, 41.1)),
            opened_track: None,
            selected_tracks: vec![],
            point: Some(GeoPoint::new(-70.2, 41.2)),
        };
        let session = start(dir.path(), state.clone());

        let path = dir.path().join("state.json");
        session.state().save(&path).unwrap();
        let loaded = SessionState::load(&path);
        assert_eq!(loaded.map, state.map);
        assert_eq!(loaded.zoom, 12);
        assert!((loaded.center.latitude - 41.0).abs() < 1e-9);
        assert_eq!(loaded.point, state.point);

        let (_, _, distance) = session.bearing_and_distance().unwrap();
        assert!(distance > 10_000.0 && distance < 20_000.0);
    }

    #[test]
    fn test_corrupt_state_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(SessionState::load(&path), SessionState::default());
        assert_eq!(SessionState::load(&dir.path().join("missing.json")), SessionState::default());
    }
}
