//! Bounded in-memory tile cache with single-flight loading.
//!
//! [`TileCache::get_tile`] never blocks. A miss starts one background loader
//! (disk, then ancestors) unless one is already running; the request is
//! simply dropped otherwise and retried by the next redraw. A resident tile
//! that only has a stand-in bitmap starts one downloader the same way.
//!
//! Finished work is published as [`TileEvent`]s on the channel returned by
//! [`TileCache::new`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::pyramid::{self, LoadedTile};
use super::types::{Bitmap, CacheStats, TileEvent, TileKey};
use crate::config::TileCacheConfig;
use crate::coord::TileCoord;
use crate::map::MapSource;
use crate::provider::HttpClient;
use crate::storage::{Storage, TileFormat};

/// Receiving end of the cache's event channel.
pub type TileEvents = mpsc::UnboundedReceiver<TileEvent>;

struct Slot {
    key: TileKey,
    bitmap: Option<Bitmap>,
    rank: u64,
    /// Download URL while the slot only holds a stand-in.
    pending_url: Option<String>,
}

/// A running background task.
struct Task {
    id: u64,
    cancel: CancellationToken,
}

struct SlotTable {
    slots: Vec<Slot>,
    index: HashMap<TileKey, usize>,
    capacity: usize,
    next_rank: u64,
    next_task_id: u64,
    loader: Option<Task>,
    downloader: Option<Task>,
}

impl SlotTable {
    fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            index: HashMap::new(),
            capacity,
            next_rank: 0,
            next_task_id: 0,
            loader: None,
            downloader: None,
        }
    }

    fn top_rank(&mut self) -> u64 {
        let rank = self.next_rank;
        self.next_rank += 1;
        rank
    }

    fn new_task(&mut self) -> Task {
        self.next_task_id += 1;
        Task {
            id: self.next_task_id,
            cancel: CancellationToken::new(),
        }
    }

    /// Changes the slot count, dropping the lowest ranks when shrinking.
    ///
    /// Returns the number of evicted tiles.
    fn set_capacity(&mut self, capacity: usize) -> u64 {
        self.capacity = capacity;
        let mut evicted = 0;
        while self.slots.len() > capacity {
            let Some(victim) = self
                .slots
                .iter()
                .enumerate()
                .min_by_key(|(_, s)| s.rank)
                .map(|(i, _)| i)
            else {
                break;
            };
            let removed = self.slots.swap_remove(victim);
            self.index.remove(&removed.key);
            if let Some(moved) = self.slots.get(victim) {
                self.index.insert(moved.key.clone(), victim);
            }
            evicted += 1;
        }
        evicted
    }

    /// Places a slot in an empty position or over the lowest rank.
    ///
    /// Returns true when a resident tile was evicted.
    fn insert(&mut self, mut slot: Slot) -> bool {
        slot.rank = self.top_rank();
        if let Some(&i) = self.index.get(&slot.key) {
            self.slots[i] = slot;
            return false;
        }
        if self.slots.len() < self.capacity {
            self.index.insert(slot.key.clone(), self.slots.len());
            self.slots.push(slot);
            return false;
        }
        let Some(victim) = self
            .slots
            .iter()
            .enumerate()
            .min_by_key(|(_, s)| s.rank)
            .map(|(i, _)| i)
        else {
            return false;
        };
        self.index.remove(&self.slots[victim].key);
        self.index.insert(slot.key.clone(), victim);
        self.slots[victim] = slot;
        true
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    loaders_started: AtomicU64,
    downloaders_started: AtomicU64,
    downloads_failed: AtomicU64,
    evictions: AtomicU64,
}

struct Shared {
    table: Mutex<SlotTable>,
    storage: Arc<Storage>,
    http: Arc<dyn HttpClient>,
    events: mpsc::UnboundedSender<TileEvent>,
    counters: Counters,
    runtime: Handle,
    /// Memory budget the slot count follows; `None` for a fixed capacity.
    sizing: Option<TileCacheConfig>,
}

/// Tile cache shared between the foreground and its background tasks.
pub struct TileCache {
    shared: Arc<Shared>,
}

impl TileCache {
    /// Creates a cache sized from `config` for tiles of `tile_size` pixels.
    ///
    /// [`fit_tile_size`](Self::fit_tile_size) keeps it within the budget
    /// when the tile size changes.
    pub fn new(
        config: &TileCacheConfig,
        tile_size: u32,
        storage: Arc<Storage>,
        http: Arc<dyn HttpClient>,
        runtime: Handle,
    ) -> (Self, TileEvents) {
        Self::build(
            config.slots_for(tile_size),
            Some(config.clone()),
            storage,
            http,
            runtime,
        )
    }

    /// Creates a cache with an exact slot count.
    pub fn with_capacity(
        capacity: usize,
        storage: Arc<Storage>,
        http: Arc<dyn HttpClient>,
        runtime: Handle,
    ) -> (Self, TileEvents) {
        Self::build(capacity, None, storage, http, runtime)
    }

    fn build(
        capacity: usize,
        sizing: Option<TileCacheConfig>,
        storage: Arc<Storage>,
        http: Arc<dyn HttpClient>,
        runtime: Handle,
    ) -> (Self, TileEvents) {
        let (events, receiver) = mpsc::unbounded_channel();
        let capacity = capacity.max(1);
        debug!(capacity, "Tile cache created");
        let shared = Arc::new(Shared {
            table: Mutex::new(SlotTable::new(capacity)),
            storage,
            http,
            events,
            counters: Counters::default(),
            runtime,
            sizing,
        });
        (Self { shared }, receiver)
    }

    /// Returns the cached bitmap, starting background work as needed.
    ///
    /// `None` means "not yet": either the tile is being loaded, another load
    /// is in progress, or no data exists anywhere for it.
    pub fn get_tile(&self, map: &MapSource, tile: TileCoord) -> Option<Bitmap> {
        let key = TileKey::new(map.name_arc(), tile);
        let shared = &self.shared;
        let mut table = shared.table.lock();

        if let Some(&i) = table.index.get(&key) {
            shared.counters.hits.fetch_add(1, Ordering::Relaxed);
            let rank = table.top_rank();
            let slot = &mut table.slots[i];
            slot.rank = rank;
            let bitmap = slot.bitmap.clone();
            let pending = slot.pending_url.clone();
            if let Some(url) = pending {
                if table.downloader.is_none() {
                    let task = table.new_task();
                    shared.spawn_downloader(&task, key, url);
                    table.downloader = Some(task);
                }
            }
            return bitmap;
        }

        shared.counters.misses.fetch_add(1, Ordering::Relaxed);
        if table.loader.is_none() {
            let task = table.new_task();
            shared.spawn_loader(&task, key, map.clone());
            table.loader = Some(task);
        }
        None
    }

    /// Re-sizes a budgeted cache for tiles of `tile_size` pixels.
    ///
    /// Shrinking evicts the least recently used tiles. Caches created with
    /// [`with_capacity`](Self::with_capacity) keep their slot count.
    pub fn fit_tile_size(&self, tile_size: u32) {
        let Some(sizing) = &self.shared.sizing else {
            return;
        };
        let capacity = sizing.slots_for(tile_size);
        let evicted = {
            let mut table = self.shared.table.lock();
            if table.capacity == capacity {
                return;
            }
            table.set_capacity(capacity)
        };
        if evicted > 0 {
            self.shared
                .counters
                .evictions
                .fetch_add(evicted, Ordering::Relaxed);
        }
        debug!(tile_size, capacity, evicted, "Tile cache resized");
    }

    /// Cancels outstanding tasks; their late results are discarded.
    pub fn unload(&self) {
        let mut table = self.shared.table.lock();
        for task in [table.loader.take(), table.downloader.take()]
            .into_iter()
            .flatten()
        {
            task.cancel.cancel();
        }
    }

    /// True while a resident slot exists for the tile.
    pub fn contains(&self, map: &str, tile: TileCoord) -> bool {
        self.shared
            .table
            .lock()
            .index
            .contains_key(&TileKey::new(map, tile))
    }

    pub fn is_loading(&self) -> bool {
        self.shared.table.lock().loader.is_some()
    }

    pub fn is_downloading(&self) -> bool {
        self.shared.table.lock().downloader.is_some()
    }

    pub fn capacity(&self) -> usize {
        self.shared.table.lock().capacity
    }

    pub fn len(&self) -> usize {
        self.shared.table.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let (capacity, resident) = {
            let table = self.shared.table.lock();
            (table.capacity, table.slots.len())
        };
        let c = &self.shared.counters;
        CacheStats {
            capacity,
            resident,
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            loaders_started: c.loaders_started.load(Ordering::Relaxed),
            downloaders_started: c.downloaders_started.load(Ordering::Relaxed),
            downloads_failed: c.downloads_failed.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
        }
    }
}

impl Drop for TileCache {
    fn drop(&mut self) {
        self.unload();
    }
}

impl Shared {
    fn spawn_loader(self: &Arc<Self>, task: &Task, key: TileKey, map: MapSource) {
        self.counters.loaders_started.fetch_add(1, Ordering::Relaxed);
        trace!(%key, "Loader started");

        let shared = Arc::clone(self);
        let cancel = task.cancel.clone();
        let id = task.id;
        self.runtime.spawn(async move {
            let storage = Arc::clone(&shared.storage);
            let name = map.name_arc();
            let tile = key.tile;
            let tile_size = map.tile_size();
            let work =
                tokio::task::spawn_blocking(move || pyramid::load_tile(&storage, &name, tile, tile_size));

            let loaded = tokio::select! {
                _ = cancel.cancelled() => return,
                joined = work => joined.unwrap_or_else(|e| {
                    warn!(%key, error = %e, "Tile loader failed");
                    LoadedTile::default()
                }),
            };
            let pending_url = if loaded.exact {
                None
            } else {
                map.tile_url(tile)
            };
            shared.finish_load(id, key, loaded.bitmap.map(Arc::new), pending_url);
        });
    }

    fn finish_load(
        &self,
        id: u64,
        key: TileKey,
        bitmap: Option<Bitmap>,
        pending_url: Option<String>,
    ) {
        {
            let mut table = self.table.lock();
            if table.loader.as_ref().map(|t| t.id) != Some(id) {
                trace!(%key, "Discarding stale load");
                return;
            }
            table.loader = None;
            let evicted = table.insert(Slot {
                key: key.clone(),
                bitmap,
                rank: 0,
                pending_url,
            });
            if evicted {
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        let _ = self.events.send(TileEvent::Loaded(key));
    }

    fn spawn_downloader(self: &Arc<Self>, task: &Task, key: TileKey, url: String) {
        self.counters
            .downloaders_started
            .fetch_add(1, Ordering::Relaxed);
        debug!(%key, url = %url, "Downloading tile");

        let shared = Arc::clone(self);
        let cancel = task.cancel.clone();
        let id = task.id;
        self.runtime.spawn(async move {
            let bitmap = tokio::select! {
                _ = cancel.cancelled() => return,
                bitmap = shared.download(&key, &url) => bitmap,
            };
            if bitmap.is_none() {
                shared
                    .counters
                    .downloads_failed
                    .fetch_add(1, Ordering::Relaxed);
            }
            shared.finish_download(id, key, bitmap);
        });
    }

    /// Fetches, decodes and persists one tile.
    async fn download(&self, key: &TileKey, url: &str) -> Option<Bitmap> {
        let response = match self.http.get(url).await {
            Ok(response) => response,
            Err(e) => {
                self.storage
                    .log_once()
                    .warn("tile.download", format!("Cannot download {}: {}", url, e));
                return None;
            }
        };

        let storage = Arc::clone(&self.storage);
        let key = key.clone();
        let url = url.to_string();
        tokio::task::spawn_blocking(move || {
            let Some(bitmap) = pyramid::decode(&response.body) else {
                storage
                    .log_once()
                    .warn("tile.decode", format!("No image in response from {}", url));
                return None;
            };
            let format = TileFormat::detect(response.content_type.as_deref(), &response.body);
            if let Err(e) = storage.save_tile(&key.map, key.tile, format, &response.body) {
                storage
                    .log_once()
                    .warn("tile.save", format!("Cannot save tile {}: {}", key, e));
            }
            Some(Arc::new(bitmap))
        })
        .await
        .ok()
        .flatten()
    }

    fn finish_download(&self, id: u64, key: TileKey, bitmap: Option<Bitmap>) {
        let ok = bitmap.is_some();
        {
            let mut table = self.table.lock();
            if table.downloader.as_ref().map(|t| t.id) != Some(id) {
                trace!(%key, "Discarding stale download");
                return;
            }
            table.downloader = None;
            if let Some(&i) = table.index.get(&key) {
                let slot = &mut table.slots[i];
                slot.pending_url = None;
                if bitmap.is_some() {
                    slot.bitmap = bitmap;
                }
            }
        }
        let _ = self.events.send(TileEvent::Downloaded { key, ok });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockHttpClient;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;
    use std::time::Duration;

    fn png(color: [u8; 4]) -> Vec<u8> {
        let img = RgbaImage::from_pixel(256, 256, Rgba(color));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    fn setup(
        capacity: usize,
        http: MockHttpClient,
    ) -> (tempfile::TempDir, Arc<Storage>, TileCache, TileEvents) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::open(dir.path()).unwrap());
        let (cache, events) =
            TileCache::with_capacity(capacity, Arc::clone(&storage), Arc::new(http), Handle::current());
        (dir, storage, cache, events)
    }

    async fn next(events: &mut TileEvents) -> TileEvent {
        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("event within timeout")
            .expect("channel open")
    }

    fn tile(row: u32, col: u32, zoom: u8) -> TileCoord {
        TileCoord::new(row, col, zoom).unwrap()
    }

    #[tokio::test]
    async fn test_single_loader_for_concurrent_misses() {
        let (_dir, storage, cache, mut events) = setup(10, MockHttpClient::failing(500));
        storage
            .save_tile("local", tile(0, 0, 1), TileFormat::Png, &png([1, 2, 3, 255]))
            .unwrap();
        let map = MapSource::offline("local");

        assert!(cache.get_tile(&map, tile(0, 0, 1)).is_none());
        assert!(cache.get_tile(&map, tile(0, 0, 1)).is_none());
        for col in 0..2 {
            for row in 0..2 {
                assert!(cache.get_tile(&map, tile(row, col, 1)).is_none());
            }
        }
        assert_eq!(cache.stats().loaders_started, 1);

        let event = next(&mut events).await;
        assert_eq!(event, TileEvent::Loaded(TileKey::new("local", tile(0, 0, 1))));
        assert!(!cache.is_loading());
        let extra = tokio::time::timeout(Duration::from_millis(200), events.recv()).await;
        assert!(extra.is_err(), "one load for repeated requests");
        let bitmap = cache.get_tile(&map, tile(0, 0, 1)).unwrap();
        assert_eq!(*bitmap.get_pixel(0, 0), Rgba([1, 2, 3, 255]));
    }

    #[tokio::test]
    async fn test_eviction_replaces_lowest_rank() {
        let (_dir, _storage, cache, mut events) = setup(2, MockHttpClient::failing(500));
        let map = MapSource::offline("empty");

        for col in 0..2 {
            cache.get_tile(&map, tile(0, col, 1));
            next(&mut events).await;
        }
        assert_eq!(cache.len(), 2);

        // Touch col 0 so col 1 becomes the oldest.
        cache.get_tile(&map, tile(0, 0, 1));
        cache.get_tile(&map, tile(1, 0, 1));
        next(&mut events).await;

        assert_eq!(cache.len(), 2);
        assert!(cache.contains("empty", tile(0, 0, 1)));
        assert!(!cache.contains("empty", tile(0, 1, 1)));
        assert!(cache.contains("empty", tile(1, 0, 1)));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_fit_tile_size_keeps_budget() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::open(dir.path()).unwrap());
        let config = TileCacheConfig {
            memory_budget_bytes: 4 * 256 * 256 * 4,
            min_slots: 1,
        };
        let (cache, mut events) = TileCache::new(
            &config,
            256,
            Arc::clone(&storage),
            Arc::new(MockHttpClient::failing(500)),
            Handle::current(),
        );
        assert_eq!(cache.capacity(), 4);

        let map = MapSource::offline("empty");
        for col in 0..4 {
            cache.get_tile(&map, tile(1, col, 2));
            next(&mut events).await;
        }
        cache.get_tile(&map, tile(1, 0, 2));
        assert_eq!(cache.len(), 4);

        cache.fit_tile_size(512);
        assert_eq!(cache.capacity(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains("empty", tile(1, 0, 2)));
        assert_eq!(cache.stats().evictions, 3);

        cache.fit_tile_size(256);
        assert_eq!(cache.capacity(), 4);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_unbounded_budget_does_not_preallocate() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::open(dir.path()).unwrap());
        let config = TileCacheConfig {
            memory_budget_bytes: u64::MAX,
            min_slots: 1,
        };
        let (cache, mut events) = TileCache::new(
            &config,
            256,
            storage,
            Arc::new(MockHttpClient::failing(500)),
            Handle::current(),
        );
        assert!(cache.capacity() > 1_000_000);

        cache.get_tile(&MapSource::offline("empty"), tile(0, 0, 0));
        next(&mut events).await;
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_fixed_capacity_ignores_tile_size() {
        let (_dir, _storage, cache, _events) = setup(3, MockHttpClient::failing(500));
        cache.fit_tile_size(1024);
        assert_eq!(cache.capacity(), 3);
    }

    #[tokio::test]
    async fn test_download_replaces_stand_in_and_persists() {
        let http = MockHttpClient::ok(png([9, 9, 9, 255]), Some("image/png"));
        let (_dir, storage, cache, mut events) = setup(4, http);
        let map = MapSource::new(
            "net",
            Some(crate::map::UrlTemplate::parse("http://tiles/%3$d/%1$d/%2$d.png").unwrap()),
            crate::coord::MapProjection::Spherical,
        );
        let t = tile(1, 2, 2);

        assert!(cache.get_tile(&map, t).is_none());
        assert!(matches!(next(&mut events).await, TileEvent::Loaded(_)));

        // Resident without bitmap, pending download.
        assert!(cache.get_tile(&map, t).is_none());
        assert!(cache.is_downloading() || cache.stats().downloaders_started == 1);
        let event = next(&mut events).await;
        assert_eq!(
            event,
            TileEvent::Downloaded {
                key: TileKey::new("net", t),
                ok: true
            }
        );

        let bitmap = cache.get_tile(&map, t).unwrap();
        assert_eq!(*bitmap.get_pixel(5, 5), Rgba([9, 9, 9, 255]));
        let path = storage.tile_path("net", t).unwrap();
        assert!(path.ends_with("maps/net/2/1/2.png"));

        // Pending flag was cleared: no second download.
        cache.get_tile(&map, t);
        assert_eq!(cache.stats().downloaders_started, 1);
    }

    #[tokio::test]
    async fn test_failed_download_keeps_stand_in() {
        let (_dir, storage, cache, mut events) = setup(4, MockHttpClient::failing(404));
        storage
            .save_tile("net", tile(0, 0, 0), TileFormat::Png, &png([7, 7, 7, 255]))
            .unwrap();
        let map = MapSource::new(
            "net",
            Some(crate::map::UrlTemplate::parse("http://tiles/%3$d/%1$d/%2$d.png").unwrap()),
            crate::coord::MapProjection::Spherical,
        );
        let t = tile(1, 1, 1);

        cache.get_tile(&map, t);
        next(&mut events).await;
        let stand_in = cache.get_tile(&map, t).unwrap();
        assert_eq!(
            next(&mut events).await,
            TileEvent::Downloaded {
                key: TileKey::new("net", t),
                ok: false
            }
        );

        let after = cache.get_tile(&map, t).unwrap();
        assert!(Arc::ptr_eq(&stand_in, &after));
        assert_eq!(cache.stats().downloads_failed, 1);
        assert_eq!(cache.stats().downloaders_started, 1);
        assert!(storage.tile_path("net", t).is_none());
    }

    #[tokio::test]
    async fn test_unload_discards_late_results() {
        let (_dir, _storage, cache, mut events) = setup(4, MockHttpClient::failing(500));
        let map = MapSource::offline("empty");

        cache.get_tile(&map, tile(0, 0, 0));
        cache.unload();
        assert!(!cache.is_loading());

        let late = tokio::time::timeout(Duration::from_millis(200), events.recv()).await;
        assert!(late.is_err(), "no event after unload");
        assert!(cache.is_empty());

        // A fresh request starts a new loader.
        cache.get_tile(&map, tile(0, 0, 0));
        assert_eq!(cache.stats().loaders_started, 2);
    }
}
