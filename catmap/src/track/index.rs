//! The user's selection of saved tracks.
//!
//! The selection maps a track name to its loaded points, or to nothing while
//! the points are still on disk. Loading happens in background tasks: one
//! opener for the names restored at start-up, one loader for a single name,
//! and one searcher that scans every saved track against the viewport. The
//! foreground applies their results with [`TrackIndex::apply_updates`] or
//! [`TrackIndex::next_update`].
//!
//! Loaded tracks are kept in a cache bounded by total point count, so
//! reselecting a recently shown track costs nothing.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use moka::sync::Cache;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::point::PointSequence;
use super::saved::Track;
use crate::coord::Boundaries;
use crate::storage::Storage;

/// Shared track cache, keyed by track name.
pub type TrackCache = Cache<String, Arc<Track>>;

/// Builds a cache holding at most `max_points` rows in total.
pub fn track_cache(max_points: u64) -> TrackCache {
    Cache::builder()
        .weigher(|_name: &String, track: &Arc<Track>| -> u32 {
            track.len().clamp(1, u32::MAX as usize) as u32
        })
        .max_capacity(max_points)
        .build()
}

/// Result of [`TrackIndex::toggle_visibility`].
#[derive(Debug, Clone)]
pub enum Toggle {
    /// Removed from the selection. `redraw` is false when it was never drawn.
    Hidden { redraw: bool },
    /// Added from the cache; the view may center on it.
    Shown(Arc<Track>),
    /// Added; points will arrive later.
    Pending,
}

/// Something the view should react to.
#[derive(Debug, Clone)]
pub enum IndexEvent {
    /// Tracks restored at start-up are ready.
    TracksLoaded,
    /// A single requested track is ready; the view may center on it.
    CenterOn(Arc<Track>),
    /// A search began; disable the search control.
    SearchStarted,
    /// A search ended and its matches were merged.
    SearchFinished { found: usize },
}

struct BackgroundTask {
    id: u64,
    cancel: CancellationToken,
}

enum Update {
    Opened {
        id: u64,
        tracks: Vec<(String, Arc<Track>)>,
    },
    Loaded {
        id: u64,
        name: String,
        track: Arc<Track>,
    },
    Searched {
        id: u64,
        found: Vec<(String, Arc<Track>)>,
    },
}

/// Selected tracks and their background loading.
pub struct TrackIndex {
    storage: Arc<Storage>,
    cache: TrackCache,
    selected: BTreeMap<String, Option<Arc<Track>>>,
    opener: Option<BackgroundTask>,
    loader: Option<BackgroundTask>,
    searcher: Option<BackgroundTask>,
    next_task_id: u64,
    updates_tx: mpsc::UnboundedSender<Update>,
    updates_rx: mpsc::UnboundedReceiver<Update>,
    events: VecDeque<IndexEvent>,
    runtime: Handle,
}

impl TrackIndex {
    /// Creates an empty selection sharing `cache`.
    pub fn new(storage: Arc<Storage>, cache: TrackCache, runtime: Handle) -> Self {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        Self {
            storage,
            cache,
            selected: BTreeMap::new(),
            opener: None,
            loader: None,
            searcher: None,
            next_task_id: 0,
            updates_tx,
            updates_rx,
            events: VecDeque::new(),
            runtime,
        }
    }

    fn new_task(&mut self) -> BackgroundTask {
        self.next_task_id += 1;
        BackgroundTask {
            id: self.next_task_id,
            cancel: CancellationToken::new(),
        }
    }

    /// Selects `names` as pending and starts one opener for all of them.
    pub fn load(&mut self, names: &[String]) {
        for name in names {
            self.selected.insert(name.clone(), None);
        }
        if let Some(task) = self.opener.take() {
            task.cancel.cancel();
        }
        if names.is_empty() {
            return;
        }

        let task = self.new_task();
        let id = task.id;
        let cancel = task.cancel.clone();
        let storage = Arc::clone(&self.storage);
        let cache = self.cache.clone();
        let names = names.to_vec();
        let tx = self.updates_tx.clone();
        debug!(count = names.len(), "Opening selected tracks");
        self.runtime.spawn(async move {
            let work = tokio::task::spawn_blocking(move || {
                let mut tracks = Vec::with_capacity(names.len());
                for name in names {
                    if cancel.is_cancelled() {
                        return None;
                    }
                    let track = load_cached(&storage, &cache, &name);
                    tracks.push((name, track));
                }
                Some(tracks)
            });
            match work.await {
                Ok(Some(tracks)) => {
                    let _ = tx.send(Update::Opened { id, tracks });
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Track opener failed"),
            }
        });
        self.opener = Some(task);
    }

    /// Flips the selection of `name`.
    pub fn toggle_visibility(&mut self, name: &str) -> Toggle {
        if let Some(track) = self.selected.remove(name) {
            return Toggle::Hidden {
                redraw: track.is_some(),
            };
        }

        let cached = self.cache.get(name);
        self.selected.insert(name.to_string(), cached.clone());
        match cached {
            Some(track) => Toggle::Shown(track),
            None => {
                if self.opener.is_none() && self.loader.is_none() {
                    self.start_loader(name.to_string());
                }
                Toggle::Pending
            }
        }
    }

    fn start_loader(&mut self, name: String) {
        let task = self.new_task();
        let id = task.id;
        let storage = Arc::clone(&self.storage);
        let cache = self.cache.clone();
        let tx = self.updates_tx.clone();
        let cancel = task.cancel.clone();
        debug!(%name, "Loading track");
        self.runtime.spawn(async move {
            let key = name.clone();
            let work = tokio::task::spawn_blocking(move || load_cached(&storage, &cache, &key));
            let track = tokio::select! {
                _ = cancel.cancelled() => return,
                joined = work => match joined {
                    Ok(track) => track,
                    Err(e) => {
                        warn!(%name, error = %e, "Track loader failed");
                        return;
                    }
                },
            };
            let _ = tx.send(Update::Loaded { id, name, track });
        });
        self.loader = Some(task);
    }

    /// Loaded selected tracks, in name order.
    ///
    /// When idle, starts loading the first pending one.
    pub fn visible_tracks(&mut self) -> Vec<Arc<Track>> {
        let mut first_pending = None;
        let mut tracks = Vec::with_capacity(self.selected.len());
        for (name, track) in &self.selected {
            match track {
                Some(track) => tracks.push(Arc::clone(track)),
                None if first_pending.is_none() => first_pending = Some(name.clone()),
                None => {}
            }
        }
        if let Some(name) = first_pending {
            if self.opener.is_none() && self.loader.is_none() {
                self.start_loader(name);
            }
        }
        tracks
    }

    /// Scans `candidates` (or every saved track) for ones visible in
    /// `boundaries`, replacing any search in progress.
    pub fn search(&mut self, candidates: Option<Vec<String>>, boundaries: Boundaries, ellipsoid: bool) {
        if let Some(task) = self.searcher.take() {
            task.cancel.cancel();
        }

        let task = self.new_task();
        let id = task.id;
        let cancel = task.cancel.clone();
        let storage = Arc::clone(&self.storage);
        let cache = self.cache.clone();
        let tx = self.updates_tx.clone();
        self.runtime.spawn(async move {
            let work = tokio::task::spawn_blocking(move || {
                let names = candidates.unwrap_or_else(|| storage.track_names());
                let mut found = Vec::new();
                for name in names {
                    if cancel.is_cancelled() {
                        return None;
                    }
                    let track = load_cached(&storage, &cache, &name);
                    if track.contains(&boundaries, ellipsoid) {
                        found.push((name, track));
                    }
                }
                Some(found)
            });
            match work.await {
                Ok(Some(found)) => {
                    let _ = tx.send(Update::Searched { id, found });
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Track search failed"),
            }
        });
        self.searcher = Some(task);
        self.events.push_back(IndexEvent::SearchStarted);
    }

    /// Applies finished background work; returns the resulting events.
    pub fn apply_updates(&mut self) -> Vec<IndexEvent> {
        while let Ok(update) = self.updates_rx.try_recv() {
            self.apply(update);
        }
        self.events.drain(..).collect()
    }

    /// Waits for the next event.
    pub async fn next_update(&mut self) -> Option<IndexEvent> {
        loop {
            if let Some(event) = self.events.pop_front() {
                return Some(event);
            }
            let update = self.updates_rx.recv().await?;
            self.apply(update);
        }
    }

    fn apply(&mut self, update: Update) {
        match update {
            Update::Opened { id, tracks } => {
                if !is_current(&self.opener, id) {
                    return;
                }
                self.opener = None;
                for (name, track) in tracks {
                    if let Some(slot) = self.selected.get_mut(&name) {
                        *slot = Some(track);
                    }
                }
                self.events.push_back(IndexEvent::TracksLoaded);
            }
            Update::Loaded { id, name, track } => {
                if !is_current(&self.loader, id) {
                    return;
                }
                self.loader = None;
                // Deselected while loading: keep it cached but stay put.
                if let Some(slot) = self.selected.get_mut(&name) {
                    *slot = Some(Arc::clone(&track));
                    self.events.push_back(IndexEvent::CenterOn(track));
                }
            }
            Update::Searched { id, found } => {
                if !is_current(&self.searcher, id) {
                    return;
                }
                self.searcher = None;
                let count = found.len();
                for (name, track) in found {
                    self.selected.insert(name, Some(track));
                }
                info!(found = count, "Track search finished");
                self.events.push_back(IndexEvent::SearchFinished { found: count });
            }
        }
    }

    /// Clears the selection and cancels background work.
    pub fn deselect_all(&mut self) {
        self.selected.clear();
        self.unload();
    }

    /// Deletes every selected track from disk and clears the selection.
    ///
    /// Returns how many files were removed.
    pub fn delete_selected(&mut self) -> usize {
        let mut deleted = 0;
        for name in std::mem::take(&mut self.selected).into_keys() {
            self.cache.invalidate(&name);
            match self.storage.delete_track(&name) {
                Ok(()) => deleted += 1,
                Err(e) => warn!(%name, error = %e, "Cannot delete track"),
            }
        }
        info!(deleted, "Deleted selected tracks");
        deleted
    }

    pub fn selected_names(&self) -> Vec<String> {
        self.selected.keys().cloned().collect()
    }

    pub fn selected_count(&self) -> usize {
        self.selected.len()
    }

    pub fn is_selected(&self, name: &str) -> bool {
        self.selected.contains_key(name)
    }

    pub fn is_searching(&self) -> bool {
        self.searcher.is_some()
    }

    pub fn is_loading(&self) -> bool {
        self.opener.is_some() || self.loader.is_some()
    }

    /// Number of tracks currently held by the shared cache.
    pub fn cache_len(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }

    /// Cancels all background work. Late results are discarded.
    pub fn unload(&mut self) {
        for task in [self.opener.take(), self.loader.take()].into_iter().flatten() {
            task.cancel.cancel();
        }
        if let Some(task) = self.searcher.take() {
            task.cancel.cancel();
            self.events.push_back(IndexEvent::SearchFinished { found: 0 });
        }
    }
}

impl Drop for TrackIndex {
    fn drop(&mut self) {
        self.unload();
    }
}

fn is_current(task: &Option<BackgroundTask>, id: u64) -> bool {
    task.as_ref().map(|t| t.id) == Some(id)
}

fn load_cached(storage: &Storage, cache: &TrackCache, name: &str) -> Arc<Track> {
    if let Some(track) = cache.get(name) {
        return track;
    }
    let track = Arc::new(Track::load(&storage.track_path(name)));
    cache.insert(name.to_string(), Arc::clone(&track));
    track
}
