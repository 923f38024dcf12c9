//! The track being recorded, persisted point by point.
//!
//! The file in `tracks/current/` is always a valid GPX prefix: the opening is
//! written on creation, every point is appended and synced, and the closing
//! tags are written only when the track is finished.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::gpx::{self, GpxItem};
use super::point::{PointSequence, TrackPoint};
use super::project_items;
use crate::storage::TRACK_EXTENSION;

/// Fewest real points a finished track must have to be kept.
pub const MIN_SAVED_POINTS: usize = 4;

/// Fewest real points worth sharing as an encoded track.
pub const MIN_ENCODED_POINTS: usize = 3;

/// What `close` did with the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Too short; the file was removed.
    Deleted,
    /// Finished and moved to the given path.
    Saved(PathBuf),
}

/// An in-progress track backed by an append-only file.
#[derive(Debug)]
pub struct CurrentTrack {
    path: PathBuf,
    file: File,
    points: Vec<TrackPoint>,
}

impl CurrentTrack {
    /// Starts a new track file at `path`.
    pub fn create(path: &Path) -> io::Result<Self> {
        let mut file = File::create(path)?;
        file.write_all(gpx::OPENING.as_bytes())?;
        file.sync_data()?;
        debug!(path = %path.display(), "Started track");
        Ok(Self {
            path: path.to_path_buf(),
            file,
            points: Vec::new(),
        })
    }

    /// Continues an unfinished file, starting a new segment.
    pub fn resume(path: &Path) -> io::Result<Self> {
        let items = gpx::scan_file(path)?;
        let file = OpenOptions::new().append(true).open(path)?;
        let mut track = Self {
            path: path.to_path_buf(),
            file,
            points: project_items(&items),
        };
        track.add_segment_break()?;
        debug!(path = %path.display(), points = track.point_count(), "Resumed track");
        Ok(track)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records a fix in memory and on disk.
    pub fn add_point(
        &mut self,
        longitude: f64,
        latitude: f64,
        altitude_m: i32,
        time: DateTime<Utc>,
    ) -> io::Result<()> {
        self.points.push(TrackPoint::from_degrees(longitude, latitude));
        self.append(&gpx::format_point(longitude, latitude, altitude_m, time))
    }

    /// Ends the current segment. Does nothing unless the track ends with a
    /// point, so breaks never repeat.
    pub fn add_segment_break(&mut self) -> io::Result<()> {
        if !self.ends_with_point() {
            return Ok(());
        }
        self.points.push(TrackPoint::BREAK);
        self.append(gpx::SEGMENT_BREAK)
    }

    fn append(&mut self, text: &str) -> io::Result<()> {
        self.file.write_all(text.as_bytes())?;
        self.file.flush()?;
        self.file.sync_data()
    }

    /// Finishes the track.
    ///
    /// Short tracks are deleted. Others get their closing tags and are moved
    /// into `tracks_dir` under the same stem with the `.gpx` extension.
    pub fn close(mut self, tracks_dir: &Path) -> io::Result<CloseOutcome> {
        if self.point_count() < MIN_SAVED_POINTS {
            drop(self.file);
            fs::remove_file(&self.path)?;
            debug!(path = %self.path.display(), "Deleted short track");
            return Ok(CloseOutcome::Deleted);
        }

        self.append(gpx::CLOSING)?;
        drop(self.file);

        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "track".to_string());
        let target = tracks_dir.join(format!("{stem}.{TRACK_EXTENSION}"));
        fs::rename(&self.path, &target)?;
        info!(path = %target.display(), "Saved track");
        Ok(CloseOutcome::Saved(target))
    }

    /// Compact encoding of what has been persisted so far.
    pub fn encode(&self) -> Option<String> {
        let items = gpx::scan_file(&self.path).ok()?;
        let real = items
            .iter()
            .filter(|item| matches!(item, GpxItem::Point(_)))
            .count();
        if real < MIN_ENCODED_POINTS {
            return None;
        }
        Some(gpx::encode(&items))
    }
}

impl PointSequence for CurrentTrack {
    fn points(&self) -> &[TrackPoint] {
        &self.points
    }
}
