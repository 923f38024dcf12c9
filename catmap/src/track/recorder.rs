//! Turns a stream of GPS fixes into recorded track points.
//!
//! Fixes arrive about once a second. Recording keeps the most accurate fix
//! of each window and writes it only when the position really changed.

use std::io;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::current::CurrentTrack;
use crate::coord;

/// Silence after which a new segment starts, ms.
pub const SEGMENT_GAP_MS: i64 = 60_000;

/// Time since the last record after which a point may be written, ms.
pub const RECORD_INTERVAL_MS: i64 = 8_000;

/// Time since the last record after which better fixes are collected, ms.
pub const IMPROVE_INTERVAL_MS: i64 = 4_000;

/// Moves shorter than this are treated as standing still, meters.
pub const MIN_MOVE_M: f64 = 50.0;

/// A move must exceed this many accuracy radii to be recorded.
pub const ACCURACY_FACTOR: f64 = 4.0;

/// Mean Earth radius for distances, meters.
pub const MEAN_RADIUS_M: f64 = 6_371_008.8;

/// One position report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    pub longitude: f64,
    pub latitude: f64,
    /// Meters above sea level.
    #[serde(default)]
    pub altitude: f64,
    /// Horizontal accuracy radius, meters.
    pub accuracy: f64,
    /// Milliseconds since the Unix epoch.
    pub time_ms: i64,
}

impl Fix {
    pub fn new(longitude: f64, latitude: f64, accuracy: f64, time_ms: i64) -> Self {
        Self {
            longitude,
            latitude,
            altitude: 0.0,
            accuracy,
            time_ms,
        }
    }

    pub fn with_altitude(mut self, altitude: f64) -> Self {
        self.altitude = altitude;
        self
    }

    pub fn time(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(self.time_ms).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// Great-circle distance in meters.
    pub fn distance_to(&self, other: &Fix) -> f64 {
        haversine(self.longitude, self.latitude, other.longitude, other.latitude)
    }

    /// Initial bearing towards `other`, degrees clockwise from north.
    pub fn bearing_to(&self, other: &Fix) -> f64 {
        bearing(self.longitude, self.latitude, other.longitude, other.latitude)
    }
}

/// Haversine distance in meters between two (lon, lat) positions.
pub fn haversine(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();
    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * MEAN_RADIUS_M * a.sqrt().min(1.0).asin()
}

/// Initial bearing in degrees `[0, 360)` from the first position to the second.
pub fn bearing(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_lambda = (lon2 - lon1).to_radians();
    let y = d_lambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * d_lambda.cos();
    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

/// What a fix did to the track.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecordOutcome {
    /// Nothing written.
    Skipped,
    /// A long silence ended the segment.
    SegmentBreak,
    /// A point was written, `distance_m` from the previous one.
    Recorded { distance_m: f64 },
}

/// Fix filter state for one recording.
#[derive(Debug, Default)]
pub struct TrackRecorder {
    last_update_ms: Option<i64>,
    best: Option<Fix>,
    last_recorded: Option<Fix>,
    total_distance: f64,
    local_distance: f64,
}

impl TrackRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Meters recorded since the recording started.
    pub fn total_distance(&self) -> f64 {
        self.total_distance
    }

    /// Meters recorded since the last `reset_local`.
    pub fn local_distance(&self) -> f64 {
        self.local_distance
    }

    pub fn reset_local(&mut self) {
        self.local_distance = 0.0;
    }

    pub fn last_recorded(&self) -> Option<&Fix> {
        self.last_recorded.as_ref()
    }

    /// Feeds one fix, writing to `track` when it qualifies.
    pub fn update(&mut self, fix: Fix, track: &mut CurrentTrack) -> io::Result<RecordOutcome> {
        let last_update = *self.last_update_ms.get_or_insert(fix.time_ms);
        let best = *self.best.get_or_insert(fix);
        let elapsed = fix.time_ms - last_update;

        if elapsed > SEGMENT_GAP_MS {
            self.last_update_ms = Some(fix.time_ms);
            self.best = Some(fix);
            track.add_segment_break()?;
            return Ok(RecordOutcome::SegmentBreak);
        }

        if elapsed > RECORD_INTERVAL_MS {
            let best = if fix.accuracy < best.accuracy { fix } else { best };
            let distance = self
                .last_recorded
                .map_or(0.0, |last| last.distance_to(&best));

            if self.last_recorded.is_some() && distance < MIN_MOVE_M {
                self.last_update_ms = Some(fix.time_ms - IMPROVE_INTERVAL_MS);
                self.best = Some(fix);
                return Ok(RecordOutcome::Skipped);
            }
            if self.last_recorded.is_none() || distance > best.accuracy * ACCURACY_FACTOR {
                self.last_update_ms = Some(best.time_ms);
                track.add_point(
                    coord::normalize_longitude(best.longitude),
                    coord::normalize_latitude(best.latitude),
                    best.altitude as i32,
                    best.time(),
                )?;
                self.last_recorded = Some(best);
                self.best = Some(fix);
                self.total_distance += distance;
                self.local_distance += distance;
                trace!(distance, "Recorded fix");
                return Ok(RecordOutcome::Recorded {
                    distance_m: distance,
                });
            }
            self.best = Some(best);
            return Ok(RecordOutcome::Skipped);
        }

        if elapsed > IMPROVE_INTERVAL_MS && fix.accuracy < best.accuracy {
            self.best = Some(fix);
        }
        Ok(RecordOutcome::Skipped)
    }
}
