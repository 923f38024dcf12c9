//! Projected track points and the operations shared by every track kind.

use crate::coord::{self, Boundaries};

/// A point in both projections, or a segment break.
///
/// A break is the NaN triple. Every comparison against NaN is false, so
/// range checks skip breaks without a separate test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackPoint {
    pub x: f64,
    pub y_spherical: f64,
    pub y_ellipsoid: f64,
}

impl TrackPoint {
    /// The segment break marker.
    pub const BREAK: TrackPoint = TrackPoint {
        x: f64::NAN,
        y_spherical: f64::NAN,
        y_ellipsoid: f64::NAN,
    };

    /// Projects a geographic position.
    pub fn from_degrees(longitude: f64, latitude: f64) -> Self {
        Self {
            x: coord::to_x(longitude),
            y_spherical: coord::to_y(latitude, false),
            y_ellipsoid: coord::to_y(latitude, true),
        }
    }

    #[inline]
    pub fn is_break(&self) -> bool {
        self.x.is_nan()
    }

    #[inline]
    pub fn y(&self, ellipsoid: bool) -> f64 {
        if ellipsoid {
            self.y_ellipsoid
        } else {
            self.y_spherical
        }
    }
}

/// Forward cursor over a sequence for one projection.
///
/// Each drawing pass takes its own cursor, so several passes over the same
/// track never interfere.
#[derive(Debug)]
pub struct PointCursor<'a> {
    points: &'a [TrackPoint],
    ellipsoid: bool,
    pos: Option<usize>,
}

impl<'a> PointCursor<'a> {
    pub fn new(points: &'a [TrackPoint], ellipsoid: bool) -> Self {
        Self {
            points,
            ellipsoid,
            pos: None,
        }
    }

    /// Moves to the next point; false when none are left.
    pub fn advance(&mut self) -> bool {
        let next = self.pos.map_or(0, |p| p + 1);
        if next < self.points.len() {
            self.pos = Some(next);
            true
        } else {
            self.pos = Some(self.points.len());
            false
        }
    }

    fn current(&self) -> Option<&TrackPoint> {
        self.pos.and_then(|p| self.points.get(p))
    }

    /// x at the cursor; NaN for a break or before the first `advance`.
    pub fn x(&self) -> f64 {
        self.current().map_or(f64::NAN, |p| p.x)
    }

    /// y at the cursor in the cursor's projection.
    pub fn y(&self) -> f64 {
        self.current().map_or(f64::NAN, |p| p.y(self.ellipsoid))
    }
}

impl Iterator for PointCursor<'_> {
    type Item = (f64, f64);

    fn next(&mut self) -> Option<Self::Item> {
        if self.advance() {
            Some((self.x(), self.y()))
        } else {
            None
        }
    }
}

/// Operations shared by saved, opened and recording tracks.
pub trait PointSequence {
    fn points(&self) -> &[TrackPoint];

    fn start_iterator(&self, ellipsoid: bool) -> PointCursor<'_> {
        PointCursor::new(self.points(), ellipsoid)
    }

    /// Number of rows, breaks included.
    fn len(&self) -> usize {
        self.points().len()
    }

    fn is_empty(&self) -> bool {
        self.points().is_empty()
    }

    /// Number of real points.
    fn point_count(&self) -> usize {
        self.points().iter().filter(|p| !p.is_break()).count()
    }

    /// x of the first row; NaN when empty or starting with a break.
    fn start_x(&self) -> f64 {
        self.points().first().map_or(f64::NAN, |p| p.x)
    }

    fn start_y(&self, ellipsoid: bool) -> f64 {
        self.points().first().map_or(f64::NAN, |p| p.y(ellipsoid))
    }

    /// True when appending a segment break would not duplicate one.
    fn ends_with_point(&self) -> bool {
        self.points().last().is_some_and(|p| !p.is_break())
    }

    /// True when any point lies strictly inside `boundaries`.
    fn contains(&self, boundaries: &Boundaries, ellipsoid: bool) -> bool {
        let b = *boundaries;
        if b.wraps() {
            self.points().iter().any(|p| {
                (b.x_left < p.x || p.x < b.x_right) && {
                    let y = p.y(ellipsoid);
                    b.y_top < y && y < b.y_bottom
                }
            })
        } else {
            self.points().iter().any(|p| {
                b.x_left < p.x && p.x < b.x_right && {
                    let y = p.y(ellipsoid);
                    b.y_top < y && y < b.y_bottom
                }
            })
        }
    }
}

impl PointSequence for [TrackPoint] {
    fn points(&self) -> &[TrackPoint] {
        self
    }
}

impl PointSequence for Vec<TrackPoint> {
    fn points(&self) -> &[TrackPoint] {
        self
    }
}

/// Drops trailing breaks.
pub(crate) fn trim_trailing_breaks(points: &mut Vec<TrackPoint>) {
    while points.last().is_some_and(TrackPoint::is_break) {
        points.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<TrackPoint> {
        vec![
            TrackPoint::from_degrees(0.0, 0.0),
            TrackPoint::from_degrees(10.0, 10.0),
            TrackPoint::BREAK,
            TrackPoint::from_degrees(170.0, 0.0),
        ]
    }

    #[test]
    fn test_cursor_walks_all_rows() {
        let points = sample();
        let mut cursor = points.start_iterator(false);
        assert!(cursor.x().is_nan());

        let mut rows = 0;
        let mut breaks = 0;
        while cursor.advance() {
            rows += 1;
            if cursor.x().is_nan() {
                assert!(cursor.y().is_nan());
                breaks += 1;
            }
        }
        assert_eq!(rows, 4);
        assert_eq!(breaks, 1);
        assert!(!cursor.advance());
    }

    #[test]
    fn test_independent_cursors() {
        let points = sample();
        let mut a = points.start_iterator(false);
        let mut b = points.start_iterator(true);
        a.advance();
        a.advance();
        b.advance();
        assert_eq!(a.x(), points[1].x);
        assert_eq!(b.x(), points[0].x);
        assert_eq!(b.y(), points[0].y_ellipsoid);
    }

    #[test]
    fn test_contains_plain_and_wrapped() {
        let points = sample();
        // Around (0, 0): x = 0.5, y = 0.5
        let center = Boundaries::new(0.45, 0.55, 0.45, 0.55);
        assert!(points.contains(&center, false));

        // Wrapped window around the antimeridian catches lon 170.
        let wrapped = Boundaries::new(0.95, 0.05, 0.4, 0.6);
        assert!(points.contains(&wrapped, true));

        let empty_area = Boundaries::new(0.6, 0.7, 0.1, 0.2);
        assert!(!points.contains(&empty_area, false));
    }

    #[test]
    fn test_breaks_never_match() {
        let points = vec![TrackPoint::BREAK, TrackPoint::BREAK];
        assert!(!points.contains(&Boundaries::world(), false));
        assert!(!points.contains(&Boundaries::new(0.9, 0.1, 0.0, 1.0), false));
    }

    #[test]
    fn test_endpoints() {
        let mut points = sample();
        assert_eq!(points.start_x(), 0.5);
        assert!(points.ends_with_point());
        assert_eq!(points.point_count(), 3);

        points.push(TrackPoint::BREAK);
        points.push(TrackPoint::BREAK);
        assert!(!points.ends_with_point());
        trim_trailing_breaks(&mut points);
        assert_eq!(points.len(), 4);

        let empty: Vec<TrackPoint> = Vec::new();
        assert!(empty.start_x().is_nan());
        assert!(!empty.ends_with_point());
    }
}
