//! GPX reading and writing, and the compact text encoding.
//!
//! Written files look like:
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8"?>
//! <gpx xmlns="http://www.topografix.com/GPX/1/1" version="1.1" creator="catmap">
//!  <trk>
//!   <trkseg>
//!    <trkpt lat="0.000001" lon="0.000001">
//!     <ele>0</ele>
//!     <time>2023-01-01T00:00:00Z</time>
//!    </trkpt>
//!   </trkseg>
//!  </trk>
//! </gpx>
//! ```
//!
//! The reader is a tolerant scanner, not an XML parser: it looks for
//! `<trkpt` start tags and `</trkseg>` end tags anywhere in the text, takes
//! `lat`/`lon` in either order, and skips anything it does not understand.
//!
//! The compact encoding is `x<lon>y<lat>` repeated, with `xNaNyNaN` for a
//! segment break: `x1.123y-50.0xNaNyNaNx0y0`.

use std::fmt::Write as _;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::coord;

/// Value of the `creator` attribute.
pub const CREATOR: &str = "catmap";

/// Document opening plus the first segment.
pub const OPENING: &str = concat!(
    "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n",
    "<gpx xmlns=\"http://www.topografix.com/GPX/1/1\" version=\"1.1\" creator=\"catmap\">\n",
    " <trk>",
    "\n  <trkseg>"
);

/// Ends the current segment and opens the next one.
pub const SEGMENT_BREAK: &str = "\n  </trkseg>\n  <trkseg>";

/// Closes the last segment and the document.
pub const CLOSING: &str = "\n  </trkseg>\n </trk>\n</gpx>";

/// UTC timestamp format of `<time>`.
pub const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Points of the sample track written on first run, as (lon, lat).
pub const SAMPLE_TRACK: [(f64, f64); 6] = [
    (-105.0, -63.338986),
    (-60.0, 46.397463),
    (-22.5, -7.478673),
    (22.5, -7.478673),
    (60.0, 46.397463),
    (105.0, -63.338986),
];

/// One item found by the scanner.
#[derive(Debug, Clone, PartialEq)]
pub enum GpxItem {
    Point(GpxPoint),
    SegmentEnd,
}

/// A `trkpt` as written in the file.
#[derive(Debug, Clone, PartialEq)]
pub struct GpxPoint {
    pub lat: f64,
    pub lon: f64,
    pub ele: f64,
    pub time: Option<String>,
}

fn attribute_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // lat="1.5" or lon='-2' with optional spaces around '='
    PATTERN.get_or_init(|| {
        Regex::new(r#"\b(lat|lon)\s*=\s*["']([^"']*)["']"#).expect("attribute pattern is valid")
    })
}

fn child_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"<(ele|time)>\s*([^<]*?)\s*</(?:ele|time)>").expect("child pattern is valid")
    })
}

/// Scans GPX text for points and segment ends, in document order.
///
/// Points without a parsable `lat` and `lon` are skipped.
pub fn scan(text: &str) -> Vec<GpxItem> {
    let mut items = Vec::new();
    let mut pos = 0;

    loop {
        let point_at = text[pos..].find("<trkpt").map(|i| pos + i);
        let segment_at = text[pos..].find("</trkseg>").map(|i| pos + i);

        let start = match (point_at, segment_at) {
            (None, None) => break,
            (Some(p), Some(s)) if s < p => {
                items.push(GpxItem::SegmentEnd);
                pos = s + "</trkseg>".len();
                continue;
            }
            (None, Some(s)) => {
                items.push(GpxItem::SegmentEnd);
                pos = s + "</trkseg>".len();
                continue;
            }
            (Some(p), _) => p,
        };

        let tag_start = start + "<trkpt".len();
        let Some(tag_len) = text[tag_start..].find('>') else {
            break;
        };
        let tag_end = tag_start + tag_len;
        let attributes = &text[tag_start..tag_end];
        let self_closing = attributes.ends_with('/');

        let body_end = if self_closing {
            tag_end + 1
        } else {
            text[tag_end..]
                .find("</trkpt>")
                .map_or(text.len(), |i| tag_end + i)
        };
        // Never let a point body swallow a following point.
        let body_end = text[tag_end..body_end]
            .find("<trkpt")
            .map_or(body_end, |i| tag_end + i);
        let body = &text[tag_end..body_end];

        if let Some(point) = parse_point(attributes, body) {
            items.push(GpxItem::Point(point));
        }
        pos = body_end.max(tag_end + 1);
    }
    items
}

fn parse_point(attributes: &str, body: &str) -> Option<GpxPoint> {
    let mut lat = None;
    let mut lon = None;
    for caps in attribute_pattern().captures_iter(attributes) {
        let value = caps[2].trim().parse::<f64>().ok();
        match &caps[1] {
            "lat" => lat = value,
            _ => lon = value,
        }
    }

    let mut ele = 0.0;
    let mut time = None;
    for caps in child_pattern().captures_iter(body) {
        match &caps[1] {
            "ele" => ele = caps[2].parse().unwrap_or(0.0),
            _ => time = Some(caps[2].to_string()),
        }
    }

    Some(GpxPoint {
        lat: lat?,
        lon: lon?,
        ele,
        time,
    })
}

/// Reads and scans a file. Unreadable files yield nothing.
pub fn scan_file(path: &Path) -> io::Result<Vec<GpxItem>> {
    let bytes = fs::read(path)?;
    Ok(scan(&String::from_utf8_lossy(&bytes)))
}

/// Formats one `trkpt` element, 6 decimals, ready to append.
pub fn format_point(longitude: f64, latitude: f64, altitude_m: i32, time: DateTime<Utc>) -> String {
    format!(
        "\n   <trkpt lat=\"{:.6}\" lon=\"{:.6}\">\n    <ele>{}</ele>\n    <time>{}</time>\n   </trkpt>",
        latitude,
        longitude,
        altitude_m,
        time.format(TIME_FORMAT)
    )
}

/// Writes a finished single-segment track.
pub fn write_track(path: &Path, points: &[(f64, f64)], time: DateTime<Utc>) -> io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(OPENING.as_bytes())?;
    for &(lon, lat) in points {
        file.write_all(format_point(lon, lat, 0, time).as_bytes())?;
    }
    file.write_all(CLOSING.as_bytes())?;
    file.sync_all()
}

/// Writes the first-run sample track.
pub fn write_sample_track(path: &Path) -> io::Result<()> {
    write_track(path, &SAMPLE_TRACK, DateTime::<Utc>::UNIX_EPOCH)
}

/// Encodes scanned items compactly.
pub fn encode(items: &[GpxItem]) -> String {
    let mut out = String::new();
    for item in items {
        match item {
            GpxItem::Point(p) => {
                let _ = write!(out, "x{}y{}", p.lon, p.lat);
            }
            GpxItem::SegmentEnd => out.push_str("xNaNyNaN"),
        }
    }
    out
}

/// Decodes the compact encoding into normalized (lon, lat) rows.
///
/// NaN rows are breaks. Decoding stops at the first malformed token and
/// keeps what was read before it.
pub fn decode(encoded: &str) -> Vec<(f64, f64)> {
    let mut rows = Vec::new();
    let Some(first) = encoded.find('x') else {
        return rows;
    };
    let mut rest = &encoded[first + 1..];

    loop {
        let Some(y_at) = rest.find('y') else {
            break;
        };
        let lon = &rest[..y_at];
        let after_y = &rest[y_at + 1..];
        let (lat, next) = match after_y.find('x') {
            Some(x_at) => (&after_y[..x_at], Some(&after_y[x_at + 1..])),
            None => (after_y, None),
        };

        let (Ok(lon), Ok(lat)) = (lon.trim().parse::<f64>(), lat.trim().parse::<f64>()) else {
            break;
        };
        let lon = coord::normalize_longitude(lon);
        let lat = coord::normalize_latitude(lat);
        if lon.is_nan() || lat.is_nan() {
            rows.push((f64::NAN, f64::NAN));
        } else {
            rows.push((lon, lat));
        }

        match next {
            Some(next) => rest = next,
            None => break,
        }
    }
    rows
}
