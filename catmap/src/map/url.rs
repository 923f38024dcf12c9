//! Tile URL templates.
//!
//! Templates use positional placeholders:
//!
//! - `%1$d` tile column
//! - `%2$d` tile row
//! - `%3$d` zoom level
//! - `%%` a literal percent sign
//!
//! A bare `%d` takes the next argument in column, row, zoom order.
//!
//! ```text
//! http://a.tile.openstreetmap.org/%3$d/%1$d/%2$d.png  ->  .../10/546/325.png
//! ```

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::MapError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment {
    Literal(usize, usize),
    Col,
    Row,
    Zoom,
}

/// A validated tile URL template.
#[derive(Clone, PartialEq, Eq)]
pub struct UrlTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl UrlTemplate {
    /// Parses and validates a template.
    ///
    /// The template must format to an absolute URL for tile (1, 1, 1).
    pub fn parse(raw: &str) -> Result<Self, MapError> {
        let segments = parse_segments(raw)?;
        let template = Self {
            raw: raw.to_string(),
            segments,
        };
        let sample = template.format(1, 1, 1);
        reqwest::Url::parse(&sample).map_err(|e| MapError::InvalidUrl {
            template: raw.to_string(),
            reason: e.to_string(),
        })?;
        Ok(template)
    }

    /// The template as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Substitutes the tile address.
    pub fn format(&self, col: u32, row: u32, zoom: u8) -> String {
        let mut out = String::with_capacity(self.raw.len() + 16);
        for segment in &self.segments {
            match *segment {
                Segment::Literal(start, end) => out.push_str(&self.raw[start..end]),
                Segment::Col => out.push_str(&col.to_string()),
                Segment::Row => out.push_str(&row.to_string()),
                Segment::Zoom => out.push_str(&zoom.to_string()),
            }
        }
        out
    }
}

fn parse_segments(raw: &str) -> Result<Vec<Segment>, MapError> {
    let invalid = |reason: String| MapError::InvalidTemplate {
        template: raw.to_string(),
        reason,
    };

    let bytes = raw.as_bytes();
    let mut segments = Vec::new();
    let mut literal_start = 0;
    let mut next_implicit = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'%' {
            i += 1;
            continue;
        }
        if literal_start < i {
            segments.push(Segment::Literal(literal_start, i));
        }
        let rest = &raw[i + 1..];
        let (segment, consumed) = if rest.starts_with('%') {
            (Segment::Literal(i + 1, i + 2), 2)
        } else if rest.starts_with('d') {
            let segment = placeholder(next_implicit)
                .ok_or_else(|| invalid("more than three %d placeholders".to_string()))?;
            next_implicit += 1;
            (segment, 2)
        } else {
            let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
            if digits == 0 || !rest[digits..].starts_with("$d") {
                return Err(invalid(format!("unsupported conversion at byte {}", i)));
            }
            let index: usize = rest[..digits]
                .parse()
                .map_err(|_| invalid(format!("bad argument index at byte {}", i)))?;
            let segment = index
                .checked_sub(1)
                .and_then(placeholder)
                .ok_or_else(|| invalid(format!("argument index {} out of range", index)))?;
            (segment, digits + 3)
        };
        segments.push(segment);
        i += consumed;
        literal_start = i;
    }
    if literal_start < bytes.len() {
        segments.push(Segment::Literal(literal_start, bytes.len()));
    }
    Ok(segments)
}

fn placeholder(index: usize) -> Option<Segment> {
    match index {
        0 => Some(Segment::Col),
        1 => Some(Segment::Row),
        2 => Some(Segment::Zoom),
        _ => None,
    }
}

impl fmt::Debug for UrlTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("UrlTemplate").field(&self.raw).finish()
    }
}

impl fmt::Display for UrlTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Serialize for UrlTemplate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for UrlTemplate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        UrlTemplate::parse(&raw).map_err(serde::de::Error::custom)
    }
}
