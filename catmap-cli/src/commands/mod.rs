//! CLI subcommands.

pub mod config;
pub mod maps;
pub mod project;
pub mod record;
pub mod tile;
pub mod tracks;

use catmap::coord;

/// Parses `lon,lat` in degrees.
pub fn parse_position(text: &str) -> Result<(f64, f64), String> {
    let (lon, lat) = text
        .split_once(',')
        .ok_or_else(|| format!("expected LON,LAT, got {text:?}"))?;
    let lon: f64 = lon.trim().parse().map_err(|_| format!("bad longitude {lon:?}"))?;
    let lat: f64 = lat.trim().parse().map_err(|_| format!("bad latitude {lat:?}"))?;
    if !lon.is_finite() || !lat.is_finite() {
        return Err(format!("position must be finite, got {text:?}"));
    }
    Ok((coord::normalize_longitude(lon), coord::normalize_latitude(lat)))
}
