//! Coordinate conversion module
//!
//! Converts between geographic coordinates (decimal degrees) and normalized
//! projection space, where `x` runs from 0 (longitude -180) to 1 (longitude
//! 180) and `y` from 0 (north edge) to 1 (south edge). Two projections are
//! supported:
//!
//! - spherical Mercator (EPSG:3857, "web mercator"), the default
//! - ellipsoidal Mercator (EPSG:3395, "true mercator") on WGS84
//!
//! Formulas follow Snyder, *Map Projections: A Working Manual*
//! (USGS Professional Paper 1395), equations 7-1a through 7-11.

mod types;

pub use types::{
    Boundaries, CoordError, MapProjection, TileCoord, MAX_LAT, MAX_LON, MAX_ZOOM, MIN_LAT, MIN_LON,
};

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI, TAU};

/// WGS84 equatorial radius in meters.
pub const EQUATORIAL_RADIUS: f64 = 6_378_137.0;

/// WGS84 polar radius in meters.
pub const POLAR_RADIUS: f64 = 6_356_752.3142;

/// Iteration budget of the ellipsoidal inverse.
const INVERSE_ITERATIONS: usize = 5;

/// Convergence threshold of the ellipsoidal inverse, radians (about 1 cm).
const INVERSE_TOLERANCE: f64 = 1e-9;

/// First eccentricity of the WGS84 ellipsoid.
#[inline]
pub fn eccentricity() -> f64 {
    let ratio = POLAR_RADIUS / EQUATORIAL_RADIUS;
    (1.0 - ratio * ratio).sqrt()
}

/// Converts longitude to normalized x. Identical for both projections.
#[inline]
pub fn to_x(longitude: f64) -> f64 {
    (longitude + 180.0) / 360.0
}

/// Converts normalized x back to longitude.
#[inline]
pub fn to_longitude(x: f64) -> f64 {
    x * 360.0 - 180.0
}

/// Converts latitude to normalized y in the given projection.
#[inline]
pub fn to_y(latitude: f64, ellipsoid: bool) -> f64 {
    let phi = latitude.to_radians();
    if ellipsoid {
        // (7-7): y = a ln(tan(pi/4 + phi/2) ((1 - e sin phi) / (1 + e sin phi))^(e/2))
        let e = eccentricity();
        let e_sin = e * phi.sin();
        let correction = ((1.0 - e_sin) / (1.0 + e_sin)).powf(e / 2.0);
        0.5 - ((FRAC_PI_4 + phi / 2.0).tan() * correction).ln() / TAU
    } else {
        // (7-2): y = R ln(tan(pi/4 + phi/2))
        0.5 - (FRAC_PI_4 + phi / 2.0).tan().ln() / TAU
    }
}

/// Converts normalized y back to latitude in the given projection.
///
/// The ellipsoidal inverse has no closed form; it iterates (7-9) starting
/// from the spherical estimate (7-11). It usually settles in one or two
/// rounds; when the budget runs out the last estimate is returned as is.
pub fn to_latitude(y: f64, ellipsoid: bool) -> f64 {
    if !ellipsoid {
        // (7-4a): phi = atan(sinh(y / R))
        return (PI - TAU * y).sinh().atan().to_degrees();
    }

    let e = eccentricity();
    // (7-10): t = e^(-y/a)
    let t = (TAU * y - PI).exp();
    let mut trial = FRAC_PI_2 - 2.0 * t.atan();
    let mut phi = trial;
    for _ in 0..INVERSE_ITERATIONS {
        let e_sin = e * trial.sin();
        phi = FRAC_PI_2 - 2.0 * (t * ((1.0 - e_sin) / (1.0 + e_sin)).powf(e / 2.0)).atan();
        if (trial - phi).abs() < INVERSE_TOLERANCE {
            break;
        }
        trial = phi;
    }
    phi.to_degrees()
}

/// Reduces any longitude into `[-180, 180]`.
///
/// Values already in range are returned untouched so that both -180 and 180
/// survive. NaN passes through.
pub fn normalize_longitude(longitude: f64) -> f64 {
    if longitude < MIN_LON || longitude > MAX_LON {
        let mut wrapped = ((longitude % 360.0) + 360.0) % 360.0;
        if wrapped > 180.0 {
            wrapped -= 360.0;
        }
        return wrapped;
    }
    longitude
}

/// Reduces any latitude into the usable Mercator range `[-85, 85]`.
///
/// Values past a pole are folded back over it before clamping. NaN passes
/// through.
pub fn normalize_latitude(latitude: f64) -> f64 {
    let mut latitude = latitude;
    if latitude < -90.0 || latitude > 90.0 {
        latitude = ((latitude % 360.0) + 360.0) % 360.0;
        if latitude > 270.0 {
            latitude -= 360.0;
        } else if latitude > 90.0 {
            latitude = 180.0 - latitude;
        }
    }
    if latitude < MIN_LAT {
        MIN_LAT
    } else if latitude > MAX_LAT {
        MAX_LAT
    } else {
        latitude
    }
}

/// Returns the tile containing the normalized point at `zoom`.
///
/// Columns wrap around the antimeridian, rows clamp to the grid.
pub fn tile_for(x: f64, y: f64, zoom: u8) -> TileCoord {
    let n = 1i64 << zoom;
    let col = ((x * n as f64).floor() as i64).rem_euclid(n);
    let row = ((y * n as f64).floor() as i64).clamp(0, n - 1);
    TileCoord {
        row: row as u32,
        col: col as u32,
        zoom,
    }
}
