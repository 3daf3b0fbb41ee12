// Geodesy - spherical distance helpers for fixes on the Earth's surface
//
// The jump gate and trail comparison only need horizontal distances between
// nearby points, so a spherical Earth is accurate enough (~0.5%).

use std::f64::consts::PI;

use crate::constants::EARTH_RADIUS_M;

/// Degrees to radians conversion factor
const DTOR: f64 = PI / 180.0;

/// Radians to degrees conversion factor
#[cfg(test)]
const RTOD: f64 = 180.0 / PI;

/// Returns the haversine distance in meters between two lat/lon points
///
/// Numerically stable for short baselines, which is the common case when
/// comparing consecutive fixes a few meters apart.
///
/// # Arguments
/// * `lat0`, `lon0` - First point (latitude, longitude) in degrees
/// * `lat1`, `lon1` - Second point (latitude, longitude) in degrees
///
/// # Example
/// ```
/// let d = pawtrack::geodesy::haversine(37.0, -122.0, 37.1, -122.0);
/// assert!((d - 11_119.5).abs() < 1.0);
/// ```
pub fn haversine(lat0: f64, lon0: f64, lat1: f64, lon1: f64) -> f64 {
    let lat0_rad = lat0 * DTOR;
    let lat1_rad = lat1 * DTOR;
    let dlat = (lat1 - lat0) * DTOR;
    let dlon = (lon1 - lon0) * DTOR;

    let a = (dlat / 2.0).sin().powi(2)
        + lat0_rad.cos() * lat1_rad.cos() * (dlon / 2.0).sin().powi(2);

    // Rounding can push `a` a hair above 1 for antipodal points
    2.0 * EARTH_RADIUS_M * a.sqrt().min(1.0).asin()
}

/// Point reached by travelling `distance` meters from (lat, lon) along `bearing` degrees
///
/// Returns (latitude, longitude) in degrees, longitude normalised to [-180, 180).
#[cfg(test)]
pub(crate) fn destination(lat: f64, lon: f64, bearing: f64, distance: f64) -> (f64, f64) {
    let lat_rad = lat * DTOR;
    let lon_rad = lon * DTOR;
    let brg = bearing * DTOR;
    let ang = distance / EARTH_RADIUS_M;

    let lat2 = (lat_rad.sin() * ang.cos() + lat_rad.cos() * ang.sin() * brg.cos()).asin();
    let lon2 = lon_rad
        + (brg.sin() * ang.sin() * lat_rad.cos()).atan2(ang.cos() - lat_rad.sin() * lat2.sin());

    let lon2_deg = (lon2 * RTOD + 540.0).rem_euclid(360.0) - 180.0;
    (lat2 * RTOD, lon2_deg)
}
