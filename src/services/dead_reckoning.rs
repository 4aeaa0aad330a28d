//! Dead-reckoning math on a spherical earth
//!
//! Pure functions: destination point from origin/distance/bearing,
//! haversine distance, and circular-mean heading smoothing.

use crate::domain::types::Coordinate;

/// Mean earth radius in meters
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Project a new position `steps * stride_length_m` meters from `origin`
/// along `heading_degrees` (0 = north, 90 = east).
pub fn calculate_new_position(
    origin: Coordinate,
    steps: u64,
    heading_degrees: f64,
    stride_length_m: f64,
) -> Coordinate {
    let distance = steps as f64 * stride_length_m;
    destination_point(origin, distance, heading_degrees)
}

/// Destination point given distance and bearing from a start point
pub fn destination_point(origin: Coordinate, distance_m: f64, bearing_degrees: f64) -> Coordinate {
    let angular = distance_m / EARTH_RADIUS_M;
    let bearing = bearing_degrees.to_radians();
    let lat1 = origin.lat.to_radians();
    let lng1 = origin.lng.to_radians();

    let lat2 = (lat1.sin() * angular.cos() + lat1.cos() * angular.sin() * bearing.cos()).asin();
    let lng2 = lng1
        + (bearing.sin() * angular.sin() * lat1.cos())
            .atan2(angular.cos() - lat1.sin() * lat2.sin());

    Coordinate::new(lat2.to_degrees(), lng2.to_degrees())
}

/// Great-circle distance in meters
pub fn haversine_distance(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Haversine distance between two coordinates
#[inline]
pub fn distance_between(a: Coordinate, b: Coordinate) -> f64 {
    haversine_distance(a.lat, a.lng, b.lat, b.lng)
}

/// Circular mean of headings in degrees, normalized to [0, 360).
///
/// Returns None for an empty slice.
pub fn smooth_heading(headings: &[f64]) -> Option<f64> {
    if headings.is_empty() {
        return None;
    }

    let (sin_sum, cos_sum) = headings.iter().fold((0.0_f64, 0.0_f64), |(s, c), h| {
        let rad = h.to_radians();
        (s + rad.sin(), c + rad.cos())
    });
    let n = headings.len() as f64;

    let mean = (sin_sum / n).atan2(cos_sum / n).to_degrees();
    let normalized = mean.rem_euclid(360.0);
    // rem_euclid can round a tiny negative up to exactly 360.0
    Some(if normalized >= 360.0 { 0.0 } else { normalized })
}
