//! # Geographic Utilities
//!
//! Distance computation for GPS tracking.
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`haversine_distance`] | Great-circle distance between two GPS points |
//! | [`polyline_length`] | Total length of a GPS path in meters |
//!
//! ## Haversine Formula
//!
//! Distances assume a spherical Earth with radius 6,371 km. The intermediate
//! haversine term is clamped to `[0, 1]` so that rounding on near-identical or
//! antipodal points can never produce `NaN`.
//!
//! All functions expect WGS84 coordinates (latitude/longitude in degrees).

use crate::GpsPoint;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Calculate the great-circle distance between two GPS points using the Haversine formula.
///
/// Returns the distance in meters along the Earth's surface. The result is
/// symmetric in its arguments and exactly `0.0` for identical points.
///
/// # Example
///
/// ```rust
/// use fittrack::{GpsPoint, geo_utils::haversine_distance};
///
/// let a = GpsPoint::new(0.0, 0.0);
/// let b = GpsPoint::new(0.001, 0.0);
/// let d = haversine_distance(&a, &b);
/// assert!((d - 111.2).abs() < 1.0);
/// ```
pub fn haversine_distance(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    let lat1 = p1.latitude.to_radians();
    let lat2 = p2.latitude.to_radians();
    let d_lat = lat2 - lat1;
    let d_lng = (p2.longitude - p1.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    let h = h.clamp(0.0, 1.0);

    2.0 * EARTH_RADIUS_METERS * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Total length of a path in meters.
///
/// Returns `0.0` for paths with fewer than two points.
pub fn polyline_length(points: &[GpsPoint]) -> f64 {
    points
        .windows(2)
        .map(|pair| haversine_distance(&pair[0], &pair[1]))
        .sum()
}
