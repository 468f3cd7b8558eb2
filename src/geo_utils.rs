//! # Geographic Utilities
//!
//! Pure geographic computation for song coordinates and mapped routes.
//!
//! All functions operate on WGS84 decimal-degree coordinates, the standard
//! used by GPS receivers and mapping services.
//!
//! ## Overview
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`distance_km`] | Great-circle distance between two points |
//! | [`point_to_segment_distance`] | Distance from a point to a finite segment |
//! | [`min_distance_to_route`] | Minimum distance from a point to a polyline |
//! | [`centroid`] | Arithmetic-mean center of a set of points |
//! | [`format_distance`] | Human-readable distance label ("450m", "12.3km") |
//!
//! ## Algorithm Notes
//!
//! ### Haversine Formula
//!
//! Great-circle distances use the Haversine formula (Earth radius 6,371 km),
//! accurate to within 0.3% for practical use.
//!
//! Reference: [Haversine formula (Wikipedia)](https://en.wikipedia.org/wiki/Haversine_formula)
//!
//! ### Segment Distance
//!
//! [`point_to_segment_distance`] projects the point onto the segment's
//! parametric line treating latitude/longitude as planar coordinates, clamps
//! the projection parameter to stay within the segment, then measures the
//! great-circle distance to the clamped nearest point. The planar step is an
//! approximation, valid for the short segments of a mapped route.

use crate::GeoPoint;
use geo::{Distance, Haversine, Point};

// =============================================================================
// Distance Functions
// =============================================================================

/// Calculate the great-circle distance between two points in kilometres.
///
/// Symmetric, and zero (up to floating-point epsilon) for identical points.
///
/// # Example
///
/// ```rust
/// use songmap::GeoPoint;
/// use songmap::geo_utils::distance_km;
///
/// let london = GeoPoint::new(51.5074, -0.1278);
/// let paris = GeoPoint::new(48.8566, 2.3522);
///
/// let distance = distance_km(&london, &paris);
/// assert!((distance - 343.5).abs() < 5.0); // ~344 km
/// ```
#[inline]
pub fn distance_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let p1 = Point::new(a.longitude, a.latitude);
    let p2 = Point::new(b.longitude, b.latitude);
    Haversine::distance(p1, p2) / 1000.0
}

/// Calculate the distance in kilometres from a point to a finite segment.
///
/// The projection parameter is clamped to `[0, 1]`, so a point whose
/// perpendicular foot falls beyond either end measures its distance to the
/// nearer endpoint rather than to the infinite line.
pub fn point_to_segment_distance(point: &GeoPoint, start: &GeoPoint, end: &GeoPoint) -> f64 {
    let dx = end.longitude - start.longitude;
    let dy = end.latitude - start.latitude;
    let len_sq = dx * dx + dy * dy;

    // Degenerate segment: both ends coincide
    let t = if len_sq == 0.0 {
        0.0
    } else {
        let px = point.longitude - start.longitude;
        let py = point.latitude - start.latitude;
        ((px * dx + py * dy) / len_sq).clamp(0.0, 1.0)
    };

    let nearest = GeoPoint::new(start.latitude + t * dy, start.longitude + t * dx);
    distance_km(point, &nearest)
}

/// Calculate the minimum distance in kilometres from a point to a polyline.
///
/// Evaluates [`point_to_segment_distance`] over every consecutive pair of
/// route points. Returns `f64::INFINITY` for routes with fewer than 2 points.
///
/// # Example
///
/// ```rust
/// use songmap::GeoPoint;
/// use songmap::geo_utils::min_distance_to_route;
///
/// let route = vec![
///     GeoPoint::new(51.50, -0.13),
///     GeoPoint::new(51.51, -0.12),
///     GeoPoint::new(51.52, -0.11),
/// ];
///
/// let on_route = GeoPoint::new(51.505, -0.125);
/// assert!(min_distance_to_route(&on_route, &route) < 0.1);
///
/// let single = vec![GeoPoint::new(51.50, -0.13)];
/// assert!(min_distance_to_route(&on_route, &single).is_infinite());
/// ```
pub fn min_distance_to_route(point: &GeoPoint, route: &[GeoPoint]) -> f64 {
    if route.len() < 2 {
        return f64::INFINITY;
    }

    route
        .windows(2)
        .map(|w| point_to_segment_distance(point, &w[0], &w[1]))
        .fold(f64::INFINITY, f64::min)
}

// =============================================================================
// Centroid
// =============================================================================

/// Compute the arithmetic-mean center of a set of points.
///
/// A planar approximation, suitable for the small areas a marker group
/// spans. Returns (0, 0) for empty input.
pub fn centroid(points: &[GeoPoint]) -> GeoPoint {
    if points.is_empty() {
        return GeoPoint::new(0.0, 0.0);
    }

    let sum_lat: f64 = points.iter().map(|p| p.latitude).sum();
    let sum_lng: f64 = points.iter().map(|p| p.longitude).sum();
    let n = points.len() as f64;

    GeoPoint::new(sum_lat / n, sum_lng / n)
}

// =============================================================================
// Formatting
// =============================================================================

/// Format a distance for display.
///
/// Sub-kilometre distances render as whole meters; anything at or above one
/// kilometre renders with one decimal place.
///
/// # Example
///
/// ```rust
/// use songmap::geo_utils::format_distance;
///
/// assert_eq!(format_distance(0.45), "450m");
/// assert_eq!(format_distance(1.0), "1.0km");
/// assert_eq!(format_distance(12.34), "12.3km");
/// ```
pub fn format_distance(km: f64) -> String {
    if km < 1.0 {
        format!("{}m", (km * 1000.0).round() as i64)
    } else {
        format!("{:.1}km", km)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
