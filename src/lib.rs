//! # Songmap
//!
//! Geospatial core for map-based music discovery: cluster geolocated songs
//! into visual marker groups and audit their stored coordinates against a
//! geocoding service.
//!
//! This library provides:
//! - Marker grouping by location name, geographic proximity, and on-screen
//!   pixel distance ([`compute_groups`])
//! - Coordinate auditing with a two-pass biased/global geocode strategy and
//!   severity classification ([`GeoAuditEngine`])
//! - Zoom-aware reverse-geocoded display names with caching and request
//!   coalescing ([`ReverseGeocodeCache`])
//!
//! ## Features
//!
//! - **`http`** - Enable the HTTP geocoding client (Google Geocoding API)
//!
//! ## Quick Start
//!
//! ```rust
//! use songmap::{compute_groups, GroupingConfig, GroupingMode, Song, Viewport};
//!
//! let songs = vec![
//!     Song::new("1", "Waterloo Sunset", "The Kinks", 51.5033, -0.1134, "Waterloo Bridge"),
//!     Song::new("2", "Waterloo", "ABBA", 51.5034, -0.1135, "Waterloo Bridge"),
//!     Song::new("3", "Empire State of Mind", "Jay-Z", 40.7484, -73.9857, "Empire State Building"),
//! ];
//!
//! // No map projection yet: groups form by location name alone.
//! let viewport = Viewport { zoom: 12.0, projection: None };
//! let groups = compute_groups(
//!     &songs,
//!     GroupingMode::Location,
//!     &viewport,
//!     &GroupingConfig::default(),
//! );
//!
//! assert_eq!(groups.len(), 2);
//! assert_eq!(groups[0].songs.len(), 2); // both Waterloo Bridge songs
//! ```

use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::GeocodeError;

// Geographic utilities (distance, segment projection, formatting)
pub mod geo_utils;

// Zoom-aware reverse-geocoded place names with caching
pub mod place_names;
pub use place_names::{cache_key, PlaceLevel, ReverseGeocodeCache, ReverseGeocoder};

// Coordinate auditing against a forward geocoder
pub mod audit;
pub use audit::{
    classify_severity, AuditPhase, AuditProgressCallback, BiasBox, ForwardGeocoder,
    GeoAuditConfig, GeoAuditEngine, GeoAuditResult, GeoCandidate, Severity, DEFAULT_BATCH_DELAY,
};

// Marker grouping for map display
pub mod grouping;
pub use grouping::{
    apply_name_overlay, compute_groups, needs_name_resolution, resolve_group_names, GroupKind,
    GroupingConfig, GroupingMode, MapProjection, MarkerGroup, NameOverlay, NameResolvedCallback,
    PixelPoint, Viewport,
};

// Song storage and audit-result caching
pub mod store;
pub use store::{
    apply_suggested_fix, AuditResultCache, InMemorySongStore, SongPatch, SongStore,
    DEFAULT_AUDIT_TTL,
};

// HTTP geocoding client
#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use http::GoogleGeocoder;

// ============================================================================
// Core Types
// ============================================================================

/// A bare latitude/longitude pair in WGS84 decimal degrees.
///
/// # Example
/// ```
/// use songmap::GeoPoint;
/// let point = GeoPoint::new(51.5074, -0.1278); // London
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    /// Create a new geographic point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// A song pinned to a real-world place.
///
/// Owned by the surrounding application; this crate treats songs as
/// read-only input apart from coordinate corrections applied through a
/// [`SongStore`]. Coordinate range invariants are the caller's to enforce;
/// [`GeoPoint::is_valid`] is available via [`Song::has_valid_coordinates`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Song {
    /// Unique identifier
    pub id: String,
    /// Track title
    pub title: String,
    /// Artist display name
    pub artist: String,
    /// Latitude in decimal degrees (WGS84)
    pub latitude: f64,
    /// Longitude in decimal degrees (WGS84)
    pub longitude: f64,
    /// Free-text place label; non-unique
    pub location_name: String,
}

impl Song {
    /// Create a new song record.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        artist: impl Into<String>,
        latitude: f64,
        longitude: f64,
        location_name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artist: artist.into(),
            latitude,
            longitude,
            location_name: location_name.into(),
        }
    }

    /// The song's position as a [`GeoPoint`].
    pub fn position(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }

    /// Check if the stored coordinates are in range and finite.
    pub fn has_valid_coordinates(&self) -> bool {
        self.position().is_valid()
    }
}
