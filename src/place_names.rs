//! Zoom-aware place-name resolution with caching and request coalescing.
//!
//! Maps a (latitude, longitude, zoom) triple to a human-readable place name
//! via an external reverse-geocoding service. As the map pans and zooms
//! continuously, two mechanisms keep API call volume down:
//!
//! - **Coarse cache keys**: coordinates are rounded at a precision that
//!   follows the zoom's place level, so nearby points share one cache entry
//!   and one API call.
//! - **Request coalescing**: concurrent lookups for the same key await the
//!   single in-flight request instead of issuing duplicates.
//!
//! Lookups never fail: any service error degrades to "no name available",
//! since an unlabeled cluster is cosmetic rather than correctness-affecting.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::error::GeocodeError;

/// Geographic granularity for display names, derived from map zoom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaceLevel {
    Country,
    Region,
    Place,
    Neighborhood,
}

impl PlaceLevel {
    /// The place level to display at a given map zoom.
    ///
    /// The breakpoints are a display policy the grouping engine depends on:
    /// below zoom 5 show countries, below 8 regions, below 12 places
    /// (cities/towns), otherwise neighborhoods.
    ///
    /// # Example
    /// ```
    /// use songmap::PlaceLevel;
    /// assert_eq!(PlaceLevel::for_zoom(4.9), PlaceLevel::Country);
    /// assert_eq!(PlaceLevel::for_zoom(5.0), PlaceLevel::Region);
    /// assert_eq!(PlaceLevel::for_zoom(12.0), PlaceLevel::Neighborhood);
    /// ```
    pub fn for_zoom(zoom: f64) -> Self {
        if zoom < 5.0 {
            Self::Country
        } else if zoom < 8.0 {
            Self::Region
        } else if zoom < 12.0 {
            Self::Place
        } else {
            Self::Neighborhood
        }
    }

    /// Stable name used in cache keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Country => "country",
            Self::Region => "region",
            Self::Place => "place",
            Self::Neighborhood => "neighborhood",
        }
    }

    /// Decimal places to keep when rounding coordinates for cache keys.
    ///
    /// Coarser levels round harder so that nearby points collapse onto a
    /// single entry: 0 dp is ~110 km, 1 dp ~11 km, 2 dp ~1.1 km.
    fn key_precision(&self) -> usize {
        match self {
            Self::Country | Self::Region => 0,
            Self::Place => 1,
            Self::Neighborhood => 2,
        }
    }
}

/// Cache key for a coordinate at the place level implied by `zoom`.
///
/// # Example
/// ```
/// use songmap::cache_key;
///
/// // Coarse level: nearby coordinates share a key
/// assert_eq!(cache_key(51.50, -0.12, 3.0), cache_key(51.51, -0.13, 3.0));
///
/// // Fine level: they do not
/// assert_ne!(cache_key(51.50, -0.12, 15.0), cache_key(51.51, -0.13, 15.0));
/// ```
pub fn cache_key(latitude: f64, longitude: f64, zoom: f64) -> String {
    let level = PlaceLevel::for_zoom(zoom);
    let p = level.key_precision();
    format!(
        "{lat:.p$},{lng:.p$}:{level}",
        lat = latitude,
        lng = longitude,
        level = level.as_str(),
        p = p,
    )
}

/// Reverse-geocoding service contract.
///
/// Implementations resolve a coordinate to at most one place name at the
/// requested granularity. The cache in front of this trait guarantees at
/// most one call per unique cache key per cache lifetime.
#[async_trait]
pub trait ReverseGeocoder: Send + Sync {
    /// Resolve a coordinate to a place name.
    ///
    /// Returns `Ok(None)` when the service has no name for the location at
    /// this level. For [`PlaceLevel::Neighborhood`], implementations should
    /// fall back to locality when no neighborhood exists.
    async fn reverse(
        &self,
        latitude: f64,
        longitude: f64,
        level: PlaceLevel,
    ) -> Result<Option<String>, GeocodeError>;
}

/// In-memory place-name cache with request coalescing.
///
/// State is instance-owned so tests can construct isolated caches. The two
/// maps are mutex-guarded and locks are never held across await points;
/// pending-request coordination uses [`Notify`] so joiners suspend until the
/// leader's lookup completes.
///
/// The cache is process-lifetime and unbounded. Keys are coarse (see
/// [`cache_key`]), so the practical address space stays small.
pub struct ReverseGeocodeCache<G> {
    geocoder: G,
    names: Mutex<HashMap<String, String>>,
    pending: Mutex<HashMap<String, Arc<Notify>>>,
}

impl<G: ReverseGeocoder> ReverseGeocodeCache<G> {
    /// Create a cache backed by the given reverse geocoder.
    pub fn new(geocoder: G) -> Self {
        Self {
            geocoder,
            names: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Synchronous cache-only lookup; never touches the network.
    ///
    /// Fast path for grouping recomputation, which must not suspend.
    pub fn cached_name(&self, latitude: f64, longitude: f64, zoom: f64) -> Option<String> {
        self.names
            .lock()
            .get(&cache_key(latitude, longitude, zoom))
            .cloned()
    }

    /// Resolve a place name for the coordinate at the zoom's place level.
    ///
    /// Checks the cache, joins any in-flight request for the same key, or
    /// issues a new lookup. Stores the name on success and always clears the
    /// in-flight marker. Returns `None` on any failure or empty result.
    pub async fn resolve(&self, latitude: f64, longitude: f64, zoom: f64) -> Option<String> {
        let level = PlaceLevel::for_zoom(zoom);
        let key = cache_key(latitude, longitude, zoom);

        if let Some(name) = self.names.lock().get(&key) {
            return Some(name.clone());
        }

        // Join an in-flight request for this key, or become the leader.
        let existing = {
            let mut pending = self.pending.lock();
            match pending.get(&key) {
                Some(notify) => Some(Arc::clone(notify)),
                None => {
                    pending.insert(key.clone(), Arc::new(Notify::new()));
                    None
                }
            }
        };

        if let Some(notify) = existing {
            let notified = notify.notified();
            // The leader may have finished between our two lookups; once the
            // pending marker is gone no further notification will arrive.
            if !self.pending.lock().contains_key(&key) {
                return self.names.lock().get(&key).cloned();
            }
            debug!("joining in-flight reverse geocode for {key}");
            notified.await;
            return self.names.lock().get(&key).cloned();
        }

        let name = match self.geocoder.reverse(latitude, longitude, level).await {
            Ok(name) => name,
            Err(err) => {
                warn!("reverse geocode failed for {key}: {err}");
                None
            }
        };

        if let Some(ref resolved) = name {
            self.names.lock().insert(key.clone(), resolved.clone());
        }

        // Publish before waking joiners: they read the cache on wake-up.
        let notify = self.pending.lock().remove(&key);
        if let Some(notify) = notify {
            notify.notify_waiters();
        }

        name
    }

    /// Number of resolved names held.
    pub fn len(&self) -> usize {
        self.names.lock().len()
    }

    /// Check if no names have been resolved yet.
    pub fn is_empty(&self) -> bool {
        self.names.lock().is_empty()
    }

    /// Drop all cached names.
    pub fn clear(&self) {
        self.names.lock().clear();
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingGeocoder {
        calls: AtomicUsize,
        name: Option<&'static str>,
        fail: bool,
    }

    impl CountingGeocoder {
        fn returning(name: &'static str) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                name: Some(name),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                name: None,
                fail: true,
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ReverseGeocoder for CountingGeocoder {
        async fn reverse(
            &self,
            _latitude: f64,
            _longitude: f64,
            _level: PlaceLevel,
        ) -> Result<Option<String>, GeocodeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // Hold the request open long enough for a second caller to join
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail {
                return Err(GeocodeError::Status(500));
            }
            Ok(self.name.map(str::to_string))
        }
    }

    #[test]
    fn test_place_level_breakpoints() {
        assert_eq!(PlaceLevel::for_zoom(0.0), PlaceLevel::Country);
        assert_eq!(PlaceLevel::for_zoom(4.9), PlaceLevel::Country);
        assert_eq!(PlaceLevel::for_zoom(5.0), PlaceLevel::Region);
        assert_eq!(PlaceLevel::for_zoom(7.9), PlaceLevel::Region);
        assert_eq!(PlaceLevel::for_zoom(8.0), PlaceLevel::Place);
        assert_eq!(PlaceLevel::for_zoom(11.9), PlaceLevel::Place);
        assert_eq!(PlaceLevel::for_zoom(12.0), PlaceLevel::Neighborhood);
        assert_eq!(PlaceLevel::for_zoom(18.0), PlaceLevel::Neighborhood);
    }

    #[test]
    fn test_cache_key_coarsens_with_level() {
        // 0.01 degrees apart: identical at country level, distinct at
        // neighborhood level
        let a = cache_key(51.50, -0.12, 3.0);
        let b = cache_key(51.51, -0.12, 3.0);
        assert_eq!(a, b);

        let a = cache_key(51.50, -0.12, 15.0);
        let b = cache_key(51.51, -0.12, 15.0);
        assert_ne!(a, b);
    }

    #[test]
    fn test_cache_key_embeds_level() {
        assert!(cache_key(51.5, -0.12, 3.0).ends_with(":country"));
        assert!(cache_key(51.5, -0.12, 6.0).ends_with(":region"));
        assert!(cache_key(51.5, -0.12, 9.0).ends_with(":place"));
        assert!(cache_key(51.5, -0.12, 13.0).ends_with(":neighborhood"));
    }

    #[tokio::test]
    async fn test_resolve_caches_result() {
        let cache = ReverseGeocodeCache::new(CountingGeocoder::returning("Soho"));

        let first = cache.resolve(51.5137, -0.1349, 13.0).await;
        assert_eq!(first.as_deref(), Some("Soho"));

        let second = cache.resolve(51.5137, -0.1349, 13.0).await;
        assert_eq!(second.as_deref(), Some("Soho"));

        assert_eq!(cache.geocoder.call_count(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_resolves_coalesce() {
        let cache = ReverseGeocodeCache::new(CountingGeocoder::returning("Camden"));

        let (a, b) = tokio::join!(
            cache.resolve(51.5390, -0.1426, 13.0),
            cache.resolve(51.5390, -0.1426, 13.0),
        );

        assert_eq!(a.as_deref(), Some("Camden"));
        assert_eq!(b.as_deref(), Some("Camden"));
        assert_eq!(cache.geocoder.call_count(), 1);
    }

    #[tokio::test]
    async fn test_failure_returns_none_and_is_not_cached() {
        let cache = ReverseGeocodeCache::new(CountingGeocoder::failing());

        assert_eq!(cache.resolve(51.5, -0.12, 13.0).await, None);
        assert!(cache.is_empty());

        // Failures are not cached: a later call tries the service again
        assert_eq!(cache.resolve(51.5, -0.12, 13.0).await, None);
        assert_eq!(cache.geocoder.call_count(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_failure_joiner_gets_none() {
        let cache = ReverseGeocodeCache::new(CountingGeocoder::failing());

        let (a, b) = tokio::join!(
            cache.resolve(51.5, -0.12, 13.0),
            cache.resolve(51.5, -0.12, 13.0),
        );

        assert_eq!(a, None);
        assert_eq!(b, None);
        // Joiner shared the leader's failed request
        assert_eq!(cache.geocoder.call_count(), 1);
    }

    #[tokio::test]
    async fn test_cached_name_is_cache_only() {
        let cache = ReverseGeocodeCache::new(CountingGeocoder::returning("Hackney"));

        assert_eq!(cache.cached_name(51.5450, -0.0553, 13.0), None);
        assert_eq!(cache.geocoder.call_count(), 0);

        cache.resolve(51.5450, -0.0553, 13.0).await;
        assert_eq!(
            cache.cached_name(51.5450, -0.0553, 13.0).as_deref(),
            Some("Hackney")
        );
    }

    #[tokio::test]
    async fn test_different_zoom_levels_use_separate_entries() {
        let cache = ReverseGeocodeCache::new(CountingGeocoder::returning("somewhere"));

        cache.resolve(51.5, -0.12, 3.0).await;
        cache.resolve(51.5, -0.12, 13.0).await;

        assert_eq!(cache.geocoder.call_count(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_clear() {
        let cache = ReverseGeocodeCache::new(CountingGeocoder::returning("Soho"));
        cache.resolve(51.5137, -0.1349, 13.0).await;
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.cached_name(51.5137, -0.1349, 13.0), None);
    }
}
