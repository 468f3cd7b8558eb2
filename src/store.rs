//! Song storage and audit-result caching.
//!
//! The grouping and audit engines read songs through the [`SongStore`]
//! contract; coordinate corrections from the audit tool flow back through
//! the same contract as partial patches. [`AuditResultCache`] holds a full
//! audit result set with a time-to-live so an operator can triage without
//! re-running the batch.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use log::info;
use serde::{Deserialize, Serialize};

use crate::audit::{GeoAuditResult, Severity};
use crate::Song;

/// How long a stored audit result set stays valid.
pub const DEFAULT_AUDIT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

// ============================================================================
// Song Store
// ============================================================================

/// Partial update for a song record.
///
/// Only the populated fields change; the audit tool typically patches
/// coordinates alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SongPatch {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub location_name: Option<String>,
}

impl SongPatch {
    /// Patch that moves a song to new coordinates.
    pub fn coordinates(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude: Some(latitude),
            longitude: Some(longitude),
            location_name: None,
        }
    }
}

/// Read/patch access to the song collection.
pub trait SongStore {
    /// Every song, in insertion order.
    fn all(&self) -> Vec<Song>;

    /// Look up one song by id.
    fn get(&self, id: &str) -> Option<Song>;

    /// Apply a partial update. Returns `false` when the id is unknown.
    fn update(&mut self, id: &str, patch: SongPatch) -> bool;
}

/// HashMap-backed song store preserving insertion order.
#[derive(Debug, Default)]
pub struct InMemorySongStore {
    songs: Vec<Song>,
    index: HashMap<String, usize>,
}

impl InMemorySongStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a song collection.
    pub fn from_songs(songs: Vec<Song>) -> Self {
        let mut store = Self::new();
        for song in songs {
            store.add(song);
        }
        store
    }

    /// Insert a song, replacing any existing record with the same id.
    pub fn add(&mut self, song: Song) {
        match self.index.get(&song.id) {
            Some(&slot) => self.songs[slot] = song,
            None => {
                self.index.insert(song.id.clone(), self.songs.len());
                self.songs.push(song);
            }
        }
    }

    /// Number of songs held.
    pub fn len(&self) -> usize {
        self.songs.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.songs.is_empty()
    }
}

impl SongStore for InMemorySongStore {
    fn all(&self) -> Vec<Song> {
        self.songs.clone()
    }

    fn get(&self, id: &str) -> Option<Song> {
        self.index.get(id).map(|&slot| self.songs[slot].clone())
    }

    fn update(&mut self, id: &str, patch: SongPatch) -> bool {
        let Some(&slot) = self.index.get(id) else {
            return false;
        };
        let song = &mut self.songs[slot];
        if let Some(latitude) = patch.latitude {
            song.latitude = latitude;
        }
        if let Some(longitude) = patch.longitude {
            song.longitude = longitude;
        }
        if let Some(location_name) = patch.location_name {
            song.location_name = location_name;
        }
        true
    }
}

// ============================================================================
// Audit Result Cache
// ============================================================================

/// TTL-bounded cache for a full batch-audit result set.
///
/// The whole mapping is stored and invalidated together: once the TTL
/// elapses (or [`clear`](AuditResultCache::clear) is called) the next read
/// drops everything and returns nothing. Applying a coordinate fix replaces
/// the stale entry with a fresh `Ok` result rather than invalidating the
/// set.
#[derive(Debug)]
pub struct AuditResultCache {
    results: HashMap<String, GeoAuditResult>,
    stored_at: Option<Instant>,
    ttl: Duration,
}

impl Default for AuditResultCache {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditResultCache {
    /// Cache with the default 24-hour TTL.
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_AUDIT_TTL)
    }

    /// Cache with a custom TTL.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            results: HashMap::new(),
            stored_at: None,
            ttl,
        }
    }

    /// Store a result set, resetting the TTL clock.
    pub fn store(&mut self, results: HashMap<String, GeoAuditResult>) {
        self.results = results;
        self.stored_at = Some(Instant::now());
    }

    /// Check whether the cached set has aged out (or was never stored).
    pub fn is_expired(&self) -> bool {
        self.stored_at.is_none_or(|at| at.elapsed() >= self.ttl)
    }

    /// The cached result set, or `None` once expired.
    ///
    /// An expired set is dropped wholesale on access.
    pub fn get(&mut self) -> Option<&HashMap<String, GeoAuditResult>> {
        if self.is_expired() {
            if self.stored_at.is_some() {
                info!("audit result cache expired, dropping {} entries", self.results.len());
            }
            self.clear();
            return None;
        }
        Some(&self.results)
    }

    /// Drop the cached set.
    pub fn clear(&mut self) {
        self.results.clear();
        self.stored_at = None;
    }

    /// Replace a song's stale result with a fresh `Ok` at its new position.
    ///
    /// Called after an operator applies the suggested fix; returns the
    /// synthesized result.
    pub fn mark_fixed(&mut self, stale: &GeoAuditResult) -> GeoAuditResult {
        let fixed = GeoAuditResult {
            song_id: stale.song_id.clone(),
            song_title: stale.song_title.clone(),
            song_artist: stale.song_artist.clone(),
            location_name: stale.location_name.clone(),
            current_lat: stale.suggested_lat,
            current_lng: stale.suggested_lng,
            severity: Severity::Ok,
            distance_km: 0.0,
            suggested_lat: stale.suggested_lat,
            suggested_lng: stale.suggested_lng,
            suggested_place_name: stale.suggested_place_name.clone(),
            candidates: Vec::new(),
            error: None,
        };
        self.results.insert(fixed.song_id.clone(), fixed.clone());
        fixed
    }
}

/// Apply an audit suggestion: move the song and refresh its cached result.
///
/// Returns `false` (and leaves the cache untouched) when the song no longer
/// exists in the store.
pub fn apply_suggested_fix(
    store: &mut dyn SongStore,
    cache: &mut AuditResultCache,
    result: &GeoAuditResult,
) -> bool {
    let patch = SongPatch::coordinates(result.suggested_lat, result.suggested_lng);
    if !store.update(&result.song_id, patch) {
        return false;
    }
    info!(
        "applied coordinate fix for song {} -> ({:.5}, {:.5})",
        result.song_id, result.suggested_lat, result.suggested_lng
    );
    cache.mark_fixed(result);
    true
}

// ============================================================================
// Unit Tests
// ============================================================================
