//! Coordinate auditing against a forward geocoder.
//!
//! For each song, decides whether its stored coordinates are consistent with
//! its declared location name, and supplies a ranked correction when they
//! are not:
//!
//! 1. **Biased pass** - geocode the location name with a bounding-box bias
//!    around the stored coordinates. A candidate close to the stored point
//!    settles the song as [`Severity::Ok`].
//! 2. **Global pass** - re-query with no bias, merge candidates from both
//!    passes (deduplicated by rounded coordinate), and classify the distance
//!    to the best suggestion.
//!
//! Failures are folded in per song: a missing API key or an empty result set
//! produces a soft-warning `Ok` result, while network or parse errors become
//! [`Severity::Error`] results that never abort a batch.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::GeocodeError;
use crate::geo_utils::distance_km;
use crate::{GeoPoint, Song};

/// Pause between songs in a batch audit; paces the external geocoder.
pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_millis(200);

/// Half-width in degrees of the bias box around stored coordinates (~55 km).
const BIAS_HALF_WIDTH_DEG: f64 = 0.5;

// ============================================================================
// Types
// ============================================================================

/// How far a song's stored location strays from its geocoded expectation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Coordinates agree with the location name (or the check was skipped)
    Ok,
    /// Mismatch beyond the suspicious threshold
    Suspicious,
    /// Mismatch beyond the bad threshold
    Bad,
    /// The audit itself failed for this song
    Error,
}

/// A geocoding match for a location-name query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoCandidate {
    /// Display name returned by the geocoder
    pub place_name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Place classification tags (e.g. "establishment", "locality")
    pub types: Vec<String>,
}

impl GeoCandidate {
    /// The candidate's position as a [`GeoPoint`].
    pub fn position(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

/// Distance thresholds for severity classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoAuditConfig {
    /// Distance at which a mismatch becomes suspicious. Default: 50 km
    pub suspicious_threshold_km: f64,
    /// Distance at which a mismatch becomes bad. Default: 500 km
    pub bad_threshold_km: f64,
}

impl Default for GeoAuditConfig {
    fn default() -> Self {
        Self {
            suspicious_threshold_km: 50.0,
            bad_threshold_km: 500.0,
        }
    }
}

impl GeoAuditConfig {
    /// Build a config from a custom suspicious threshold.
    ///
    /// The bad threshold scales with it but never drops below the 500 km
    /// default.
    pub fn with_suspicious_threshold(suspicious_km: f64) -> Self {
        Self {
            suspicious_threshold_km: suspicious_km,
            bad_threshold_km: (suspicious_km * 10.0).max(500.0),
        }
    }
}

/// Outcome of auditing a single song.
///
/// Immutable once returned; snapshot fields copy the song's state at audit
/// time so results stay meaningful if the store changes afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoAuditResult {
    pub song_id: String,
    pub song_title: String,
    pub song_artist: String,
    pub location_name: String,
    pub current_lat: f64,
    pub current_lng: f64,
    pub severity: Severity,
    /// Distance from the stored coordinates to the chosen suggestion;
    /// zero when ok-by-construction or on error
    pub distance_km: f64,
    pub suggested_lat: f64,
    pub suggested_lng: f64,
    pub suggested_place_name: String,
    /// Deduplicated candidates from both passes
    pub candidates: Vec<GeoCandidate>,
    /// Failure description, or a soft-warning annotation on an `Ok` result
    pub error: Option<String>,
}

impl GeoAuditResult {
    /// Result that keeps the song's stored coordinates as the suggestion.
    pub(crate) fn unchanged(song: &Song, severity: Severity, error: Option<String>) -> Self {
        Self {
            song_id: song.id.clone(),
            song_title: song.title.clone(),
            song_artist: song.artist.clone(),
            location_name: song.location_name.clone(),
            current_lat: song.latitude,
            current_lng: song.longitude,
            severity,
            distance_km: 0.0,
            suggested_lat: song.latitude,
            suggested_lng: song.longitude,
            suggested_place_name: song.location_name.clone(),
            candidates: Vec::new(),
            error,
        }
    }

    fn with_suggestion(
        song: &Song,
        severity: Severity,
        suggestion: &GeoCandidate,
        distance_km: f64,
        candidates: Vec<GeoCandidate>,
    ) -> Self {
        Self {
            song_id: song.id.clone(),
            song_title: song.title.clone(),
            song_artist: song.artist.clone(),
            location_name: song.location_name.clone(),
            current_lat: song.latitude,
            current_lng: song.longitude,
            severity,
            distance_km,
            suggested_lat: suggestion.latitude,
            suggested_lng: suggestion.longitude,
            suggested_place_name: suggestion.place_name.clone(),
            candidates,
            error: None,
        }
    }
}

/// Bounding box passed to a geocoder to prefer nearby results.
///
/// A bias, not a filter: the service may still return matches outside it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BiasBox {
    pub min_lat: f64,
    pub min_lng: f64,
    pub max_lat: f64,
    pub max_lng: f64,
}

impl BiasBox {
    /// Box of ±0.5° around a point, roughly 110 km on a side.
    pub fn around(latitude: f64, longitude: f64) -> Self {
        Self {
            min_lat: latitude - BIAS_HALF_WIDTH_DEG,
            min_lng: longitude - BIAS_HALF_WIDTH_DEG,
            max_lat: latitude + BIAS_HALF_WIDTH_DEG,
            max_lng: longitude + BIAS_HALF_WIDTH_DEG,
        }
    }
}

/// Forward-geocoding service contract.
#[async_trait]
pub trait ForwardGeocoder: Send + Sync {
    /// Whether the backing service has credentials configured.
    ///
    /// When `false`, audits short-circuit to a soft-warning `Ok` result
    /// instead of issuing requests.
    fn is_configured(&self) -> bool {
        true
    }

    /// Geocode a free-text query, optionally biased toward a bounding box.
    ///
    /// Candidate order is the service's ranking; the first candidate is the
    /// best match.
    async fn geocode(
        &self,
        query: &str,
        bias: Option<BiasBox>,
    ) -> Result<Vec<GeoCandidate>, GeocodeError>;
}

/// Progress phase for batch-audit notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditPhase {
    Started,
    Finished,
}

/// Callback invoked around each song in a batch: (index, total, title, phase).
pub type AuditProgressCallback = Arc<dyn Fn(usize, usize, &str, AuditPhase) + Send + Sync>;

// ============================================================================
// Severity Classification
// ============================================================================

/// Classify a mismatch distance against the configured thresholds.
///
/// # Example
/// ```
/// use songmap::{classify_severity, GeoAuditConfig, Severity};
///
/// let config = GeoAuditConfig::default();
/// assert_eq!(classify_severity(49.9, &config), Severity::Ok);
/// assert_eq!(classify_severity(50.0, &config), Severity::Suspicious);
/// assert_eq!(classify_severity(500.0, &config), Severity::Bad);
/// ```
pub fn classify_severity(distance_km: f64, config: &GeoAuditConfig) -> Severity {
    if distance_km >= config.bad_threshold_km {
        Severity::Bad
    } else if distance_km >= config.suspicious_threshold_km {
        Severity::Suspicious
    } else {
        Severity::Ok
    }
}

// ============================================================================
// Candidate Handling
// ============================================================================

/// Dedup key: coordinates rounded to 5 decimal places (~1.1 m).
fn candidate_key(candidate: &GeoCandidate) -> String {
    format!("{:.5},{:.5}", candidate.latitude, candidate.longitude)
}

/// Merge global-pass and biased-pass candidates into one deduplicated list.
///
/// Global candidates come first and win coordinate collisions, so the
/// service's unbiased ranking leads the merged list.
fn merge_candidates(global: &[GeoCandidate], biased: &[GeoCandidate]) -> Vec<GeoCandidate> {
    let mut seen = HashSet::new();
    let mut merged = Vec::with_capacity(global.len() + biased.len());

    for candidate in global.iter().chain(biased.iter()) {
        if seen.insert(candidate_key(candidate)) {
            merged.push(candidate.clone());
        }
    }

    merged
}

/// The candidate nearest to the song's stored coordinates.
fn closest_candidate<'a>(
    candidates: &'a [GeoCandidate],
    song: &Song,
) -> Option<(&'a GeoCandidate, f64)> {
    let position = song.position();
    candidates
        .iter()
        .map(|c| (c, distance_km(&position, &c.position())))
        .min_by(|a, b| a.1.total_cmp(&b.1))
}

// ============================================================================
// Audit Engine
// ============================================================================

/// Per-song coordinate validator with batch orchestration.
pub struct GeoAuditEngine<G> {
    geocoder: G,
    config: GeoAuditConfig,
}

impl<G: ForwardGeocoder> GeoAuditEngine<G> {
    /// Create an engine with default thresholds.
    pub fn new(geocoder: G) -> Self {
        Self::with_config(geocoder, GeoAuditConfig::default())
    }

    /// Create an engine with custom thresholds.
    pub fn with_config(geocoder: G, config: GeoAuditConfig) -> Self {
        Self { geocoder, config }
    }

    /// The engine's threshold configuration.
    pub fn config(&self) -> &GeoAuditConfig {
        &self.config
    }

    /// Audit a single song's coordinates against its location name.
    ///
    /// Never returns an error: failures are captured in the result's
    /// severity and `error` field.
    pub async fn audit_song(&self, song: &Song) -> GeoAuditResult {
        if !self.geocoder.is_configured() {
            return GeoAuditResult::unchanged(
                song,
                Severity::Ok,
                Some("Geocoding API key not configured".to_string()),
            );
        }

        match self.run_audit(song).await {
            Ok(result) => result,
            Err(err) => {
                warn!("audit failed for song {}: {err}", song.id);
                GeoAuditResult::unchanged(song, Severity::Error, Some(err.to_string()))
            }
        }
    }

    async fn run_audit(&self, song: &Song) -> Result<GeoAuditResult, GeocodeError> {
        // Pass 1: biased toward the stored coordinates
        let bias = BiasBox::around(song.latitude, song.longitude);
        let biased = self
            .geocoder
            .geocode(&song.location_name, Some(bias))
            .await?;

        if let Some((closest, dist)) = closest_candidate(&biased, song) {
            if dist < self.config.suspicious_threshold_km {
                debug!(
                    "song {} verified by biased pass ({})",
                    song.id,
                    crate::geo_utils::format_distance(dist)
                );
                let suggestion = closest.clone();
                return Ok(GeoAuditResult::with_suggestion(
                    song,
                    Severity::Ok,
                    &suggestion,
                    dist,
                    biased,
                ));
            }
        }

        // Pass 2: global query, merged with whatever the biased pass found
        let global = self.geocoder.geocode(&song.location_name, None).await?;
        let merged = merge_candidates(&global, &biased);

        if merged.is_empty() {
            return Ok(GeoAuditResult::unchanged(
                song,
                Severity::Ok,
                Some("No geocoding results".to_string()),
            ));
        }

        if let Some((closest, dist)) = closest_candidate(&merged, song) {
            if dist < self.config.suspicious_threshold_km {
                let suggestion = closest.clone();
                return Ok(GeoAuditResult::with_suggestion(
                    song,
                    Severity::Ok,
                    &suggestion,
                    dist,
                    merged,
                ));
            }
        }

        // Genuine mismatch. Suggest the top global candidate; when the
        // global pass came back empty the best biased candidate stands in.
        let suggestion = global.first().unwrap_or(&merged[0]).clone();
        let dist = distance_km(&song.position(), &suggestion.position());
        let severity = classify_severity(dist, &self.config);

        debug!(
            "song {} mismatch: {} from \"{}\" ({severity:?})",
            song.id,
            crate::geo_utils::format_distance(dist),
            suggestion.place_name
        );

        Ok(GeoAuditResult::with_suggestion(
            song, severity, &suggestion, dist, merged,
        ))
    }

    /// Audit a collection of songs strictly sequentially.
    ///
    /// Sequential processing bounds the geocoder's request rate
    /// deterministically: a flagged song issues at most two requests, and a
    /// fixed `delay` separates consecutive songs (none after the last). The
    /// progress callback fires before and after each song.
    ///
    /// Returns one result per input song; individual failures are captured
    /// as [`Severity::Error`] entries and never abort the batch.
    pub async fn batch_audit(
        &self,
        songs: &[Song],
        progress: Option<AuditProgressCallback>,
        delay: Duration,
    ) -> HashMap<String, GeoAuditResult> {
        let total = songs.len();
        info!("starting geo audit of {total} songs");

        let mut results = HashMap::with_capacity(total);

        for (index, song) in songs.iter().enumerate() {
            if let Some(cb) = &progress {
                cb(index, total, &song.title, AuditPhase::Started);
            }

            let result = self.audit_song(song).await;

            if let Some(cb) = &progress {
                cb(index, total, &song.title, AuditPhase::Finished);
            }

            results.insert(song.id.clone(), result);

            if index + 1 < total && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        let flagged = results
            .values()
            .filter(|r| r.severity != Severity::Ok)
            .count();
        info!("geo audit finished: {total} songs, {flagged} flagged");

        results
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
