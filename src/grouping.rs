//! Marker grouping for map display.
//!
//! Turns the full song collection into visual marker groups:
//!
//! 1. **Location grouping** - songs sharing a (case-insensitive, trimmed)
//!    location name form a group, unless they are geographically far apart:
//!    distinct places that coincidentally share a name are split by a
//!    same-place distance threshold.
//! 2. **Proximity merge** - groups whose centroids land within a pixel
//!    threshold of each other on screen are merged, so overlapping markers
//!    collapse into one. The threshold is fixed for
//!    [`GroupingMode::LocationProximity`] and zoom-decayed for
//!    [`GroupingMode::Cluster`].
//!
//! [`compute_groups`] is a pure function of (songs, mode, viewport, config);
//! callers re-invoke it whenever any input changes. Display-name resolution
//! is a separate, cancellable enrichment step ([`resolve_group_names`]) that
//! produces an overlay applied on top of the raw group list
//! ([`apply_name_overlay`]).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::geo_utils::{centroid, distance_km};
use crate::place_names::{cache_key, PlaceLevel, ReverseGeocodeCache, ReverseGeocoder};
use crate::{GeoPoint, Song};

// ============================================================================
// Types
// ============================================================================

/// How aggressively songs are grouped, least to most.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GroupingMode {
    /// One group per song
    Off,
    /// Group only by matching location name
    Location,
    /// Location grouping, then merge visually overlapping groups at a fixed
    /// pixel threshold
    LocationProximity,
    /// Location grouping, then merge with a zoom-dependent threshold
    Cluster,
}

/// How a group came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupKind {
    /// An ungrouped song
    Single,
    /// Songs sharing a place name
    Location,
    /// Groups merged across differing place names due to on-screen closeness
    Proximity,
}

/// A visual marker group, recomputed fresh on every grouping pass.
///
/// Identity is derived from membership: the same songs always produce the
/// same id, and a membership change produces a new group rather than a
/// mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerGroup {
    /// Deterministic id built from the sorted member song ids
    pub id: String,
    /// Member songs in input order
    pub songs: Vec<Song>,
    /// Centroid latitude
    pub latitude: f64,
    /// Centroid longitude
    pub longitude: f64,
    pub kind: GroupKind,
    /// Resolved display name; `None` until name resolution fills it for
    /// groups that need one
    pub location_name: Option<String>,
}

impl MarkerGroup {
    /// Wrap one song as its own group.
    pub fn single(song: Song) -> Self {
        let name = song.location_name.trim().to_string();
        Self {
            id: song.id.clone(),
            latitude: song.latitude,
            longitude: song.longitude,
            kind: GroupKind::Single,
            location_name: Some(name),
            songs: vec![song],
        }
    }

    fn from_members(songs: Vec<Song>, kind: GroupKind, location_name: Option<String>) -> Self {
        let positions: Vec<GeoPoint> = songs.iter().map(Song::position).collect();
        let center = centroid(&positions);
        Self {
            id: derive_id(&songs),
            latitude: center.latitude,
            longitude: center.longitude,
            kind,
            location_name,
            songs,
        }
    }

    /// Whether the group holds more than one song.
    pub fn is_multi(&self) -> bool {
        self.songs.len() > 1
    }

    /// The group's centroid as a [`GeoPoint`].
    pub fn position(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

/// Sorted member ids joined: idempotent for identical membership.
fn derive_id(songs: &[Song]) -> String {
    let mut ids: Vec<&str> = songs.iter().map(|s| s.id.as_str()).collect();
    ids.sort_unstable();
    ids.join("-")
}

/// An on-screen pixel position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelPoint {
    pub x: f64,
    pub y: f64,
}

impl PixelPoint {
    /// Euclidean distance in pixels.
    pub fn distance_to(&self, other: &PixelPoint) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Projection from geographic coordinates to on-screen pixels.
///
/// Provided by the hosting map. `project` returns `None` while the map is
/// not yet mounted; the grouping engine then skips proximity merging for
/// that pass and callers retry on the next recomputation.
pub trait MapProjection {
    fn project(&self, latitude: f64, longitude: f64) -> Option<PixelPoint>;
}

/// Current map view: zoom level plus an optional projection.
pub struct Viewport<'a> {
    pub zoom: f64,
    pub projection: Option<&'a dyn MapProjection>,
}

/// Tuning knobs for the grouping passes.
///
/// The defaults are empirically chosen display constants, configurable
/// because "correct" clustering is a UX tuning choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupingConfig {
    /// Same-name songs further apart than this split into separate groups.
    /// Default: 0.5 km
    pub same_place_threshold_km: f64,
    /// Fixed pixel merge radius for [`GroupingMode::LocationProximity`].
    /// Default: 60 px
    pub proximity_threshold_px: f64,
    /// Base pixel radius for [`GroupingMode::Cluster`] at zoom 0.
    /// Default: 120 px
    pub cluster_base_px: f64,
    /// Per-zoom-level decay of the cluster radius. Default: 0.9
    pub cluster_decay: f64,
    /// Lower bound on the cluster radius. Default: 60 px
    pub cluster_floor_px: f64,
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            same_place_threshold_km: 0.5,
            proximity_threshold_px: 60.0,
            cluster_base_px: 120.0,
            cluster_decay: 0.9,
            cluster_floor_px: 60.0,
        }
    }
}

impl GroupingConfig {
    /// Pixel merge radius for a mode at the given zoom.
    ///
    /// Cluster mode merges generously when zoomed out and tightens as the
    /// user zooms in, never below the floor. Modes without a proximity pass
    /// get zero.
    pub fn pixel_threshold(&self, mode: GroupingMode, zoom: f64) -> f64 {
        match mode {
            GroupingMode::LocationProximity => self.proximity_threshold_px,
            GroupingMode::Cluster => {
                (self.cluster_base_px * self.cluster_decay.powf(zoom)).max(self.cluster_floor_px)
            }
            GroupingMode::Off | GroupingMode::Location => 0.0,
        }
    }
}

// ============================================================================
// Grouping
// ============================================================================

/// Group songs into visual markers for the current viewport.
///
/// Pure: identical inputs produce identical groups with identical ids.
///
/// # Example
///
/// ```rust
/// use songmap::{compute_groups, GroupKind, GroupingConfig, GroupingMode, Song, Viewport};
///
/// let songs = vec![
///     Song::new("1", "A", "x", 51.5033, -0.1134, "Waterloo Bridge"),
///     Song::new("2", "B", "y", 51.5034, -0.1135, "Waterloo Bridge"),
/// ];
/// let viewport = Viewport { zoom: 12.0, projection: None };
///
/// let groups = compute_groups(&songs, GroupingMode::Location, &viewport, &GroupingConfig::default());
/// assert_eq!(groups.len(), 1);
/// assert_eq!(groups[0].kind, GroupKind::Location);
/// assert_eq!(groups[0].id, "1-2");
/// ```
pub fn compute_groups(
    songs: &[Song],
    mode: GroupingMode,
    viewport: &Viewport<'_>,
    config: &GroupingConfig,
) -> Vec<MarkerGroup> {
    if mode == GroupingMode::Off || songs.is_empty() {
        return songs.iter().cloned().map(MarkerGroup::single).collect();
    }

    let groups = group_by_location(songs, config);

    match mode {
        GroupingMode::LocationProximity | GroupingMode::Cluster => match viewport.projection {
            Some(projection) => {
                let threshold = config.pixel_threshold(mode, viewport.zoom);
                merge_by_pixel_distance(groups, projection, threshold)
            }
            None => {
                debug!("map projection unavailable, skipping proximity merge");
                groups
            }
        },
        _ => groups,
    }
}

fn normalized_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Partition songs by place name, then split same-name buckets whose songs
/// are geographically apart.
fn group_by_location(songs: &[Song], config: &GroupingConfig) -> Vec<MarkerGroup> {
    // First-seen bucket order keeps output deterministic in input order
    let mut order: Vec<String> = Vec::new();
    let mut buckets: HashMap<String, Vec<&Song>> = HashMap::new();

    for song in songs {
        let key = normalized_name(&song.location_name);
        if !buckets.contains_key(&key) {
            order.push(key.clone());
        }
        buckets.entry(key).or_default().push(song);
    }

    let mut groups = Vec::new();
    for key in &order {
        for cluster in split_by_distance(&buckets[key], config.same_place_threshold_km) {
            if cluster.len() == 1 {
                groups.push(MarkerGroup::single(cluster[0].clone()));
            } else {
                let name = cluster[0].location_name.trim().to_string();
                let members: Vec<Song> = cluster.into_iter().cloned().collect();
                groups.push(MarkerGroup::from_members(
                    members,
                    GroupKind::Location,
                    Some(name),
                ));
            }
        }
    }

    groups
}

/// Greedy seed-based sub-clustering within a same-name bucket.
///
/// The first unassigned song seeds a cluster and absorbs every later song
/// within the threshold of the seed; repeat until all songs are assigned.
/// Splits apart distinct places that happen to share a name.
fn split_by_distance<'a>(songs: &[&'a Song], threshold_km: f64) -> Vec<Vec<&'a Song>> {
    let mut assigned = vec![false; songs.len()];
    let mut clusters = Vec::new();

    for i in 0..songs.len() {
        if assigned[i] {
            continue;
        }
        assigned[i] = true;
        let seed = songs[i].position();
        let mut cluster = vec![songs[i]];

        for j in (i + 1)..songs.len() {
            if !assigned[j] && distance_km(&seed, &songs[j].position()) <= threshold_km {
                assigned[j] = true;
                cluster.push(songs[j]);
            }
        }

        clusters.push(cluster);
    }

    clusters
}

/// Union groups whose projected centroids are within the pixel threshold.
///
/// Groups whose centroid fails to project are left out of merging for this
/// pass. Merged groups become [`GroupKind::Proximity`] and inherit a name
/// only when every constituent carries the exact same one.
fn merge_by_pixel_distance(
    groups: Vec<MarkerGroup>,
    projection: &dyn MapProjection,
    threshold_px: f64,
) -> Vec<MarkerGroup> {
    let pixels: Vec<Option<PixelPoint>> = groups
        .iter()
        .map(|g| projection.project(g.latitude, g.longitude))
        .collect();

    let mut parent: Vec<usize> = (0..groups.len()).collect();
    for i in 0..groups.len() {
        for j in (i + 1)..groups.len() {
            if let (Some(a), Some(b)) = (&pixels[i], &pixels[j]) {
                if a.distance_to(b) <= threshold_px {
                    union(&mut parent, i, j);
                }
            }
        }
    }

    // Collect members per root, preserving first-member order
    let mut root_order: Vec<usize> = Vec::new();
    let mut members: HashMap<usize, Vec<usize>> = HashMap::new();
    for i in 0..groups.len() {
        let root = find(&mut parent, i);
        if !members.contains_key(&root) {
            root_order.push(root);
        }
        members.entry(root).or_default().push(i);
    }

    let mut slots: Vec<Option<MarkerGroup>> = groups.into_iter().map(Some).collect();
    let mut merged = Vec::with_capacity(root_order.len());

    for root in root_order {
        let indices = &members[&root];
        if indices.len() == 1 {
            merged.extend(slots[indices[0]].take());
            continue;
        }

        let parts: Vec<MarkerGroup> = indices.iter().filter_map(|&i| slots[i].take()).collect();
        let shared_name = parts[0]
            .location_name
            .clone()
            .filter(|name| parts.iter().all(|p| p.location_name.as_ref() == Some(name)));
        let songs: Vec<Song> = parts.into_iter().flat_map(|g| g.songs).collect();

        merged.push(MarkerGroup::from_members(
            songs,
            GroupKind::Proximity,
            shared_name,
        ));
    }

    merged
}

fn find(parent: &mut Vec<usize>, i: usize) -> usize {
    if parent[i] != i {
        let root = find(parent, parent[i]);
        parent[i] = root;
    }
    parent[i]
}

fn union(parent: &mut Vec<usize>, a: usize, b: usize) {
    let root_a = find(parent, a);
    let root_b = find(parent, b);
    if root_a != root_b {
        parent[root_b] = root_a;
    }
}

// ============================================================================
// Name Resolution
// ============================================================================

/// Overlay of resolved display names, keyed by reverse-geocode cache key.
pub type NameOverlay = HashMap<String, String>;

/// Callback invoked as each name resolves: (cache key, name).
pub type NameResolvedCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Whether a group's display name should be resolved for the current zoom.
///
/// Multi-song proximity groups need a name when merging did not inherit
/// one. Multi-song location groups need one when the zoom maps to a coarse
/// place level, where the stored venue name would be overly specific.
/// Single-song groups always display the song's own location name.
pub fn needs_name_resolution(group: &MarkerGroup, zoom: f64) -> bool {
    if !group.is_multi() {
        return false;
    }
    match group.kind {
        GroupKind::Proximity => group.location_name.is_none(),
        GroupKind::Location => PlaceLevel::for_zoom(zoom) != PlaceLevel::Neighborhood,
        GroupKind::Single => false,
    }
}

/// Resolve display names for every group that needs one, sequentially.
///
/// Returns an overlay keyed by [`cache_key`] of each group's centroid at
/// the current zoom. The `cancelled` flag is checked before each lookup and
/// again before committing its result, so a superseded pass stops promptly
/// and commits nothing further; a cancelled pass's partial overlay is the
/// caller's to discard. `on_resolved` surfaces names incrementally as they
/// arrive.
///
/// Lookup failures are silent (the group keeps its current label), so this
/// pass never fails.
pub async fn resolve_group_names<G: ReverseGeocoder>(
    groups: &[MarkerGroup],
    zoom: f64,
    cache: &ReverseGeocodeCache<G>,
    cancelled: &AtomicBool,
    on_resolved: Option<NameResolvedCallback>,
) -> NameOverlay {
    let mut overlay = NameOverlay::new();

    for group in groups.iter().filter(|g| needs_name_resolution(g, zoom)) {
        if cancelled.load(Ordering::Acquire) {
            break;
        }

        let key = cache_key(group.latitude, group.longitude, zoom);
        if overlay.contains_key(&key) {
            continue;
        }

        let name = cache.resolve(group.latitude, group.longitude, zoom).await;

        if cancelled.load(Ordering::Acquire) {
            break;
        }
        if let Some(name) = name {
            if let Some(cb) = &on_resolved {
                cb(&key, &name);
            }
            overlay.insert(key, name);
        }
    }

    overlay
}

/// Apply a name overlay on top of a raw group list.
///
/// Groups that need resolution and have an entry in the overlay get the
/// resolved name; everything else passes through unchanged.
pub fn apply_name_overlay(
    groups: &[MarkerGroup],
    overlay: &NameOverlay,
    zoom: f64,
) -> Vec<MarkerGroup> {
    groups
        .iter()
        .map(|group| {
            if needs_name_resolution(group, zoom) {
                if let Some(name) = overlay.get(&cache_key(group.latitude, group.longitude, zoom)) {
                    let mut resolved = group.clone();
                    resolved.location_name = Some(name.clone());
                    return resolved;
                }
            }
            group.clone()
        })
        .collect()
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GeocodeError;
    use async_trait::async_trait;

    /// Linear degrees-to-pixels projection for tests.
    struct ScaleProjection {
        px_per_degree: f64,
    }

    impl MapProjection for ScaleProjection {
        fn project(&self, latitude: f64, longitude: f64) -> Option<PixelPoint> {
            Some(PixelPoint {
                x: longitude * self.px_per_degree,
                y: -latitude * self.px_per_degree,
            })
        }
    }

    struct NamedGeocoder(&'static str);

    #[async_trait]
    impl ReverseGeocoder for NamedGeocoder {
        async fn reverse(
            &self,
            _latitude: f64,
            _longitude: f64,
            _level: PlaceLevel,
        ) -> Result<Option<String>, GeocodeError> {
            Ok(Some(self.0.to_string()))
        }
    }

    fn park_songs() -> Vec<Song> {
        vec![
            Song::new("a", "Song A", "Artist", 0.0, 0.0, "Park"),
            Song::new("b", "Song B", "Artist", 0.0, 0.001, "Park"),
            Song::new("c", "Song C", "Artist", 50.0, 50.0, "Park"),
        ]
    }

    fn no_projection() -> Viewport<'static> {
        Viewport {
            zoom: 12.0,
            projection: None,
        }
    }

    #[test]
    fn test_off_mode_yields_singles() {
        let songs = park_songs();
        let groups = compute_groups(
            &songs,
            GroupingMode::Off,
            &no_projection(),
            &GroupingConfig::default(),
        );

        assert_eq!(groups.len(), 3);
        assert!(groups.iter().all(|g| g.kind == GroupKind::Single));
        assert_eq!(groups[0].location_name.as_deref(), Some("Park"));
    }

    #[test]
    fn test_empty_input() {
        let groups = compute_groups(
            &[],
            GroupingMode::Cluster,
            &no_projection(),
            &GroupingConfig::default(),
        );
        assert!(groups.is_empty());
    }

    #[test]
    fn test_location_grouping_splits_distant_same_name() {
        // A and B share "Park" and are ~110m apart; C shares the name but
        // is half a world away, so it must not join them.
        let songs = park_songs();
        let groups = compute_groups(
            &songs,
            GroupingMode::Location,
            &no_projection(),
            &GroupingConfig::default(),
        );

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].kind, GroupKind::Location);
        assert_eq!(groups[0].songs.len(), 2);
        assert_eq!(groups[0].id, "a-b");
        assert_eq!(groups[1].kind, GroupKind::Single);
        assert_eq!(groups[1].songs[0].id, "c");
    }

    #[test]
    fn test_location_grouping_is_case_insensitive() {
        let songs = vec![
            Song::new("a", "A", "x", 51.5, -0.12, "Abbey Road"),
            Song::new("b", "B", "y", 51.5, -0.12, "  abbey road "),
        ];
        let groups = compute_groups(
            &songs,
            GroupingMode::Location,
            &no_projection(),
            &GroupingConfig::default(),
        );

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].kind, GroupKind::Location);
        // Display name comes from the first member, trimmed
        assert_eq!(groups[0].location_name.as_deref(), Some("Abbey Road"));
    }

    #[test]
    fn test_location_group_centroid() {
        let songs = vec![
            Song::new("a", "A", "x", 10.0, 20.0, "Venue"),
            Song::new("b", "B", "y", 12.0, 22.0, "Venue"),
        ];
        // 300+ km apart: raise the threshold so they still group
        let config = GroupingConfig {
            same_place_threshold_km: 1000.0,
            ..GroupingConfig::default()
        };
        let groups = compute_groups(&songs, GroupingMode::Location, &no_projection(), &config);

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].latitude, 11.0);
        assert_eq!(groups[0].longitude, 21.0);
    }

    #[test]
    fn test_proximity_merge_combines_nearby_groups() {
        // Two different venue names ~0.003 degrees apart: 3px at this
        // projection scale, well within the 60px threshold
        let songs = vec![
            Song::new("a", "A", "x", 51.5007, -0.1246, "Big Ben"),
            Song::new("b", "B", "y", 51.4994, -0.1273, "Westminster Abbey"),
            Song::new("c", "C", "z", 48.8606, 2.3376, "Louvre"),
        ];
        let projection = ScaleProjection { px_per_degree: 1000.0 };
        let viewport = Viewport {
            zoom: 12.0,
            projection: Some(&projection),
        };

        let groups = compute_groups(
            &songs,
            GroupingMode::LocationProximity,
            &viewport,
            &GroupingConfig::default(),
        );

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].kind, GroupKind::Proximity);
        assert_eq!(groups[0].songs.len(), 2);
        assert_eq!(groups[0].id, "a-b");
        // Differing names: no inherited display name
        assert_eq!(groups[0].location_name, None);
        assert_eq!(groups[1].songs[0].id, "c");
    }

    #[test]
    fn test_proximity_merge_inherits_shared_name() {
        // Same name but >500m apart: location grouping splits them into two
        // groups, then proximity merging reunites them on screen; the name
        // survives because every constituent agrees.
        let songs = vec![
            Song::new("a", "A", "x", 51.50, -0.12, "Hyde Park"),
            Song::new("b", "B", "y", 51.51, -0.12, "Hyde Park"),
        ];
        let projection = ScaleProjection { px_per_degree: 1000.0 };
        let viewport = Viewport {
            zoom: 12.0,
            projection: Some(&projection),
        };

        let groups = compute_groups(
            &songs,
            GroupingMode::LocationProximity,
            &viewport,
            &GroupingConfig::default(),
        );

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].kind, GroupKind::Proximity);
        assert_eq!(groups[0].location_name.as_deref(), Some("Hyde Park"));
    }

    #[test]
    fn test_missing_projection_skips_proximity_merge() {
        let songs = vec![
            Song::new("a", "A", "x", 51.5007, -0.1246, "Big Ben"),
            Song::new("b", "B", "y", 51.4994, -0.1273, "Westminster Abbey"),
        ];

        let groups = compute_groups(
            &songs,
            GroupingMode::LocationProximity,
            &no_projection(),
            &GroupingConfig::default(),
        );

        // Left as two singles; merging happens on a later pass once the
        // projection mounts
        assert_eq!(groups.len(), 2);
        assert!(groups.iter().all(|g| g.kind == GroupKind::Single));
    }

    #[test]
    fn test_cluster_threshold_decays_with_zoom() {
        let config = GroupingConfig::default();

        // Zoomed out: full base radius
        assert_eq!(config.pixel_threshold(GroupingMode::Cluster, 0.0), 120.0);

        // Decay applies until the floor takes over
        let at_zoom_3 = config.pixel_threshold(GroupingMode::Cluster, 3.0);
        assert!(at_zoom_3 < 120.0 && at_zoom_3 > 60.0);
        assert_eq!(config.pixel_threshold(GroupingMode::Cluster, 15.0), 60.0);

        // Fixed threshold for plain proximity mode
        assert_eq!(
            config.pixel_threshold(GroupingMode::LocationProximity, 15.0),
            60.0
        );
    }

    #[test]
    fn test_recompute_is_idempotent() {
        let songs = park_songs();
        let projection = ScaleProjection { px_per_degree: 500.0 };
        let viewport = Viewport {
            zoom: 10.0,
            projection: Some(&projection),
        };
        let config = GroupingConfig::default();

        let first = compute_groups(&songs, GroupingMode::Cluster, &viewport, &config);
        let second = compute_groups(&songs, GroupingMode::Cluster, &viewport, &config);

        let ids: Vec<&str> = first.iter().map(|g| g.id.as_str()).collect();
        let ids_again: Vec<&str> = second.iter().map(|g| g.id.as_str()).collect();
        assert_eq!(ids, ids_again);
        assert_eq!(first, second);
    }

    #[test]
    fn test_group_id_ignores_input_order() {
        let mut songs = vec![
            Song::new("b", "B", "y", 0.0, 0.0, "Park"),
            Song::new("a", "A", "x", 0.0, 0.001, "Park"),
        ];
        let config = GroupingConfig::default();
        let first = compute_groups(&songs, GroupingMode::Location, &no_projection(), &config);

        songs.reverse();
        let second = compute_groups(&songs, GroupingMode::Location, &no_projection(), &config);

        assert_eq!(first[0].id, "a-b");
        assert_eq!(second[0].id, "a-b");
    }

    #[test]
    fn test_needs_name_resolution() {
        let songs = vec![
            Song::new("a", "A", "x", 0.0, 0.0, "Park"),
            Song::new("b", "B", "y", 0.0, 0.001, "Park"),
        ];
        let groups = compute_groups(
            &songs,
            GroupingMode::Location,
            &no_projection(),
            &GroupingConfig::default(),
        );
        let group = &groups[0];
        assert_eq!(group.kind, GroupKind::Location);

        // Coarse zoom: the venue name is too specific to display
        assert!(needs_name_resolution(group, 4.0));
        assert!(needs_name_resolution(group, 10.0));
        // Neighborhood zoom: the venue name is already right
        assert!(!needs_name_resolution(group, 13.0));

        // Singles never resolve
        let single = MarkerGroup::single(Song::new("c", "C", "z", 1.0, 1.0, "Cafe"));
        assert!(!needs_name_resolution(&single, 4.0));
    }

    #[tokio::test]
    async fn test_resolve_group_names_builds_overlay() {
        let songs = vec![
            Song::new("a", "A", "x", 0.0, 0.0, "Park"),
            Song::new("b", "B", "y", 0.0, 0.001, "Park"),
        ];
        let groups = compute_groups(
            &songs,
            GroupingMode::Location,
            &no_projection(),
            &GroupingConfig::default(),
        );
        let cache = ReverseGeocodeCache::new(NamedGeocoder("Null Island"));
        let cancelled = AtomicBool::new(false);

        let zoom = 6.0;
        let overlay = resolve_group_names(&groups, zoom, &cache, &cancelled, None).await;

        assert_eq!(overlay.len(), 1);
        let key = cache_key(groups[0].latitude, groups[0].longitude, zoom);
        assert_eq!(overlay.get(&key).map(String::as_str), Some("Null Island"));

        let applied = apply_name_overlay(&groups, &overlay, zoom);
        assert_eq!(applied[0].location_name.as_deref(), Some("Null Island"));
    }

    #[tokio::test]
    async fn test_resolution_respects_cancellation() {
        let songs = vec![
            Song::new("a", "A", "x", 0.0, 0.0, "Park"),
            Song::new("b", "B", "y", 0.0, 0.001, "Park"),
        ];
        let groups = compute_groups(
            &songs,
            GroupingMode::Location,
            &no_projection(),
            &GroupingConfig::default(),
        );
        let cache = ReverseGeocodeCache::new(NamedGeocoder("Null Island"));

        let cancelled = AtomicBool::new(true);
        let overlay = resolve_group_names(&groups, 6.0, &cache, &cancelled, None).await;

        assert!(overlay.is_empty());
        // Cancelled before the first lookup: nothing was resolved at all
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_overlay_leaves_unresolved_groups_untouched() {
        let songs = vec![
            Song::new("a", "A", "x", 0.0, 0.0, "Park"),
            Song::new("b", "B", "y", 0.0, 0.001, "Park"),
        ];
        let groups = compute_groups(
            &songs,
            GroupingMode::Location,
            &no_projection(),
            &GroupingConfig::default(),
        );

        let applied = apply_name_overlay(&groups, &NameOverlay::new(), 6.0);
        // No overlay entry: the locally known name stays
        assert_eq!(applied[0].location_name.as_deref(), Some("Park"));
    }
}
