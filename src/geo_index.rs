//! Location Resolution Module
//!
//! This module resolves a query point (or an explicitly configured code) into
//! the authoritative station or municipality of the agency catalog.

use rstar::RTree;
use rstar::primitives::GeomWithData;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{GeoPoint, LocationEntry, LocationKind};
use crate::{Result, WeatherError};

/// Chord-distance slack inside which R-tree candidates are re-ranked by
/// great-circle distance and catalog position.
const TIE_TOLERANCE: f64 = 1e-12;

/// Nearest-neighbour search over the entries of one catalog
pub trait NearestSearch: Send + Sync {
    /// Position of the nearest entry in the slice the search was built from.
    /// Equidistant entries resolve to the lowest position.
    fn nearest(&self, point: GeoPoint) -> Option<usize>;
}

/// Which [`NearestSearch`] a [`GeoIndex`] is built with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchStrategy {
    /// Haversine distance to every entry
    #[default]
    Linear,
    /// R-tree over unit-sphere coordinates, same answers as `Linear`
    RTree,
}

impl SearchStrategy {
    fn build(self, entries: &[LocationEntry]) -> Box<dyn NearestSearch> {
        match self {
            SearchStrategy::Linear => Box::new(LinearScan::new(entries)),
            SearchStrategy::RTree => Box::new(RTreeSearch::new(entries)),
        }
    }
}

/// Scans every entry
pub struct LinearScan {
    points: Vec<GeoPoint>,
}

impl LinearScan {
    #[must_use]
    pub fn new(entries: &[LocationEntry]) -> Self {
        Self {
            points: entries.iter().map(|entry| entry.point).collect(),
        }
    }
}

impl NearestSearch for LinearScan {
    fn nearest(&self, point: GeoPoint) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (position, candidate) in self.points.iter().enumerate() {
            let distance = point.distance_km(candidate);
            // strict comparison keeps the first entry on ties
            if best.is_none_or(|(_, best_distance)| distance < best_distance) {
                best = Some((position, distance));
            }
        }
        best.map(|(position, _)| position)
    }
}

type SpherePoint = GeomWithData<[f64; 3], usize>;

/// R-tree over unit-sphere cartesian coordinates
pub struct RTreeSearch {
    tree: RTree<SpherePoint>,
    points: Vec<GeoPoint>,
}

impl RTreeSearch {
    #[must_use]
    pub fn new(entries: &[LocationEntry]) -> Self {
        let nodes = entries
            .iter()
            .enumerate()
            .map(|(position, entry)| SpherePoint::new(entry.point.to_unit_sphere(), position))
            .collect();
        Self {
            tree: RTree::bulk_load(nodes),
            points: entries.iter().map(|entry| entry.point).collect(),
        }
    }
}

impl NearestSearch for RTreeSearch {
    fn nearest(&self, point: GeoPoint) -> Option<usize> {
        let query = point.to_unit_sphere();
        let mut neighbours = self.tree.nearest_neighbor_iter_with_distance_2(&query);
        let (first, best_chord) = neighbours.next()?;

        let mut best = (first.data, point.distance_km(&self.points[first.data]));
        for (candidate, chord) in neighbours {
            if chord > best_chord + TIE_TOLERANCE {
                break;
            }
            let position = candidate.data;
            let distance = point.distance_km(&self.points[position]);
            if distance < best.1 || (distance == best.1 && position < best.0) {
                best = (position, distance);
            }
        }
        Some(best.0)
    }
}

/// What a caller asks the index for
#[derive(Debug, Clone, PartialEq)]
pub struct LocationQuery {
    pub point: GeoPoint,
    /// Explicit agency code that bypasses the distance search
    pub code: Option<String>,
    /// Reject nearest matches farther than this
    pub max_distance_km: Option<f64>,
}

impl LocationQuery {
    #[must_use]
    pub fn nearest_to(point: GeoPoint) -> Self {
        Self {
            point,
            code: None,
            max_distance_km: None,
        }
    }
}

/// A resolved catalog entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub entry: LocationEntry,
    /// Great-circle distance from the query point
    pub distance_km: f64,
    /// Whether the entry came from an explicit code
    pub overridden: bool,
}

/// In-memory catalog of one location kind
pub struct GeoIndex {
    kind: LocationKind,
    entries: Vec<LocationEntry>,
    search: Box<dyn NearestSearch>,
}

impl GeoIndex {
    /// Build the index over the entries of `kind`, keeping catalog order
    pub fn build(
        kind: LocationKind,
        catalog: impl IntoIterator<Item = LocationEntry>,
        strategy: SearchStrategy,
    ) -> Result<Self> {
        let entries: Vec<LocationEntry> = catalog
            .into_iter()
            .filter(|entry| entry.kind == kind)
            .collect();
        if entries.is_empty() {
            return Err(WeatherError::EmptyCatalog { kind });
        }

        debug!("Building {:?} {} index over {} entries", strategy, kind, entries.len());
        let search = strategy.build(&entries);
        Ok(Self {
            kind,
            entries,
            search,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Nearest entry to `point` and its distance in km
    #[must_use]
    pub fn nearest(&self, point: GeoPoint) -> Option<(&LocationEntry, f64)> {
        self.search.nearest(point).map(|position| {
            let entry = &self.entries[position];
            (entry, point.distance_km(&entry.point))
        })
    }

    /// Find an entry by agency code
    pub fn lookup(&self, code: &str) -> Result<&LocationEntry> {
        self.entries
            .iter()
            .find(|entry| entry.id == code)
            .ok_or_else(|| WeatherError::UnknownLocationCode {
                kind: self.kind,
                code: code.to_string(),
            })
    }

    /// Resolve a query into a catalog entry
    pub fn resolve(&self, query: &LocationQuery) -> Result<Resolution> {
        debug!(
            "Resolving {} for ({}) with code {:?}",
            self.kind,
            query.point.format_coordinates(),
            query.code
        );

        if let Some(code) = &query.code {
            let entry = self.lookup(code)?;
            return Ok(Resolution {
                entry: entry.clone(),
                distance_km: query.point.distance_km(&entry.point),
                overridden: true,
            });
        }

        let (entry, distance_km) = self
            .nearest(query.point)
            .ok_or(WeatherError::EmptyCatalog { kind: self.kind })?;

        if let Some(limit) = query.max_distance_km
            && distance_km > limit
        {
            return Err(WeatherError::OutOfCoverage {
                kind: self.kind,
                distance_km,
            });
        }

        debug!(
            "Resolved {} {} ({}) at {:.2} km",
            self.kind, entry.id, entry.name, distance_km
        );
        Ok(Resolution {
            entry: entry.clone(),
            distance_km,
            overridden: false,
        })
    }
}

/// Nearest entry of `kind` in `catalog` by linear haversine scan
pub fn resolve(point: GeoPoint, kind: LocationKind, catalog: &[LocationEntry]) -> Result<LocationEntry> {
    let index = GeoIndex::build(kind, catalog.iter().cloned(), SearchStrategy::Linear)?;
    index
        .resolve(&LocationQuery::nearest_to(point))
        .map(|resolution| resolution.entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn station(id: &str, latitude: f64, longitude: f64) -> LocationEntry {
        LocationEntry::new(id, LocationKind::Station, GeoPoint::new(latitude, longitude), id)
    }

    fn municipality(id: &str, latitude: f64, longitude: f64) -> LocationEntry {
        LocationEntry::new(id, LocationKind::Municipality, GeoPoint::new(latitude, longitude), id)
    }

    fn abc_catalog() -> Vec<LocationEntry> {
        vec![station("A", 0.0, 0.0), station("B", 0.0, 1.0), station("C", 1.0, 0.0)]
    }

    #[test]
    fn test_resolves_nearest_station() {
        let entry = resolve(GeoPoint::new(0.1, 0.1), LocationKind::Station, &abc_catalog()).unwrap();
        assert_eq!(entry.id, "A");
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let catalog = abc_catalog();
        let point = GeoPoint::new(0.4, 0.7);
        let first = resolve(point, LocationKind::Station, &catalog).unwrap();
        for _ in 0..10 {
            assert_eq!(resolve(point, LocationKind::Station, &catalog).unwrap(), first);
        }
    }

    #[rstest]
    #[case(SearchStrategy::Linear)]
    #[case(SearchStrategy::RTree)]
    fn test_equidistant_tie_goes_to_catalog_order(#[case] strategy: SearchStrategy) {
        // (0, 0.5) is equidistant from A and B
        let catalog = vec![station("B", 0.0, 1.0), station("A", 0.0, 0.0)];
        let index = GeoIndex::build(LocationKind::Station, catalog, strategy).unwrap();
        let (entry, _) = index.nearest(GeoPoint::new(0.0, 0.5)).unwrap();
        assert_eq!(entry.id, "B");

        let catalog = vec![station("A", 0.0, 0.0), station("B", 0.0, 1.0)];
        let index = GeoIndex::build(LocationKind::Station, catalog, strategy).unwrap();
        let (entry, _) = index.nearest(GeoPoint::new(0.0, 0.5)).unwrap();
        assert_eq!(entry.id, "A");
    }

    #[test]
    fn test_duplicate_coordinates_resolve_to_first() {
        let catalog = vec![
            station("X", 40.0, -3.0),
            station("Y", 40.0, -3.0),
            station("Z", 40.0, -3.0),
        ];
        for strategy in [SearchStrategy::Linear, SearchStrategy::RTree] {
            let index = GeoIndex::build(LocationKind::Station, catalog.clone(), strategy).unwrap();
            let (entry, _) = index.nearest(GeoPoint::new(40.1, -3.1)).unwrap();
            assert_eq!(entry.id, "X");
        }
    }

    #[test]
    fn test_rtree_matches_linear_scan_on_dense_grid() {
        // stations roughly 1 km apart around Madrid
        let mut catalog = Vec::new();
        for i in 0..20 {
            for j in 0..20 {
                let id = format!("S{i:02}{j:02}");
                catalog.push(station(&id, 40.3 + f64::from(i) * 0.009, -3.8 + f64::from(j) * 0.012));
            }
        }
        let linear = GeoIndex::build(LocationKind::Station, catalog.clone(), SearchStrategy::Linear).unwrap();
        let rtree = GeoIndex::build(LocationKind::Station, catalog, SearchStrategy::RTree).unwrap();

        for i in 0..30 {
            for j in 0..30 {
                let point = GeoPoint::new(40.28 + f64::from(i) * 0.0071, -3.82 + f64::from(j) * 0.0093);
                let (a, _) = linear.nearest(point).unwrap();
                let (b, _) = rtree.nearest(point).unwrap();
                assert_eq!(a.id, b.id, "mismatch at {point:?}");
            }
        }
    }

    #[test]
    fn test_kind_filter() {
        let catalog = vec![
            municipality("28079", 0.1, 0.1),
            station("A", 0.0, 0.0),
            municipality("28092", 5.0, 5.0),
        ];
        let entry = resolve(GeoPoint::new(0.1, 0.1), LocationKind::Station, &catalog).unwrap();
        assert_eq!(entry.id, "A");
        let entry = resolve(GeoPoint::new(4.0, 4.0), LocationKind::Municipality, &catalog).unwrap();
        assert_eq!(entry.id, "28092");
    }

    #[test]
    fn test_empty_catalog() {
        let catalog = vec![municipality("28079", 0.0, 0.0)];
        let result = resolve(GeoPoint::new(0.0, 0.0), LocationKind::Station, &catalog);
        assert!(matches!(
            result,
            Err(WeatherError::EmptyCatalog {
                kind: LocationKind::Station
            })
        ));
    }

    #[test]
    fn test_override_bypasses_search() {
        let index = GeoIndex::build(LocationKind::Station, abc_catalog(), SearchStrategy::Linear).unwrap();
        let query = LocationQuery {
            point: GeoPoint::new(0.1, 0.1),
            code: Some("C".into()),
            max_distance_km: Some(1.0),
        };
        let resolution = index.resolve(&query).unwrap();
        assert_eq!(resolution.entry.id, "C");
        assert!(resolution.overridden);
    }

    #[test]
    fn test_unknown_override_code() {
        let index = GeoIndex::build(LocationKind::Station, abc_catalog(), SearchStrategy::Linear).unwrap();
        let query = LocationQuery {
            point: GeoPoint::new(0.1, 0.1),
            code: Some("Q".into()),
            max_distance_km: None,
        };
        let result = index.resolve(&query);
        assert!(matches!(
            result,
            Err(WeatherError::UnknownLocationCode { ref code, .. }) if code == "Q"
        ));
    }

    #[test]
    fn test_out_of_coverage() {
        let index = GeoIndex::build(LocationKind::Station, abc_catalog(), SearchStrategy::Linear).unwrap();
        let query = LocationQuery {
            point: GeoPoint::new(10.0, 10.0),
            code: None,
            max_distance_km: Some(40.0),
        };
        assert!(matches!(
            index.resolve(&query),
            Err(WeatherError::OutOfCoverage { .. })
        ));
    }
}
