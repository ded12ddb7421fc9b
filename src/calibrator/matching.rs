//! Spatial matching of GPS points and routes onto the simulation graph.
//!
//! Three jobs:
//! - resolve a ground point to its nearest graph edge within a match radius,
//! - resolve a probe route (origin/destination points) to an edge path via
//!   the routing oracle, caching the result per route id,
//! - test whether a live entity's edge set overlaps a target route's edges.
//!
//! The distance metric is an explicit constructor choice
//! ([`CoordinateFrame`]): haversine metres for geographic graphs, Euclidean
//! for projected ones. Route→path mappings are kept in a table that is
//! replaced wholesale on remap, never mutated field-by-field.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::errors::RouteMappingFailure;
use crate::types::{EdgeId, EdgePath, GeoPoint, ProbeRoute, RouteId};

use super::config::{CoordinateFrame, MatcherConfig};
use super::interface::RoutingOracle;

/// Mean Earth radius in metres (IUGG).
const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Ground distance between two points under the given frame, in metres.
pub fn ground_distance_m(frame: CoordinateFrame, a: GeoPoint, b: GeoPoint) -> f64 {
    match frame {
        CoordinateFrame::Geographic => haversine_m(a, b),
        CoordinateFrame::Planar => ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt(),
    }
}

/// Haversine great-circle distance; `x` = lon°, `y` = lat°.
fn haversine_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lon1) = (a.y.to_radians(), a.x.to_radians());
    let (lat2, lon2) = (b.y.to_radians(), b.x.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// A graph edge's indexed reference position (midpoint or shape-derived).
#[derive(Debug, Clone)]
pub struct IndexedEdge {
    pub id: EdgeId,
    pub position: GeoPoint,
}

/// Resolves points and routes onto the simulation graph.
#[derive(Debug)]
pub struct SpatialMatcher {
    config: MatcherConfig,
    index: Vec<IndexedEdge>,
    /// Route → resolved path. Rebuilt fresh and swapped wholesale by
    /// `map_routes`; never mutated in place.
    paths: HashMap<RouteId, EdgePath>,
}

impl SpatialMatcher {
    pub fn new(config: MatcherConfig, index: Vec<IndexedEdge>) -> Self {
        Self {
            config,
            index,
            paths: HashMap::new(),
        }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Nearest indexed edge within `max_distance_m` of `point`, by linear
    /// scan over edge reference positions. `None` when the closest edge is
    /// farther than the radius.
    pub fn find_nearest_edge(&self, point: GeoPoint, max_distance_m: f64) -> Option<EdgeId> {
        let mut best: Option<(&EdgeId, f64)> = None;
        for entry in &self.index {
            let d = ground_distance_m(self.config.frame, point, entry.position);
            if best.map_or(true, |(_, bd)| d < bd) {
                best = Some((&entry.id, d));
            }
        }
        match best {
            Some((id, d)) if d <= max_distance_m => Some(id.clone()),
            _ => None,
        }
    }

    /// Resolve one probe route to an edge path via the oracle.
    pub fn map_route(
        &self,
        route: &ProbeRoute,
        oracle: &dyn RoutingOracle,
    ) -> Result<EdgePath, RouteMappingFailure> {
        let radius = self.config.max_match_distance_m;
        let origin = self
            .find_nearest_edge(route.origin, radius)
            .ok_or(RouteMappingFailure::EndpointUnreachable)?;
        let dest = self
            .find_nearest_edge(route.destination, radius)
            .ok_or(RouteMappingFailure::EndpointUnreachable)?;

        let path = oracle
            .shortest_path(&origin, &dest, self.config.oracle_timeout)
            .map_err(RouteMappingFailure::Oracle)?
            .ok_or(RouteMappingFailure::NoPath)?;

        debug!(
            route = %route.id,
            origin = %origin,
            dest = %dest,
            edges = path.edges.len(),
            length_m = %format!("{:.0}", path.length_m),
            "probe route mapped"
        );
        Ok(path)
    }

    /// Resolve a whole probe-route set. The route table is rebuilt from
    /// scratch and swapped in at the end; per-route failures are logged and
    /// the route left unmapped (excluded from tracking), non-fatal.
    ///
    /// Returns the routes that failed, with their failure.
    pub fn map_routes(
        &mut self,
        routes: &[ProbeRoute],
        oracle: &dyn RoutingOracle,
    ) -> Vec<(RouteId, RouteMappingFailure)> {
        let mut fresh = HashMap::with_capacity(routes.len());
        let mut failures = Vec::new();
        for route in routes {
            match self.map_route(route, oracle) {
                Ok(path) => {
                    fresh.insert(route.id.clone(), path);
                }
                Err(failure) => {
                    warn!(route = %route.id, %failure, "probe route excluded from tracking");
                    failures.push((route.id.clone(), failure));
                }
            }
        }
        self.paths = fresh;
        failures
    }

    #[cfg(test)]
    pub(crate) fn insert_path_for_test(&mut self, route: RouteId, path: EdgePath) {
        self.paths.insert(route, path);
    }

    /// Resolved path for a route, if mapping succeeded.
    pub fn path_for(&self, route: &RouteId) -> Option<&EdgePath> {
        self.paths.get(route)
    }

    /// Route ids with a resolved path.
    pub fn mapped_routes(&self) -> impl Iterator<Item = &RouteId> {
        self.paths.keys()
    }

    /// Whether an entity's current edge set overlaps a route's edge set
    /// strongly enough to attribute the entity to the route.
    ///
    /// `overlap_ratio = |entity ∩ route| / |route|`; match iff
    /// `overlap_ratio >= threshold` (inclusive).
    pub fn entity_matches_route(
        entity_edges: &HashSet<EdgeId>,
        route_edges: &[EdgeId],
        threshold: f64,
    ) -> bool {
        if route_edges.is_empty() {
            return false;
        }
        let shared = route_edges
            .iter()
            .filter(|edge| entity_edges.contains(*edge))
            .count();
        let overlap_ratio = shared as f64 / route_edges.len() as f64;
        overlap_ratio >= threshold
    }
}
