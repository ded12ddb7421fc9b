//! Watches simulated entities across ticks and attributes them to probe
//! routes.
//!
//! Lifecycle per tracked entity: active → completed when the entity
//! vanishes from the engine (travel time = current tick − start tick), or
//! active → orphaned when the engine errors mid-query (discarded silently,
//! non-fatal; only a counter remains). An entity is attributed to at most
//! one route, first match wins; a route frees up again once its entity
//! completes or orphans, so a single route accumulates trips over the run.

use std::collections::{HashMap, HashSet};

use tracing::{debug, trace};

use crate::types::{CompletedTrip, EntityId, RouteId};

use super::interface::SimulationEngine;
use super::matching::SpatialMatcher;

#[derive(Debug, Clone)]
struct TrackedEntity {
    route: RouteId,
    start_tick: u64,
}

/// Tick-driven tracker over the engine's active entity set.
#[derive(Debug, Default)]
pub struct EntityTracker {
    tracked: HashMap<EntityId, TrackedEntity>,
    /// Routes currently claimed by a tracked entity.
    claimed_routes: HashSet<RouteId>,
    /// Entities dropped because the engine errored mid-query.
    orphaned_count: u64,
    /// Trips completed over the run's lifetime.
    completed_count: u64,
}

impl EntityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drive one tick: complete vanished entities, then try to attribute
    /// new entities to unclaimed routes. Returns the trips completed this
    /// tick.
    pub fn on_tick<E: SimulationEngine>(
        &mut self,
        tick: u64,
        engine: &E,
        matcher: &SpatialMatcher,
    ) -> Vec<CompletedTrip> {
        let active: HashSet<EntityId> = match engine.list_active_entity_ids() {
            Ok(ids) => ids.into_iter().collect(),
            // No entity list this tick: nothing can complete or match.
            Err(_) => return Vec::new(),
        };

        let trips = self.complete_vanished(tick, &active);
        self.match_new_entities(tick, &active, engine, matcher);
        trips
    }

    fn complete_vanished(&mut self, tick: u64, active: &HashSet<EntityId>) -> Vec<CompletedTrip> {
        let vanished: Vec<EntityId> = self
            .tracked
            .keys()
            .filter(|id| !active.contains(*id))
            .cloned()
            .collect();

        let mut trips = Vec::with_capacity(vanished.len());
        for id in vanished {
            let tracked = self.tracked.remove(&id).expect("vanished id was tracked");
            self.claimed_routes.remove(&tracked.route);
            self.completed_count += 1;
            let trip = CompletedTrip {
                entity: id,
                route: tracked.route,
                start_tick: tracked.start_tick,
                end_tick: tick,
                travel_time_ticks: tick.saturating_sub(tracked.start_tick),
            };
            debug!(
                entity = %trip.entity,
                route = %trip.route,
                travel_time = trip.travel_time_ticks,
                "probe trip completed"
            );
            trips.push(trip);
        }
        trips
    }

    fn match_new_entities<E: SimulationEngine>(
        &mut self,
        tick: u64,
        active: &HashSet<EntityId>,
        engine: &E,
        matcher: &SpatialMatcher,
    ) {
        let threshold = matcher.config().overlap_threshold;
        for entity in active {
            if self.tracked.contains_key(entity) {
                continue;
            }
            let edges: HashSet<_> = match engine.entity_current_edges(entity) {
                Ok(edges) => edges.into_iter().collect(),
                Err(_) => {
                    // Engine error mid-query: orphan silently.
                    self.orphaned_count += 1;
                    trace!(entity = %entity, "entity orphaned on edge query");
                    continue;
                }
            };

            // First match wins; one entity maps to at most one route.
            let matched = matcher
                .mapped_routes()
                .filter(|route| !self.claimed_routes.contains(*route))
                .find(|route| {
                    let path = matcher.path_for(route).expect("mapped route has path");
                    SpatialMatcher::entity_matches_route(&edges, &path.edges, threshold)
                })
                .cloned();

            if let Some(route) = matched {
                debug!(entity = %entity, route = %route, tick, "entity attributed to probe route");
                self.claimed_routes.insert(route.clone());
                self.tracked.insert(
                    entity.clone(),
                    TrackedEntity {
                        route,
                        start_tick: tick,
                    },
                );
            }
        }
    }

    /// Number of entities currently tracked.
    pub fn active_count(&self) -> usize {
        self.tracked.len()
    }

    /// Entities discarded due to mid-query engine errors.
    pub fn orphaned_count(&self) -> u64 {
        self.orphaned_count
    }

    /// Trips completed over the run's lifetime.
    pub fn completed_count(&self) -> u64 {
        self.completed_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibrator::config::{CoordinateFrame, MatcherConfig};
    use crate::calibrator::mock::MockEngine;
    use crate::calibrator::matching::IndexedEdge;
    use crate::types::{EdgePath, GeoPoint};

    fn matcher_with_route(route: &str, edges: &[&str]) -> SpatialMatcher {
        let index = edges
            .iter()
            .enumerate()
            .map(|(i, id)| IndexedEdge {
                id: (*id).into(),
                position: GeoPoint::new(i as f64 * 100.0, 0.0),
            })
            .collect();
        let mut matcher = SpatialMatcher::new(
            MatcherConfig {
                frame: CoordinateFrame::Planar,
                ..Default::default()
            },
            index,
        );
        let path = EdgePath::new(edges.iter().map(|e| (*e).into()).collect(), 400.0);
        matcher.insert_path_for_test(route.into(), path);
        matcher
    }

    #[test]
    fn test_entity_matched_then_completed() {
        let matcher = matcher_with_route("r1", &["A", "B", "C", "D"]);
        let mut engine = MockEngine::new();
        engine.spawn_entity("v1", &["A", "B", "C"]);

        let mut tracker = EntityTracker::new();
        let trips = tracker.on_tick(10, &engine, &matcher);
        assert!(trips.is_empty());
        assert_eq!(tracker.active_count(), 1);

        // Entity vanishes at tick 70.
        engine.remove_entity("v1");
        let trips = tracker.on_tick(70, &engine, &matcher);
        assert_eq!(trips.len(), 1);
        assert_eq!(trips[0].route, RouteId::new("r1"));
        assert_eq!(trips[0].travel_time_ticks, 60);
        assert_eq!(tracker.active_count(), 0);
        assert_eq!(tracker.completed_count(), 1);
    }

    #[test]
    fn test_first_match_wins_one_route_per_entity_set() {
        let matcher = matcher_with_route("r1", &["A", "B"]);
        let mut engine = MockEngine::new();
        engine.spawn_entity("v1", &["A", "B"]);
        engine.spawn_entity("v2", &["A", "B"]);

        let mut tracker = EntityTracker::new();
        tracker.on_tick(1, &engine, &matcher);
        // Route is claimed by whichever entity matched first; the other
        // stays untracked until the route frees up.
        assert_eq!(tracker.active_count(), 1);
    }

    #[test]
    fn test_route_rearms_after_completion() {
        let matcher = matcher_with_route("r1", &["A", "B"]);
        let mut engine = MockEngine::new();
        engine.spawn_entity("v1", &["A", "B"]);

        let mut tracker = EntityTracker::new();
        tracker.on_tick(1, &engine, &matcher);
        engine.remove_entity("v1");
        tracker.on_tick(50, &engine, &matcher);

        engine.spawn_entity("v2", &["A", "B"]);
        tracker.on_tick(60, &engine, &matcher);
        assert_eq!(tracker.active_count(), 1);

        engine.remove_entity("v2");
        let trips = tracker.on_tick(90, &engine, &matcher);
        assert_eq!(trips[0].entity, EntityId::new("v2"));
        assert_eq!(trips[0].travel_time_ticks, 30);
        assert_eq!(tracker.completed_count(), 2);
    }

    #[test]
    fn test_engine_error_orphans_silently() {
        let matcher = matcher_with_route("r1", &["A", "B"]);
        let mut engine = MockEngine::new();
        engine.spawn_entity("v1", &["A", "B"]);
        engine.fail_entity_queries("v1");

        let mut tracker = EntityTracker::new();
        let trips = tracker.on_tick(1, &engine, &matcher);
        assert!(trips.is_empty());
        assert_eq!(tracker.active_count(), 0);
        assert_eq!(tracker.orphaned_count(), 1);
    }

    #[test]
    fn test_weak_overlap_not_attributed() {
        let matcher = matcher_with_route("r1", &["A", "B", "C", "D"]);
        let mut engine = MockEngine::new();
        // 1 of 4 route edges = 0.25 < 0.7 threshold.
        engine.spawn_entity("v1", &["A", "X", "Y"]);

        let mut tracker = EntityTracker::new();
        tracker.on_tick(1, &engine, &matcher);
        assert_eq!(tracker.active_count(), 0);
    }
}
