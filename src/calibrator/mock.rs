//! Mock collaborators for tests and the demo binary.
//!
//! Deterministic in-memory stand-ins for the engine, routing oracle,
//! telemetry store and persistence sink, with small switches to force each
//! documented failure mode (unreachable engine, failing per-entity apply,
//! failing store, failing sink).

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use chrono::Utc;

use crate::errors::{EngineError, PersistenceError, TelemetryError};
use crate::types::{
    CompletedTrip, EdgeId, EdgePath, EdgeSnapshot, EntityId, RealWorldSample, SampleScope,
};

use super::interface::{ReportSink, RoutingOracle, SimulationEngine, TelemetryStore};
use super::params::CalibrationParameterSet;
use super::report::{CalibrationReport, ValidationMetrics};

#[derive(Debug, Clone, Copy)]
struct EdgeState {
    mean_speed_kmh: f64,
    occupancy: f64,
    vehicle_count: u32,
}

/// In-memory simulation engine.
#[derive(Debug, Default)]
pub struct MockEngine {
    edges: BTreeMap<EdgeId, EdgeState>,
    entities: BTreeMap<EntityId, Vec<EdgeId>>,
    failing_entity_queries: HashSet<EntityId>,
    failing_apply: HashSet<EntityId>,
    unreachable: bool,
    applied: HashMap<EntityId, Vec<CalibrationParameterSet>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_edge(&mut self, id: &str, mean_speed_kmh: f64, occupancy: f64, vehicle_count: u32) {
        self.edges.insert(
            id.into(),
            EdgeState {
                mean_speed_kmh,
                occupancy,
                vehicle_count,
            },
        );
    }

    pub fn spawn_entity(&mut self, id: &str, edges: &[&str]) {
        self.entities
            .insert(id.into(), edges.iter().map(|e| (*e).into()).collect());
    }

    pub fn remove_entity(&mut self, id: &str) {
        self.entities.remove(&EntityId::new(id));
    }

    /// Make `entity_current_edges` fail for this entity.
    pub fn fail_entity_queries(&mut self, id: &str) {
        self.failing_entity_queries.insert(id.into());
    }

    /// Make `apply_parameters` fail softly for this entity.
    pub fn fail_apply_for(&mut self, id: &str) {
        self.failing_apply.insert(id.into());
    }

    /// Toggle whole-engine unreachability.
    pub fn set_unreachable(&mut self, unreachable: bool) {
        self.unreachable = unreachable;
    }

    /// Snapshot set for feeding an aggregator directly.
    pub fn edge_snapshots(&self) -> Vec<EdgeSnapshot> {
        self.edges
            .iter()
            .map(|(id, state)| EdgeSnapshot {
                edge: id.clone(),
                mean_speed_kmh: state.mean_speed_kmh,
                occupancy: state.occupancy,
                vehicle_count: state.vehicle_count,
            })
            .collect()
    }

    pub fn apply_count(&self, id: &str) -> usize {
        self.applied
            .get(&EntityId::new(id))
            .map_or(0, |sets| sets.len())
    }

    pub fn last_applied(&self, id: &str) -> Option<CalibrationParameterSet> {
        self.applied
            .get(&EntityId::new(id))
            .and_then(|sets| sets.last().cloned())
    }

    fn check_reachable(&self) -> Result<(), EngineError> {
        if self.unreachable {
            Err(EngineError::unreachable("mock engine offline"))
        } else {
            Ok(())
        }
    }
}

impl SimulationEngine for MockEngine {
    fn list_edge_ids(&self) -> Result<Vec<EdgeId>, EngineError> {
        self.check_reachable()?;
        Ok(self.edges.keys().cloned().collect())
    }

    fn edge_mean_speed(&self, id: &EdgeId) -> Result<f64, EngineError> {
        self.check_reachable()?;
        self.edges
            .get(id)
            .map(|s| s.mean_speed_kmh)
            .ok_or_else(|| EngineError::UnknownEdge(id.to_string()))
    }

    fn edge_occupancy(&self, id: &EdgeId) -> Result<f64, EngineError> {
        self.check_reachable()?;
        self.edges
            .get(id)
            .map(|s| s.occupancy)
            .ok_or_else(|| EngineError::UnknownEdge(id.to_string()))
    }

    fn edge_vehicle_count(&self, id: &EdgeId) -> Result<u32, EngineError> {
        self.check_reachable()?;
        self.edges
            .get(id)
            .map(|s| s.vehicle_count)
            .ok_or_else(|| EngineError::UnknownEdge(id.to_string()))
    }

    fn list_active_entity_ids(&self) -> Result<Vec<EntityId>, EngineError> {
        self.check_reachable()?;
        Ok(self.entities.keys().cloned().collect())
    }

    fn entity_current_edges(&self, id: &EntityId) -> Result<Vec<EdgeId>, EngineError> {
        self.check_reachable()?;
        if self.failing_entity_queries.contains(id) {
            return Err(EngineError::unknown_entity(id.to_string()));
        }
        self.entities
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::unknown_entity(id.to_string()))
    }

    fn apply_parameters(
        &mut self,
        id: &EntityId,
        params: &CalibrationParameterSet,
    ) -> Result<(), EngineError> {
        self.check_reachable()?;
        if self.failing_apply.contains(id) || !self.entities.contains_key(id) {
            return Err(EngineError::unknown_entity(id.to_string()));
        }
        self.applied.entry(id.clone()).or_default().push(params.clone());
        Ok(())
    }
}

/// Oracle that connects any resolved endpoint pair with a straight
/// two-edge path, unless told otherwise.
#[derive(Debug, Default)]
pub struct MockOracle {
    /// Explicit paths keyed by (origin, dest); consulted first.
    paths: HashMap<(EdgeId, EdgeId), EdgePath>,
    no_path: bool,
    failing: bool,
}

impl MockOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_path(&mut self, origin: &str, dest: &str, path: EdgePath) {
        self.paths.insert((origin.into(), dest.into()), path);
    }

    /// Answer `Ok(None)` for every query.
    pub fn set_no_path(&mut self, no_path: bool) {
        self.no_path = no_path;
    }

    pub fn set_failing(&mut self, failing: bool) {
        self.failing = failing;
    }
}

impl RoutingOracle for MockOracle {
    fn shortest_path(
        &self,
        origin: &EdgeId,
        dest: &EdgeId,
        _timeout: Duration,
    ) -> Result<Option<EdgePath>, String> {
        if self.failing {
            return Err("mock oracle offline".to_string());
        }
        if self.no_path {
            return Ok(None);
        }
        if let Some(path) = self.paths.get(&(origin.clone(), dest.clone())) {
            return Ok(Some(path.clone()));
        }
        Ok(Some(EdgePath::new(
            vec![origin.clone(), dest.clone()],
            1000.0,
        )))
    }
}

/// In-memory telemetry store.
#[derive(Debug, Default)]
pub struct MockTelemetry {
    samples: Vec<RealWorldSample>,
    failing: bool,
}

impl MockTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sample: RealWorldSample) {
        self.samples.push(sample);
    }

    /// Append `n` identical area-scoped samples at the given speed.
    pub fn add_area_samples(&mut self, area: &str, speed_kmh: f64, n: usize) {
        for _ in 0..n {
            self.push(RealWorldSample {
                scope: SampleScope::Area(area.to_string()),
                speed_kmh,
                travel_time_s: 0.0,
                distance_m: 0.0,
                timestamp: Utc::now(),
                source: "mock".to_string(),
            });
        }
    }

    /// Append `n` identical route-scoped samples.
    pub fn add_route_samples(&mut self, route: &str, speed_kmh: f64, travel_time_s: f64, n: usize) {
        for _ in 0..n {
            self.push(RealWorldSample {
                scope: SampleScope::Route(route.into()),
                speed_kmh,
                travel_time_s,
                distance_m: 0.0,
                timestamp: Utc::now(),
                source: "mock".to_string(),
            });
        }
    }

    pub fn set_failing(&mut self, failing: bool) {
        self.failing = failing;
    }
}

impl TelemetryStore for MockTelemetry {
    fn recent_samples(
        &self,
        scope: &SampleScope,
        limit: usize,
        _timeout: Duration,
    ) -> Result<Vec<RealWorldSample>, TelemetryError> {
        if self.failing {
            return Err(TelemetryError::Store("mock store offline".to_string()));
        }
        let matches = self
            .samples
            .iter()
            .rev() // freshest first
            .filter(|s| *scope == SampleScope::Any || s.scope == *scope)
            .take(limit)
            .cloned()
            .collect();
        Ok(matches)
    }
}

/// Sink that records everything it is handed, or fails on demand.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub reports: Vec<(String, CalibrationReport)>,
    pub metrics: Vec<(String, ValidationMetrics)>,
    pub trips: Vec<CompletedTrip>,
    failing: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&mut self, failing: bool) {
        self.failing = failing;
    }

    fn check(&self) -> Result<(), PersistenceError> {
        if self.failing {
            Err(PersistenceError::new("mock sink offline"))
        } else {
            Ok(())
        }
    }
}

impl ReportSink for MemorySink {
    fn store_calibration_report(
        &mut self,
        run_id: &str,
        report: &CalibrationReport,
    ) -> Result<(), PersistenceError> {
        self.check()?;
        self.reports.push((run_id.to_string(), report.clone()));
        Ok(())
    }

    fn store_validation_metrics(
        &mut self,
        run_id: &str,
        metrics: &ValidationMetrics,
    ) -> Result<(), PersistenceError> {
        self.check()?;
        self.metrics.push((run_id.to_string(), metrics.clone()));
        Ok(())
    }

    fn store_completed_trip(&mut self, trip: &CompletedTrip) -> Result<(), PersistenceError> {
        self.check()?;
        self.trips.push(trip.clone());
        Ok(())
    }
}
