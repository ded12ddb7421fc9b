//! Collaborator contracts consumed by the calibration core.
//!
//! The core is a pure in-process control component: everything it talks to
//! (the simulation engine, the routing oracle, the real-world telemetry
//! store, persistence) is owned elsewhere and injected through these traits.
//! That keeps the control logic testable against mocks and snapshots, and
//! removes any process-wide mutable state from the core itself.
//!
//! The two lookups that may block (`recent_samples`, `shortest_path`) carry
//! an explicit timeout argument; implementations must return within it. Both
//! are called only at controller trigger ticks or one-time route setup,
//! never on every tick.

use std::time::Duration;

use crate::errors::{EngineError, PersistenceError, TelemetryError};
use crate::types::{CompletedTrip, EdgeId, EdgePath, EntityId, RealWorldSample, SampleScope};

use super::params::CalibrationParameterSet;
use super::report::{CalibrationReport, ValidationMetrics};

/// Query/command surface of the running microscopic simulation
/// (TraCI-like). All calls are per-tick cheap; `apply_parameters` must fail
/// softly for entity ids the engine no longer knows.
pub trait SimulationEngine {
    fn list_edge_ids(&self) -> Result<Vec<EdgeId>, EngineError>;
    fn edge_mean_speed(&self, id: &EdgeId) -> Result<f64, EngineError>;
    fn edge_occupancy(&self, id: &EdgeId) -> Result<f64, EngineError>;
    fn edge_vehicle_count(&self, id: &EdgeId) -> Result<u32, EngineError>;
    fn list_active_entity_ids(&self) -> Result<Vec<EntityId>, EngineError>;
    fn entity_current_edges(&self, id: &EntityId) -> Result<Vec<EdgeId>, EngineError>;
    fn apply_parameters(
        &mut self,
        id: &EntityId,
        params: &CalibrationParameterSet,
    ) -> Result<(), EngineError>;
}

/// Shortest-path provider over the simulation graph.
pub trait RoutingOracle {
    /// Returns `Ok(None)` when no path connects the two edges. Must return
    /// within `timeout`; a timeout surfaces as `Err`.
    fn shortest_path(
        &self,
        origin: &EdgeId,
        dest: &EdgeId,
        timeout: Duration,
    ) -> Result<Option<EdgePath>, String>;
}

/// Real-world sample lookup, recency-ordered (freshest first).
pub trait TelemetryStore {
    fn recent_samples(
        &self,
        scope: &SampleScope,
        limit: usize,
        timeout: Duration,
    ) -> Result<Vec<RealWorldSample>, TelemetryError>;
}

/// Persistence collaborator. Fire-and-forget: the core logs failures and
/// keeps running.
pub trait ReportSink {
    fn store_calibration_report(
        &mut self,
        run_id: &str,
        report: &CalibrationReport,
    ) -> Result<(), PersistenceError>;

    fn store_validation_metrics(
        &mut self,
        run_id: &str,
        metrics: &ValidationMetrics,
    ) -> Result<(), PersistenceError>;

    fn store_completed_trip(&mut self, trip: &CompletedTrip) -> Result<(), PersistenceError>;
}
