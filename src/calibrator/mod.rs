//! Real-time digital-twin calibration core.
//!
//! A closed-loop controller that keeps a running microscopic traffic
//! simulation's behavioral parameters aligned with real-world telemetry
//! while the simulation executes. Pluggable components, driven
//! cooperatively once per simulation tick:
//!
//! - **SpatialMatcher**: resolves GPS points/routes onto the simulation
//!   graph and tests entity/route overlap
//! - **EntityTracker**: attributes simulated entities to probe routes and
//!   emits completed-trip travel times
//! - **TelemetryAggregator**: reduces per-tick edge state and ingested
//!   real-world samples into comparable statistics and error metrics
//! - **CalibrationController**: the trigger-tick state machine that
//!   measures error and nudges bounded parameters via a heuristic gradient
//! - **TwinCalibrator**: run-level orchestrator wiring the above to the
//!   injected collaborator interfaces

pub mod aggregator;
pub mod config;
pub mod controller;
pub mod interface;
pub mod matching;
pub mod mock;
pub mod params;
pub mod report;
pub mod runtime;
pub mod tracker;

#[cfg(test)]
mod tests;

pub use aggregator::{
    CongestionHistogram, ErrorRing, NetworkComparison, RealSummary, SimSummary,
    TelemetryAggregator,
};
pub use config::{
    AggregatorConfig, CalibratorConfig, ControllerConfig, CoordinateFrame, MatcherConfig,
};
pub use controller::{CalibrationController, CalibrationEvent, ControllerState};
pub use interface::{ReportSink, RoutingOracle, SimulationEngine, TelemetryStore};
pub use matching::{ground_distance_m, IndexedEdge, SpatialMatcher};
pub use params::{
    CalibrationParameterSet, GradientHeuristic, ParamBounds, ParamKey, SpeedDeltaTable,
};
pub use report::{CalibrationReport, RouteComparison, RunStatus, ValidationMetrics};
pub use runtime::TwinCalibrator;
pub use tracker::EntityTracker;
