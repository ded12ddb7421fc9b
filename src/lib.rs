#![deny(unreachable_pub)]

// Core modules
mod errors;
mod types;

// Feature modules
pub mod calibrator;

// Re-exports
pub use calibrator::{
    CalibrationController, CalibrationEvent, CalibrationParameterSet, CalibrationReport,
    CalibratorConfig, ControllerState, CoordinateFrame, EntityTracker, GradientHeuristic,
    IndexedEdge, ParamBounds, ParamKey, ReportSink, RoutingOracle, RunStatus, SimulationEngine,
    SpatialMatcher, SpeedDeltaTable, TelemetryAggregator, TelemetryStore, TwinCalibrator,
    ValidationMetrics,
};
pub use errors::{
    DataUnavailable, EngineError, PersistenceError, RouteMappingFailure, TelemetryError,
};
pub use types::{
    CompletedTrip, EdgeId, EdgePath, EdgeSnapshot, EntityId, GeoPoint, ProbeRoute,
    RealWorldSample, RouteId, SampleScope,
};
