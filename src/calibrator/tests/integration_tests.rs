//! Integration tests for the full calibration pipeline.
//!
//! Each test wires a `TwinCalibrator` to the mock collaborators and drives
//! it through whole runs:
//! - route setup against the mock oracle
//! - trip tracking feeding per-route validation metrics
//! - trigger-tick calibration cycles converging sim speed toward real
//! - stop/fatal paths and fire-and-forget persistence

use crate::calibrator::config::{CalibratorConfig, CoordinateFrame, MatcherConfig};
use crate::calibrator::mock::{MemorySink, MockEngine, MockOracle, MockTelemetry};
use crate::calibrator::matching::IndexedEdge;
use crate::calibrator::params::CalibrationParameterSet;
use crate::calibrator::report::RunStatus;
use crate::calibrator::runtime::TwinCalibrator;
use crate::calibrator::ControllerState;
use crate::types::{GeoPoint, ProbeRoute, SampleScope};

fn planar_config() -> CalibratorConfig {
    CalibratorConfig {
        matcher: MatcherConfig {
            frame: CoordinateFrame::Planar,
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Two-edge corridor: entities on it match the single probe route.
fn corridor_index() -> Vec<IndexedEdge> {
    vec![
        IndexedEdge {
            id: "e-in".into(),
            position: GeoPoint::new(0.0, 0.0),
        },
        IndexedEdge {
            id: "e-out".into(),
            position: GeoPoint::new(400.0, 0.0),
        },
    ]
}

fn corridor_route() -> ProbeRoute {
    ProbeRoute::new("r-corridor", GeoPoint::new(10.0, 0.0), GeoPoint::new(390.0, 0.0))
}

fn corridor_engine(sim_speed: f64) -> MockEngine {
    let mut engine = MockEngine::new();
    engine.set_edge("e-in", sim_speed, 0.4, 8);
    engine.set_edge("e-out", sim_speed, 0.4, 8);
    engine
}

#[test]
fn test_full_run_produces_report_metrics_and_trips() {
    let mut telemetry = MockTelemetry::new();
    telemetry.add_route_samples("r-corridor", 32.0, 45.0, 10);

    let mut engine = corridor_engine(25.0);
    engine.spawn_entity("veh-1", &["e-in", "e-out"]);

    let mut run = TwinCalibrator::new(
        "run-1",
        planar_config(),
        corridor_index(),
        SampleScope::Route("r-corridor".into()),
        CalibrationParameterSet::default(),
        engine,
        telemetry,
        MemorySink::new(),
    );
    assert_eq!(run.map_probe_routes(&[corridor_route()], &MockOracle::new()), 1);

    for tick in 1..=600u64 {
        run.on_tick(tick);
    }

    assert_eq!(run.state(), ControllerState::Calibrating);
    assert_eq!(run.controller().events().len(), 2);

    let report = run.finalize();
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.num_updates, 2);
    assert_eq!(report.error_history.len(), 2);
    assert!(report.improvement.is_some());
    // |25 − 32| / 32 × 100 ≈ 21.9 on the first cycle.
    assert!((report.initial_error_pct.unwrap() - 21.875).abs() < 1e-6);
}

#[test]
fn test_completed_trip_flows_into_validation_metrics_and_sink() {
    let mut telemetry = MockTelemetry::new();
    telemetry.add_route_samples("r-corridor", 32.0, 45.0, 10);

    let mut engine = corridor_engine(25.0);
    engine.spawn_entity("veh-1", &["e-in", "e-out"]);

    let mut run = TwinCalibrator::new(
        "run-2",
        planar_config(),
        corridor_index(),
        SampleScope::Route("r-corridor".into()),
        CalibrationParameterSet::default(),
        engine,
        telemetry,
        MemorySink::new(),
    );
    run.map_probe_routes(&[corridor_route()], &MockOracle::new());

    // Vehicle gets matched on the first tick, then vanishes.
    run.on_tick(1);
    assert_eq!(run.tracker().active_count(), 1);
    run.engine_mut().remove_entity("veh-1");

    // Trip completes at tick 2; the tick-300 trigger pulls the real
    // route samples into the aggregator.
    for tick in 2..=300u64 {
        run.on_tick(tick);
    }
    assert_eq!(run.tracker().completed_count(), 1);
    assert_eq!(run.sink().trips.len(), 1);
    assert_eq!(run.sink().trips[0].travel_time_ticks, 1);

    let metrics = run.aggregator().validation_metrics().unwrap();
    assert_eq!(metrics.n_routes, 1);
    assert!((metrics.routes[0].real_avg_s - 45.0).abs() < 1e-9);
    assert!((metrics.routes[0].sim_avg_s - 1.0).abs() < 1e-9);
    assert!((metrics.mae_s - 44.0).abs() < 1e-9);
}

#[test]
fn test_fatal_stop_is_reported_and_persisted() {
    let mut engine = corridor_engine(25.0);
    engine.set_unreachable(true);

    let mut run = TwinCalibrator::new(
        "run-3",
        planar_config(),
        corridor_index(),
        SampleScope::Any,
        CalibrationParameterSet::default(),
        engine,
        MockTelemetry::new(),
        MemorySink::new(),
    );

    for tick in 1..=1200u64 {
        run.on_tick(tick);
    }
    assert_eq!(run.state(), ControllerState::Stopped);

    let report = run.finalize();
    assert_eq!(report.status, RunStatus::StoppedFatal("engine unreachable".into()));
    assert_eq!(report.num_updates, 0);
    assert!(report.improvement_pct.is_none());
}

#[test]
fn test_user_stop_mid_run() {
    let mut telemetry = MockTelemetry::new();
    telemetry.add_area_samples("city", 40.0, 5);

    let mut run = TwinCalibrator::new(
        "run-4",
        planar_config(),
        corridor_index(),
        SampleScope::Area("city".into()),
        CalibrationParameterSet::default(),
        corridor_engine(30.0),
        telemetry,
        MemorySink::new(),
    );

    for tick in 1..=450u64 {
        run.on_tick(tick);
    }
    run.request_stop();
    for tick in 451..=900u64 {
        run.on_tick(tick);
    }

    // One cycle at tick 300; the stop lands before tick 600 triggers.
    assert_eq!(run.controller().events().len(), 1);
    let report = run.finalize();
    assert_eq!(report.status, RunStatus::StoppedByUser);
    assert_eq!(report.num_updates, 1);
}

#[test]
fn test_persistence_failure_never_aborts_the_run() {
    let mut telemetry = MockTelemetry::new();
    telemetry.add_area_samples("city", 40.0, 5);
    let mut sink = MemorySink::new();
    sink.set_failing(true);

    let mut run = TwinCalibrator::new(
        "run-5",
        planar_config(),
        corridor_index(),
        SampleScope::Area("city".into()),
        CalibrationParameterSet::default(),
        corridor_engine(30.0),
        telemetry,
        sink,
    );

    for tick in 1..=600u64 {
        run.on_tick(tick);
    }
    // finalize logs the sink failure and still returns the report.
    let report = run.finalize();
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.num_updates, 2);
}

#[test]
fn test_unmappable_route_is_excluded_not_fatal() {
    let mut oracle = MockOracle::new();
    oracle.set_no_path(true);

    let mut run = TwinCalibrator::new(
        "run-6",
        planar_config(),
        corridor_index(),
        SampleScope::Any,
        CalibrationParameterSet::default(),
        corridor_engine(30.0),
        MockTelemetry::new(),
        MemorySink::new(),
    );
    assert_eq!(run.map_probe_routes(&[corridor_route()], &oracle), 0);

    // The run still proceeds; there is just nothing to track.
    for tick in 1..=300u64 {
        run.on_tick(tick);
    }
    assert_eq!(run.tracker().active_count(), 0);
    assert_eq!(run.controller().events().len(), 1);
}
