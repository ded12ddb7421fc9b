//! Calibration demo and report generator.
//!
//! Runs a self-contained calibration loop against the mock collaborators:
//! a small synthetic network whose edge speeds respond to the pushed
//! `speedFactor`, plus jittered real-world samples around a target speed.
//! Useful for eyeballing controller behavior and report output without a
//! live simulation.
//!
//! Usage:
//!   calibration_report [OPTIONS]
//!
//! Example:
//!   calibration_report --ticks 3600 --real-speed 38 --format both

use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::EnvFilter;

use traffic_twin::calibrator::mock::{MemorySink, MockEngine, MockOracle, MockTelemetry};
use traffic_twin::{
    CalibrationParameterSet, CalibratorConfig, CoordinateFrame, GeoPoint, IndexedEdge, ParamKey,
    ProbeRoute, RealWorldSample, SampleScope, TwinCalibrator,
};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser)]
#[command(name = "calibration_report")]
#[command(version, about = "Run a mock calibration scenario and print the final report")]
struct Cli {
    /// Simulated ticks to run (1 tick = 1 s)
    #[arg(long, default_value = "1800")]
    ticks: u64,

    /// Ticks between calibration triggers
    #[arg(long, default_value = "300")]
    interval: u64,

    /// Uncalibrated free speed of the synthetic network (km/h)
    #[arg(long, default_value = "52.0")]
    sim_speed: f64,

    /// Real-world target speed (km/h)
    #[arg(long, default_value = "36.9")]
    real_speed: f64,

    /// Output format: ascii, json, both
    #[arg(short, long, default_value = "ascii")]
    format: String,

    /// RNG seed for sample jitter
    #[arg(long, default_value = "7")]
    seed: u64,
}

// ============================================================================
// Scenario setup
// ============================================================================

const EDGES: [(&str, f64, f64); 4] = [
    ("corridor-west", 0.0, 0.0),
    ("corridor-east", 600.0, 0.0),
    ("ring-north", 0.0, 600.0),
    ("ring-south", 600.0, 600.0),
];

fn edge_index() -> Vec<IndexedEdge> {
    EDGES
        .iter()
        .map(|(id, x, y)| IndexedEdge {
            id: (*id).into(),
            position: GeoPoint::new(*x, *y),
        })
        .collect()
}

fn build_engine(sim_speed: f64) -> MockEngine {
    let mut engine = MockEngine::new();
    for (id, _, _) in EDGES {
        engine.set_edge(id, sim_speed, 0.3, 6);
    }
    engine.spawn_entity("probe-veh-1", &["corridor-west", "corridor-east"]);
    engine.spawn_entity("probe-veh-2", &["ring-north", "ring-south"]);
    engine
}

fn build_telemetry(real_speed: f64, rng: &mut StdRng) -> MockTelemetry {
    let mut telemetry = MockTelemetry::new();
    for _ in 0..20 {
        telemetry.push(RealWorldSample {
            scope: SampleScope::Area("demo-city".to_string()),
            speed_kmh: real_speed + rng.gen_range(-2.0..2.0),
            travel_time_s: 0.0,
            distance_m: 0.0,
            timestamp: chrono::Utc::now(),
            source: "demo".to_string(),
        });
    }
    telemetry
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut rng = StdRng::seed_from_u64(cli.seed);

    let mut config = CalibratorConfig::default();
    config.controller.update_interval = cli.interval;
    config.matcher.frame = CoordinateFrame::Planar;

    let mut run = TwinCalibrator::new(
        "demo-run",
        config,
        edge_index(),
        SampleScope::Area("demo-city".to_string()),
        CalibrationParameterSet::default(),
        build_engine(cli.sim_speed),
        build_telemetry(cli.real_speed, &mut rng),
        MemorySink::new(),
    );
    run.map_probe_routes(
        &[ProbeRoute::new(
            "corridor",
            GeoPoint::new(10.0, 0.0),
            GeoPoint::new(590.0, 0.0),
        )],
        &MockOracle::new(),
    );

    // Drive the loop. The synthetic network responds to the pushed set by
    // scaling its speeds with the current speedFactor, closing the loop the
    // way a live engine would.
    for tick in 1..=cli.ticks {
        let factor = run.controller().params().get(ParamKey::SpeedFactor);
        let engine = run.engine_mut();
        for (id, _, _) in EDGES {
            let jitter = rng.gen_range(-1.0..1.0);
            engine.set_edge(id, cli.sim_speed * factor + jitter, 0.3, 6);
        }
        run.on_tick(tick);
    }

    let report = run.finalize();

    match cli.format.as_str() {
        "json" => print_json(&report),
        "both" => {
            print!("{}", report.render_ascii());
            print_json(&report);
        }
        _ => print!("{}", report.render_ascii()),
    }
}

fn print_json(report: &traffic_twin::CalibrationReport) {
    match serde_json::to_string_pretty(report) {
        Ok(json) => println!("{json}"),
        Err(err) => eprintln!("report serialization failed: {err}"),
    }
}
