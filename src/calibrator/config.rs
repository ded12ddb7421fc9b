//! Configuration types for the calibration core.
//!
//! One focused config struct per component, with documented defaults. The
//! defaults encode the operating point the system was tuned at (urban
//! network, 1 Hz driver cadence); override per deployment with struct-update
//! syntax.

use std::time::Duration;

/// Distance metric used by the spatial matcher. Must match the coordinate
/// system of the simulation graph; this is an explicit choice, never
/// assumed from the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinateFrame {
    /// Graph coordinates are WGS84 lon/lat degrees; distances are geodesic
    /// (haversine) metres.
    Geographic,
    /// Graph coordinates are projected metres; distances are Euclidean.
    Planar,
}

/// Spatial matcher configuration.
#[derive(Debug, Clone)]
pub struct MatcherConfig {
    pub frame: CoordinateFrame,
    /// Maximum ground distance for endpoint→edge resolution (metres).
    pub max_match_distance_m: f64,
    /// Minimum |entity edges ∩ route edges| / |route edges| to attribute an
    /// entity to a route. Inclusive boundary.
    pub overlap_threshold: f64,
    /// Bounded timeout for a single routing-oracle call.
    pub oracle_timeout: Duration,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            frame: CoordinateFrame::Geographic,
            max_match_distance_m: 500.0,
            overlap_threshold: 0.7,
            oracle_timeout: Duration::from_secs(5),
        }
    }
}

/// Telemetry/comparison aggregator configuration.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Ingest the edge snapshot set every N ticks. 1 = every tick.
    pub sample_cadence_ticks: u64,
    /// Capacity of the error ring buffer (window W).
    pub error_window: usize,
    /// Mean speed above this is the free-flow bucket (km/h, exclusive).
    pub free_flow_threshold_kmh: f64,
    /// Mean speed at or below this is the congested bucket (km/h, inclusive).
    pub congested_threshold_kmh: f64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            sample_cadence_ticks: 1,
            error_window: 10,
            free_flow_threshold_kmh: 40.0,
            congested_threshold_kmh: 20.0,
        }
    }
}

/// Calibration controller configuration.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Ticks between trigger evaluations. 300 ticks ≈ 5 simulated minutes
    /// at the 1 Hz driver cadence.
    pub update_interval: u64,
    /// Gradient-descent step size.
    pub learning_rate: f64,
    /// Static real-speed fallback when no sample is available at any scope
    /// (km/h). 36.9 km/h is a typical congested urban mean speed.
    pub fallback_speed_kmh: f64,
    /// Bounded timeout per telemetry lookup in the fallback chain.
    pub telemetry_timeout: Duration,
    /// Max samples pulled per telemetry lookup.
    pub sample_limit: usize,
    /// Consecutive engine-unreachable trigger cycles before the controller
    /// stops fatally.
    pub max_consecutive_engine_failures: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            update_interval: 300,
            learning_rate: 0.1,
            fallback_speed_kmh: 36.9,
            telemetry_timeout: Duration::from_secs(2),
            sample_limit: 50,
            max_consecutive_engine_failures: 3,
        }
    }
}

/// Top-level configuration for a calibration run.
#[derive(Debug, Clone, Default)]
pub struct CalibratorConfig {
    pub matcher: MatcherConfig,
    pub aggregator: AggregatorConfig,
    pub controller: ControllerConfig,
}
