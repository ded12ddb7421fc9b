//! Telemetry aggregation and sim-vs-real comparison.
//!
//! Each sampling tick the full edge-snapshot set is reduced to one
//! [`SimSummary`] (mean/median speed, mean occupancy, mean vehicle count and
//! a three-bucket congestion histogram); snapshots are never retained past
//! that reduction. The real-world side keeps a bounded window of ingested
//! samples and reduces them the same way, so the two sides stay directly
//! comparable.
//!
//! Every comparison that lacks samples on either side reports
//! [`DataUnavailable`] — "no signal", which consumers must not read as zero
//! error.

use std::collections::{HashMap, VecDeque};

use serde::Serialize;
use tracing::trace;

use crate::errors::DataUnavailable;
use crate::types::{CompletedTrip, EdgeSnapshot, RealWorldSample, RouteId, SampleScope};

use super::config::AggregatorConfig;
use super::report::{RouteComparison, ValidationMetrics};

/// Bounded window of real-world samples kept for the network-level summary.
const REAL_SAMPLE_WINDOW: usize = 200;

/// Share of edges per congestion bucket, in percent of total edges.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CongestionHistogram {
    pub free_flow_pct: f64,
    pub moderate_pct: f64,
    pub congested_pct: f64,
}

impl CongestionHistogram {
    /// Bucket percentages from a set of mean speeds. Buckets: congested
    /// `<= congested_threshold`, free-flow `> free_flow_threshold`,
    /// moderate in between.
    fn from_speeds(speeds: &[f64], congested_threshold: f64, free_flow_threshold: f64) -> Self {
        if speeds.is_empty() {
            return Self {
                free_flow_pct: 0.0,
                moderate_pct: 0.0,
                congested_pct: 0.0,
            };
        }
        let total = speeds.len() as f64;
        let congested = speeds.iter().filter(|s| **s <= congested_threshold).count();
        let free = speeds.iter().filter(|s| **s > free_flow_threshold).count();
        let moderate = speeds.len() - congested - free;
        Self {
            free_flow_pct: free as f64 / total * 100.0,
            moderate_pct: moderate as f64 / total * 100.0,
            congested_pct: congested as f64 / total * 100.0,
        }
    }

    /// `100 − mean(|sim_i − real_i|)` over the three buckets.
    pub fn similarity(&self, other: &CongestionHistogram) -> f64 {
        let mean_abs_diff = ((self.free_flow_pct - other.free_flow_pct).abs()
            + (self.moderate_pct - other.moderate_pct).abs()
            + (self.congested_pct - other.congested_pct).abs())
            / 3.0;
        100.0 - mean_abs_diff
    }
}

/// One sampling tick's reduction of the simulation edge state.
#[derive(Debug, Clone, Serialize)]
pub struct SimSummary {
    pub tick: u64,
    pub edge_count: usize,
    pub mean_speed_kmh: f64,
    pub median_speed_kmh: f64,
    pub mean_occupancy: f64,
    pub mean_vehicle_count: f64,
    pub congestion: CongestionHistogram,
}

/// Reduction of the retained real-world sample window.
#[derive(Debug, Clone, Serialize)]
pub struct RealSummary {
    pub sample_count: usize,
    pub mean_speed_kmh: f64,
    pub congestion: CongestionHistogram,
}

/// Network-level sim-vs-real comparison.
#[derive(Debug, Clone, Serialize)]
pub struct NetworkComparison {
    pub sim_mean_speed_kmh: f64,
    pub real_mean_speed_kmh: f64,
    /// `|sim − real| / real × 100`.
    pub speed_error_pct: f64,
    /// `100 − mean bucket deviation`, see [`CongestionHistogram::similarity`].
    pub congestion_similarity: f64,
}

/// Fixed-capacity ring of percentage errors; oldest evicted on overflow.
#[derive(Debug, Clone)]
pub struct ErrorRing {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl ErrorRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, error_pct: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(error_pct);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    pub fn iter(&self) -> impl Iterator<Item = &f64> {
        self.samples.iter()
    }
}

/// Owns the run's running statistics: latest sim summary, real-world sample
/// window, per-route travel times from both sides, and the error ring.
#[derive(Debug)]
pub struct TelemetryAggregator {
    config: AggregatorConfig,
    sim: Option<SimSummary>,
    real_window: VecDeque<RealWorldSample>,
    /// Tracker-derived travel times per route (s).
    sim_route_times: HashMap<RouteId, Vec<f64>>,
    /// Real-world travel times per route (s).
    real_route_times: HashMap<RouteId, Vec<f64>>,
    errors: ErrorRing,
}

impl TelemetryAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        let errors = ErrorRing::new(config.error_window);
        Self {
            config,
            sim: None,
            real_window: VecDeque::with_capacity(REAL_SAMPLE_WINDOW),
            sim_route_times: HashMap::new(),
            real_route_times: HashMap::new(),
            errors,
        }
    }

    // === Simulation side ===

    /// Reduce this tick's snapshot set into the current summary. A no-op on
    /// ticks off the sampling cadence; snapshots are not retained.
    pub fn on_tick(&mut self, tick: u64, snapshots: &[EdgeSnapshot]) {
        if tick % self.config.sample_cadence_ticks.max(1) != 0 {
            return;
        }
        if snapshots.is_empty() {
            // An empty network yields no summary, not a zero-speed one.
            self.sim = None;
            return;
        }

        let mut speeds: Vec<f64> = snapshots.iter().map(|s| s.mean_speed_kmh).collect();
        let n = speeds.len() as f64;
        let mean_speed = speeds.iter().sum::<f64>() / n;
        speeds.sort_by(|a, b| a.total_cmp(b));
        let median_speed = if speeds.len() % 2 == 1 {
            speeds[speeds.len() / 2]
        } else {
            (speeds[speeds.len() / 2 - 1] + speeds[speeds.len() / 2]) / 2.0
        };

        let summary = SimSummary {
            tick,
            edge_count: snapshots.len(),
            mean_speed_kmh: mean_speed,
            median_speed_kmh: median_speed,
            mean_occupancy: snapshots.iter().map(|s| s.occupancy).sum::<f64>() / n,
            mean_vehicle_count: snapshots.iter().map(|s| f64::from(s.vehicle_count)).sum::<f64>() / n,
            congestion: CongestionHistogram::from_speeds(
                &speeds,
                self.config.congested_threshold_kmh,
                self.config.free_flow_threshold_kmh,
            ),
        };
        trace!(
            tick,
            edges = summary.edge_count,
            mean_speed = %format!("{:.1}", summary.mean_speed_kmh),
            congested_pct = %format!("{:.0}", summary.congestion.congested_pct),
            "sim tick aggregated"
        );
        self.sim = Some(summary);
    }

    pub fn sim_summary(&self) -> Option<&SimSummary> {
        self.sim.as_ref()
    }

    pub fn sim_mean_speed(&self) -> Option<f64> {
        self.sim.as_ref().map(|s| s.mean_speed_kmh)
    }

    // === Real-world side ===

    /// Ingest freshly pulled real-world samples: network window plus
    /// per-route travel times for route-scoped samples.
    pub fn ingest_real_samples(&mut self, samples: &[RealWorldSample]) {
        for sample in samples {
            if let SampleScope::Route(route) = &sample.scope {
                if sample.travel_time_s > 0.0 {
                    self.real_route_times
                        .entry(route.clone())
                        .or_default()
                        .push(sample.travel_time_s);
                }
            }
            if self.real_window.len() == REAL_SAMPLE_WINDOW {
                self.real_window.pop_front();
            }
            self.real_window.push_back(sample.clone());
        }
    }

    pub fn real_summary(&self) -> Result<RealSummary, DataUnavailable> {
        if self.real_window.is_empty() {
            return Err(DataUnavailable);
        }
        let speeds: Vec<f64> = self.real_window.iter().map(|s| s.speed_kmh).collect();
        let mean = speeds.iter().sum::<f64>() / speeds.len() as f64;
        Ok(RealSummary {
            sample_count: speeds.len(),
            mean_speed_kmh: mean,
            congestion: CongestionHistogram::from_speeds(
                &speeds,
                self.config.congested_threshold_kmh,
                self.config.free_flow_threshold_kmh,
            ),
        })
    }

    // === Comparison ===

    /// Network-level comparison of the current sim summary against the real
    /// sample window. `DataUnavailable` when either side has no samples or
    /// the real mean speed is zero (undefined percentage).
    pub fn network_comparison(&self) -> Result<NetworkComparison, DataUnavailable> {
        let sim = self.sim.as_ref().ok_or(DataUnavailable)?;
        let real = self.real_summary()?;
        if real.mean_speed_kmh == 0.0 {
            return Err(DataUnavailable);
        }
        let speed_error_pct =
            (sim.mean_speed_kmh - real.mean_speed_kmh).abs() / real.mean_speed_kmh * 100.0;
        Ok(NetworkComparison {
            sim_mean_speed_kmh: sim.mean_speed_kmh,
            real_mean_speed_kmh: real.mean_speed_kmh,
            speed_error_pct,
            congestion_similarity: sim.congestion.similarity(&real.congestion),
        })
    }

    // === Per-route travel times ===

    /// Record a tracker-derived completed trip.
    pub fn record_trip(&mut self, trip: &CompletedTrip) {
        self.sim_route_times
            .entry(trip.route.clone())
            .or_default()
            .push(trip.travel_time_ticks as f64);
    }

    /// Aggregate travel-time error metrics over every route with data on
    /// both sides. `DataUnavailable` when no route qualifies.
    pub fn validation_metrics(&self) -> Result<ValidationMetrics, DataUnavailable> {
        let mut routes = Vec::new();
        for (route, sim_times) in &self.sim_route_times {
            let Some(real_times) = self.real_route_times.get(route) else {
                continue;
            };
            if sim_times.is_empty() || real_times.is_empty() {
                continue;
            }
            let sim_avg = sim_times.iter().sum::<f64>() / sim_times.len() as f64;
            let real_avg = real_times.iter().sum::<f64>() / real_times.len() as f64;
            let abs_error = (sim_avg - real_avg).abs();
            routes.push(RouteComparison {
                route: route.clone(),
                real_avg_s: real_avg,
                sim_avg_s: sim_avg,
                abs_error_s: abs_error,
                pct_error: (real_avg > 0.0).then(|| abs_error / real_avg * 100.0),
            });
        }
        if routes.is_empty() {
            return Err(DataUnavailable);
        }
        routes.sort_by(|a, b| a.route.cmp(&b.route));

        let n = routes.len() as f64;
        let mae = routes.iter().map(|r| r.abs_error_s).sum::<f64>() / n;
        let rmse = (routes.iter().map(|r| r.abs_error_s.powi(2)).sum::<f64>() / n).sqrt();
        let pct_errors: Vec<f64> = routes.iter().filter_map(|r| r.pct_error).collect();
        let mape = (!pct_errors.is_empty())
            .then(|| pct_errors.iter().sum::<f64>() / pct_errors.len() as f64);

        // R² of sim averages against real averages across routes.
        let real_mean = routes.iter().map(|r| r.real_avg_s).sum::<f64>() / n;
        let ss_res: f64 = routes.iter().map(|r| (r.real_avg_s - r.sim_avg_s).powi(2)).sum();
        let ss_tot: f64 = routes.iter().map(|r| (r.real_avg_s - real_mean).powi(2)).sum();
        let r_squared = if ss_tot == 0.0 { 0.0 } else { 1.0 - ss_res / ss_tot };

        Ok(ValidationMetrics {
            n_routes: routes.len(),
            mae_s: mae,
            rmse_s: rmse,
            mape_pct: mape,
            r_squared,
            routes,
        })
    }

    // === Error ring ===

    /// Append one controller error sample to the bounded ring.
    pub fn record_error(&mut self, error_pct: f64) {
        self.errors.push(error_pct);
    }

    pub fn recent_error_mean(&self) -> Option<f64> {
        self.errors.mean()
    }

    pub fn error_ring(&self) -> &ErrorRing {
        &self.errors
    }
}
