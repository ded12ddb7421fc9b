//! Run-level orchestration of the calibration components.
//!
//! [`TwinCalibrator`] owns the matcher, tracker, aggregator and controller
//! plus the injected collaborators, and is driven exactly once per
//! simulation tick by the embedding driver loop. It performs no internal
//! threading and never blocks beyond the collaborators' bounded timeouts,
//! which are only hit at route setup and controller trigger ticks.

use tracing::{debug, info, warn};

use crate::errors::EngineError;
use crate::types::{EdgeSnapshot, ProbeRoute, SampleScope};

use super::aggregator::TelemetryAggregator;
use super::config::CalibratorConfig;
use super::controller::{CalibrationController, ControllerState};
use super::interface::{ReportSink, RoutingOracle, SimulationEngine, TelemetryStore};
use super::matching::{IndexedEdge, SpatialMatcher};
use super::params::CalibrationParameterSet;
use super::report::CalibrationReport;
use super::tracker::EntityTracker;

/// One calibration run wired to its collaborators.
pub struct TwinCalibrator<E, T, P>
where
    E: SimulationEngine,
    T: TelemetryStore,
    P: ReportSink,
{
    run_id: String,
    engine: E,
    telemetry: T,
    sink: P,
    matcher: SpatialMatcher,
    tracker: EntityTracker,
    aggregator: TelemetryAggregator,
    controller: CalibrationController,
}

impl<E, T, P> TwinCalibrator<E, T, P>
where
    E: SimulationEngine,
    T: TelemetryStore,
    P: ReportSink,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        run_id: impl Into<String>,
        config: CalibratorConfig,
        edge_index: Vec<IndexedEdge>,
        scope: SampleScope,
        initial_params: CalibrationParameterSet,
        engine: E,
        telemetry: T,
        sink: P,
    ) -> Self {
        let matcher = SpatialMatcher::new(config.matcher.clone(), edge_index);
        let aggregator = TelemetryAggregator::new(config.aggregator.clone());
        let controller = CalibrationController::new(config.controller, initial_params, scope);
        Self {
            run_id: run_id.into(),
            engine,
            telemetry,
            sink,
            matcher,
            tracker: EntityTracker::new(),
            aggregator,
            controller,
        }
    }

    /// One-time route setup: resolve every probe route onto the graph.
    /// Failed routes are logged and excluded; returns how many mapped.
    pub fn map_probe_routes(&mut self, routes: &[ProbeRoute], oracle: &dyn RoutingOracle) -> usize {
        let failures = self.matcher.map_routes(routes, oracle);
        let mapped = routes.len() - failures.len();
        info!(mapped, failed = failures.len(), "probe routes resolved");
        mapped
    }

    /// Drive one simulation tick: ingest edge state, advance tracking,
    /// then let the controller act if this is a trigger tick.
    pub fn on_tick(&mut self, tick: u64) {
        match collect_snapshots(&self.engine) {
            Ok(snapshots) => self.aggregator.on_tick(tick, &snapshots),
            Err(err) => {
                // Keep the previous summary; the controller escalates on its
                // own if the engine stays unreachable across trigger ticks.
                warn!(tick, %err, "edge ingest failed, aggregation skipped this tick");
            }
        }

        let trips = self.tracker.on_tick(tick, &self.engine, &self.matcher);
        for trip in &trips {
            self.aggregator.record_trip(trip);
            if let Err(err) = self.sink.store_completed_trip(trip) {
                warn!(%err, route = %trip.route, "completed trip not persisted");
            }
        }

        self.controller
            .on_tick(tick, &mut self.engine, &self.telemetry, &mut self.aggregator);
    }

    /// Cooperative stop; takes effect at the next trigger tick.
    pub fn request_stop(&mut self) {
        self.controller.request_stop();
    }

    pub fn state(&self) -> ControllerState {
        self.controller.state()
    }

    pub fn aggregator(&self) -> &TelemetryAggregator {
        &self.aggregator
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn sink(&self) -> &P {
        &self.sink
    }

    pub fn tracker(&self) -> &EntityTracker {
        &self.tracker
    }

    pub fn controller(&self) -> &CalibrationController {
        &self.controller
    }

    /// End the run: build the final report and hand everything to the
    /// persistence sink. Sink failures are logged, never propagated.
    pub fn finalize(mut self) -> CalibrationReport {
        let report = self.controller.finalize();
        if let Err(err) = self.sink.store_calibration_report(&self.run_id, &report) {
            warn!(%err, run_id = %self.run_id, "calibration report not persisted");
        }
        match self.aggregator.validation_metrics() {
            Ok(metrics) => {
                if let Err(err) = self.sink.store_validation_metrics(&self.run_id, &metrics) {
                    warn!(%err, run_id = %self.run_id, "validation metrics not persisted");
                }
            }
            Err(_) => {
                debug!(run_id = %self.run_id, "no validation metrics, no route had data on both sides");
            }
        }
        info!(
            run_id = %self.run_id,
            status = ?report.status,
            updates = report.num_updates,
            "calibration run finalized"
        );
        report
    }
}

fn collect_snapshots<E: SimulationEngine>(engine: &E) -> Result<Vec<EdgeSnapshot>, EngineError> {
    let ids = engine.list_edge_ids()?;
    let mut snapshots = Vec::with_capacity(ids.len());
    for id in ids {
        snapshots.push(EdgeSnapshot {
            mean_speed_kmh: engine.edge_mean_speed(&id)?,
            occupancy: engine.edge_occupancy(&id)?,
            vehicle_count: engine.edge_vehicle_count(&id)?,
            edge: id,
        });
    }
    Ok(snapshots)
}
