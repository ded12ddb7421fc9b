//! The calibration control loop.
//!
//! A closed-loop controller that keeps the running simulation's behavioral
//! parameters aligned with real-world telemetry. Driven once per simulation
//! tick; does real work only every `update_interval` ticks. On a trigger
//! tick it measures the sim-vs-real speed error, takes one bounded
//! gradient-descent step on the parameter set, and pushes the whole set to
//! every entity the engine currently reports active.
//!
//! State machine: `Idle` (no completed cycle yet) → `Calibrating` →
//! `Stopped` (terminal; the final report is still produced).
//!
//! Entities spawned after a push keep engine defaults until the next
//! trigger. That inconsistency is accepted and documented, not masked.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::types::SampleScope;

use super::aggregator::TelemetryAggregator;
use super::config::ControllerConfig;
use super::interface::{SimulationEngine, TelemetryStore};
use super::params::{CalibrationParameterSet, GradientHeuristic, SpeedDeltaTable};
use super::report::{CalibrationReport, RunStatus};

/// Controller lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// No calibration cycle has completed yet.
    Idle,
    /// Actively updating parameters on trigger ticks.
    Calibrating,
    /// Terminal: no further pushes.
    Stopped,
}

/// One appended entry of the run's calibration log.
#[derive(Debug, Clone, Serialize)]
pub struct CalibrationEvent {
    pub tick: u64,
    /// Parameter values after this cycle's update, by engine name.
    pub params: BTreeMap<String, f64>,
    pub error_pct: f64,
}

/// Tick-driven calibration state machine. Owns the live parameter set
/// exclusively; everything else is read through the aggregator or the
/// injected collaborators.
pub struct CalibrationController {
    config: ControllerConfig,
    state: ControllerState,
    params: CalibrationParameterSet,
    heuristic: Box<dyn GradientHeuristic + Send>,
    /// Scope used for the first rung of the real-speed fallback chain.
    scope: SampleScope,
    events: Vec<CalibrationEvent>,
    consecutive_engine_failures: u32,
    stop_requested: bool,
    fatal_reason: Option<String>,
}

impl CalibrationController {
    pub fn new(config: ControllerConfig, params: CalibrationParameterSet, scope: SampleScope) -> Self {
        Self {
            config,
            state: ControllerState::Idle,
            params,
            heuristic: Box::new(SpeedDeltaTable),
            scope,
            events: Vec::new(),
            consecutive_engine_failures: 0,
            stop_requested: false,
            fatal_reason: None,
        }
    }

    /// Swap in a different gradient rule (the default is the documented
    /// speed-delta table).
    pub fn with_heuristic(mut self, heuristic: Box<dyn GradientHeuristic + Send>) -> Self {
        self.heuristic = heuristic;
        self
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Current parameter values (always in bounds).
    pub fn params(&self) -> &CalibrationParameterSet {
        &self.params
    }

    pub fn events(&self) -> &[CalibrationEvent] {
        &self.events
    }

    /// Cooperative stop: checked once per trigger tick. The in-flight cycle,
    /// if any, completes; no new cycle starts afterwards.
    pub fn request_stop(&mut self) {
        self.stop_requested = true;
    }

    /// Drive one simulation tick. No-op off the trigger cadence.
    pub fn on_tick<E, T>(
        &mut self,
        tick: u64,
        engine: &mut E,
        telemetry: &T,
        aggregator: &mut TelemetryAggregator,
    ) where
        E: SimulationEngine,
        T: TelemetryStore,
    {
        if self.state == ControllerState::Stopped {
            return;
        }
        if tick == 0 || tick % self.config.update_interval != 0 {
            return;
        }
        if self.stop_requested {
            info!(tick, "stop signal received, calibration stopped");
            self.state = ControllerState::Stopped;
            return;
        }

        // Engine liveness + the push target list, checked up front so an
        // unreachable engine skips the whole cycle without a half-applied
        // update.
        let entities = match engine.list_active_entity_ids() {
            Ok(entities) => {
                self.consecutive_engine_failures = 0;
                entities
            }
            Err(err) => {
                self.consecutive_engine_failures += 1;
                warn!(
                    tick,
                    %err,
                    consecutive = self.consecutive_engine_failures,
                    "engine unreachable, calibration cycle skipped"
                );
                if self.consecutive_engine_failures >= self.config.max_consecutive_engine_failures {
                    self.fatal_reason = Some("engine unreachable".to_string());
                    self.state = ControllerState::Stopped;
                    warn!(tick, "engine unreachable threshold reached, calibration stopped");
                }
                return;
            }
        };

        // Step 1: current speeds. No sim-side signal means no error to act
        // on; skip without escalating (data unavailability is not an engine
        // failure).
        let Some(sim_speed) = aggregator.sim_mean_speed() else {
            warn!(tick, "no simulation summary at trigger, cycle skipped");
            return;
        };
        let real_speed = self.resolve_real_speed(telemetry, aggregator);

        // Step 2: error sample into the bounded ring.
        let error_pct = (sim_speed - real_speed).abs() / real_speed * 100.0;
        aggregator.record_error(error_pct);

        // Steps 3–4: heuristic gradient, bounded descent step.
        let speed_delta = sim_speed - real_speed;
        self.params
            .descend(self.heuristic.as_ref(), speed_delta, self.config.learning_rate);

        // Step 5: push the whole set to every currently-active entity.
        // Entities that vanish between enumeration and apply are skipped;
        // later spawns pick the set up at the next trigger.
        let mut applied = 0usize;
        let mut skipped = 0usize;
        for entity in &entities {
            match engine.apply_parameters(entity, &self.params) {
                Ok(()) => applied += 1,
                Err(err) => {
                    skipped += 1;
                    debug!(entity = %entity, %err, "parameter apply skipped");
                }
            }
        }

        // Step 6: append the event.
        self.events.push(CalibrationEvent {
            tick,
            params: self.params.snapshot(),
            error_pct,
        });
        if self.state == ControllerState::Idle {
            info!(tick, "first calibration cycle completed");
            self.state = ControllerState::Calibrating;
        }

        info!(
            tick,
            sim_speed = %format!("{:.1}", sim_speed),
            real_speed = %format!("{:.1}", real_speed),
            error_pct = %format!("{:.2}", error_pct),
            recent_error = %format!("{:.2}", aggregator.recent_error_mean().unwrap_or(error_pct)),
            applied,
            skipped,
            "calibration cycle"
        );
    }

    /// Real mean speed via the fixed priority fallback chain: freshest
    /// samples for the run's scope, then freshest samples from any scope,
    /// then the static default. Each lookup is bounded by the configured
    /// timeout and falls through on failure, timeout, emptiness, or a zero
    /// mean (undefined percentage base).
    fn resolve_real_speed<T: TelemetryStore>(
        &self,
        telemetry: &T,
        aggregator: &mut TelemetryAggregator,
    ) -> f64 {
        let mut chain = vec![self.scope.clone()];
        if self.scope != SampleScope::Any {
            chain.push(SampleScope::Any);
        }
        for scope in chain {
            match telemetry.recent_samples(&scope, self.config.sample_limit, self.config.telemetry_timeout)
            {
                Ok(samples) if !samples.is_empty() => {
                    let mean =
                        samples.iter().map(|s| s.speed_kmh).sum::<f64>() / samples.len() as f64;
                    aggregator.ingest_real_samples(&samples);
                    if mean > 0.0 {
                        return mean;
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    debug!(?scope, %err, "telemetry lookup failed, falling through");
                }
            }
        }
        debug!(
            fallback = %format!("{:.1}", self.config.fallback_speed_kmh),
            "no real-world samples, using static fallback speed"
        );
        self.config.fallback_speed_kmh
    }

    /// Produce the final report, transitioning to `Stopped` if the run is
    /// ending naturally. Always succeeds, whatever state the run ended in.
    pub fn finalize(&mut self) -> CalibrationReport {
        self.state = ControllerState::Stopped;
        let status = match (&self.fatal_reason, self.stop_requested) {
            (Some(reason), _) => RunStatus::StoppedFatal(reason.clone()),
            (None, true) => RunStatus::StoppedByUser,
            (None, false) => RunStatus::Completed,
        };

        let initial = self.events.first().map(|e| e.error_pct);
        let last = self.events.last().map(|e| e.error_pct);
        let improvement = match (initial, last) {
            (Some(i), Some(l)) => Some(i - l),
            _ => None,
        };
        let improvement_pct = match (initial, improvement) {
            (Some(i), Some(imp)) if i != 0.0 => Some(imp / i * 100.0),
            _ => None,
        };

        CalibrationReport {
            status,
            initial_error_pct: initial,
            final_error_pct: last,
            improvement,
            improvement_pct,
            num_updates: self.events.len() as u64,
            final_params: self.params.snapshot(),
            error_history: self.events.iter().map(|e| e.error_pct).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibrator::config::AggregatorConfig;
    use crate::calibrator::mock::{MockEngine, MockTelemetry};
    use crate::calibrator::params::ParamKey;
    use crate::types::EdgeSnapshot;

    fn constant_world(sim_speed: f64, real_speed: f64) -> (MockEngine, MockTelemetry) {
        let mut engine = MockEngine::new();
        engine.set_edge("e1", sim_speed, 0.3, 5);
        engine.spawn_entity("v1", &["e1"]);
        let mut telemetry = MockTelemetry::new();
        telemetry.add_area_samples("downtown", real_speed, 5);
        (engine, telemetry)
    }

    fn drive(
        controller: &mut CalibrationController,
        engine: &mut MockEngine,
        telemetry: &MockTelemetry,
        aggregator: &mut TelemetryAggregator,
        ticks: std::ops::RangeInclusive<u64>,
    ) {
        for tick in ticks {
            let snapshots: Vec<EdgeSnapshot> = engine.edge_snapshots();
            aggregator.on_tick(tick, &snapshots);
            controller.on_tick(tick, engine, telemetry, aggregator);
        }
    }

    fn scope() -> SampleScope {
        SampleScope::Area("downtown".to_string())
    }

    #[test]
    fn test_constant_inputs_give_four_events_and_stable_error() {
        let (mut engine, telemetry) = constant_world(30.0, 40.0);
        let mut aggregator = TelemetryAggregator::new(AggregatorConfig::default());
        let mut controller = CalibrationController::new(
            ControllerConfig::default(),
            CalibrationParameterSet::default(),
            scope(),
        );

        drive(&mut controller, &mut engine, &telemetry, &mut aggregator, 1..=1200);

        let events = controller.events();
        assert_eq!(events.len(), 4);
        assert_eq!(
            events.iter().map(|e| e.tick).collect::<Vec<_>>(),
            vec![300, 600, 900, 1200]
        );
        // Error is stable under constant inputs.
        let first = events[0].error_pct;
        for event in events {
            assert!((event.error_pct - first).abs() < 1e-9);
        }
        assert!((first - 25.0).abs() < 1e-9); // |30-40|/40×100
        assert_eq!(controller.state(), ControllerState::Calibrating);
    }

    #[test]
    fn test_no_op_off_trigger_ticks() {
        let (mut engine, telemetry) = constant_world(30.0, 40.0);
        let mut aggregator = TelemetryAggregator::new(AggregatorConfig::default());
        let mut controller = CalibrationController::new(
            ControllerConfig::default(),
            CalibrationParameterSet::default(),
            scope(),
        );

        drive(&mut controller, &mut engine, &telemetry, &mut aggregator, 1..=299);
        assert!(controller.events().is_empty());
        assert_eq!(controller.state(), ControllerState::Idle);
        assert_eq!(engine.apply_count("v1"), 0);
    }

    #[test]
    fn test_stop_before_first_trigger_leaves_improvement_undefined() {
        let (mut engine, telemetry) = constant_world(30.0, 40.0);
        let mut aggregator = TelemetryAggregator::new(AggregatorConfig::default());
        let mut controller = CalibrationController::new(
            ControllerConfig::default(),
            CalibrationParameterSet::default(),
            scope(),
        );

        drive(&mut controller, &mut engine, &telemetry, &mut aggregator, 1..=100);
        controller.request_stop();
        drive(&mut controller, &mut engine, &telemetry, &mut aggregator, 101..=400);

        let report = controller.finalize();
        assert_eq!(report.status, RunStatus::StoppedByUser);
        assert_eq!(report.num_updates, 0);
        assert!(report.improvement.is_none());
        assert!(report.improvement_pct.is_none());
        assert!(report.initial_error_pct.is_none());
        assert!(report.error_history.is_empty());
    }

    #[test]
    fn test_stop_signal_prevents_further_pushes() {
        let (mut engine, telemetry) = constant_world(30.0, 40.0);
        let mut aggregator = TelemetryAggregator::new(AggregatorConfig::default());
        let mut controller = CalibrationController::new(
            ControllerConfig::default(),
            CalibrationParameterSet::default(),
            scope(),
        );

        drive(&mut controller, &mut engine, &telemetry, &mut aggregator, 1..=600);
        assert_eq!(controller.events().len(), 2);
        controller.request_stop();
        drive(&mut controller, &mut engine, &telemetry, &mut aggregator, 601..=1200);

        assert_eq!(controller.events().len(), 2);
        assert_eq!(controller.state(), ControllerState::Stopped);
        let report = controller.finalize();
        assert_eq!(report.status, RunStatus::StoppedByUser);
        assert_eq!(report.num_updates, 2);
        assert!(report.improvement.is_some());
    }

    #[test]
    fn test_engine_unreachable_escalates_to_fatal_after_three_cycles() {
        let (mut engine, telemetry) = constant_world(30.0, 40.0);
        engine.set_unreachable(true);
        let mut aggregator = TelemetryAggregator::new(AggregatorConfig::default());
        let mut controller = CalibrationController::new(
            ControllerConfig::default(),
            CalibrationParameterSet::default(),
            scope(),
        );

        drive(&mut controller, &mut engine, &telemetry, &mut aggregator, 1..=900);

        assert_eq!(controller.state(), ControllerState::Stopped);
        assert!(controller.events().is_empty());
        let report = controller.finalize();
        assert_eq!(
            report.status,
            RunStatus::StoppedFatal("engine unreachable".to_string())
        );
    }

    #[test]
    fn test_transient_engine_failure_recovers() {
        let (mut engine, telemetry) = constant_world(30.0, 40.0);
        let mut aggregator = TelemetryAggregator::new(AggregatorConfig::default());
        let mut controller = CalibrationController::new(
            ControllerConfig::default(),
            CalibrationParameterSet::default(),
            scope(),
        );

        engine.set_unreachable(true);
        drive(&mut controller, &mut engine, &telemetry, &mut aggregator, 1..=600);
        assert!(controller.events().is_empty());

        // Two failed cycles, then recovery: counter resets, no fatal stop.
        engine.set_unreachable(false);
        drive(&mut controller, &mut engine, &telemetry, &mut aggregator, 601..=1200);
        assert_eq!(controller.events().len(), 2);
        assert_eq!(controller.state(), ControllerState::Calibrating);
    }

    #[test]
    fn test_individual_apply_failure_does_not_abort_push() {
        let (mut engine, telemetry) = constant_world(30.0, 40.0);
        engine.spawn_entity("v2", &["e1"]);
        engine.fail_apply_for("v1");
        let mut aggregator = TelemetryAggregator::new(AggregatorConfig::default());
        let mut controller = CalibrationController::new(
            ControllerConfig::default(),
            CalibrationParameterSet::default(),
            scope(),
        );

        drive(&mut controller, &mut engine, &telemetry, &mut aggregator, 1..=300);

        assert_eq!(controller.events().len(), 1);
        assert_eq!(engine.apply_count("v1"), 0);
        assert_eq!(engine.apply_count("v2"), 1);
    }

    #[test]
    fn test_fallback_chain_scoped_then_any_then_static() {
        let mut engine = MockEngine::new();
        engine.set_edge("e1", 30.0, 0.3, 5);
        let mut aggregator = TelemetryAggregator::new(AggregatorConfig::default());

        // Rung 2: no scoped samples, but any-scope samples exist.
        let mut telemetry = MockTelemetry::new();
        telemetry.add_area_samples("elsewhere", 60.0, 4);
        let mut controller = CalibrationController::new(
            ControllerConfig::default(),
            CalibrationParameterSet::default(),
            scope(),
        );
        drive(&mut controller, &mut engine, &telemetry, &mut aggregator, 1..=300);
        // |30-60|/60×100 = 50.
        assert!((controller.events()[0].error_pct - 50.0).abs() < 1e-9);

        // Rung 3: store empty everywhere → static default 36.9 km/h.
        let telemetry = MockTelemetry::new();
        let mut aggregator = TelemetryAggregator::new(AggregatorConfig::default());
        let mut controller = CalibrationController::new(
            ControllerConfig::default(),
            CalibrationParameterSet::default(),
            scope(),
        );
        drive(&mut controller, &mut engine, &telemetry, &mut aggregator, 1..=300);
        let expected = (30.0f64 - 36.9).abs() / 36.9 * 100.0;
        assert!((controller.events()[0].error_pct - expected).abs() < 1e-9);
    }

    #[test]
    fn test_telemetry_failure_falls_through_not_fatal() {
        let (mut engine, mut telemetry) = constant_world(30.0, 40.0);
        telemetry.set_failing(true);
        let mut aggregator = TelemetryAggregator::new(AggregatorConfig::default());
        let mut controller = CalibrationController::new(
            ControllerConfig::default(),
            CalibrationParameterSet::default(),
            scope(),
        );

        drive(&mut controller, &mut engine, &telemetry, &mut aggregator, 1..=300);

        // Cycle still ran against the static fallback.
        assert_eq!(controller.events().len(), 1);
        assert_eq!(controller.state(), ControllerState::Calibrating);
    }

    #[test]
    fn test_sim_too_fast_decreases_speed_factor() {
        let (mut engine, telemetry) = constant_world(60.0, 40.0);
        let mut aggregator = TelemetryAggregator::new(AggregatorConfig::default());
        let mut controller = CalibrationController::new(
            ControllerConfig::default(),
            CalibrationParameterSet::default(),
            scope(),
        );
        let before = controller.params().get(ParamKey::SpeedFactor);

        drive(&mut controller, &mut engine, &telemetry, &mut aggregator, 1..=300);

        let after = controller.params().get(ParamKey::SpeedFactor);
        assert!(after < before, "{after} !< {before}");
        // The pushed set matches the controller's set.
        assert_eq!(engine.last_applied("v1").unwrap(), *controller.params());
    }
}
