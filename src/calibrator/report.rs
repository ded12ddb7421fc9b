//! Final-report and validation-metric types handed to the persistence
//! collaborator at the end of a run.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::RouteId;

/// How the run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason")]
pub enum RunStatus {
    /// Simulation ran to its natural end.
    Completed,
    /// External stop signal (simulation end signalled by the host, or user
    /// cancel).
    StoppedByUser,
    /// The controller gave up, e.g. `"engine unreachable"` after the
    /// consecutive-failure threshold.
    StoppedFatal(String),
}

/// The calibration controller's final report.
///
/// `improvement` / `improvement_pct` are `None` (serialized as `null`) when
/// no error sample was ever recorded — never 0, never NaN.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationReport {
    pub status: RunStatus,
    /// First recorded error (percent), if any cycle completed.
    pub initial_error_pct: Option<f64>,
    /// Last recorded error (percent), if any cycle completed.
    pub final_error_pct: Option<f64>,
    /// `initial − final`, percent points.
    pub improvement: Option<f64>,
    /// `improvement / initial × 100`.
    pub improvement_pct: Option<f64>,
    /// Number of calibration events appended over the run.
    pub num_updates: u64,
    /// Final parameter values by engine attribute name.
    pub final_params: BTreeMap<String, f64>,
    /// Per-event error sequence, oldest first.
    pub error_history: Vec<f64>,
}

impl CalibrationReport {
    /// One-paragraph ASCII rendering for operator logs and the demo CLI.
    pub fn render_ascii(&self) -> String {
        let mut out = String::new();
        out.push_str("=== Calibration Report ===\n");
        out.push_str(&format!("status:       {:?}\n", self.status));
        out.push_str(&format!("updates:      {}\n", self.num_updates));
        match (self.initial_error_pct, self.final_error_pct) {
            (Some(initial), Some(last)) => {
                out.push_str(&format!("error:        {initial:.2}% -> {last:.2}%\n"));
            }
            _ => out.push_str("error:        n/a (no completed cycle)\n"),
        }
        match self.improvement_pct {
            Some(pct) => out.push_str(&format!("improvement:  {pct:.2}%\n")),
            None => out.push_str("improvement:  undefined\n"),
        }
        out.push_str("final params:\n");
        for (name, value) in &self.final_params {
            out.push_str(&format!("  {name:<12} {value:.4}\n"));
        }
        out
    }
}

/// Travel-time comparison for one probe route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteComparison {
    pub route: RouteId,
    /// Mean real-world travel time (s).
    pub real_avg_s: f64,
    /// Mean tracker-derived simulated travel time (s).
    pub sim_avg_s: f64,
    pub abs_error_s: f64,
    /// `None` when the real average is zero.
    pub pct_error: Option<f64>,
}

/// Aggregate travel-time error metrics across all probe routes with data
/// on both sides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationMetrics {
    pub n_routes: usize,
    /// Mean absolute error (s).
    pub mae_s: f64,
    /// Root mean squared error (s).
    pub rmse_s: f64,
    /// Mean absolute percentage error, over routes with a nonzero real
    /// average.
    pub mape_pct: Option<f64>,
    /// `1 − SS_res/SS_tot`; 0 by definition when `SS_tot == 0`.
    pub r_squared: f64,
    pub routes: Vec<RouteComparison>,
}
