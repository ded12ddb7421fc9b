//! Behavioral parameter set and the heuristic gradient rule.
//!
//! The five car-following parameters the controller nudges are held in a
//! fixed-size set with hard per-parameter bounds. The invariant is enforced
//! at the write site: every store clips to `[min, max]`, never rejects, so
//! an out-of-bounds value is not observable anywhere.
//!
//! The gradient rule is a hand-designed direction/scale table, not an
//! analytic derivative. It lives behind [`GradientHeuristic`] so it can be
//! swapped or unit-tested independently of the control loop. The signs are
//! deliberate and should not be "corrected" without evidence from real
//! calibration outcomes; tests pin the declared contract, not predictive
//! accuracy.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The calibrated behavioral parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ParamKey {
    /// Desired time headway to the leader (s).
    Tau,
    /// Maximum acceleration (m/s²).
    Accel,
    /// Comfortable deceleration (m/s²).
    Decel,
    /// Driver imperfection, [0, 1].
    Sigma,
    /// Multiplier on the edge speed limit.
    SpeedFactor,
}

impl ParamKey {
    /// All keys, in the order the engine wire protocol lists them.
    pub const ALL: [ParamKey; 5] = [
        ParamKey::Tau,
        ParamKey::Accel,
        ParamKey::Decel,
        ParamKey::Sigma,
        ParamKey::SpeedFactor,
    ];

    /// Engine-side attribute name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamKey::Tau => "tau",
            ParamKey::Accel => "accel",
            ParamKey::Decel => "decel",
            ParamKey::Sigma => "sigma",
            ParamKey::SpeedFactor => "speedFactor",
        }
    }
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive bounds for one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamBounds {
    pub min: f64,
    pub max: f64,
}

impl ParamBounds {
    pub fn new(min: f64, max: f64) -> Self {
        debug_assert!(min <= max);
        Self { min, max }
    }

    pub fn clip(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

/// One parameter's current value plus its bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct BoundedParam {
    value: f64,
    bounds: ParamBounds,
}

/// Fixed-size mapping from parameter to bounded scalar.
///
/// Exclusively owned by the controller; other components read snapshots
/// through accessors. In a multi-threaded host the set is applied as an
/// atomic whole-set swap, so readers never see a partial update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationParameterSet {
    params: BTreeMap<ParamKey, BoundedParam>,
}

impl CalibrationParameterSet {
    /// Build a set from `(key, initial, bounds)` triples. Initial values are
    /// clipped like any other write. Missing keys fall back to the defaults.
    pub fn new(entries: impl IntoIterator<Item = (ParamKey, f64, ParamBounds)>) -> Self {
        let mut set = Self::default();
        for (key, value, bounds) in entries {
            set.params.insert(
                key,
                BoundedParam {
                    value: bounds.clip(value),
                    bounds,
                },
            );
        }
        set
    }

    pub fn get(&self, key: ParamKey) -> f64 {
        self.params[&key].value
    }

    pub fn bounds(&self, key: ParamKey) -> ParamBounds {
        self.params[&key].bounds
    }

    /// Store a value, clipping to the parameter's bounds. Clipping is
    /// unconditional; callers never need to pre-validate.
    pub fn set(&mut self, key: ParamKey, value: f64) {
        let entry = self.params.get_mut(&key).expect("fixed key set");
        entry.value = entry.bounds.clip(value);
    }

    /// Apply one gradient-descent step to every parameter:
    /// `new = clip(old − learning_rate × gradient)`.
    pub fn descend(&mut self, heuristic: &dyn GradientHeuristic, speed_delta: f64, learning_rate: f64) {
        for key in ParamKey::ALL {
            let gradient = heuristic.gradient(key, speed_delta);
            let old = self.get(key);
            self.set(key, old - learning_rate * gradient);
        }
    }

    /// Plain name→value snapshot for event logs and reports.
    pub fn snapshot(&self) -> BTreeMap<String, f64> {
        self.params
            .iter()
            .map(|(k, p)| (k.as_str().to_string(), p.value))
            .collect()
    }
}

impl Default for CalibrationParameterSet {
    /// Krauss-model defaults for an urban network.
    fn default() -> Self {
        let entries = [
            (ParamKey::Tau, 1.0, ParamBounds::new(0.5, 3.0)),
            (ParamKey::Accel, 2.6, ParamBounds::new(1.0, 5.0)),
            (ParamKey::Decel, 4.5, ParamBounds::new(2.0, 9.0)),
            (ParamKey::Sigma, 0.5, ParamBounds::new(0.0, 1.0)),
            (ParamKey::SpeedFactor, 1.0, ParamBounds::new(0.5, 1.5)),
        ];
        let params = entries
            .into_iter()
            .map(|(key, value, bounds)| (key, BoundedParam { value, bounds }))
            .collect();
        Self { params }
    }
}

/// Pluggable gradient rule: maps `(parameter, speed_delta)` to a gradient
/// under the gradient-descent sign convention `new = old − lr × gradient`.
pub trait GradientHeuristic {
    fn gradient(&self, key: ParamKey, speed_delta: f64) -> f64;
}

/// The hand-designed direction/scale table.
///
/// `speed_delta = sim_speed − real_speed` (km/h). Positive delta means the
/// simulation is too fast, so parameters that speed the simulation up get a
/// positive gradient (descent decreases them) and parameters that slow it
/// down get a negative one:
///
/// | parameter   | gradient            | effect of the parameter   |
/// |-------------|---------------------|---------------------------|
/// | speedFactor | `+delta × 0.01`     | higher → faster sim       |
/// | tau         | `−delta × 0.005`    | larger headway → slower   |
/// | accel       | `+delta × 0.05`     | higher → faster sim       |
/// | decel       | `−delta × 0.03`     | harder braking → slower   |
/// | sigma       | `−delta × 0.02`     | more imperfection → slower|
#[derive(Debug, Clone, Copy, Default)]
pub struct SpeedDeltaTable;

impl SpeedDeltaTable {
    /// Signed scale per parameter; gradient = scale × speed_delta.
    const TABLE: [(ParamKey, f64); 5] = [
        (ParamKey::SpeedFactor, 0.01),
        (ParamKey::Tau, -0.005),
        (ParamKey::Accel, 0.05),
        (ParamKey::Decel, -0.03),
        (ParamKey::Sigma, -0.02),
    ];
}

impl GradientHeuristic for SpeedDeltaTable {
    fn gradient(&self, key: ParamKey, speed_delta: f64) -> f64 {
        let scale = Self::TABLE
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, s)| *s)
            .unwrap_or(0.0);
        scale * speed_delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_declared_gradient_signs_and_scales() {
        let table = SpeedDeltaTable;
        // Sim 10 km/h too fast.
        let delta = 10.0;
        assert!((table.gradient(ParamKey::SpeedFactor, delta) - 0.1).abs() < 1e-12);
        assert!((table.gradient(ParamKey::Tau, delta) + 0.05).abs() < 1e-12);
        assert!((table.gradient(ParamKey::Accel, delta) - 0.5).abs() < 1e-12);
        assert!((table.gradient(ParamKey::Decel, delta) + 0.3).abs() < 1e-12);
        assert!((table.gradient(ParamKey::Sigma, delta) + 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_descent_direction_when_sim_too_fast() {
        // Positive delta must decrease speedFactor/accel and increase
        // tau/decel/sigma (all of which slow the simulation).
        let mut params = CalibrationParameterSet::default();
        let before = params.snapshot();
        params.descend(&SpeedDeltaTable, 10.0, 0.1);

        assert!(params.get(ParamKey::SpeedFactor) < before["speedFactor"]);
        assert!(params.get(ParamKey::Accel) < before["accel"]);
        assert!(params.get(ParamKey::Tau) > before["tau"]);
        assert!(params.get(ParamKey::Decel) > before["decel"]);
        assert!(params.get(ParamKey::Sigma) > before["sigma"]);
    }

    #[test]
    fn test_set_clips_unconditionally() {
        let mut params = CalibrationParameterSet::default();
        params.set(ParamKey::Sigma, 7.5);
        assert!((params.get(ParamKey::Sigma) - 1.0).abs() < 1e-12);
        params.set(ParamKey::Sigma, -3.0);
        assert!((params.get(ParamKey::Sigma) - 0.0).abs() < 1e-12);
    }

    #[test]
    fn test_bounds_hold_under_random_delta_sequences() {
        // Property: for any sequence of speed deltas and any in-bounds
        // starting point, every value stays within its bounds after every
        // update.
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..50 {
            let entries = ParamKey::ALL.map(|key| {
                let defaults = CalibrationParameterSet::default();
                let bounds = defaults.bounds(key);
                let init = rng.gen_range(bounds.min..=bounds.max);
                (key, init, bounds)
            });
            let mut params = CalibrationParameterSet::new(entries);

            for _ in 0..200 {
                let delta = rng.gen_range(-80.0..80.0);
                let lr = rng.gen_range(0.01..1.0);
                params.descend(&SpeedDeltaTable, delta, lr);
                for key in ParamKey::ALL {
                    let bounds = params.bounds(key);
                    let v = params.get(key);
                    assert!(
                        v >= bounds.min && v <= bounds.max,
                        "{key} = {v} escaped [{}, {}]",
                        bounds.min,
                        bounds.max
                    );
                }
            }
        }
    }

    #[test]
    fn test_snapshot_uses_engine_names() {
        let params = CalibrationParameterSet::default();
        let snap = params.snapshot();
        for key in ["tau", "accel", "decel", "sigma", "speedFactor"] {
            assert!(snap.contains_key(key), "missing {key}");
        }
        assert_eq!(snap.len(), 5);
    }
}
