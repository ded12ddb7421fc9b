//! Shared data model for the calibration core.
//!
//! Ids are cheap string newtypes so they can key `HashMap`s and appear in
//! logs without ambiguity about which namespace a bare `String` belongs to.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Directed segment of the simulation road graph.
    EdgeId
);
string_id!(
    /// A monitored real-world origin→destination probe route.
    RouteId
);
string_id!(
    /// A simulated vehicle/entity id as reported by the engine.
    EntityId
);

/// A point in the coordinate frame of the simulation graph.
///
/// Interpretation depends on the matcher's declared frame: in
/// `CoordinateFrame::Geographic`, `x` is longitude and `y` latitude in
/// degrees; in `CoordinateFrame::Planar`, both are metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub x: f64,
    pub y: f64,
}

impl GeoPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// An ordered sequence of edges connecting two resolved endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgePath {
    pub edges: Vec<EdgeId>,
    /// Total ground length of the path in metres.
    pub length_m: f64,
}

impl EdgePath {
    pub fn new(edges: Vec<EdgeId>, length_m: f64) -> Self {
        Self { edges, length_m }
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

/// A real-world origin→destination route monitored for comparison.
///
/// Created externally before a run; its resolved edge path is owned by the
/// spatial matcher's route table (replaced wholesale on remap) and read
/// through `SpatialMatcher::path_for`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeRoute {
    pub id: RouteId,
    pub origin: GeoPoint,
    pub destination: GeoPoint,
}

impl ProbeRoute {
    pub fn new(id: impl Into<String>, origin: GeoPoint, destination: GeoPoint) -> Self {
        Self {
            id: RouteId::new(id),
            origin,
            destination,
        }
    }
}

/// Per-tick state of a single edge, produced by the simulation engine.
///
/// Consumed transiently by the aggregator; never retained past the current
/// aggregation window.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeSnapshot {
    pub edge: EdgeId,
    pub mean_speed_kmh: f64,
    /// Fraction of the edge occupied by vehicles, [0, 1].
    pub occupancy: f64,
    pub vehicle_count: u32,
}

/// Scope a real-world sample applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleScope {
    /// Sample measured along a specific probe route.
    Route(RouteId),
    /// Sample aggregated over a named area.
    Area(String),
    /// Wildcard used only for lookups: freshest samples from any scope.
    Any,
}

/// One ingested real-world measurement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealWorldSample {
    pub scope: SampleScope,
    pub speed_kmh: f64,
    pub travel_time_s: f64,
    pub distance_m: f64,
    pub timestamp: DateTime<Utc>,
    /// Provenance tag, e.g. `"probe-fleet"` or `"loop-detectors"`.
    pub source: String,
}

/// A finished simulated trip along a probe route.
///
/// The driver ticks at 1 Hz, so tick counts are simulated seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedTrip {
    pub entity: EntityId,
    pub route: RouteId,
    pub start_tick: u64,
    pub end_tick: u64,
    pub travel_time_ticks: u64,
}
