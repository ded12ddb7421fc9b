use thiserror::Error;

/// Failure to resolve a probe route onto the simulation graph.
///
/// Route mapping failures exclude the route from tracking for the run but
/// are never fatal to the run itself.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RouteMappingFailure {
    /// Origin or destination point has no graph edge within the match radius.
    #[error("route endpoint has no edge within match radius")]
    EndpointUnreachable,
    /// Both endpoints resolved but the routing oracle found no connecting path.
    #[error("no path between resolved endpoint edges")]
    NoPath,
    /// The routing oracle itself failed or timed out.
    #[error("routing oracle error: {0}")]
    Oracle(String),
}

/// Errors surfaced by the simulation engine collaborator.
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    /// The engine could not be reached at all. Escalates to a fatal stop
    /// after a configurable number of consecutive trigger cycles.
    #[error("engine unreachable: {0}")]
    Unreachable(String),
    /// A per-entity query or apply referenced an entity the engine no longer
    /// knows. Soft failure: skipped, never aborts the surrounding loop.
    #[error("unknown entity: {0}")]
    UnknownEntity(String),
    /// An edge query referenced an unknown edge id.
    #[error("unknown edge: {0}")]
    UnknownEdge(String),
}

impl EngineError {
    /// True when the error should count toward the consecutive-failure
    /// escalation threshold rather than being skipped per-item.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, EngineError::Unreachable(_))
    }

    pub fn unreachable(msg: impl Into<String>) -> Self {
        EngineError::Unreachable(msg.into())
    }

    pub fn unknown_entity(id: impl Into<String>) -> Self {
        EngineError::UnknownEntity(id.into())
    }
}

/// A comparison had zero samples on one side (or an undefined denominator).
///
/// This is "no signal", never zero error; downstream consumers skip the
/// cycle or fall back, they do not treat it as agreement.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("no data available for comparison")]
pub struct DataUnavailable;

/// Errors from the real-world telemetry store.
///
/// Both variants fall through the controller's fallback chain; neither is
/// ever fatal.
#[derive(Error, Debug, Clone)]
pub enum TelemetryError {
    /// Lookup exceeded its bounded timeout.
    #[error("telemetry lookup timed out")]
    Timeout,
    /// Store-side failure (connection, query, decode).
    #[error("telemetry store error: {0}")]
    Store(String),
}

/// Persistence-collaborator failure. Fire-and-forget from the core's
/// perspective: logged by the caller, never propagated into the control loop.
#[derive(Error, Debug, Clone)]
#[error("persistence error: {0}")]
pub struct PersistenceError(pub String);

impl PersistenceError {
    pub fn new(msg: impl Into<String>) -> Self {
        PersistenceError(msg.into())
    }
}
