//! Boundary to the hydraulic engine.
//!
//! The solver itself is an external collaborator. The bridge only needs the
//! capability set below: per-entity state queries ([`NetworkState`]) and the
//! session/step lifecycle plus setpoint injection ([`HydraulicEngine`]).
//! Implementations are thin adapters that own an engine handle; the bridge
//! owns the adapter exclusively for its whole lifetime.

use crate::entity::PipeStatus;
use crate::topology::{LinkIndex, NetworkTopology, NodeIndex};

/// Simulated time, in whole seconds.
pub type SimTime = u64;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors reported by an engine adapter.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    /// Opening, initializing or closing the analysis session failed.
    #[error("session error: {0}")]
    Session(String),
    /// The hydraulic computation did not converge or left an invalid state.
    #[error("hydraulic step failed at t={time}s: {reason}")]
    StepFailure { time: SimTime, reason: String },
    /// An index does not refer to a declared entity.
    #[error("unknown {class} index {index}")]
    UnknownEntity { class: &'static str, index: u32 },
    /// The entity has no such quantity (e.g. tank level on a junction).
    #[error("{quantity} is not defined for {entity}")]
    NotApplicable {
        entity: String,
        quantity: &'static str,
    },
    /// A setpoint outside the quantity's domain (non-finite, negative power).
    /// Nothing was changed.
    #[error("{value} is not a valid {quantity} for {entity}")]
    InvalidSetpoint {
        entity: String,
        quantity: &'static str,
        value: f32,
    },
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Read-only view of the engine's current state.
///
/// Queries never mutate engine state. Indices come from [`Self::topology`].
pub trait NetworkState {
    fn topology(&self) -> &NetworkTopology;

    fn node_pressure(&self, node: NodeIndex) -> Result<f32, EngineError>;
    fn node_head(&self, node: NodeIndex) -> Result<f32, EngineError>;
    fn node_elevation(&self, node: NodeIndex) -> Result<f32, EngineError>;
    fn tank_min_level(&self, node: NodeIndex) -> Result<f32, EngineError>;
    fn tank_max_level(&self, node: NodeIndex) -> Result<f32, EngineError>;
    fn tank_init_level(&self, node: NodeIndex) -> Result<f32, EngineError>;

    fn link_flow(&self, link: LinkIndex) -> Result<f32, EngineError>;
    fn pipe_status(&self, link: LinkIndex) -> Result<PipeStatus, EngineError>;
    fn pump_power(&self, link: LinkIndex) -> Result<f32, EngineError>;
    fn valve_setting(&self, link: LinkIndex) -> Result<f32, EngineError>;
}

/// Session lifecycle, stepping and setpoint injection.
///
/// The engine's API is horizon based: a run ends when the current time
/// reaches the configured horizon. The bridge emulates unbounded operation by
/// extending the horizon one step ahead before every `compute_step`.
pub trait HydraulicEngine: NetworkState {
    fn open_session(&mut self) -> Result<(), EngineError>;
    fn initialize_session(&mut self) -> Result<(), EngineError>;

    /// Configured end time of the run.
    fn horizon(&self) -> SimTime;
    fn set_horizon(&mut self, horizon: SimTime) -> Result<(), EngineError>;
    /// Hydraulic time step.
    fn step_size(&self) -> SimTime;

    /// Solve the network at the current time. Returns that time.
    fn compute_step(&mut self) -> Result<SimTime, EngineError>;
    /// Move to the next hydraulic time. Returns the elapsed simulated time.
    fn advance_step(&mut self) -> Result<SimTime, EngineError>;

    fn set_pump_power(&mut self, link: LinkIndex, power: f32) -> Result<(), EngineError>;
    fn set_valve_setting(&mut self, link: LinkIndex, setting: f32) -> Result<(), EngineError>;

    fn close_session(&mut self) -> Result<(), EngineError>;
    /// Release the engine's resources. Called once, after `close_session`.
    fn release(&mut self) -> Result<(), EngineError>;
}
