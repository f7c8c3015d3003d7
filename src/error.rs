//! Error types for the simulation core.

use thiserror::Error;

/// Errors that can occur while building or stepping a simulation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimulationError {
    /// A joint velocity left the configured bounds. The run has diverged.
    #[error("Unreasonable acceleration for joint {joint}: angular {angular:e}, linear {linear:e}")]
    UnreasonableAcceleration {
        /// Offending joint.
        joint: String,
        /// Magnitude of the rotational part of the joint twist.
        angular: f64,
        /// Magnitude of the translational part of the joint twist.
        linear: f64,
    },

    /// A state vector does not match the joint set it is written to.
    #[error("Dimension mismatch for {what}: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Which vector was rejected.
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A robot or terrain definition is inconsistent.
    #[error("Invalid definition: {0}")]
    InvalidDefinition(String),

    /// Missing joint.
    #[error("Joint not found: {0}")]
    UnknownJoint(String),

    /// Missing robot.
    #[error("Robot not found: {0}")]
    UnknownRobot(String),

    /// Missing body.
    #[error("Rigid body not found: {0}")]
    UnknownBody(String),

    /// The forward dynamics adapter could not produce accelerations.
    #[error("Forward dynamics failed: {0}")]
    Dynamics(String),
}

/// Result alias for simulation operations.
pub type Result<T> = std::result::Result<T, SimulationError>;
