//! Touchdown physics core
//!
//! A contact-point based physics engine for articulated robots, built on a
//! hecs ECS with double-precision glam math.
//!
//! # Architecture
//!
//! The library is organized into layers:
//!
//! 1. **ecs** - Body components (transforms, mass, velocities, wrenches) and hierarchy propagation
//! 2. **physics** - Collision queries, contact force models, joint calculators, forward dynamics
//!    and the per-tick [`PhysicsEngine`]
//! 3. **urdf** - URDF robot description loading
//!
//! # Example
//!
//! ```no_run
//! use touchdown::{PhysicsConfig, PhysicsEngine, TerrainObjectDefinition, UrdfLoader, BaseJoint};
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut engine = PhysicsEngine::new(PhysicsConfig::default());
//! engine.add_terrain_object(TerrainObjectDefinition::flat_ground());
//! engine.add_robot(UrdfLoader::load("robot.urdf", BaseJoint::Floating)?)?;
//!
//! let dt = 0.001;
//! for tick in 0..1000 {
//!     engine.simulate(tick as f64 * dt, dt)?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod ecs;
pub mod error;
pub mod physics;
pub mod urdf;

pub use ecs::prelude::*;

pub use error::{Result, SimulationError};

pub use physics::contact::{ContactModel, ContactParameters, PenaltyParameters};
pub use physics::controller::{Controller, ControllerManager};
pub use physics::definition::{
    CollisionShapeDefinition, JointDefinition, RigidBodyDefinition, RobotDefinition,
    SensorDefinition, TerrainObjectDefinition,
};
pub use physics::dynamics::{ArticulatedBodyDynamics, ForwardDynamics};
pub use physics::joint::{JointSet, JointSourceMode, JointType};
pub use physics::robot::RobotPhysics;
pub use physics::spatial::{Twist, Wrench};
pub use physics::{ContactModelKind, EngineState, PhysicsConfig, PhysicsEngine};

pub use urdf::{BaseJoint, UrdfLoader};

// Re-export glam and hecs for convenience
pub use glam;
pub use hecs;
