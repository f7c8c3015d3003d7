//! URDF support
//!
//! Converts URDF robot descriptions into [`RobotDefinition`](crate::physics::definition::RobotDefinition)s.

pub mod loader;

pub use loader::{BaseJoint, UrdfLoader};
