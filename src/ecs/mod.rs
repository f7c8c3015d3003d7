//! Entity Component System integration with hecs.
//!
//! Every rigid body of every robot is an entity. Joints and collidables refer
//! to bodies by `hecs::Entity`.

pub mod components;
pub mod systems;

pub mod prelude {
    pub use super::components::*;
    pub use super::systems::transform_system;
}
