//! Penalty rigid-body collision model.
//!
//! Every colliding shape pair is pushed apart by a spring between the two
//! deepest points plus a damper on their relative velocity. The force acts on
//! A at its contact point and the opposite force on B at its contact point.

use glam::DVec3;
use tracing::debug;

use crate::ecs::components::physics::BodyVelocity;
use crate::ecs::components::transform::GlobalTransform;

use super::collidable::Collidable;
use super::contact::{
    CollisionResult, ContactModel, ContactParameters, ContactScene, ContactWrench,
    PenaltyParameters,
};
use super::narrowphase::detect_collision;
use super::spatial::Wrench;

/// One colliding pair found during the last resolve.
#[derive(Debug, Clone, PartialEq)]
pub struct PenaltyContact {
    pub collidable_a: String,
    pub collidable_b: String,
    pub result: CollisionResult,
    /// Force applied on A, in world coordinates.
    pub force_on_a: DVec3,
}

#[derive(Debug, Clone, Default)]
pub struct PenaltyCollisionCalculator {
    parameters: PenaltyParameters,
    contacts: Vec<PenaltyContact>,
}

impl PenaltyCollisionCalculator {
    pub fn new(parameters: PenaltyParameters) -> Self {
        Self {
            parameters,
            contacts: Vec::new(),
        }
    }

    pub fn parameters(&self) -> &PenaltyParameters {
        &self.parameters
    }

    /// Colliding pairs found during the last resolve.
    pub fn contacts(&self) -> &[PenaltyContact] {
        &self.contacts
    }

    /// World force on A for a colliding pair, given the contact point velocities.
    pub fn compute_force(&self, result: &CollisionResult, velocity_a: DVec3, velocity_b: DVec3) -> DVec3 {
        let spring = (result.point_on_b - result.point_on_a) * self.parameters.kp;
        let mut damping = (velocity_b - velocity_a) * self.parameters.kd;

        if self.parameters.cancel_adhesive_damping {
            let along_normal = damping.dot(result.normal);
            if along_normal < 0.0 {
                damping -= result.normal * along_normal;
            }
        }

        spring + damping
    }

    fn resolve_pair(
        &mut self,
        world: &hecs::World,
        a: &Collidable,
        b: &Collidable,
        wrenches: &mut Vec<ContactWrench>,
    ) {
        let result = detect_collision(&a.shape, &a.world_pose, &b.shape, &b.world_pose);
        if !result.colliding {
            return;
        }

        let velocity_a = point_velocity(world, a.body, result.point_on_a);
        let velocity_b = point_velocity(world, b.body, result.point_on_b);
        let force = self.compute_force(&result, velocity_a, velocity_b);

        if let Some(wrench) = body_wrench(world, a.body, force, result.point_on_a) {
            wrenches.push(wrench);
        }
        if let Some(wrench) = body_wrench(world, b.body, -force, result.point_on_b) {
            wrenches.push(wrench);
        }

        self.contacts.push(PenaltyContact {
            collidable_a: a.name.clone(),
            collidable_b: b.name.clone(),
            result,
            force_on_a: force,
        });
    }
}

/// World velocity of a point rigidly attached to `body`. Static when `body` is `None`.
fn point_velocity(world: &hecs::World, body: Option<hecs::Entity>, point: DVec3) -> DVec3 {
    let Some(body) = body else {
        return DVec3::ZERO;
    };
    let Ok(mut query) = world.query_one::<(&GlobalTransform, &BodyVelocity)>(body) else {
        return DVec3::ZERO;
    };
    match query.get() {
        Some((frame, velocity)) => velocity.0.linear_velocity_at(point - frame.translation()),
        None => DVec3::ZERO,
    }
}

/// A world force applied at `point`, as a wrench in the body frame about its origin.
fn body_wrench(
    world: &hecs::World,
    body: Option<hecs::Entity>,
    force: DVec3,
    point: DVec3,
) -> Option<ContactWrench> {
    let body = body?;
    let frame = world.get::<&GlobalTransform>(body).ok()?;
    let world_wrench = Wrench::force_at_point(force, point, frame.translation());
    let to_body = frame.0.matrix3.transpose();
    Some(ContactWrench {
        body,
        wrench: Wrench::new(to_body * world_wrench.angular, to_body * world_wrench.linear),
    })
}

impl ContactModel for PenaltyCollisionCalculator {
    fn name(&self) -> &'static str {
        "penalty"
    }

    fn set_parameters(&mut self, parameters: &ContactParameters) {
        self.parameters = parameters.penalty;
    }

    fn reset(&mut self, _world: &mut hecs::World) {
        self.contacts.clear();
    }

    fn resolve(&mut self, scene: &mut ContactScene<'_>) -> Vec<ContactWrench> {
        self.contacts.clear();
        let mut wrenches = Vec::new();
        let world: &hecs::World = scene.world;

        for (i, a) in scene.robot_collidables.iter().enumerate() {
            for b in scene.environment {
                if a.is_collidable_with(b) && a.aabb.overlaps(&b.aabb) {
                    self.resolve_pair(world, a, b, &mut wrenches);
                }
            }

            for b in &scene.robot_collidables[i + 1..] {
                if a.body == b.body || !a.is_collidable_with(b) || !a.aabb.overlaps(&b.aabb) {
                    continue;
                }
                self.resolve_pair(world, a, b, &mut wrenches);
            }
        }

        if !self.contacts.is_empty() {
            debug!(pairs = self.contacts.len(), "penalty contacts resolved");
        }
        wrenches
    }
}
