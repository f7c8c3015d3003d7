//! Joint wrench estimation from body accelerations.
//!
//! For each joint, the wrench transmitted from the parent to the successor
//! subtree is what that subtree needs to follow its accelerations under gravity
//! and its external wrenches (Newton-Euler, summed leaf to root).

use glam::{DMat3, DVec3};

use crate::ecs::components::physics::{BodyVelocity, MassProperties};
use crate::ecs::components::transform::GlobalTransform;

use super::dynamics::{external_force, ForwardDynamics};
use super::joint::JointSet;
use super::spatial::Wrench;

#[derive(Debug, Clone, Default)]
pub struct JointWrenchEstimator {
    wrenches: Vec<Wrench>,
}

impl JointWrenchEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Per-joint wrench, world-aligned, about the joint origin.
    pub fn wrenches(&self) -> &[Wrench] {
        &self.wrenches
    }

    pub fn estimate(
        &mut self,
        world: &hecs::World,
        joints: &JointSet,
        dynamics: &dyn ForwardDynamics,
        gravity: DVec3,
    ) {
        // Net wrench each body needs, about the world origin.
        let mut subtree: Vec<Wrench> = joints
            .iter()
            .map(|joint| body_wrench(world, joint.child, dynamics, gravity))
            .collect();

        for (i, joint) in joints.iter().enumerate().rev() {
            if let Some(parent) = joint.parent_joint {
                let carried = subtree[i];
                subtree[parent] += carried;
            }
        }

        self.wrenches = joints
            .iter()
            .zip(subtree)
            .map(|(joint, wrench)| {
                let origin = world
                    .get::<&GlobalTransform>(joint.child)
                    .map(|frame| frame.translation())
                    .unwrap_or_default();
                wrench.shift_to(DVec3::ZERO, origin)
            })
            .collect();
    }
}

fn body_wrench(
    world: &hecs::World,
    body: hecs::Entity,
    dynamics: &dyn ForwardDynamics,
    gravity: DVec3,
) -> Wrench {
    let (Ok(frame), Ok(props)) = (
        world.get::<&GlobalTransform>(body).map(|frame| *frame),
        world.get::<&MassProperties>(body).map(|props| *props),
    ) else {
        return Wrench::ZERO;
    };
    let acceleration = dynamics.body_acceleration(body).unwrap_or_default();
    let omega = world
        .get::<&BodyVelocity>(body)
        .map(|velocity| velocity.0.angular)
        .unwrap_or_default();

    let rotation = frame.0.matrix3;
    let inertia: DMat3 = rotation * props.inertia * rotation.transpose();
    let com = frame.transform_point(props.center_of_mass);

    let force = (acceleration.linear - gravity) * props.mass;
    let moment = inertia * acceleration.angular + omega.cross(inertia * omega) + com.cross(force);

    Wrench::new(moment, force) - external_force(world, body, &frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::components::physics::ExternalWrench;
    use crate::physics::dynamics::ArticulatedBodyDynamics;
    use crate::physics::joint::{JointSourceMode, JointType, SimJoint};
    use glam::DAffine3;

    const GRAVITY: DVec3 = DVec3::new(0.0, 0.0, -9.81);

    fn acceleration_source(_: usize) -> JointSourceMode {
        JointSourceMode::AccelerationSource
    }

    #[test]
    fn test_held_chain_wrenches_match_dynamics_efforts() {
        let mut world = hecs::World::new();
        let point_inertia = DMat3::from_diagonal(DVec3::splat(1e-3));
        let upper = world.spawn((
            GlobalTransform::default(),
            BodyVelocity::default(),
            MassProperties::new(1.0, DVec3::X * 0.5, point_inertia),
            ExternalWrench::default(),
        ));
        let lower = world.spawn((
            GlobalTransform(DAffine3::from_translation(DVec3::X)),
            BodyVelocity::default(),
            MassProperties::new(2.0, DVec3::X * 0.5, point_inertia),
            ExternalWrench::default(),
        ));
        let mut shoulder = SimJoint::new("shoulder", JointType::Revolute, None, upper);
        shoulder.axis = DVec3::Y;
        let mut elbow = SimJoint::new("elbow", JointType::Revolute, Some(upper), lower);
        elbow.axis = DVec3::Y;
        elbow.parent_joint = Some(0);
        let joints = JointSet::new(vec![shoulder, elbow]);

        let mut dynamics = ArticulatedBodyDynamics::new();
        dynamics
            .compute(&world, &joints, GRAVITY, &acceleration_source)
            .expect("computes");
        let mut estimator = JointWrenchEstimator::new();
        estimator.estimate(&world, &joints, &dynamics, GRAVITY);

        let wrenches = estimator.wrenches();
        let eps = 1e-9;
        // Supporting forces carry the weight below each joint.
        assert!((wrenches[0].linear - DVec3::new(0.0, 0.0, 3.0 * 9.81)).length() < eps);
        assert!((wrenches[1].linear - DVec3::new(0.0, 0.0, 2.0 * 9.81)).length() < eps);
        // The moment about the axis is the actuation effort.
        for (i, wrench) in wrenches.iter().enumerate() {
            assert!((wrench.angular.y - dynamics.joint_efforts()[i]).abs() < eps);
        }
    }

    #[test]
    fn test_free_falling_body_transmits_nothing() {
        let mut world = hecs::World::new();
        let body = world.spawn((
            GlobalTransform(DAffine3::from_translation(DVec3::new(0.3, 0.0, 2.0))),
            BodyVelocity::default(),
            MassProperties::solid_box(1.5, DVec3::new(0.1, 0.2, 0.3)),
            ExternalWrench::default(),
        ));
        let joints = JointSet::new(vec![SimJoint::new("root", JointType::Floating, None, body)]);

        let mut dynamics = ArticulatedBodyDynamics::new();
        dynamics
            .compute(&world, &joints, GRAVITY, &|_: usize| JointSourceMode::EffortSource)
            .expect("computes");
        let mut estimator = JointWrenchEstimator::new();
        estimator.estimate(&world, &joints, &dynamics, GRAVITY);

        assert!(estimator.wrenches()[0].linear.length() < 1e-9);
        assert!(estimator.wrenches()[0].angular.length() < 1e-9);
    }
}
