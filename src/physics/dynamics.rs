//! Forward dynamics adapter.
//!
//! The engine only talks to [`ForwardDynamics`]. [`ArticulatedBodyDynamics`]
//! is the bundled implementation: the hybrid articulated-body algorithm with
//! every spatial quantity expressed in world coordinates about the world origin.
//! Effort-source joints are solved for acceleration, acceleration-source joints
//! for effort.

use std::collections::HashMap;

use glam::{DMat3, DVec3};

use crate::ecs::components::physics::{ExternalWrench, MassProperties};
use crate::ecs::components::transform::GlobalTransform;
use crate::error::{Result, SimulationError};

use super::joint::{JointSet, JointSourceMode, JointState, JointType};
use super::spatial::{SpatialAcceleration, SpatialInertia, Twist, Wrench};

/// Computes joint accelerations (or efforts) from the current state and applied wrenches.
pub trait ForwardDynamics {
    /// Run one forward dynamics pass.
    ///
    /// External wrenches are read from each body's [`ExternalWrench`] component.
    fn compute(
        &mut self,
        world: &hecs::World,
        joints: &JointSet,
        gravity: DVec3,
        source_mode: &dyn Fn(usize) -> JointSourceMode,
    ) -> Result<()>;

    /// Joint accelerations, laid out like the joint velocity vector.
    fn joint_accelerations(&self) -> &[f64];

    /// Joint efforts, laid out like the joint velocity vector. For effort
    /// sources this echoes the applied effort.
    fn joint_efforts(&self) -> &[f64];

    /// Angular acceleration and centre-of-mass acceleration of a body, world frame.
    fn body_acceleration(&self, body: hecs::Entity) -> Option<SpatialAcceleration>;
}

/// Per-joint scratch of the articulated-body passes.
#[derive(Debug, Clone, Copy)]
struct JointScratch {
    /// Motion subspace column for 1-DoF joints.
    s: Twist,
    velocity: Twist,
    bias: Twist,
    inertia: SpatialInertia,
    force: Wrench,
    u_vec: Wrench,
    d: f64,
    u: f64,
    acceleration: Twist,
    locked: bool,
}

impl Default for JointScratch {
    fn default() -> Self {
        Self {
            s: Twist::ZERO,
            velocity: Twist::ZERO,
            bias: Twist::ZERO,
            inertia: SpatialInertia::ZERO,
            force: Wrench::ZERO,
            u_vec: Wrench::ZERO,
            d: 0.0,
            u: 0.0,
            acceleration: Twist::ZERO,
            locked: false,
        }
    }
}

/// Hybrid articulated-body algorithm over one robot's joint tree.
#[derive(Debug, Clone, Default)]
pub struct ArticulatedBodyDynamics {
    scratch: Vec<JointScratch>,
    accelerations: Vec<f64>,
    efforts: Vec<f64>,
    body_accelerations: HashMap<hecs::Entity, SpatialAcceleration>,
}

const MIN_ARTICULATED_INERTIA: f64 = 1e-12;

impl ArticulatedBodyDynamics {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Body frame, world centre of mass and spatial inertia about the world origin.
fn body_inertia(world: &hecs::World, body: hecs::Entity) -> (GlobalTransform, DVec3, SpatialInertia) {
    let frame = world
        .get::<&GlobalTransform>(body)
        .map(|frame| *frame)
        .unwrap_or_default();
    let Ok(props) = world.get::<&MassProperties>(body) else {
        return (frame, frame.translation(), SpatialInertia::ZERO);
    };
    let rotation = frame.0.matrix3;
    let com = frame.transform_point(props.center_of_mass);
    let inertia: DMat3 = rotation * props.inertia * rotation.transpose();
    (frame, com, SpatialInertia::rigid_body(props.mass, com, inertia))
}

/// External wrench of a body as a spatial force about the world origin.
pub(crate) fn external_force(world: &hecs::World, body: hecs::Entity, frame: &GlobalTransform) -> Wrench {
    let Ok(external) = world.get::<&ExternalWrench>(body) else {
        return Wrench::ZERO;
    };
    let force = frame.transform_vector(external.0.linear);
    let moment = frame.transform_vector(external.0.angular);
    Wrench::new(moment + frame.translation().cross(force), force)
}

/// Floating joint twist (about the body origin) to a spatial velocity about the world origin.
fn floating_to_spatial(twist: &Twist, origin: DVec3) -> Twist {
    Twist::new(twist.angular, twist.linear - twist.angular.cross(origin))
}

impl ForwardDynamics for ArticulatedBodyDynamics {
    fn compute(
        &mut self,
        world: &hecs::World,
        joints: &JointSet,
        gravity: DVec3,
        source_mode: &dyn Fn(usize) -> JointSourceMode,
    ) -> Result<()> {
        let n = joints.len();
        self.scratch.clear();
        self.scratch.resize(n, JointScratch::default());
        self.accelerations.clear();
        self.accelerations.resize(joints.degrees_of_freedom(), 0.0);
        self.efforts.clear();
        self.efforts.resize(joints.degrees_of_freedom(), 0.0);
        self.body_accelerations.clear();

        let mut frames = Vec::with_capacity(n);
        let mut centers = Vec::with_capacity(n);

        // 1. Velocities, bias accelerations and rigid-body terms, root to leaf
        for (i, joint) in joints.iter().enumerate() {
            let (frame, com, inertia) = body_inertia(world, joint.child);
            let origin = frame.translation();
            let parent_velocity = joint
                .parent_joint
                .map(|p| self.scratch[p].velocity)
                .unwrap_or(Twist::ZERO);

            let scratch = &mut self.scratch[i];
            match &joint.state {
                JointState::OneDof(state) => {
                    let axis = frame.transform_vector(joint.axis).normalize_or_zero();
                    scratch.s = match joint.joint_type {
                        JointType::Revolute => Twist::new(axis, origin.cross(axis)),
                        _ => Twist::new(DVec3::ZERO, axis),
                    };
                    let joint_velocity = scratch.s * state.qd;
                    scratch.velocity = parent_velocity + joint_velocity;
                    scratch.bias = scratch.velocity.cross_motion(&joint_velocity);
                }
                JointState::Floating(state) => {
                    scratch.velocity = floating_to_spatial(&state.twist, origin);
                }
                JointState::Fixed => {
                    scratch.velocity = parent_velocity;
                }
            }

            scratch.inertia = inertia;
            let momentum = inertia.mul_twist(&scratch.velocity);
            scratch.force = scratch.velocity.cross_force(&momentum) - external_force(world, joint.child, &frame);

            frames.push(frame);
            centers.push(com);
        }

        // 2. Articulated inertias and bias forces, leaf to root
        for (i, joint) in joints.iter().enumerate().rev() {
            let mode = source_mode(i);
            let scratch = &mut self.scratch[i];
            let (inertia_a, force_a) = match &joint.state {
                JointState::OneDof(state) => {
                    scratch.u_vec = scratch.inertia.mul_twist(&scratch.s);
                    scratch.d = scratch.s.dot(&scratch.u_vec);
                    scratch.u = state.tau - scratch.s.dot(&scratch.force);
                    scratch.locked = mode == JointSourceMode::AccelerationSource
                        || scratch.d < MIN_ARTICULATED_INERTIA;

                    if scratch.locked {
                        let qdd = if mode == JointSourceMode::AccelerationSource {
                            state.qdd
                        } else {
                            0.0
                        };
                        let known = scratch.bias + scratch.s * qdd;
                        (scratch.inertia, scratch.force + scratch.inertia.mul_twist(&known))
                    } else {
                        let inertia_a = scratch.inertia.sub_outer(&scratch.u_vec, scratch.d);
                        let force_a = scratch.force
                            + inertia_a.mul_twist(&scratch.bias)
                            + scratch.u_vec * (scratch.u / scratch.d);
                        (inertia_a, force_a)
                    }
                }
                JointState::Floating(_) | JointState::Fixed => (
                    scratch.inertia,
                    scratch.force + scratch.inertia.mul_twist(&scratch.bias),
                ),
            };

            if let Some(parent) = joint.parent_joint {
                let parent_scratch = &mut self.scratch[parent];
                parent_scratch.inertia += inertia_a;
                parent_scratch.force += force_a;
            }
        }

        // 3. Accelerations, root to leaf, with gravity as a fictitious base acceleration
        let base = Twist::new(DVec3::ZERO, -gravity);
        for (i, joint) in joints.iter().enumerate() {
            let mode = source_mode(i);
            let offset = joints.dof_offset(i);
            let parent_acceleration = joint
                .parent_joint
                .map(|p| self.scratch[p].acceleration)
                .unwrap_or(base);
            let scratch = &mut self.scratch[i];
            let a_prime = parent_acceleration + scratch.bias;

            match &joint.state {
                JointState::OneDof(state) => {
                    if scratch.locked {
                        let qdd = if mode == JointSourceMode::AccelerationSource {
                            state.qdd
                        } else {
                            0.0
                        };
                        scratch.acceleration = a_prime + scratch.s * qdd;
                        let required = scratch.inertia.mul_twist(&scratch.acceleration) + scratch.force;
                        self.accelerations[offset] = qdd;
                        self.efforts[offset] = if mode == JointSourceMode::AccelerationSource {
                            scratch.s.dot(&required)
                        } else {
                            state.tau
                        };
                    } else {
                        let qdd = (scratch.u - scratch.u_vec.linear.dot(a_prime.linear)
                            - scratch.u_vec.angular.dot(a_prime.angular))
                            / scratch.d;
                        scratch.acceleration = a_prime + scratch.s * qdd;
                        self.accelerations[offset] = qdd;
                        self.efforts[offset] = state.tau;
                    }
                }
                JointState::Floating(state) => {
                    let origin = frames[i].translation();
                    let velocity = scratch.velocity;
                    let body_linear = state.twist.linear;
                    let effort = match mode {
                        JointSourceMode::EffortSource => {
                            let applied = state.wrench.shift_to(origin, DVec3::ZERO);
                            let total = applied - scratch.force;
                            scratch.acceleration = scratch.inertia.solve(&total).ok_or_else(|| {
                                SimulationError::Dynamics(format!(
                                    "singular inertia below floating joint {}",
                                    joint.name
                                ))
                            })?;
                            state.wrench
                        }
                        JointSourceMode::AccelerationSource => {
                            // Desired classical acceleration of the body origin to spatial form.
                            let desired = Twist::new(
                                state.acceleration.angular,
                                state.acceleration.linear
                                    - state.acceleration.angular.cross(origin)
                                    - velocity.angular.cross(body_linear),
                            );
                            scratch.acceleration = a_prime + desired;
                            let required =
                                scratch.inertia.mul_twist(&scratch.acceleration) + scratch.force;
                            required.shift_to(DVec3::ZERO, origin)
                        }
                    };

                    let true_acceleration = scratch.acceleration - base;
                    let angular = true_acceleration.angular;
                    let linear = true_acceleration.linear
                        + angular.cross(origin)
                        + velocity.angular.cross(body_linear);
                    self.accelerations[offset..offset + 3].copy_from_slice(&angular.to_array());
                    self.accelerations[offset + 3..offset + 6].copy_from_slice(&linear.to_array());
                    self.efforts[offset..offset + 3].copy_from_slice(&effort.angular.to_array());
                    self.efforts[offset + 3..offset + 6].copy_from_slice(&effort.linear.to_array());
                }
                JointState::Fixed => {
                    scratch.acceleration = a_prime;
                }
            }

            // Classical centre-of-mass acceleration from the spatial one.
            let true_acceleration = scratch.acceleration - base;
            let com = centers[i];
            let velocity = scratch.velocity;
            let com_velocity = velocity.linear + velocity.angular.cross(com);
            let com_acceleration = true_acceleration.linear
                + true_acceleration.angular.cross(com)
                + velocity.angular.cross(com_velocity);
            self.body_accelerations.insert(
                joint.child,
                SpatialAcceleration::new(true_acceleration.angular, com_acceleration),
            );
        }

        Ok(())
    }

    fn joint_accelerations(&self) -> &[f64] {
        &self.accelerations
    }

    fn joint_efforts(&self) -> &[f64] {
        &self.efforts
    }

    fn body_acceleration(&self, body: hecs::Entity) -> Option<SpatialAcceleration> {
        self.body_accelerations.get(&body).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::joint::SimJoint;
    use glam::DAffine3;

    const GRAVITY: DVec3 = DVec3::new(0.0, 0.0, -9.81);

    fn effort_source(_: usize) -> JointSourceMode {
        JointSourceMode::EffortSource
    }

    fn acceleration_source(_: usize) -> JointSourceMode {
        JointSourceMode::AccelerationSource
    }

    fn pendulum(world: &mut hecs::World) -> JointSet {
        // Unit point mass one metre along X, swinging about Y.
        let bob = world.spawn((
            GlobalTransform::default(),
            MassProperties::new(1.0, DVec3::X, DMat3::from_diagonal(DVec3::splat(1e-3))),
            ExternalWrench::default(),
        ));
        let mut joint = SimJoint::new("swing", JointType::Revolute, None, bob);
        joint.axis = DVec3::Y;
        JointSet::new(vec![joint])
    }

    #[test]
    fn test_floating_body_free_fall() {
        let mut world = hecs::World::new();
        let body = world.spawn((
            GlobalTransform(DAffine3::from_translation(DVec3::new(1.0, -2.0, 3.0))),
            MassProperties::solid_box(2.0, DVec3::new(0.2, 0.3, 0.4)),
            ExternalWrench::default(),
        ));
        let joints = JointSet::new(vec![SimJoint::new(
            "root",
            JointType::Floating,
            None,
            body,
        )]);

        let mut dynamics = ArticulatedBodyDynamics::new();
        dynamics
            .compute(&world, &joints, GRAVITY, &effort_source)
            .expect("computes");

        let qdd = dynamics.joint_accelerations();
        assert_eq!(qdd.len(), 6);
        let eps = 1e-9;
        assert!(DVec3::new(qdd[0], qdd[1], qdd[2]).length() < eps);
        assert!((DVec3::new(qdd[3], qdd[4], qdd[5]) - GRAVITY).length() < eps);

        let body_acceleration = dynamics.body_acceleration(body).expect("body");
        assert!((body_acceleration.linear - GRAVITY).length() < eps);
    }

    #[test]
    fn test_external_wrench_cancels_gravity() {
        let mut world = hecs::World::new();
        let body = world.spawn((
            GlobalTransform(DAffine3::from_translation(DVec3::new(0.0, 0.0, 1.0))),
            MassProperties::solid_box(3.0, DVec3::splat(0.5)),
            ExternalWrench(Wrench::pure_force(DVec3::new(0.0, 0.0, 3.0 * 9.81))),
        ));
        let joints = JointSet::new(vec![SimJoint::new(
            "root",
            JointType::Floating,
            None,
            body,
        )]);

        let mut dynamics = ArticulatedBodyDynamics::new();
        dynamics
            .compute(&world, &joints, GRAVITY, &effort_source)
            .expect("computes");
        assert!(dynamics.joint_accelerations().iter().all(|a| a.abs() < 1e-9));
    }

    #[test]
    fn test_pendulum_falls_under_gravity() {
        let mut world = hecs::World::new();
        let joints = pendulum(&mut world);

        let mut dynamics = ArticulatedBodyDynamics::new();
        dynamics
            .compute(&world, &joints, GRAVITY, &effort_source)
            .expect("computes");

        // Gravity torque about +Y is m g r, over m r² + I.
        let expected = 9.81 / 1.001;
        assert!((dynamics.joint_accelerations()[0] - expected).abs() < 1e-9);
    }

    #[test]
    fn test_pinned_pendulum_reports_holding_torque() {
        let mut world = hecs::World::new();
        let joints = pendulum(&mut world);

        let mut dynamics = ArticulatedBodyDynamics::new();
        dynamics
            .compute(&world, &joints, GRAVITY, &acceleration_source)
            .expect("computes");

        assert_eq!(dynamics.joint_accelerations()[0], 0.0);
        assert!((dynamics.joint_efforts()[0] + 9.81).abs() < 1e-9);
    }

    #[test]
    fn test_two_link_chain_pinned_root_holds_whole_chain() {
        let mut world = hecs::World::new();
        let upper = world.spawn((
            GlobalTransform::default(),
            MassProperties::new(1.0, DVec3::X * 0.5, DMat3::from_diagonal(DVec3::splat(1e-3))),
        ));
        let lower = world.spawn((
            GlobalTransform(DAffine3::from_translation(DVec3::X)),
            MassProperties::new(2.0, DVec3::X * 0.5, DMat3::from_diagonal(DVec3::splat(1e-3))),
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

        // Holding torques: elbow carries 2 kg at 0.5 m, shoulder adds 1 kg at 0.5 m and 2 kg at 1.5 m.
        let efforts = dynamics.joint_efforts();
        assert!((efforts[1] + 2.0 * 9.81 * 0.5).abs() < 1e-9);
        assert!((efforts[0] + 9.81 * (0.5 + 3.0)).abs() < 1e-9);
    }
}
