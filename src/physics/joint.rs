//! Joints, joint state, and the per-joint auxiliary effort calculators.

use std::collections::HashMap;

use glam::{DQuat, DVec3};

use crate::ecs::components::transform::Transform;
use crate::error::{Result, SimulationError};

use super::spatial::{Twist, Wrench};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JointType {
    Fixed,
    Revolute,
    Prismatic,
    /// Six degrees of freedom relative to the world.
    Floating,
}

impl JointType {
    /// Number of configuration entries (quaternion counted as four).
    pub fn configuration_size(self) -> usize {
        match self {
            JointType::Fixed => 0,
            JointType::Revolute | JointType::Prismatic => 1,
            JointType::Floating => 7,
        }
    }

    /// Number of velocity, acceleration and effort entries.
    pub fn degrees_of_freedom(self) -> usize {
        match self {
            JointType::Fixed => 0,
            JointType::Revolute | JointType::Prismatic => 1,
            JointType::Floating => 6,
        }
    }
}

/// How forward dynamics treats a joint this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JointSourceMode {
    /// Effort is given, acceleration is solved for.
    EffortSource,
    /// Acceleration is given, effort is solved for.
    AccelerationSource,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OneDofState {
    pub q: f64,
    pub qd: f64,
    pub qdd: f64,
    /// Effort applied this tick: the command plus damping and soft-limit efforts.
    /// Rebuilt from `tau_command` every tick.
    pub(crate) tau: f64,
    /// Effort requested by controllers or the user.
    pub tau_command: f64,
}

impl OneDofState {
    /// Effort applied during the last tick.
    pub fn tau(&self) -> f64 {
        self.tau
    }
}

/// State of a floating joint. Velocities and efforts are world-aligned and
/// refer to the child body frame origin.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FloatingState {
    pub pose: Transform,
    pub twist: Twist,
    /// Angular acceleration and the acceleration of the body origin.
    pub acceleration: Twist,
    /// Rebuilt from `wrench_command` every tick.
    pub(crate) wrench: Wrench,
    pub wrench_command: Wrench,
}

impl FloatingState {
    /// Wrench applied during the last tick.
    pub fn wrench(&self) -> Wrench {
        self.wrench
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JointState {
    Fixed,
    OneDof(OneDofState),
    Floating(FloatingState),
}

/// A joint of a simulated robot, connecting a parent body (or the world) to its child body.
#[derive(Debug, Clone)]
pub struct SimJoint {
    pub name: String,
    pub joint_type: JointType,
    /// Predecessor body. `None` for the world.
    pub parent: Option<hecs::Entity>,
    /// Successor body.
    pub child: hecs::Entity,
    /// Index of the joint whose child is `parent`.
    pub parent_joint: Option<usize>,
    /// Joint frame in the parent body frame (world frame for root joints).
    pub origin: Transform,
    /// Unit motion axis in the joint frame.
    pub axis: DVec3,
    pub lower_limit: f64,
    pub upper_limit: f64,
    pub effort_limit: f64,
    /// Integrated 1-DoF velocities are held within this bound.
    pub velocity_limit: f64,
    /// Viscous damping coefficient. Negative means none.
    pub damping: f64,
    /// Soft limit stiffness. Negative means none.
    pub kp_soft_limit: f64,
    /// Soft limit damping. Negative means none.
    pub kd_soft_limit: f64,
    pub pinned: bool,
    pub state: JointState,
}

impl SimJoint {
    pub fn new(
        name: impl Into<String>,
        joint_type: JointType,
        parent: Option<hecs::Entity>,
        child: hecs::Entity,
    ) -> Self {
        let state = match joint_type {
            JointType::Fixed => JointState::Fixed,
            JointType::Revolute | JointType::Prismatic => JointState::OneDof(OneDofState::default()),
            JointType::Floating => JointState::Floating(FloatingState::default()),
        };
        Self {
            name: name.into(),
            joint_type,
            parent,
            child,
            parent_joint: None,
            origin: Transform::identity(),
            axis: DVec3::Z,
            lower_limit: f64::NEG_INFINITY,
            upper_limit: f64::INFINITY,
            effort_limit: f64::INFINITY,
            velocity_limit: f64::INFINITY,
            damping: -1.0,
            kp_soft_limit: -1.0,
            kd_soft_limit: -1.0,
            pinned: false,
            state,
        }
    }

    pub fn one_dof(&self) -> Option<&OneDofState> {
        match &self.state {
            JointState::OneDof(state) => Some(state),
            _ => None,
        }
    }

    pub fn one_dof_mut(&mut self) -> Option<&mut OneDofState> {
        match &mut self.state {
            JointState::OneDof(state) => Some(state),
            _ => None,
        }
    }

    pub fn floating(&self) -> Option<&FloatingState> {
        match &self.state {
            JointState::Floating(state) => Some(state),
            _ => None,
        }
    }

    pub fn floating_mut(&mut self) -> Option<&mut FloatingState> {
        match &mut self.state {
            JointState::Floating(state) => Some(state),
            _ => None,
        }
    }

    /// Pinned joints are driven by a (zero) acceleration.
    pub fn source_mode(&self) -> JointSourceMode {
        if self.pinned {
            JointSourceMode::AccelerationSource
        } else {
            JointSourceMode::EffortSource
        }
    }

    /// Child body frame relative to the parent body frame.
    pub fn child_transform(&self) -> Transform {
        match &self.state {
            JointState::Fixed => self.origin,
            JointState::OneDof(state) => {
                let motion = match self.joint_type {
                    JointType::Revolute => Transform::from_rotation_translation(
                        DQuat::from_axis_angle(self.axis, state.q),
                        DVec3::ZERO,
                    ),
                    _ => Transform::from_position(self.axis * state.q),
                };
                self.origin.mul_transform(&motion)
            }
            JointState::Floating(state) => state.pose,
        }
    }

    /// Drop the applied effort back to the commanded one.
    pub fn reset_effort(&mut self) {
        match &mut self.state {
            JointState::OneDof(state) => state.tau = state.tau_command,
            JointState::Floating(state) => state.wrench = state.wrench_command,
            JointState::Fixed => {}
        }
    }

    /// Zero velocity and acceleration of a pinned joint.
    pub fn hold_if_pinned(&mut self) {
        if !self.pinned {
            return;
        }
        match &mut self.state {
            JointState::OneDof(state) => {
                state.qd = 0.0;
                state.qdd = 0.0;
            }
            JointState::Floating(state) => {
                state.twist = Twist::ZERO;
                state.acceleration = Twist::ZERO;
            }
            JointState::Fixed => {}
        }
    }
}

/// The joints of one robot in topological order (parents before children).
#[derive(Debug, Clone, Default)]
pub struct JointSet {
    joints: Vec<SimJoint>,
    by_name: HashMap<String, usize>,
    dof_offsets: Vec<usize>,
    degrees_of_freedom: usize,
}

impl JointSet {
    /// Build a joint set. Joints must already be sorted parents first.
    pub fn new(joints: Vec<SimJoint>) -> Self {
        let by_name = joints
            .iter()
            .enumerate()
            .map(|(i, joint)| (joint.name.clone(), i))
            .collect();
        let mut dof_offsets = Vec::with_capacity(joints.len());
        let mut degrees_of_freedom = 0;
        for joint in &joints {
            dof_offsets.push(degrees_of_freedom);
            degrees_of_freedom += joint.joint_type.degrees_of_freedom();
        }
        Self {
            joints,
            by_name,
            dof_offsets,
            degrees_of_freedom,
        }
    }

    pub fn len(&self) -> usize {
        self.joints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joints.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SimJoint> {
        self.joints.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, SimJoint> {
        self.joints.iter_mut()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn get(&self, name: &str) -> Option<&SimJoint> {
        self.index_of(name).map(|i| &self.joints[i])
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut SimJoint> {
        self.index_of(name).map(move |i| &mut self.joints[i])
    }

    pub fn by_index(&self, index: usize) -> &SimJoint {
        &self.joints[index]
    }

    pub fn by_index_mut(&mut self, index: usize) -> &mut SimJoint {
        &mut self.joints[index]
    }

    /// Offset of a joint's first entry in velocity/acceleration/effort vectors.
    pub fn dof_offset(&self, index: usize) -> usize {
        self.dof_offsets[index]
    }

    /// Total velocity dimension.
    pub fn degrees_of_freedom(&self) -> usize {
        self.degrees_of_freedom
    }

    /// Total configuration dimension.
    pub fn configuration_size(&self) -> usize {
        self.joints
            .iter()
            .map(|joint| joint.joint_type.configuration_size())
            .sum()
    }

    /// Set a joint's commanded effort. Used by controllers.
    pub fn set_effort_command(&mut self, name: &str, effort: f64) -> Result<()> {
        let joint = self
            .get_mut(name)
            .ok_or_else(|| SimulationError::UnknownJoint(name.to_string()))?;
        match joint.one_dof_mut() {
            Some(state) => {
                state.tau_command = effort;
                Ok(())
            }
            None => Err(SimulationError::DimensionMismatch {
                what: "joint effort",
                expected: joint.joint_type.degrees_of_freedom(),
                actual: 1,
            }),
        }
    }

    /// Write the configuration vector: one entry per 1-DoF joint, and
    /// `x y z qx qy qz qw` per floating joint.
    pub fn set_positions(&mut self, positions: &[f64]) -> Result<()> {
        check_size("joint positions", self.configuration_size(), positions.len())?;
        let mut i = 0;
        for joint in &mut self.joints {
            match &mut joint.state {
                JointState::OneDof(state) => {
                    state.q = positions[i];
                    i += 1;
                }
                JointState::Floating(state) => {
                    let p = &positions[i..i + 7];
                    state.pose = Transform::from_rotation_translation(
                        DQuat::from_xyzw(p[3], p[4], p[5], p[6]).normalize(),
                        DVec3::new(p[0], p[1], p[2]),
                    );
                    i += 7;
                }
                JointState::Fixed => {}
            }
        }
        Ok(())
    }

    /// Write the velocity vector: one entry per 1-DoF joint, angular then linear per floating joint.
    pub fn set_velocities(&mut self, velocities: &[f64]) -> Result<()> {
        check_size("joint velocities", self.degrees_of_freedom, velocities.len())?;
        for (joint, offset) in self.joints.iter_mut().zip(&self.dof_offsets) {
            let v = &velocities[*offset..];
            match &mut joint.state {
                JointState::OneDof(state) => state.qd = v[0],
                JointState::Floating(state) => state.twist = twist_from_slice(v),
                JointState::Fixed => {}
            }
        }
        Ok(())
    }

    /// Write the commanded effort vector, laid out like the velocity vector.
    pub fn set_efforts(&mut self, efforts: &[f64]) -> Result<()> {
        check_size("joint efforts", self.degrees_of_freedom, efforts.len())?;
        for (joint, offset) in self.joints.iter_mut().zip(&self.dof_offsets) {
            let e = &efforts[*offset..];
            match &mut joint.state {
                JointState::OneDof(state) => state.tau_command = e[0],
                JointState::Floating(state) => {
                    let twist = twist_from_slice(e);
                    state.wrench_command = Wrench::new(twist.angular, twist.linear);
                }
                JointState::Fixed => {}
            }
        }
        Ok(())
    }

    pub fn positions(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.configuration_size());
        for joint in &self.joints {
            match &joint.state {
                JointState::OneDof(state) => out.push(state.q),
                JointState::Floating(state) => {
                    let p = state.pose.position;
                    let q = state.pose.rotation;
                    out.extend_from_slice(&[p.x, p.y, p.z, q.x, q.y, q.z, q.w]);
                }
                JointState::Fixed => {}
            }
        }
        out
    }

    pub fn velocities(&self) -> Vec<f64> {
        self.collect(|state| state.qd, |state| state.twist)
    }

    pub fn accelerations(&self) -> Vec<f64> {
        self.collect(|state| state.qdd, |state| state.acceleration)
    }

    /// Applied efforts of the last tick.
    pub fn efforts(&self) -> Vec<f64> {
        self.collect(
            |state| state.tau,
            |state| Twist::new(state.wrench.angular, state.wrench.linear),
        )
    }

    fn collect(
        &self,
        one_dof: impl Fn(&OneDofState) -> f64,
        floating: impl Fn(&FloatingState) -> Twist,
    ) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.degrees_of_freedom);
        for joint in &self.joints {
            match &joint.state {
                JointState::OneDof(state) => out.push(one_dof(state)),
                JointState::Floating(state) => {
                    let t = floating(state);
                    out.extend_from_slice(&t.angular.to_array());
                    out.extend_from_slice(&t.linear.to_array());
                }
                JointState::Fixed => {}
            }
        }
        out
    }
}

fn check_size(what: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(SimulationError::DimensionMismatch {
            what,
            expected,
            actual,
        });
    }
    Ok(())
}

fn twist_from_slice(v: &[f64]) -> Twist {
    Twist::new(DVec3::new(v[0], v[1], v[2]), DVec3::new(v[3], v[4], v[5]))
}

/// Viscous damping `τ = −b·qd` for a 1-DoF joint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointDampingCalculator {
    pub joint: usize,
    pub damping: f64,
    pub last_torque: f64,
}

impl JointDampingCalculator {
    /// `None` unless the joint has one degree of freedom and a positive damping coefficient.
    pub fn new(index: usize, joint: &SimJoint) -> Option<Self> {
        (joint.one_dof().is_some() && joint.damping > 0.0).then_some(Self {
            joint: index,
            damping: joint.damping,
            last_torque: 0.0,
        })
    }

    pub fn compute(&mut self, joints: &mut JointSet) {
        if let Some(state) = joints.by_index_mut(self.joint).one_dof_mut() {
            self.last_torque = -self.damping * state.qd;
            state.tau += self.last_torque;
        }
    }
}

/// Spring-damper pushing a 1-DoF joint back inside its position limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointSoftLimitCalculator {
    pub joint: usize,
    pub kp: f64,
    pub kd: f64,
    pub lower: f64,
    pub upper: f64,
    pub last_torque: f64,
}

impl JointSoftLimitCalculator {
    /// `None` unless the joint has one degree of freedom, finite ordered limits
    /// and at least one positive gain.
    pub fn new(index: usize, joint: &SimJoint) -> Option<Self> {
        joint.one_dof()?;
        let lower = joint.lower_limit;
        let upper = joint.upper_limit;
        if !lower.is_finite() || !upper.is_finite() || lower > upper {
            return None;
        }
        let kp = joint.kp_soft_limit.max(0.0);
        let kd = joint.kd_soft_limit.max(0.0);
        if kp <= 0.0 && kd <= 0.0 {
            return None;
        }
        Some(Self {
            joint: index,
            kp,
            kd,
            lower,
            upper,
            last_torque: 0.0,
        })
    }

    pub fn compute(&mut self, joints: &mut JointSet) {
        if let Some(state) = joints.by_index_mut(self.joint).one_dof_mut() {
            self.last_torque =
                soft_limit_torque(self.kp, self.kd, self.lower, self.upper, state.q, state.qd);
            state.tau += self.last_torque;
        }
    }
}

/// Soft limit torque: pushes up below `lower`, down above `upper`, zero in between.
pub fn soft_limit_torque(kp: f64, kd: f64, lower: f64, upper: f64, q: f64, qd: f64) -> f64 {
    if q < lower {
        (kp * (lower - q) - kd * qd).max(0.0)
    } else if q > upper {
        (kp * (upper - q) - kd * qd).min(0.0)
    } else {
        0.0
    }
}
