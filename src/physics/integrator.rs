//! Joint state integration.

use glam::{DQuat, DVec3};

use super::joint::{JointSet, JointState};

/// Advance every unpinned joint by `dt`.
///
/// 1-DoF joints use `q += qd·dt + ½·qdd·dt²` then `qd += qdd·dt`, with the
/// new velocity held within the joint velocity limit. Floating joints are
/// semi-implicit: the twist is updated first and the pose moves with the new
/// twist.
pub fn integrate_joints(joints: &mut JointSet, dt: f64) {
    for joint in joints.iter_mut() {
        if joint.pinned {
            continue;
        }
        let velocity_limit = joint.velocity_limit;
        match &mut joint.state {
            JointState::OneDof(state) => {
                state.q += state.qd * dt + 0.5 * state.qdd * dt * dt;
                state.qd += state.qdd * dt;
                if state.qd.abs() > velocity_limit {
                    state.qd = velocity_limit.copysign(state.qd);
                }
            }
            JointState::Floating(state) => {
                state.twist += state.acceleration * dt;
                state.pose.position += state.twist.linear * dt;
                state.pose.rotation = integrate_rotation(state.pose.rotation, state.twist.angular, dt);
            }
            JointState::Fixed => {}
        }
    }
}

/// `q' = q + ½·dt·ω⊗q`, renormalized. `omega` is world-frame.
fn integrate_rotation(rotation: DQuat, omega: DVec3, dt: f64) -> DQuat {
    if omega.length_squared() <= 1e-20 {
        return rotation;
    }
    let omega_quat = DQuat::from_xyzw(omega.x, omega.y, omega.z, 0.0);
    let q_dot = omega_quat * rotation * 0.5;
    DQuat::from_xyzw(
        rotation.x + q_dot.x * dt,
        rotation.y + q_dot.y * dt,
        rotation.z + q_dot.z * dt,
        rotation.w + q_dot.w * dt,
    )
    .normalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::joint::{JointType, SimJoint};
    use crate::physics::spatial::Twist;

    fn joints() -> JointSet {
        let mut world = hecs::World::new();
        let root = SimJoint::new("root", JointType::Floating, None, world.spawn(()));
        let slider = SimJoint::new("slider", JointType::Prismatic, None, world.spawn(()));
        JointSet::new(vec![root, slider])
    }

    #[test]
    fn test_one_dof_uses_second_order_position_update() {
        let mut joints = joints();
        if let Some(state) = joints.by_index_mut(1).one_dof_mut() {
            state.q = 1.0;
            state.qd = 2.0;
            state.qdd = -4.0;
        }
        integrate_joints(&mut joints, 0.1);

        let state = joints.by_index(1).one_dof().expect("one dof");
        assert!((state.q - (1.0 + 0.2 - 0.02)).abs() < 1e-12);
        assert!((state.qd - 1.6).abs() < 1e-12);
    }

    #[test]
    fn test_one_dof_velocity_is_held_at_limit() {
        let mut joints = joints();
        let slider = joints.by_index_mut(1);
        slider.velocity_limit = 1.5;
        if let Some(state) = slider.one_dof_mut() {
            state.qd = -1.0;
            state.qdd = -10.0;
        }
        integrate_joints(&mut joints, 0.1);

        let state = joints.by_index(1).one_dof().expect("one dof");
        assert_eq!(state.qd, -1.5);
        // The position step still uses the unclamped motion.
        assert!((state.q - (-0.1 - 0.05)).abs() < 1e-12);
    }

    #[test]
    fn test_floating_is_semi_implicit() {
        let mut joints = joints();
        if let Some(state) = joints.by_index_mut(0).floating_mut() {
            state.twist = Twist::new(DVec3::ZERO, DVec3::new(1.0, 0.0, 0.0));
            state.acceleration = Twist::new(DVec3::ZERO, DVec3::new(0.0, 0.0, -10.0));
        }
        integrate_joints(&mut joints, 0.01);

        let state = joints.by_index(0).floating().expect("floating");
        assert!((state.twist.linear - DVec3::new(1.0, 0.0, -0.1)).length() < 1e-12);
        assert!((state.pose.position - DVec3::new(0.01, 0.0, -0.001)).length() < 1e-12);
    }

    #[test]
    fn test_floating_rotation_about_z() {
        let mut joints = joints();
        if let Some(state) = joints.by_index_mut(0).floating_mut() {
            state.twist = Twist::new(DVec3::new(0.0, 0.0, 1.0), DVec3::ZERO);
        }
        let dt = 1e-4;
        for _ in 0..10_000 {
            integrate_joints(&mut joints, dt);
        }

        // One radian about Z.
        let state = joints.by_index(0).floating().expect("floating");
        let (axis, angle) = state.pose.rotation.to_axis_angle();
        assert!((angle - 1.0).abs() < 1e-3);
        assert!((axis - DVec3::Z).length() < 1e-6);
    }

    #[test]
    fn test_pinned_joint_is_not_integrated() {
        let mut joints = joints();
        let joint = joints.by_index_mut(1);
        joint.pinned = true;
        if let Some(state) = joint.one_dof_mut() {
            state.qd = 3.0;
        }
        integrate_joints(&mut joints, 0.1);
        assert_eq!(joints.by_index(1).one_dof().map(|s| s.q), Some(0.0));
    }
}
