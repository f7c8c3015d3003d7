//! Body frames, body velocities and ground contact point frames from joint state.

use glam::{DAffine3, DVec3};

use crate::ecs::components::physics::{BodyVelocity, GroundContactPoints};
use crate::ecs::components::transform::{GlobalTransform, Transform};
use crate::ecs::systems::transform_system;

use super::joint::{JointSet, JointState, JointType};
use super::spatial::Twist;

/// Refresh everything derived from joint state for one robot.
///
/// Sets each child body's local transform from its joint, propagates world
/// frames, then world twists root to leaf, then ground contact point frames.
pub fn update_frames(world: &mut hecs::World, joints: &JointSet) {
    update_local_transforms(world, joints);
    transform_system(world);
    update_body_velocities(world, joints);
    update_ground_contact_points(world, joints);
}

pub fn update_local_transforms(world: &mut hecs::World, joints: &JointSet) {
    for joint in joints.iter() {
        if let Ok(mut transform) = world.get::<&mut Transform>(joint.child) {
            *transform = joint.child_transform();
        }
    }
}

/// World twist of each body, about its frame origin. Requires fresh global transforms.
pub fn update_body_velocities(world: &mut hecs::World, joints: &JointSet) {
    for joint in joints.iter() {
        let frame = world
            .get::<&GlobalTransform>(joint.child)
            .map(|frame| *frame)
            .unwrap_or_default();
        let origin = frame.translation();

        let (parent_twist, parent_origin) = match joint.parent {
            Some(parent) => (
                world.get::<&BodyVelocity>(parent).map(|v| v.0).unwrap_or_default(),
                world
                    .get::<&GlobalTransform>(parent)
                    .map(|frame| frame.translation())
                    .unwrap_or_default(),
            ),
            None => (Twist::ZERO, origin),
        };
        let carried = Twist::new(
            parent_twist.angular,
            parent_twist.linear_velocity_at(origin - parent_origin),
        );

        let twist = match &joint.state {
            JointState::OneDof(state) => {
                let axis = frame.transform_vector(joint.axis).normalize_or_zero();
                match joint.joint_type {
                    JointType::Revolute => carried + Twist::new(axis * state.qd, DVec3::ZERO),
                    _ => carried + Twist::new(DVec3::ZERO, axis * state.qd),
                }
            }
            JointState::Floating(state) => state.twist,
            JointState::Fixed => carried,
        };

        if let Ok(mut velocity) = world.get::<&mut BodyVelocity>(joint.child) {
            velocity.0 = twist;
        }
    }
}

/// Move every ground contact point with its body.
pub fn update_ground_contact_points(world: &mut hecs::World, joints: &JointSet) {
    for joint in joints.iter() {
        let Ok(mut query) =
            world.query_one::<(&GlobalTransform, &BodyVelocity, &mut GroundContactPoints)>(joint.child)
        else {
            continue;
        };
        let Some((frame, velocity, points)) = query.get() else {
            continue;
        };
        for point in &mut points.0 {
            let position = frame.transform_point(point.offset);
            point.frame = DAffine3::from_mat3_translation(frame.0.matrix3, position);
            point.velocity = velocity.0.linear_velocity_at(position - frame.translation());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::components::transform::{Children, Parent};
    use crate::physics::ground_contact::GroundContactPoint;
    use crate::physics::joint::SimJoint;

    fn spawn_body(world: &mut hecs::World) -> hecs::Entity {
        world.spawn((
            Transform::identity(),
            GlobalTransform::default(),
            BodyVelocity::default(),
        ))
    }

    /// Floating base with a revolute arm one metre along X, turning about Z.
    fn arm(world: &mut hecs::World) -> JointSet {
        let base = spawn_body(world);
        let link = spawn_body(world);
        world.insert_one(link, Parent(base)).unwrap();
        world.insert_one(base, Children(vec![link])).unwrap();
        world
            .insert_one(
                link,
                GroundContactPoints(vec![GroundContactPoint::new("tip", DVec3::X)]),
            )
            .unwrap();

        let root = SimJoint::new("root", JointType::Floating, None, base);
        let mut shoulder = SimJoint::new("shoulder", JointType::Revolute, Some(base), link);
        shoulder.origin = Transform::from_position(DVec3::X);
        shoulder.parent_joint = Some(0);
        JointSet::new(vec![root, shoulder])
    }

    #[test]
    fn test_frames_follow_joint_positions() {
        let mut world = hecs::World::new();
        let mut joints = arm(&mut world);
        joints
            .set_positions(&[0.0, 0.0, 2.0, 0.0, 0.0, 0.0, 1.0, std::f64::consts::FRAC_PI_2])
            .unwrap();

        update_frames(&mut world, &joints);

        let link = joints.by_index(1).child;
        let frame = *world.get::<&GlobalTransform>(link).unwrap();
        let eps = 1e-12;
        assert!((frame.translation() - DVec3::new(1.0, 0.0, 2.0)).length() < eps);

        // Tip at local X is rotated onto world Y.
        let points = world.get::<&GroundContactPoints>(link).unwrap();
        assert!((points.0[0].position() - DVec3::new(1.0, 1.0, 2.0)).length() < eps);
    }

    #[test]
    fn test_velocities_propagate_root_to_leaf() {
        let mut world = hecs::World::new();
        let mut joints = arm(&mut world);
        // Base translating along Y and spinning about Z, arm turning about Z.
        joints
            .set_velocities(&[0.0, 0.0, 1.0, 0.0, 2.0, 0.0, 3.0])
            .unwrap();

        update_frames(&mut world, &joints);

        let link = joints.by_index(1).child;
        let velocity = world.get::<&BodyVelocity>(link).unwrap().0;
        let eps = 1e-12;
        assert!((velocity.angular - DVec3::new(0.0, 0.0, 4.0)).length() < eps);
        // Arm origin one metre along X: 2 + 1 * 1 along Y.
        assert!((velocity.linear - DVec3::new(0.0, 3.0, 0.0)).length() < eps);

        // Tip a further metre along X: 3 + 4 * 1 along Y.
        let points = world.get::<&GroundContactPoints>(link).unwrap();
        assert!((points.0[0].velocity - DVec3::new(0.0, 7.0, 0.0)).length() < eps);
    }
}
