//! Collidables: collision shapes bound to a body (or to the world) with a filter mask and group.

use glam::DAffine3;

use crate::ecs::components::physics::ColliderShape;
use crate::ecs::components::transform::GlobalTransform;

use super::collider::PhysicsAabb;

/// Mask/group value that matches every other collidable.
pub const MATCH_ALL: i32 = -1;

/// A collision shape attached to a rigid body, or to the world for terrain.
#[derive(Debug, Clone)]
pub struct Collidable {
    pub name: String,
    /// Owning body. `None` for static terrain.
    pub body: Option<hecs::Entity>,
    pub collision_mask: i32,
    pub collision_group: i32,
    pub shape: ColliderShape,
    /// Pose of the shape in the body frame (world frame for terrain).
    pub shape_pose: DAffine3,
    /// World pose of the shape, refreshed every tick.
    pub world_pose: GlobalTransform,
    pub aabb: PhysicsAabb,
}

impl Collidable {
    /// Static terrain shape at a fixed world pose.
    pub fn fixed(name: impl Into<String>, shape: ColliderShape, pose: DAffine3) -> Self {
        let world_pose = GlobalTransform(pose);
        let aabb = shape.compute_aabb(&world_pose);
        Self {
            name: name.into(),
            body: None,
            collision_mask: MATCH_ALL,
            collision_group: MATCH_ALL,
            shape,
            shape_pose: pose,
            world_pose,
            aabb,
        }
    }

    /// Shape rigidly attached to `body` at `shape_pose` in the body frame.
    pub fn attached(
        name: impl Into<String>,
        body: hecs::Entity,
        shape: ColliderShape,
        shape_pose: DAffine3,
    ) -> Self {
        Self {
            name: name.into(),
            body: Some(body),
            collision_mask: MATCH_ALL,
            collision_group: MATCH_ALL,
            shape,
            shape_pose,
            world_pose: GlobalTransform(shape_pose),
            aabb: PhysicsAabb::default(),
        }
    }

    pub fn with_filter(mut self, collision_mask: i32, collision_group: i32) -> Self {
        self.collision_mask = collision_mask;
        self.collision_group = collision_group;
        self
    }

    pub fn is_static(&self) -> bool {
        self.body.is_none()
    }

    /// Whether this collidable may interact with `other`.
    ///
    /// `(A.group & B.mask) != 0 && (B.group & A.mask) != 0`, or any of the four
    /// values is [`MATCH_ALL`].
    pub fn is_collidable_with(&self, other: &Collidable) -> bool {
        if self.collision_mask == MATCH_ALL
            || self.collision_group == MATCH_ALL
            || other.collision_mask == MATCH_ALL
            || other.collision_group == MATCH_ALL
        {
            return true;
        }
        (self.collision_group & other.collision_mask) != 0
            && (other.collision_group & self.collision_mask) != 0
    }

    /// Refresh the world pose from the owning body's frame.
    pub fn update_pose(&mut self, body_frame: &GlobalTransform) {
        self.world_pose = GlobalTransform(body_frame.0 * self.shape_pose);
    }

    pub fn update_bounding_box(&mut self) {
        self.aabb = self.shape.compute_aabb(&self.world_pose);
    }

    /// Refresh the world pose from the ECS, then the bounding box.
    ///
    /// Terrain keeps its fixed pose.
    pub fn update(&mut self, world: &hecs::World) {
        if let Some(body) = self.body {
            if let Ok(frame) = world.get::<&GlobalTransform>(body) {
                self.update_pose(&frame);
            }
        }
        self.update_bounding_box();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec3;

    fn sphere(mask: i32, group: i32) -> Collidable {
        Collidable::fixed(
            "sphere",
            ColliderShape::Sphere { radius: 1.0 },
            DAffine3::IDENTITY,
        )
        .with_filter(mask, group)
    }

    #[test]
    fn test_filter_formula() {
        let a = sphere(0b0010, 0b0001);
        let b = sphere(0b0001, 0b0010);
        let c = sphere(0b0001, 0b0100);

        assert!(a.is_collidable_with(&b));
        assert!(b.is_collidable_with(&a));
        // c's group is outside a's mask.
        assert!(!a.is_collidable_with(&c));
        // One-sided match is not enough.
        let d = sphere(0b0100, 0b0010);
        assert!((a.collision_group & d.collision_mask) == 0);
        assert!(!a.is_collidable_with(&d));
    }

    #[test]
    fn test_filter_match_all_on_either_side() {
        let none = sphere(0, 0);
        assert!(!none.is_collidable_with(&sphere(0, 0)));
        assert!(none.is_collidable_with(&sphere(MATCH_ALL, 0)));
        assert!(none.is_collidable_with(&sphere(0, MATCH_ALL)));
        assert!(sphere(MATCH_ALL, 0).is_collidable_with(&none));
        assert!(sphere(0, MATCH_ALL).is_collidable_with(&none));
    }

    #[test]
    fn test_update_pose_follows_body() {
        let mut world = hecs::World::new();
        let body = world.spawn((GlobalTransform(DAffine3::from_translation(DVec3::new(
            1.0, 2.0, 3.0,
        ))),));
        let mut collidable = Collidable::attached(
            "foot",
            body,
            ColliderShape::Sphere { radius: 0.1 },
            DAffine3::from_translation(DVec3::new(0.0, 0.0, -0.5)),
        );

        collidable.update(&world);

        let eps = 1e-12;
        assert!((collidable.world_pose.translation() - DVec3::new(1.0, 2.0, 2.5)).length() < eps);
        assert!((collidable.aabb.min - DVec3::new(0.9, 1.9, 2.4)).length() < eps);
        assert!((collidable.aabb.max - DVec3::new(1.1, 2.1, 2.6)).length() < eps);
    }
}
