//! Body frame propagation through the Parent/Children hierarchy.

use glam::DAffine3;

use crate::ecs::components::transform::{Children, GlobalTransform, Parent, Transform};

/// Propagate body frames through the Parent/Children hierarchy.
///
/// Phase 1: root bodies (no Parent) get GlobalTransform = Transform.
/// Phase 2: children are composed onto their parent recursively.
pub fn transform_system(world: &mut hecs::World) {
    let roots: Vec<(hecs::Entity, DAffine3)> = world
        .query_mut::<hecs::Without<(&Transform, &GlobalTransform), &Parent>>()
        .into_iter()
        .map(|(entity, (transform, _))| (entity, transform.to_affine()))
        .collect();

    for (entity, pose) in &roots {
        if let Ok(mut global) = world.get::<&mut GlobalTransform>(*entity) {
            global.0 = *pose;
        }
    }

    for (entity, pose) in roots {
        if world.satisfies::<&Children>(entity).unwrap_or(false) {
            propagate_children(world, entity, pose);
        }
    }
}

fn propagate_children(world: &mut hecs::World, parent: hecs::Entity, parent_global: DAffine3) {
    // Clone to release the borrow before writing children.
    let children = match world.get::<&Children>(parent) {
        Ok(c) => c.0.clone(),
        Err(_) => return,
    };

    for child in children {
        let child_global = match world.get::<&Transform>(child) {
            Ok(transform) => parent_global * transform.to_affine(),
            Err(_) => parent_global,
        };

        if let Ok(mut global) = world.get::<&mut GlobalTransform>(child) {
            global.0 = child_global;
        }

        if world.satisfies::<&Children>(child).unwrap_or(false) {
            propagate_children(world, child, child_global);
        }
    }
}
