//! Collider shape support functions, bounding boxes and point queries.

use glam::{DAffine3, DVec3};

use crate::ecs::components::physics::ColliderShape;
use crate::ecs::components::transform::GlobalTransform;

use super::narrowphase;

/// Axis-aligned bounding box in world coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhysicsAabb {
    pub min: DVec3,
    pub max: DVec3,
}

impl PhysicsAabb {
    /// Unbounded box, used for half-spaces.
    pub const EVERYTHING: PhysicsAabb = PhysicsAabb {
        min: DVec3::NEG_INFINITY,
        max: DVec3::INFINITY,
    };

    /// Test whether two AABBs overlap.
    #[inline]
    pub fn overlaps(&self, other: &PhysicsAabb) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    /// Test whether a point lies inside the box, boundary included.
    #[inline]
    pub fn contains_inclusive(&self, point: DVec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }
}

impl Default for PhysicsAabb {
    fn default() -> Self {
        Self {
            min: DVec3::ZERO,
            max: DVec3::ZERO,
        }
    }
}

/// Result of querying a point against a shape surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointQuery {
    /// Closest point on the shape surface, in world coordinates.
    pub closest: DVec3,
    /// Outward surface normal at `closest`, in world coordinates.
    pub normal: DVec3,
    /// Whether the query point is inside the shape (boundary included).
    pub is_inside: bool,
    /// Signed distance from the surface, negative when inside.
    pub signed_distance: f64,
}

impl ColliderShape {
    /// GJK/EPA support function. Returns the farthest point in the given direction.
    ///
    /// Must not be called on unbounded shapes.
    #[inline]
    pub fn support(&self, direction: DVec3, transform: &GlobalTransform) -> DVec3 {
        let mat = transform.0;
        // Rigid transforms only: the inverse rotation is the transpose.
        let local_dir = mat.matrix3.transpose().mul_vec3(direction).normalize_or_zero();

        let local_point = match self {
            ColliderShape::Sphere { radius } => local_dir * *radius,
            ColliderShape::Box { half_extents } => DVec3::new(
                if local_dir.x >= 0.0 {
                    half_extents.x
                } else {
                    -half_extents.x
                },
                if local_dir.y >= 0.0 {
                    half_extents.y
                } else {
                    -half_extents.y
                },
                if local_dir.z >= 0.0 {
                    half_extents.z
                } else {
                    -half_extents.z
                },
            ),
            ColliderShape::Capsule {
                radius,
                half_height,
            } => {
                let base = if local_dir.z >= 0.0 {
                    DVec3::new(0.0, 0.0, *half_height)
                } else {
                    DVec3::new(0.0, 0.0, -*half_height)
                };
                base + local_dir * *radius
            }
            ColliderShape::Cylinder {
                radius,
                half_height,
            } => {
                let z = if local_dir.z >= 0.0 {
                    *half_height
                } else {
                    -*half_height
                };
                let xy = DVec3::new(local_dir.x, local_dir.y, 0.0);
                let xy_len = xy.length();
                let xy_point = if xy_len > 1e-12 {
                    xy * (*radius / xy_len)
                } else {
                    DVec3::ZERO
                };
                DVec3::new(xy_point.x, xy_point.y, z)
            }
            ColliderShape::ConvexHull { points } => {
                if points.is_empty() {
                    DVec3::ZERO
                } else {
                    let mut best = points[0];
                    let mut best_dot = best.dot(local_dir);
                    for p in &points[1..] {
                        let d = p.dot(local_dir);
                        if d > best_dot {
                            best_dot = d;
                            best = *p;
                        }
                    }
                    best
                }
            }
            ColliderShape::Point => DVec3::ZERO,
            ColliderShape::HalfSpace { .. } => {
                debug_assert!(false, "support queried on an unbounded half-space");
                DVec3::ZERO
            }
        };

        mat.transform_point3(local_point)
    }

    /// Compute the world-space AABB for this shape.
    #[inline]
    pub fn compute_aabb(&self, transform: &GlobalTransform) -> PhysicsAabb {
        let mat = transform.0;

        match self {
            ColliderShape::Sphere { radius } => {
                let center = mat.translation;
                PhysicsAabb {
                    min: center - DVec3::splat(*radius),
                    max: center + DVec3::splat(*radius),
                }
            }
            ColliderShape::Box { half_extents } => aabb_from_extents(*half_extents, mat),
            ColliderShape::Capsule {
                radius,
                half_height,
            } => {
                let extents = DVec3::new(*radius, *radius, *half_height + *radius);
                aabb_from_extents(extents, mat)
            }
            ColliderShape::Cylinder {
                radius,
                half_height,
            } => {
                let extents = DVec3::new(*radius, *radius, *half_height);
                aabb_from_extents(extents, mat)
            }
            ColliderShape::ConvexHull { points } => {
                if points.is_empty() {
                    let center = mat.translation;
                    return PhysicsAabb {
                        min: center,
                        max: center,
                    };
                }
                let mut min = DVec3::splat(f64::MAX);
                let mut max = DVec3::splat(f64::MIN);
                for p in points {
                    let wp = mat.transform_point3(*p);
                    min = min.min(wp);
                    max = max.max(wp);
                }
                PhysicsAabb { min, max }
            }
            ColliderShape::Point => PhysicsAabb {
                min: mat.translation,
                max: mat.translation,
            },
            ColliderShape::HalfSpace { normal } => half_space_aabb(mat, *normal),
        }
    }

    /// Whether a world-space point lies inside the shape, boundary included.
    pub fn is_point_inside(&self, point: DVec3, transform: &GlobalTransform) -> bool {
        let local = transform.0.inverse().transform_point3(point);

        match self {
            ColliderShape::Sphere { radius } => local.length_squared() <= radius * radius,
            ColliderShape::Box { half_extents } => local.abs().cmple(*half_extents).all(),
            ColliderShape::Capsule {
                radius,
                half_height,
            } => {
                let axis_point = DVec3::new(0.0, 0.0, local.z.clamp(-*half_height, *half_height));
                local.distance_squared(axis_point) <= radius * radius
            }
            ColliderShape::Cylinder {
                radius,
                half_height,
            } => {
                local.z.abs() <= *half_height
                    && local.x * local.x + local.y * local.y <= radius * radius
            }
            ColliderShape::HalfSpace { normal } => normal.normalize_or_zero().dot(local) <= 0.0,
            ColliderShape::Point => local.length_squared() <= 1e-24,
            ColliderShape::ConvexHull { .. } => self.evaluate_point_collision(point, transform).is_inside,
        }
    }

    /// Closest surface point and outward normal for a world-space point.
    ///
    /// Works for points both inside and outside the shape.
    pub fn evaluate_point_collision(&self, point: DVec3, transform: &GlobalTransform) -> PointQuery {
        let mat = transform.0;
        let local = mat.inverse().transform_point3(point);

        let (closest, normal, is_inside) = match self {
            ColliderShape::Sphere { radius } => {
                let dir = local.try_normalize().unwrap_or(DVec3::Z);
                (dir * *radius, dir, local.length_squared() <= radius * radius)
            }
            ColliderShape::Box { half_extents } => box_point_query(*half_extents, local),
            ColliderShape::Capsule {
                radius,
                half_height,
            } => {
                let axis_point = DVec3::new(0.0, 0.0, local.z.clamp(-*half_height, *half_height));
                let offset = local - axis_point;
                let dir = offset.try_normalize().unwrap_or(DVec3::X);
                (
                    axis_point + dir * *radius,
                    dir,
                    offset.length_squared() <= radius * radius,
                )
            }
            ColliderShape::Cylinder {
                radius,
                half_height,
            } => cylinder_point_query(*radius, *half_height, local),
            ColliderShape::HalfSpace { normal } => {
                let n = normal.try_normalize().unwrap_or(DVec3::Z);
                let height = n.dot(local);
                (local - n * height, n, height <= 0.0)
            }
            ColliderShape::Point => (DVec3::ZERO, local.try_normalize().unwrap_or(DVec3::Z), local.length_squared() <= 1e-24),
            ColliderShape::ConvexHull { .. } => {
                return narrowphase::point_query_convex(self, transform, point);
            }
        };

        let closest = mat.transform_point3(closest);
        let normal = mat.transform_vector3(normal).normalize_or_zero();
        let distance = point.distance(closest);
        PointQuery {
            closest,
            normal,
            is_inside,
            signed_distance: if is_inside { -distance } else { distance },
        }
    }
}

fn box_point_query(half_extents: DVec3, local: DVec3) -> (DVec3, DVec3, bool) {
    let inside = local.abs().cmple(half_extents).all();

    if inside {
        // Project onto the nearest face.
        let mut min_depth = f64::MAX;
        let mut axis = 2;
        for i in 0..3 {
            let depth = half_extents[i] - local[i].abs();
            if depth < min_depth {
                min_depth = depth;
                axis = i;
            }
        }
        let sign = if local[axis] >= 0.0 { 1.0 } else { -1.0 };
        let mut closest = local;
        closest[axis] = sign * half_extents[axis];
        let mut normal = DVec3::ZERO;
        normal[axis] = sign;
        (closest, normal, true)
    } else {
        let closest = local.clamp(-half_extents, half_extents);
        let normal = (local - closest).normalize_or_zero();
        (closest, normal, false)
    }
}

fn cylinder_point_query(radius: f64, half_height: f64, local: DVec3) -> (DVec3, DVec3, bool) {
    let radial = DVec3::new(local.x, local.y, 0.0);
    let rho = radial.length();
    let radial_dir = if rho > 1e-12 { radial / rho } else { DVec3::X };
    let inside = rho <= radius && local.z.abs() <= half_height;

    if inside {
        let side_depth = radius - rho;
        let cap_depth = half_height - local.z.abs();
        if side_depth < cap_depth {
            (radial_dir * radius + DVec3::Z * local.z, radial_dir, true)
        } else {
            let sign = if local.z >= 0.0 { 1.0 } else { -1.0 };
            (
                DVec3::new(local.x, local.y, sign * half_height),
                DVec3::Z * sign,
                true,
            )
        }
    } else {
        let closest = radial_dir * rho.min(radius) + DVec3::Z * local.z.clamp(-half_height, half_height);
        let normal = (local - closest).try_normalize().unwrap_or(radial_dir);
        (closest, normal, false)
    }
}

/// Compute world-space AABB from local half-extents and a rigid transform.
#[inline]
fn aabb_from_extents(half_extents: DVec3, mat: DAffine3) -> PhysicsAabb {
    let center = mat.translation;

    // For each world axis, compute the extent by projecting the local box axes
    let abs_col0 = mat.matrix3.x_axis.abs();
    let abs_col1 = mat.matrix3.y_axis.abs();
    let abs_col2 = mat.matrix3.z_axis.abs();

    let extent = abs_col0 * half_extents.x + abs_col1 * half_extents.y + abs_col2 * half_extents.z;

    PhysicsAabb {
        min: center - extent,
        max: center + extent,
    }
}

/// A half-space is only bounded along an axis-aligned normal, and only on one side.
fn half_space_aabb(mat: DAffine3, normal: DVec3) -> PhysicsAabb {
    let world_normal = mat.transform_vector3(normal).normalize_or_zero();
    let origin = mat.translation;
    let mut aabb = PhysicsAabb::EVERYTHING;
    for i in 0..3 {
        let mut axis = DVec3::ZERO;
        axis[i] = 1.0;
        let alignment = world_normal.dot(axis);
        if (alignment - 1.0).abs() < 1e-12 {
            aabb.max[i] = origin[i];
        } else if (alignment + 1.0).abs() < 1e-12 {
            aabb.min[i] = origin[i];
        }
    }
    aabb
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DQuat;

    fn at(position: DVec3) -> GlobalTransform {
        GlobalTransform(DAffine3::from_translation(position))
    }

    #[test]
    fn test_sphere_aabb() {
        let shape = ColliderShape::Sphere { radius: 1.0 };
        let aabb = shape.compute_aabb(&at(DVec3::new(0.0, 0.0, 5.0)));

        let eps = 1e-12;
        assert!((aabb.min - DVec3::new(-1.0, -1.0, 4.0)).length() < eps);
        assert!((aabb.max - DVec3::new(1.0, 1.0, 6.0)).length() < eps);
    }

    #[test]
    fn test_box_aabb() {
        let shape = ColliderShape::Box {
            half_extents: DVec3::new(1.0, 2.0, 3.0),
        };
        let aabb = shape.compute_aabb(&GlobalTransform::default());

        let eps = 1e-12;
        assert!((aabb.min - DVec3::new(-1.0, -2.0, -3.0)).length() < eps);
        assert!((aabb.max - DVec3::new(1.0, 2.0, 3.0)).length() < eps);
    }

    #[test]
    fn test_ground_plane_aabb_is_bounded_above() {
        let aabb = ColliderShape::ground_plane().compute_aabb(&GlobalTransform::default());
        assert_eq!(aabb.max.z, 0.0);
        assert_eq!(aabb.min.z, f64::NEG_INFINITY);
        assert!(aabb.contains_inclusive(DVec3::new(100.0, -50.0, -0.1)));
        assert!(aabb.contains_inclusive(DVec3::new(0.0, 0.0, 0.0)));
        assert!(!aabb.contains_inclusive(DVec3::new(0.0, 0.0, 0.1)));
    }

    #[test]
    fn test_aabb_overlap() {
        let a = PhysicsAabb {
            min: DVec3::splat(-1.0),
            max: DVec3::splat(1.0),
        };
        let b = PhysicsAabb {
            min: DVec3::splat(0.5),
            max: DVec3::splat(2.0),
        };
        let c = PhysicsAabb {
            min: DVec3::splat(2.0),
            max: DVec3::splat(3.0),
        };
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn test_sphere_support() {
        let shape = ColliderShape::Sphere { radius: 2.0 };
        let support = shape.support(DVec3::Z, &at(DVec3::new(0.0, 0.0, 5.0)));
        assert!((support - DVec3::new(0.0, 0.0, 7.0)).length() < 1e-12);
    }

    #[test]
    fn test_rotated_box_support() {
        let shape = ColliderShape::Box {
            half_extents: DVec3::new(2.0, 1.0, 1.0),
        };
        let transform = GlobalTransform(DAffine3::from_quat(DQuat::from_rotation_z(
            std::f64::consts::FRAC_PI_2,
        )));
        // The long local X axis now points along world Y.
        let support = shape.support(DVec3::Y, &transform);
        assert!((support.y - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_point_inside_box_reports_nearest_face() {
        let shape = ColliderShape::Box {
            half_extents: DVec3::new(1.0, 1.0, 0.5),
        };
        let query = shape.evaluate_point_collision(DVec3::new(0.2, -0.1, 0.4), &GlobalTransform::default());

        let eps = 1e-12;
        assert!(query.is_inside);
        assert!((query.normal - DVec3::Z).length() < eps);
        assert!((query.closest - DVec3::new(0.2, -0.1, 0.5)).length() < eps);
        assert!((query.signed_distance + 0.1).abs() < eps);
    }

    #[test]
    fn test_point_outside_capsule() {
        let shape = ColliderShape::Capsule {
            radius: 0.5,
            half_height: 1.0,
        };
        let query = shape.evaluate_point_collision(DVec3::new(2.0, 0.0, 0.3), &GlobalTransform::default());

        let eps = 1e-12;
        assert!(!query.is_inside);
        assert!((query.normal - DVec3::X).length() < eps);
        assert!((query.closest - DVec3::new(0.5, 0.0, 0.3)).length() < eps);
        assert!((query.signed_distance - 1.5).abs() < eps);
    }

    #[test]
    fn test_point_against_translated_half_space() {
        let shape = ColliderShape::ground_plane();
        let transform = at(DVec3::new(0.0, 0.0, 1.0));
        assert!(shape.is_point_inside(DVec3::new(3.0, 4.0, 0.99), &transform));
        assert!(!shape.is_point_inside(DVec3::new(3.0, 4.0, 1.01), &transform));

        let query = shape.evaluate_point_collision(DVec3::new(3.0, 4.0, 0.75), &transform);
        assert!((query.closest - DVec3::new(3.0, 4.0, 1.0)).length() < 1e-12);
        assert!((query.normal - DVec3::Z).length() < 1e-12);
    }

    #[test]
    fn test_cylinder_point_inside_near_side() {
        let shape = ColliderShape::Cylinder {
            radius: 1.0,
            half_height: 2.0,
        };
        let query = shape.evaluate_point_collision(DVec3::new(0.0, 0.9, 0.0), &GlobalTransform::default());
        assert!(query.is_inside);
        assert!((query.normal - DVec3::Y).length() < 1e-12);
        assert!((query.closest - DVec3::new(0.0, 1.0, 0.0)).length() < 1e-12);
    }
}
