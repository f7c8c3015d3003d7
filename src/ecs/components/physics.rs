//! Physics components for body entities.

use glam::{DMat3, DVec3};

use crate::physics::ground_contact::GroundContactPoint;
use crate::physics::spatial::{Twist, Wrench};

/// Collision shape, expressed in its own local frame.
///
/// Capsules and cylinders are aligned with the local Z axis.
#[derive(Debug, Clone, PartialEq)]
pub enum ColliderShape {
    Sphere { radius: f64 },
    Box { half_extents: DVec3 },
    Capsule { radius: f64, half_height: f64 },
    Cylinder { radius: f64, half_height: f64 },
    ConvexHull { points: Vec<DVec3> },
    /// Solid half-space below the plane through the local origin with the given outward normal.
    HalfSpace { normal: DVec3 },
    Point,
}

impl ColliderShape {
    /// Ground plane at `z = 0` with the solid side below.
    pub fn ground_plane() -> Self {
        ColliderShape::HalfSpace { normal: DVec3::Z }
    }

    /// Whether the shape has a finite extent (and therefore a GJK support function).
    pub fn is_bounded(&self) -> bool {
        !matches!(self, ColliderShape::HalfSpace { .. })
    }
}

/// Mass properties of a rigid body, expressed in the body frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MassProperties {
    pub mass: f64,
    /// Centre of mass offset from the body frame origin.
    pub center_of_mass: DVec3,
    /// Rotational inertia about the centre of mass.
    pub inertia: DMat3,
}

impl MassProperties {
    pub fn new(mass: f64, center_of_mass: DVec3, inertia: DMat3) -> Self {
        Self {
            mass,
            center_of_mass,
            inertia,
        }
    }

    /// Solid box of the given mass and full dimensions, centred on the body origin.
    pub fn solid_box(mass: f64, size: DVec3) -> Self {
        let k = mass / 12.0;
        let inertia = DMat3::from_diagonal(DVec3::new(
            k * (size.y * size.y + size.z * size.z),
            k * (size.x * size.x + size.z * size.z),
            k * (size.x * size.x + size.y * size.y),
        ));
        Self::new(mass, DVec3::ZERO, inertia)
    }

    /// Point-like body with a small isotropic inertia.
    pub fn point_mass(mass: f64) -> Self {
        Self::new(mass, DVec3::ZERO, DMat3::from_diagonal(DVec3::splat(mass * 1e-3)))
    }
}

/// World-frame velocity of a body frame: angular velocity and the linear
/// velocity of the body frame origin.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BodyVelocity(pub Twist);

/// Per-tick external wrench accumulator, expressed in the body frame about its origin.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ExternalWrench(pub Wrench);

/// User wrench held on a body until changed, body frame about its origin.
/// Folded into [`ExternalWrench`] every tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AppliedWrench(pub Wrench);

/// Name of a rigid body, unique within its robot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BodyName(pub String);

/// Index of the robot owning a body, in engine registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RobotIndex(pub usize);

/// Ground contact points rigidly attached to a body.
#[derive(Debug, Clone, Default)]
pub struct GroundContactPoints(pub Vec<GroundContactPoint>);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solid_box_inertia() {
        let props = MassProperties::solid_box(12.0, DVec3::new(1.0, 2.0, 3.0));
        let eps = 1e-12;
        assert!((props.inertia.x_axis.x - 13.0).abs() < eps);
        assert!((props.inertia.y_axis.y - 10.0).abs() < eps);
        assert!((props.inertia.z_axis.z - 5.0).abs() < eps);
        assert_eq!(props.center_of_mass, DVec3::ZERO);
    }

    #[test]
    fn test_half_space_is_unbounded() {
        assert!(!ColliderShape::ground_plane().is_bounded());
        assert!(ColliderShape::Sphere { radius: 1.0 }.is_bounded());
    }
}
