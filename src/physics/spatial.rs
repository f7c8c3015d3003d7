//! Six-dimensional spatial vectors: wrenches and twists.

use glam::{DAffine3, DMat3, DVec3};
use std::ops::{Add, AddAssign, Mul, Neg, Sub};

/// A generalized force: torque (angular part) and force (linear part), expressed
/// in some frame about that frame's origin.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Wrench {
    pub angular: DVec3,
    pub linear: DVec3,
}

impl Wrench {
    pub const ZERO: Wrench = Wrench {
        angular: DVec3::ZERO,
        linear: DVec3::ZERO,
    };

    pub fn new(angular: DVec3, linear: DVec3) -> Self {
        Self { angular, linear }
    }

    /// A force with no moment at the frame origin.
    pub fn pure_force(force: DVec3) -> Self {
        Self {
            angular: DVec3::ZERO,
            linear: force,
        }
    }

    /// A force applied at `point`, re-expressed about `reference` (same orientation).
    pub fn force_at_point(force: DVec3, point: DVec3, reference: DVec3) -> Self {
        Self {
            angular: (point - reference).cross(force),
            linear: force,
        }
    }

    /// Shift the moment reference point, keeping the orientation.
    pub fn shift_to(&self, from: DVec3, to: DVec3) -> Wrench {
        Wrench {
            angular: self.angular + (from - to).cross(self.linear),
            linear: self.linear,
        }
    }

    pub fn set_to_zero(&mut self) {
        *self = Self::ZERO;
    }

    pub fn is_zero(&self) -> bool {
        self.angular == DVec3::ZERO && self.linear == DVec3::ZERO
    }

    /// Re-express a wrench given in frame `from` into frame `to`.
    ///
    /// Both frames are world poses. The moment is shifted to the origin of `to`.
    pub fn change_frame(&self, from: &DAffine3, to: &DAffine3) -> Wrench {
        let force_world = from.transform_vector3(self.linear);
        let torque_world = from.transform_vector3(self.angular)
            + (from.translation - to.translation).cross(force_world);
        let to_inverse = to.matrix3.transpose();
        Wrench {
            angular: to_inverse * torque_world,
            linear: to_inverse * force_world,
        }
    }
}

impl Add for Wrench {
    type Output = Wrench;

    fn add(self, rhs: Wrench) -> Wrench {
        Wrench {
            angular: self.angular + rhs.angular,
            linear: self.linear + rhs.linear,
        }
    }
}

impl AddAssign for Wrench {
    fn add_assign(&mut self, rhs: Wrench) {
        self.angular += rhs.angular;
        self.linear += rhs.linear;
    }
}

impl Sub for Wrench {
    type Output = Wrench;

    fn sub(self, rhs: Wrench) -> Wrench {
        Wrench {
            angular: self.angular - rhs.angular,
            linear: self.linear - rhs.linear,
        }
    }
}

impl Mul<f64> for Wrench {
    type Output = Wrench;

    fn mul(self, rhs: f64) -> Wrench {
        Wrench {
            angular: self.angular * rhs,
            linear: self.linear * rhs,
        }
    }
}

impl Neg for Wrench {
    type Output = Wrench;

    fn neg(self) -> Wrench {
        Wrench {
            angular: -self.angular,
            linear: -self.linear,
        }
    }
}

/// A generalized velocity (or acceleration): angular and linear parts.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Twist {
    pub angular: DVec3,
    pub linear: DVec3,
}

impl Twist {
    pub const ZERO: Twist = Twist {
        angular: DVec3::ZERO,
        linear: DVec3::ZERO,
    };

    pub fn new(angular: DVec3, linear: DVec3) -> Self {
        Self { angular, linear }
    }

    /// Linear velocity of a point rigidly attached to the frame, where `offset`
    /// is the point minus the frame origin (both world-aligned).
    #[inline]
    pub fn linear_velocity_at(&self, offset: DVec3) -> DVec3 {
        self.linear + self.angular.cross(offset)
    }

    /// Spatial motion cross product `self ×m other`.
    pub fn cross_motion(&self, other: &Twist) -> Twist {
        Twist {
            angular: self.angular.cross(other.angular),
            linear: self.angular.cross(other.linear) + self.linear.cross(other.angular),
        }
    }

    /// Spatial force cross product `self ×f force`.
    pub fn cross_force(&self, force: &Wrench) -> Wrench {
        Wrench {
            angular: self.angular.cross(force.angular) + self.linear.cross(force.linear),
            linear: self.angular.cross(force.linear),
        }
    }

    /// Clamp every component to `[-max, max]`.
    pub fn clamped(self, max: f64) -> Twist {
        let bound = DVec3::splat(max);
        Twist {
            angular: self.angular.clamp(-bound, bound),
            linear: self.linear.clamp(-bound, bound),
        }
    }

    /// Power of a wrench acting on this twist.
    pub fn dot(&self, wrench: &Wrench) -> f64 {
        self.angular.dot(wrench.angular) + self.linear.dot(wrench.linear)
    }
}

impl Add for Twist {
    type Output = Twist;

    fn add(self, rhs: Twist) -> Twist {
        Twist {
            angular: self.angular + rhs.angular,
            linear: self.linear + rhs.linear,
        }
    }
}

impl AddAssign for Twist {
    fn add_assign(&mut self, rhs: Twist) {
        self.angular += rhs.angular;
        self.linear += rhs.linear;
    }
}

impl Sub for Twist {
    type Output = Twist;

    fn sub(self, rhs: Twist) -> Twist {
        Twist {
            angular: self.angular - rhs.angular,
            linear: self.linear - rhs.linear,
        }
    }
}

impl Mul<f64> for Twist {
    type Output = Twist;

    fn mul(self, rhs: f64) -> Twist {
        Twist {
            angular: self.angular * rhs,
            linear: self.linear * rhs,
        }
    }
}

/// Angular acceleration plus the linear acceleration of the centre of mass,
/// both in world coordinates.
pub type SpatialAcceleration = Twist;

/// Symmetric 6x6 spatial inertia `[[angular, coupling], [couplingᵀ, linear]]`,
/// mapping a twist `(ω, v)` to a wrench `(n, f)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialInertia {
    pub angular: DMat3,
    pub coupling: DMat3,
    pub linear: DMat3,
}

impl SpatialInertia {
    pub const ZERO: SpatialInertia = SpatialInertia {
        angular: DMat3::ZERO,
        coupling: DMat3::ZERO,
        linear: DMat3::ZERO,
    };

    /// Rigid body inertia about the world origin, given its mass, world centre
    /// of mass and world-aligned rotational inertia about the centre of mass.
    pub fn rigid_body(mass: f64, center_of_mass: DVec3, inertia: DMat3) -> Self {
        let cx = skew(center_of_mass);
        SpatialInertia {
            angular: inertia - cx * cx * mass,
            coupling: cx * mass,
            linear: DMat3::from_diagonal(DVec3::splat(mass)),
        }
    }

    pub fn mul_twist(&self, twist: &Twist) -> Wrench {
        Wrench {
            angular: self.angular * twist.angular + self.coupling * twist.linear,
            linear: self.coupling.transpose() * twist.angular + self.linear * twist.linear,
        }
    }

    /// Subtract the rank-one term `u uᵀ / d`.
    pub fn sub_outer(&self, u: &Wrench, d: f64) -> Self {
        SpatialInertia {
            angular: self.angular - outer(u.angular, u.angular) * (1.0 / d),
            coupling: self.coupling - outer(u.angular, u.linear) * (1.0 / d),
            linear: self.linear - outer(u.linear, u.linear) * (1.0 / d),
        }
    }

    /// Solve `self * x = wrench` by block elimination.
    ///
    /// Returns `None` when the inertia is singular.
    pub fn solve(&self, wrench: &Wrench) -> Option<Twist> {
        let linear_inverse = invert(self.linear)?;
        // Schur complement of the linear block.
        let schur = self.angular - self.coupling * linear_inverse * self.coupling.transpose();
        let schur_inverse = invert(schur)?;
        let angular = schur_inverse * (wrench.angular - self.coupling * (linear_inverse * wrench.linear));
        let linear = linear_inverse * (wrench.linear - self.coupling.transpose() * angular);
        Some(Twist { angular, linear })
    }
}

impl Add for SpatialInertia {
    type Output = SpatialInertia;

    fn add(self, rhs: SpatialInertia) -> SpatialInertia {
        SpatialInertia {
            angular: self.angular + rhs.angular,
            coupling: self.coupling + rhs.coupling,
            linear: self.linear + rhs.linear,
        }
    }
}

impl AddAssign for SpatialInertia {
    fn add_assign(&mut self, rhs: SpatialInertia) {
        *self = *self + rhs;
    }
}

/// Skew-symmetric cross-product matrix: `skew(a) * b == a × b`.
pub fn skew(v: DVec3) -> DMat3 {
    DMat3::from_cols(
        DVec3::new(0.0, v.z, -v.y),
        DVec3::new(-v.z, 0.0, v.x),
        DVec3::new(v.y, -v.x, 0.0),
    )
}

fn outer(a: DVec3, b: DVec3) -> DMat3 {
    DMat3::from_cols(a * b.x, a * b.y, a * b.z)
}

fn invert(m: DMat3) -> Option<DMat3> {
    let det = m.determinant();
    if det.abs() < 1e-300 || !det.is_finite() {
        return None;
    }
    Some(m.inverse())
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DQuat;

    #[test]
    fn test_force_at_point_moment() {
        let w = Wrench::force_at_point(DVec3::new(0.0, 0.0, 10.0), DVec3::X, DVec3::ZERO);
        let eps = 1e-12;
        assert!((w.angular - DVec3::new(0.0, -10.0, 0.0)).length() < eps);
        assert!((w.linear - DVec3::new(0.0, 0.0, 10.0)).length() < eps);
    }

    #[test]
    fn test_change_frame_shifts_moment_and_rotates() {
        // Pure force expressed in a frame rotated 90 degrees about Z, located at (1, 0, 0).
        let from = DAffine3::from_rotation_translation(
            DQuat::from_rotation_z(std::f64::consts::FRAC_PI_2),
            DVec3::X,
        );
        let wrench = Wrench::pure_force(DVec3::X);

        let in_world = wrench.change_frame(&from, &DAffine3::IDENTITY);
        let eps = 1e-12;
        // Local X maps to world Y.
        assert!((in_world.linear - DVec3::Y).length() < eps);
        // Force along Y applied at (1, 0, 0) produces a moment about +Z.
        assert!((in_world.angular - DVec3::Z).length() < eps);
    }

    #[test]
    fn test_skew_matches_cross() {
        let a = DVec3::new(0.3, -1.2, 2.0);
        let b = DVec3::new(-0.7, 0.4, 1.1);
        assert!((skew(a) * b - a.cross(b)).length() < 1e-12);
    }

    #[test]
    fn test_spatial_inertia_solve_inverts_mul() {
        let inertia = SpatialInertia::rigid_body(
            2.5,
            DVec3::new(0.4, -0.2, 1.0),
            DMat3::from_diagonal(DVec3::new(0.3, 0.5, 0.2)),
        );
        let twist = Twist::new(DVec3::new(0.1, -2.0, 0.5), DVec3::new(1.5, 0.0, -0.3));
        let wrench = inertia.mul_twist(&twist);
        let recovered = inertia.solve(&wrench).expect("inertia is positive definite");
        assert!((recovered.angular - twist.angular).length() < 1e-9);
        assert!((recovered.linear - twist.linear).length() < 1e-9);
    }

    #[test]
    fn test_linear_velocity_at_offset() {
        let twist = Twist::new(DVec3::Z, DVec3::ZERO);
        let v = twist.linear_velocity_at(DVec3::X);
        assert!((v - DVec3::Y).length() < 1e-12);
    }
}
