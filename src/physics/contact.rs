//! Contact data structures and the contact model abstraction.

use glam::DVec3;

use super::collidable::Collidable;
use super::spatial::Wrench;

/// Geometry of a shape pair: closest (or deepest) points and the separation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollisionResult {
    pub colliding: bool,
    /// Separation distance, negative when penetrating.
    pub signed_distance: f64,
    pub point_on_a: DVec3,
    pub point_on_b: DVec3,
    /// Unit normal pointing from B towards A.
    pub normal: DVec3,
}

impl CollisionResult {
    /// Result for a pair that can never touch.
    pub fn separated() -> Self {
        Self {
            colliding: false,
            signed_distance: f64::INFINITY,
            point_on_a: DVec3::ZERO,
            point_on_b: DVec3::ZERO,
            normal: DVec3::Z,
        }
    }

    /// Same geometry with the roles of A and B exchanged.
    pub fn swapped(self) -> Self {
        Self {
            colliding: self.colliding,
            signed_distance: self.signed_distance,
            point_on_a: self.point_on_b,
            point_on_b: self.point_on_a,
            normal: -self.normal,
        }
    }

    /// Penetration depth, zero when separated.
    pub fn depth(&self) -> f64 {
        (-self.signed_distance).max(0.0)
    }
}

/// Gains of the penalty rigid-body collision model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PenaltyParameters {
    pub kp: f64,
    pub kd: f64,
    /// Drop the normal part of the damping force when it pulls the bodies together.
    pub cancel_adhesive_damping: bool,
}

impl Default for PenaltyParameters {
    fn default() -> Self {
        Self {
            kp: 10_000.0,
            kd: 1_000.0,
            cancel_adhesive_damping: false,
        }
    }
}

/// Tunable constants shared by the contact models.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactParameters {
    /// Tangential stiffness.
    pub kxy: f64,
    /// Tangential damping.
    pub bxy: f64,
    /// Normal stiffness.
    pub kz: f64,
    /// Normal damping.
    pub bz: f64,
    /// Penetration at which the normal spring becomes infinitely stiff.
    pub stiffening_length: f64,
    /// Smallest denominator used by the stiffening term.
    pub stiffening_guard: f64,
    /// Static friction ratio: slipping starts above it.
    pub alpha_stick: f64,
    /// Dynamic friction ratio: caps the in-plane force while slipping.
    pub alpha_slip: f64,
    pub slip_enabled: bool,
    /// Fraction of the touchdown distance the touchdown point slides per tick while slipping.
    pub slip_touchdown_rate: f64,
    /// Also zero the in-plane force when the normal force pulls but the point has not risen.
    pub release_friction_on_pull: bool,
    pub penalty: PenaltyParameters,
}

impl Default for ContactParameters {
    fn default() -> Self {
        Self {
            kxy: 1422.0,
            bxy: 15.6,
            kz: 125.0,
            bz: 300.0,
            stiffening_length: 0.008,
            stiffening_guard: 0.002,
            alpha_stick: 0.7,
            alpha_slip: 0.7,
            slip_enabled: true,
            slip_touchdown_rate: 0.05,
            release_friction_on_pull: false,
            penalty: PenaltyParameters::default(),
        }
    }
}

/// A wrench to fold into a body's accumulator, in the body frame about its origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactWrench {
    pub body: hecs::Entity,
    pub wrench: Wrench,
}

/// Everything a contact model may look at during one tick.
pub struct ContactScene<'a> {
    pub world: &'a mut hecs::World,
    /// Collidables attached to robot bodies, in robot registration order.
    pub robot_collidables: Vec<&'a Collidable>,
    /// Static environment collidables, in registration order.
    pub environment: &'a [Collidable],
}

/// A contact force model. The engine holds exactly one, chosen at construction.
pub trait ContactModel {
    fn name(&self) -> &'static str;

    /// Replace the parameters used from the next resolve on.
    fn set_parameters(&mut self, parameters: &ContactParameters);

    /// Clear any per-contact state (touchdown points, slip flags, wrenches).
    fn reset(&mut self, world: &mut hecs::World);

    /// Resolve contacts for the current geometry and return body wrenches.
    fn resolve(&mut self, scene: &mut ContactScene<'_>) -> Vec<ContactWrench>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contact_parameters_default() {
        let params = ContactParameters::default();
        assert_eq!(params.kxy, 1422.0);
        assert_eq!(params.bxy, 15.6);
        assert_eq!(params.kz, 125.0);
        assert_eq!(params.bz, 300.0);
        assert_eq!(params.stiffening_length, 0.008);
        assert_eq!(params.stiffening_guard, 0.002);
        assert!(params.slip_enabled);
        assert!(!params.release_friction_on_pull);
        assert_eq!(params.penalty.kp, 10_000.0);
        assert_eq!(params.penalty.kd, 1_000.0);
    }

    #[test]
    fn test_swapped_flips_normal_and_points() {
        let result = CollisionResult {
            colliding: true,
            signed_distance: -0.1,
            point_on_a: DVec3::X,
            point_on_b: DVec3::Y,
            normal: DVec3::Z,
        };
        let swapped = result.swapped();
        assert_eq!(swapped.point_on_a, DVec3::Y);
        assert_eq!(swapped.point_on_b, DVec3::X);
        assert_eq!(swapped.normal, -DVec3::Z);
        assert!((swapped.depth() - 0.1).abs() < 1e-12);
    }
}
