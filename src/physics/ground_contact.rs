//! Ground contact points: spring-damper contact with stick/slip friction.
//!
//! Each point remembers where it touched down. The displacement from that
//! touchdown point, split into a normal and two in-plane components, drives a
//! stiffening normal spring and a linear tangential spring, both damped by the
//! point velocity. When the in-plane force exceeds the friction cone the force
//! is capped and the touchdown point slides after the body.

use glam::{DAffine3, DVec3};
use tracing::{debug, error};

use crate::ecs::components::physics::GroundContactPoints;

use super::collidable::Collidable;
use super::contact::{ContactModel, ContactParameters, ContactScene, ContactWrench};
use super::spatial::Wrench;

/// A tracked point rigidly attached to a body.
#[derive(Debug, Clone, PartialEq)]
pub struct GroundContactPoint {
    pub name: String,
    /// Position of the point in its body frame.
    pub offset: DVec3,
    /// World pose of the point frame (body orientation, located at the point).
    pub frame: DAffine3,
    /// World-frame linear velocity of the point.
    pub velocity: DVec3,
    /// World position captured when contact started, possibly slid since.
    pub touchdown: DVec3,
    /// Surface normal captured at touchdown, refreshed while slipping.
    pub contact_normal: DVec3,
    pub in_contact: bool,
    pub slipping: bool,
    /// Contact force in the point frame. The moment is always zero.
    pub wrench: Wrench,
}

impl GroundContactPoint {
    pub fn new(name: impl Into<String>, offset: DVec3) -> Self {
        Self {
            name: name.into(),
            offset,
            frame: DAffine3::from_translation(offset),
            velocity: DVec3::ZERO,
            touchdown: DVec3::ZERO,
            contact_normal: DVec3::Z,
            in_contact: false,
            slipping: false,
            wrench: Wrench::ZERO,
        }
    }

    /// Current world position.
    #[inline]
    pub fn position(&self) -> DVec3 {
        self.frame.translation
    }

    /// Contact force in world coordinates.
    pub fn world_force(&self) -> DVec3 {
        self.frame.transform_vector3(self.wrench.linear)
    }

    /// Forget any contact state.
    pub fn reset(&mut self) {
        self.in_contact = false;
        self.slipping = false;
        self.touchdown = self.position();
        self.contact_normal = DVec3::Z;
        self.wrench.set_to_zero();
    }

    /// Contact wrench re-expressed in the owning body frame about its origin.
    pub fn body_wrench(&self) -> Wrench {
        Wrench::force_at_point(self.wrench.linear, self.offset, DVec3::ZERO)
    }
}

/// Resolves every ground contact point against the static environment.
#[derive(Debug, Clone, Default)]
pub struct GroundContactForceCalculator {
    parameters: ContactParameters,
    has_reported_multiple_collisions: bool,
}

impl GroundContactForceCalculator {
    pub fn new(parameters: ContactParameters) -> Self {
        Self {
            parameters,
            has_reported_multiple_collisions: false,
        }
    }

    pub fn parameters(&self) -> &ContactParameters {
        &self.parameters
    }

    /// Resolve one point against the environment, updating its state and wrench.
    pub fn resolve_point(&mut self, gcp: &mut GroundContactPoint, environment: &[Collidable]) {
        let position = gcp.position();

        let mut matches = environment.iter().filter(|collidable| {
            collidable.aabb.contains_inclusive(position)
                && collidable.shape.is_point_inside(position, &collidable.world_pose)
        });

        let Some(first) = matches.next() else {
            if gcp.in_contact {
                debug!(point = %gcp.name, "ground contact released");
            }
            gcp.in_contact = false;
            gcp.slipping = false;
            gcp.wrench.set_to_zero();
            return;
        };

        if let Some(second) = matches.next() {
            if !self.has_reported_multiple_collisions {
                error!(
                    point = %gcp.name,
                    first = %first.name,
                    second = %second.name,
                    "ground contact point is inside more than one environment collidable; using the first"
                );
                self.has_reported_multiple_collisions = true;
            }
        }

        let surface = first
            .shape
            .evaluate_point_collision(position, &first.world_pose);

        if !gcp.in_contact {
            debug!(point = %gcp.name, "ground contact started");
            gcp.in_contact = true;
            gcp.touchdown = position;
            gcp.contact_normal = surface.normal;
        }

        let force = self.compute_force(gcp, surface.normal);
        gcp.wrench = Wrench::pure_force(gcp.frame.matrix3.transpose() * force);
    }

    /// World-frame contact force for a point already in contact.
    fn compute_force(&self, gcp: &mut GroundContactPoint, surface_normal: DVec3) -> DVec3 {
        let params = &self.parameters;
        let normal = gcp.contact_normal;
        let (in_plane_1, in_plane_2) = in_plane_axes(normal);

        let delta = gcp.touchdown - gcp.position();
        let x = delta.dot(in_plane_1);
        let y = delta.dot(in_plane_2);
        let z = delta.dot(normal);

        let velocity = gcp.velocity;
        let vx = velocity.dot(in_plane_1);
        let vy = velocity.dot(in_plane_2);
        let vz = velocity.dot(normal);

        let mut parallel = (in_plane_1 * x + in_plane_2 * y) * params.kxy
            - (in_plane_1 * vx + in_plane_2 * vy) * params.bxy;

        let denominator = (params.stiffening_length - z).max(params.stiffening_guard);
        let mut normal_force = normal * (params.kz * z / denominator) - normal * (params.bz * vz);

        if normal_force.dot(normal) < 0.0 {
            if z < 0.0 {
                // Point rose above its touchdown height: separation.
                debug!(point = %gcp.name, "ground contact pulled free");
                gcp.in_contact = false;
                gcp.slipping = false;
                return DVec3::ZERO;
            }
            normal_force = DVec3::ZERO;
            if params.release_friction_on_pull {
                parallel = DVec3::ZERO;
            }
        }

        if params.slip_enabled {
            let normal_magnitude = normal_force.length();
            let parallel_magnitude = parallel.length();
            let ratio = if normal_magnitude > 0.0 {
                parallel_magnitude / normal_magnitude
            } else if parallel_magnitude > 0.0 {
                f64::INFINITY
            } else {
                0.0
            };

            if ratio > params.alpha_stick || (gcp.slipping && ratio > params.alpha_slip) {
                if !gcp.slipping {
                    debug!(point = %gcp.name, ratio, "ground contact started slipping");
                }
                gcp.slipping = true;

                let cap = params.alpha_slip * normal_magnitude;
                if parallel_magnitude > cap {
                    parallel *= cap / parallel_magnitude;
                }

                // Slide the touchdown point after the body, against the friction force.
                let capped_magnitude = parallel.length();
                let direction = if capped_magnitude > 1e-7 {
                    parallel / capped_magnitude
                } else {
                    parallel
                };
                let slide = params.slip_touchdown_rate * gcp.position().distance(gcp.touchdown);
                gcp.touchdown -= direction * slide;
                gcp.contact_normal = surface_normal;
            } else {
                gcp.slipping = false;
            }
        }

        parallel + normal_force
    }
}

/// Two unit vectors spanning the plane orthogonal to `normal`.
fn in_plane_axes(normal: DVec3) -> (DVec3, DVec3) {
    let seed = if (DVec3::Y.dot(normal).abs() - 1.0).abs() < 1e-9 {
        DVec3::X
    } else {
        DVec3::Y
    };
    let in_plane_1 = seed.cross(normal).normalize();
    let in_plane_2 = normal.cross(in_plane_1).normalize();
    (in_plane_1, in_plane_2)
}

impl ContactModel for GroundContactForceCalculator {
    fn name(&self) -> &'static str {
        "ground-contact-points"
    }

    fn set_parameters(&mut self, parameters: &ContactParameters) {
        self.parameters = *parameters;
    }

    fn reset(&mut self, world: &mut hecs::World) {
        for (_, points) in world.query_mut::<&mut GroundContactPoints>() {
            for gcp in points.0.iter_mut() {
                gcp.reset();
            }
        }
    }

    fn resolve(&mut self, scene: &mut ContactScene<'_>) -> Vec<ContactWrench> {
        let mut wrenches = Vec::new();
        for (body, points) in scene.world.query_mut::<&mut GroundContactPoints>() {
            for gcp in points.0.iter_mut() {
                self.resolve_point(gcp, scene.environment);
                if !gcp.wrench.is_zero() {
                    wrenches.push(ContactWrench {
                        body,
                        wrench: gcp.body_wrench(),
                    });
                }
            }
        }
        wrenches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::components::physics::ColliderShape;

    fn ground() -> Vec<Collidable> {
        vec![Collidable::fixed(
            "ground",
            ColliderShape::ground_plane(),
            DAffine3::IDENTITY,
        )]
    }

    fn point_at(position: DVec3, velocity: DVec3) -> GroundContactPoint {
        let mut gcp = GroundContactPoint::new("heel", DVec3::ZERO);
        gcp.frame = DAffine3::from_translation(position);
        gcp.velocity = velocity;
        gcp
    }

    fn pressed_point(touchdown: DVec3, position: DVec3, velocity: DVec3) -> GroundContactPoint {
        let mut gcp = point_at(position, velocity);
        gcp.in_contact = true;
        gcp.touchdown = touchdown;
        gcp.contact_normal = DVec3::Z;
        gcp
    }

    #[test]
    fn test_point_above_ground_stays_out_of_contact() {
        let environment = ground();
        let mut calculator = GroundContactForceCalculator::default();
        let mut gcp = point_at(DVec3::new(0.0, 0.0, 0.1), DVec3::new(0.3, 0.0, -0.2));

        for tick in 0..50 {
            gcp.frame.translation.x = tick as f64 * 0.01;
            calculator.resolve_point(&mut gcp, &environment);
            assert!(!gcp.in_contact);
            assert!(!gcp.slipping);
            assert!(gcp.wrench.is_zero());
        }
    }

    #[test]
    fn test_contact_onset_captures_touchdown() {
        let environment = ground();
        let mut calculator = GroundContactForceCalculator::default();
        let velocity = DVec3::new(0.0, 0.0, -0.5);

        let mut gcp = point_at(DVec3::new(0.2, 0.0, 0.0042), velocity);
        let dt = 0.001;
        let mut onset_tick = None;
        for tick in 0..20 {
            let position = gcp.position();
            calculator.resolve_point(&mut gcp, &environment);
            if gcp.in_contact {
                onset_tick = Some(tick);
                assert!(position.z < 0.0);
                assert_eq!(gcp.touchdown.z, position.z);
                assert!(gcp.world_force().z > 0.0, "normal force must push the point out");
                break;
            }
            assert!(gcp.wrench.is_zero());
            gcp.frame.translation += velocity * dt;
        }
        assert!(onset_tick.is_some());
    }

    #[test]
    fn test_stiffening_is_monotonic_and_finite() {
        let environment = ground();
        let mut calculator = GroundContactForceCalculator::default();
        let length = calculator.parameters().stiffening_length;

        let penetrations = [
            0.0005,
            0.002,
            0.004,
            0.0059,
            0.006,
            0.0061,
            length - 1e-5,
            length - 1e-6,
            length,
            length + 1e-6,
        ];

        let mut previous = 0.0;
        for penetration in penetrations {
            let mut gcp = pressed_point(DVec3::ZERO, DVec3::new(0.0, 0.0, -penetration), DVec3::ZERO);
            calculator.resolve_point(&mut gcp, &environment);
            let fz = gcp.wrench.linear.z;
            assert!(fz.is_finite(), "force at penetration {penetration} is {fz}");
            assert!(fz > previous, "force must grow with penetration");
            previous = fz;
        }
    }

    #[test]
    fn test_stick_slip_switch_caps_in_plane_force() {
        let environment = ground();
        let mut calculator = GroundContactForceCalculator::default();
        let params = *calculator.parameters();

        // Pure normal load: sticking.
        let mut gcp = pressed_point(DVec3::ZERO, DVec3::new(0.0, 0.0, -0.002), DVec3::ZERO);
        calculator.resolve_point(&mut gcp, &environment);
        assert!(!gcp.slipping);

        // A small drag stays inside the friction cone.
        gcp.frame.translation.x = 0.01;
        calculator.resolve_point(&mut gcp, &environment);
        assert!(!gcp.slipping);
        assert_eq!(gcp.touchdown.x, 0.0);

        // A larger drag crosses the stick ratio and slips on the same call.
        gcp.frame.translation.x = 0.05;
        calculator.resolve_point(&mut gcp, &environment);
        assert!(gcp.slipping);

        let normal = gcp.wrench.linear.z;
        let in_plane = DVec3::new(gcp.wrench.linear.x, gcp.wrench.linear.y, 0.0).length();
        assert!(normal > 0.0);
        assert!((in_plane - params.alpha_slip * normal).abs() < 1e-9);
        // Friction opposes the drag, and the touchdown point slid after the body.
        assert!(gcp.wrench.linear.x < 0.0);
        let slide = params.slip_touchdown_rate * DVec3::new(0.05, 0.0, -0.002).length();
        assert!((gcp.touchdown.x - slide).abs() < 1e-12);
    }

    #[test]
    fn test_slip_disabled_never_slips() {
        let environment = ground();
        let mut calculator = GroundContactForceCalculator::new(ContactParameters {
            slip_enabled: false,
            ..ContactParameters::default()
        });
        let mut gcp = pressed_point(DVec3::ZERO, DVec3::new(0.01, 0.0, -0.002), DVec3::ZERO);
        calculator.resolve_point(&mut gcp, &environment);

        assert!(!gcp.slipping);
        assert!((gcp.wrench.linear.x + calculator.parameters().kxy * 0.01).abs() < 1e-9);
        assert_eq!(gcp.touchdown, DVec3::ZERO);
    }

    #[test]
    fn test_pull_above_touchdown_releases_contact() {
        let environment = ground();
        let mut calculator = GroundContactForceCalculator::default();
        let mut gcp = pressed_point(
            DVec3::new(0.0, 0.0, -0.005),
            DVec3::new(0.003, 0.0, -0.002),
            DVec3::ZERO,
        );
        calculator.resolve_point(&mut gcp, &environment);

        assert!(!gcp.in_contact);
        assert!(gcp.wrench.is_zero());
    }

    #[test]
    fn test_pull_below_touchdown_keeps_friction() {
        let environment = ground();
        let params = ContactParameters {
            slip_enabled: false,
            ..ContactParameters::default()
        };
        let mut calculator = GroundContactForceCalculator::new(params);
        // Below touchdown but moving up fast enough for damping to win.
        let mut gcp = pressed_point(
            DVec3::new(0.0, 0.0, -0.001),
            DVec3::new(0.002, 0.0, -0.002),
            DVec3::new(0.0, 0.0, 1.0),
        );
        calculator.resolve_point(&mut gcp, &environment);

        assert!(gcp.in_contact);
        assert_eq!(gcp.wrench.linear.z, 0.0);
        assert!((gcp.wrench.linear.x + params.kxy * 0.002).abs() < 1e-9);

        // The documented alternative also drops the friction.
        calculator.set_parameters(&ContactParameters {
            release_friction_on_pull: true,
            ..params
        });
        calculator.resolve_point(&mut gcp, &environment);
        assert!(gcp.in_contact);
        assert!(gcp.wrench.is_zero());
    }

    #[test]
    fn test_multiple_environment_matches_use_first() {
        let mut environment = ground();
        environment.push(Collidable::fixed(
            "block",
            ColliderShape::Box {
                half_extents: DVec3::splat(1.0),
            },
            DAffine3::from_translation(DVec3::new(0.0, 0.0, -0.5)),
        ));
        let mut calculator = GroundContactForceCalculator::default();
        let mut gcp = point_at(DVec3::new(0.0, 0.0, -0.001), DVec3::ZERO);

        calculator.resolve_point(&mut gcp, &environment);
        assert!(gcp.in_contact);
        assert!(calculator.has_reported_multiple_collisions);
        // The ground plane normal was captured, not the box face.
        assert_eq!(gcp.contact_normal, DVec3::Z);

        calculator.resolve_point(&mut gcp, &environment);
        assert!(calculator.has_reported_multiple_collisions);
    }

    #[test]
    fn test_in_plane_axes_are_orthonormal() {
        for normal in [DVec3::Z, DVec3::Y, -DVec3::Y, DVec3::new(0.3, 0.9, 0.1).normalize()] {
            let (a, b) = in_plane_axes(normal);
            assert!((a.length() - 1.0).abs() < 1e-12);
            assert!((b.length() - 1.0).abs() < 1e-12);
            assert!(a.dot(normal).abs() < 1e-12);
            assert!(b.dot(normal).abs() < 1e-12);
            assert!(a.dot(b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_body_wrench_has_moment_arm() {
        let mut gcp = GroundContactPoint::new("toe", DVec3::new(0.1, 0.0, -0.5));
        gcp.wrench = Wrench::pure_force(DVec3::new(0.0, 0.0, 10.0));
        let body = gcp.body_wrench();
        assert!((body.linear - DVec3::new(0.0, 0.0, 10.0)).length() < 1e-12);
        assert!((body.angular - DVec3::new(0.0, -1.0, 0.0)).length() < 1e-12);
    }

    #[test]
    fn test_point_on_surface_touches_down_without_force() {
        let environment = ground();
        let mut calculator = GroundContactForceCalculator::default();

        let mut hovering = point_at(DVec3::new(0.0, 0.0, 1e-9), DVec3::ZERO);
        calculator.resolve_point(&mut hovering, &environment);
        assert!(!hovering.in_contact);

        let mut resting = point_at(DVec3::new(0.2, 0.0, 0.0), DVec3::ZERO);
        calculator.resolve_point(&mut resting, &environment);
        assert!(resting.in_contact);
        assert!(!resting.slipping);
        assert_eq!(resting.touchdown, DVec3::new(0.2, 0.0, 0.0));
        assert!(resting.wrench.linear.length() < 1e-12);
    }
}
