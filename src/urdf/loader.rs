//! URDF loader
//!
//! Parses URDF files and extracts mass properties, collision geometry and
//! joint parameters into a robot definition.

use anyhow::{anyhow, bail, Context, Result};
use glam::{DMat3, DVec3};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

use crate::ecs::components::physics::{ColliderShape, MassProperties};
use crate::ecs::components::transform::Transform;
use crate::physics::definition::{
    CollisionShapeDefinition, JointDefinition, RigidBodyDefinition, RobotDefinition,
};
use crate::physics::joint::JointType;

/// How the root link is attached to the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BaseJoint {
    /// Welded to the world.
    Fixed,
    /// Free-floating base.
    #[default]
    Floating,
}

/// URDF loader utility.
pub struct UrdfLoader;

impl UrdfLoader {
    /// Load a URDF file.
    pub fn load<P: AsRef<Path>>(path: P, base: BaseJoint) -> Result<RobotDefinition> {
        let path = path.as_ref();
        info!("Loading URDF from {:?}", path);

        let robot = urdf_rs::read_file(path)
            .with_context(|| format!("Failed to load URDF from {:?}", path))?;
        Self::convert(&robot, base)
    }

    /// Parse a URDF document held in memory.
    pub fn load_from_string(xml: &str, base: BaseJoint) -> Result<RobotDefinition> {
        let robot = urdf_rs::read_from_string(xml).context("Failed to parse URDF")?;
        Self::convert(&robot, base)
    }

    fn convert(robot: &urdf_rs::Robot, base: BaseJoint) -> Result<RobotDefinition> {
        let mut definition = RobotDefinition::new(robot.name.clone());

        // Process links
        for link in &robot.links {
            let mut body = RigidBodyDefinition::new(link.name.clone(), Self::mass_properties(&link.inertial));
            for (i, collision) in link.collision.iter().enumerate() {
                let Some(shape) = Self::collider_shape(&collision.geometry) else {
                    debug!(link = %link.name, "skipping mesh collision geometry");
                    continue;
                };
                let name = collision
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("{}_collision_{}", link.name, i));
                body = body.with_collision_shape(
                    CollisionShapeDefinition::new(name, shape).with_pose(Self::pose(&collision.origin)),
                );
            }
            definition = definition.with_body(body);
        }

        // Attach the root link to the world
        let children: HashSet<&str> = robot
            .joints
            .iter()
            .map(|joint| joint.child.link.as_str())
            .collect();
        let mut roots = robot
            .links
            .iter()
            .filter(|link| !children.contains(link.name.as_str()));
        let root = roots
            .next()
            .ok_or_else(|| anyhow!("URDF {} has no root link", robot.name))?;
        if let Some(other) = roots.next() {
            bail!(
                "URDF {} has more than one root link ({} and {})",
                robot.name,
                root.name,
                other.name
            );
        }
        let base_type = match base {
            BaseJoint::Fixed => JointType::Fixed,
            BaseJoint::Floating => JointType::Floating,
        };
        definition = definition.with_joint(JointDefinition::new(
            format!("{}_base", root.name),
            base_type,
            None,
            root.name.clone(),
        ));

        // Process joints
        for joint in &robot.joints {
            definition = definition.with_joint(
                Self::joint(joint).with_context(|| format!("Unsupported joint {}", joint.name))?,
            );
        }

        info!(
            "Loaded {} links, {} joints",
            definition.bodies.len(),
            definition.joints.len()
        );
        Ok(definition)
    }

    fn joint(joint: &urdf_rs::Joint) -> Result<JointDefinition> {
        let joint_type = match joint.joint_type {
            urdf_rs::JointType::Revolute | urdf_rs::JointType::Continuous => JointType::Revolute,
            urdf_rs::JointType::Prismatic => JointType::Prismatic,
            urdf_rs::JointType::Fixed => JointType::Fixed,
            urdf_rs::JointType::Floating => JointType::Floating,
            urdf_rs::JointType::Planar | urdf_rs::JointType::Spherical => {
                bail!("{:?} joints are not simulated", joint.joint_type)
            }
        };

        let mut definition = JointDefinition::new(
            joint.name.clone(),
            joint_type,
            Some(joint.parent.link.as_str()),
            joint.child.link.clone(),
        )
        .with_origin(Self::pose(&joint.origin))
        .with_axis(DVec3::new(joint.axis.xyz[0], joint.axis.xyz[1], joint.axis.xyz[2]));

        let limit = &joint.limit;
        let bounded = matches!(
            joint.joint_type,
            urdf_rs::JointType::Revolute | urdf_rs::JointType::Prismatic
        );
        if bounded && limit.lower < limit.upper {
            definition = definition.with_limits(limit.lower, limit.upper);
        }
        if limit.effort > 0.0 {
            definition.effort_limit = limit.effort;
        }
        if limit.velocity > 0.0 {
            definition.velocity_limit = limit.velocity;
        }

        if let Some(dynamics) = &joint.dynamics {
            if dynamics.damping > 0.0 {
                definition = definition.with_damping(dynamics.damping);
            }
        }

        // The safety controller's soft range, when given, is where the soft limit starts pushing.
        if let Some(safety) = &joint.safety_controller {
            if bounded && safety.soft_lower_limit < safety.soft_upper_limit {
                definition = definition.with_limits(safety.soft_lower_limit, safety.soft_upper_limit);
            }
            definition = definition.with_soft_limit_gains(safety.k_position, safety.k_velocity);
        }

        Ok(definition)
    }

    fn mass_properties(inertial: &urdf_rs::Inertial) -> MassProperties {
        let i = &inertial.inertia;
        let principal = DMat3::from_cols(
            DVec3::new(i.ixx, i.ixy, i.ixz),
            DVec3::new(i.ixy, i.iyy, i.iyz),
            DVec3::new(i.ixz, i.iyz, i.izz),
        );
        // URDF gives the inertia in the inertial frame.
        let frame = Self::pose(&inertial.origin);
        let rotation = DMat3::from_quat(frame.rotation);
        MassProperties::new(
            inertial.mass.value,
            frame.position,
            rotation * principal * rotation.transpose(),
        )
    }

    fn collider_shape(geometry: &urdf_rs::Geometry) -> Option<ColliderShape> {
        let shape = match geometry {
            urdf_rs::Geometry::Box { size } => ColliderShape::Box {
                half_extents: DVec3::new(size[0], size[1], size[2]) * 0.5,
            },
            urdf_rs::Geometry::Cylinder { radius, length } => ColliderShape::Cylinder {
                radius: *radius,
                half_height: length * 0.5,
            },
            urdf_rs::Geometry::Capsule { radius, length } => ColliderShape::Capsule {
                radius: *radius,
                half_height: length * 0.5,
            },
            urdf_rs::Geometry::Sphere { radius } => ColliderShape::Sphere { radius: *radius },
            urdf_rs::Geometry::Mesh { .. } => return None,
        };
        Some(shape)
    }

    fn pose(pose: &urdf_rs::Pose) -> Transform {
        Transform::from_xyz_rpy(
            [pose.xyz[0], pose.xyz[1], pose.xyz[2]],
            [pose.rpy[0], pose.rpy[1], pose.rpy[2]],
        )
    }
}
