//! Declarative robot and terrain descriptions consumed when they are added to the engine.

use std::collections::{HashMap, HashSet, VecDeque};

use glam::{DMat3, DVec3};

use crate::ecs::components::physics::{ColliderShape, MassProperties};
use crate::ecs::components::transform::Transform;
use crate::error::{Result, SimulationError};

use super::collidable::MATCH_ALL;
use super::joint::JointType;

/// A collision shape placed in a body (or world) frame.
#[derive(Debug, Clone, PartialEq)]
pub struct CollisionShapeDefinition {
    pub name: String,
    pub pose: Transform,
    pub shape: ColliderShape,
    pub collision_mask: i32,
    pub collision_group: i32,
}

impl CollisionShapeDefinition {
    pub fn new(name: impl Into<String>, shape: ColliderShape) -> Self {
        Self {
            name: name.into(),
            pose: Transform::identity(),
            shape,
            collision_mask: MATCH_ALL,
            collision_group: MATCH_ALL,
        }
    }

    pub fn with_pose(mut self, pose: Transform) -> Self {
        self.pose = pose;
        self
    }

    pub fn with_filter(mut self, collision_mask: i32, collision_group: i32) -> Self {
        self.collision_mask = collision_mask;
        self.collision_group = collision_group;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RigidBodyDefinition {
    pub name: String,
    pub mass: f64,
    /// Centre of mass in the body frame.
    pub center_of_mass: DVec3,
    /// Rotational inertia about the centre of mass, in the body frame.
    pub inertia: DMat3,
    pub collision_shapes: Vec<CollisionShapeDefinition>,
}

impl RigidBodyDefinition {
    pub fn new(name: impl Into<String>, mass_properties: MassProperties) -> Self {
        Self {
            name: name.into(),
            mass: mass_properties.mass,
            center_of_mass: mass_properties.center_of_mass,
            inertia: mass_properties.inertia,
            collision_shapes: Vec::new(),
        }
    }

    pub fn with_collision_shape(mut self, shape: CollisionShapeDefinition) -> Self {
        self.collision_shapes.push(shape);
        self
    }

    pub fn mass_properties(&self) -> MassProperties {
        MassProperties::new(self.mass, self.center_of_mass, self.inertia)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroundContactPointDefinition {
    pub name: String,
    /// Position in the child body frame.
    pub offset: DVec3,
}

impl GroundContactPointDefinition {
    pub fn new(name: impl Into<String>, offset: DVec3) -> Self {
        Self {
            name: name.into(),
            offset,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JointDefinition {
    pub name: String,
    pub joint_type: JointType,
    /// Parent body name. `None` attaches the joint to the world.
    pub parent: Option<String>,
    pub child: String,
    /// Joint frame in the parent frame. For floating joints, the initial child pose.
    pub origin: Transform,
    pub axis: DVec3,
    pub lower_limit: f64,
    pub upper_limit: f64,
    pub effort_limit: f64,
    pub velocity_limit: f64,
    /// Negative disables damping.
    pub damping: f64,
    /// Negative disables the soft limit stiffness.
    pub kp_soft_limit: f64,
    /// Negative disables the soft limit damping.
    pub kd_soft_limit: f64,
    pub ground_contact_points: Vec<GroundContactPointDefinition>,
    pub initial_position: f64,
    pub initial_velocity: f64,
}

impl JointDefinition {
    pub fn new(
        name: impl Into<String>,
        joint_type: JointType,
        parent: Option<&str>,
        child: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            joint_type,
            parent: parent.map(str::to_string),
            child: child.into(),
            origin: Transform::identity(),
            axis: DVec3::Z,
            lower_limit: f64::NEG_INFINITY,
            upper_limit: f64::INFINITY,
            effort_limit: f64::INFINITY,
            velocity_limit: f64::INFINITY,
            damping: -1.0,
            kp_soft_limit: -1.0,
            kd_soft_limit: -1.0,
            ground_contact_points: Vec::new(),
            initial_position: 0.0,
            initial_velocity: 0.0,
        }
    }

    pub fn with_origin(mut self, origin: Transform) -> Self {
        self.origin = origin;
        self
    }

    pub fn with_axis(mut self, axis: DVec3) -> Self {
        self.axis = axis;
        self
    }

    pub fn with_limits(mut self, lower: f64, upper: f64) -> Self {
        self.lower_limit = lower;
        self.upper_limit = upper;
        self
    }

    pub fn with_soft_limit_gains(mut self, kp: f64, kd: f64) -> Self {
        self.kp_soft_limit = kp;
        self.kd_soft_limit = kd;
        self
    }

    pub fn with_damping(mut self, damping: f64) -> Self {
        self.damping = damping;
        self
    }

    pub fn with_ground_contact_point(mut self, name: impl Into<String>, offset: DVec3) -> Self {
        self.ground_contact_points
            .push(GroundContactPointDefinition::new(name, offset));
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SensorDefinition {
    Imu {
        name: String,
        body: String,
        /// Sensor frame in the body frame.
        offset: Transform,
    },
    JointEncoder {
        name: String,
        joint: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RobotDefinition {
    pub name: String,
    pub bodies: Vec<RigidBodyDefinition>,
    pub joints: Vec<JointDefinition>,
    pub sensors: Vec<SensorDefinition>,
}

impl RobotDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_body(mut self, body: RigidBodyDefinition) -> Self {
        self.bodies.push(body);
        self
    }

    pub fn with_joint(mut self, joint: JointDefinition) -> Self {
        self.joints.push(joint);
        self
    }

    pub fn with_sensor(mut self, sensor: SensorDefinition) -> Self {
        self.sensors.push(sensor);
        self
    }

    pub fn body(&self, name: &str) -> Option<&RigidBodyDefinition> {
        self.bodies.iter().find(|body| body.name == name)
    }

    /// Check consistency and return the joint indices ordered parents first.
    pub fn validate(&self) -> Result<Vec<usize>> {
        let invalid =
            |msg: String| -> Result<Vec<usize>> { Err(SimulationError::InvalidDefinition(msg)) };

        if self.joints.is_empty() {
            return invalid(format!("robot {} has no joints", self.name));
        }

        let mut body_names = HashSet::new();
        for body in &self.bodies {
            if !body_names.insert(body.name.as_str()) {
                return invalid(format!("duplicate body {}", body.name));
            }
            if !(body.mass.is_finite() && body.mass >= 0.0) {
                return invalid(format!("body {} has mass {}", body.name, body.mass));
            }
        }

        let mut joint_names = HashSet::new();
        let mut parent_joint_of: HashMap<&str, usize> = HashMap::new();
        for (i, joint) in self.joints.iter().enumerate() {
            if !joint_names.insert(joint.name.as_str()) {
                return invalid(format!("duplicate joint {}", joint.name));
            }
            if !body_names.contains(joint.child.as_str()) {
                return invalid(format!("joint {} has unknown child {}", joint.name, joint.child));
            }
            if let Some(parent) = &joint.parent {
                if !body_names.contains(parent.as_str()) {
                    return invalid(format!("joint {} has unknown parent {}", joint.name, parent));
                }
                if joint.joint_type == JointType::Floating {
                    return invalid(format!(
                        "floating joint {} must be attached to the world",
                        joint.name
                    ));
                }
            }
            if matches!(joint.joint_type, JointType::Revolute | JointType::Prismatic)
                && joint.axis.length_squared() < 1e-12
            {
                return invalid(format!("joint {} has a zero axis", joint.name));
            }
            if parent_joint_of.insert(joint.child.as_str(), i).is_some() {
                return invalid(format!("body {} has two parent joints", joint.child));
            }
        }

        if let Some(body) = self
            .bodies
            .iter()
            .find(|body| !parent_joint_of.contains_key(body.name.as_str()))
        {
            return invalid(format!("body {} is not attached by any joint", body.name));
        }

        // Breadth-first from the world so parents come before children.
        let mut order = Vec::with_capacity(self.joints.len());
        let mut queue: VecDeque<usize> = self
            .joints
            .iter()
            .enumerate()
            .filter(|(_, joint)| joint.parent.is_none())
            .map(|(i, _)| i)
            .collect();
        while let Some(i) = queue.pop_front() {
            order.push(i);
            let child = self.joints[i].child.as_str();
            queue.extend(
                self.joints
                    .iter()
                    .enumerate()
                    .filter(|(_, joint)| joint.parent.as_deref() == Some(child))
                    .map(|(j, _)| j),
            );
        }

        if order.len() != self.joints.len() {
            return invalid(format!(
                "robot {} has joints that are not connected to the world",
                self.name
            ));
        }

        Ok(order)
    }
}

/// Static environment geometry, fixed in the world.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TerrainObjectDefinition {
    pub name: String,
    /// Shape poses are world poses.
    pub collision_shapes: Vec<CollisionShapeDefinition>,
}

impl TerrainObjectDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collision_shapes: Vec::new(),
        }
    }

    /// Flat ground: the half-space below `z = 0`.
    pub fn flat_ground() -> Self {
        Self::new("ground").with_collision_shape(CollisionShapeDefinition::new(
            "ground",
            ColliderShape::ground_plane(),
        ))
    }

    pub fn with_collision_shape(mut self, shape: CollisionShapeDefinition) -> Self {
        self.collision_shapes.push(shape);
        self
    }
}
