//! Sensors refreshed at the end of every tick from the integrated state.

use glam::{DQuat, DVec3};

use crate::ecs::components::physics::{BodyVelocity, MassProperties};
use crate::ecs::components::transform::{GlobalTransform, Transform};

use super::dynamics::ForwardDynamics;
use super::joint::JointSet;

/// What a sensor may read during its update.
pub struct SensorContext<'a> {
    pub world: &'a hecs::World,
    pub joints: &'a JointSet,
    pub dynamics: &'a dyn ForwardDynamics,
    pub gravity: DVec3,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorReading {
    /// Rates and accelerations are expressed in the sensor frame.
    Imu {
        orientation: DQuat,
        angular_velocity: DVec3,
        linear_acceleration: DVec3,
    },
    JointEncoder { position: f64, velocity: f64 },
}

pub trait Sensor {
    fn name(&self) -> &str;

    fn update(&mut self, context: &SensorContext<'_>);

    fn reading(&self) -> SensorReading;
}

/// Inertial measurement unit rigidly mounted on a body.
///
/// The accelerometer reads proper acceleration: a resting IMU reads `-gravity`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImuSensor {
    name: String,
    body: hecs::Entity,
    /// Sensor frame in the body frame.
    offset: Transform,
    orientation: DQuat,
    angular_velocity: DVec3,
    linear_acceleration: DVec3,
}

impl ImuSensor {
    pub fn new(name: impl Into<String>, body: hecs::Entity, offset: Transform) -> Self {
        Self {
            name: name.into(),
            body,
            offset,
            orientation: DQuat::IDENTITY,
            angular_velocity: DVec3::ZERO,
            linear_acceleration: DVec3::ZERO,
        }
    }

    pub fn body(&self) -> hecs::Entity {
        self.body
    }

    /// World orientation of the sensor frame.
    pub fn orientation(&self) -> DQuat {
        self.orientation
    }

    pub fn angular_velocity(&self) -> DVec3 {
        self.angular_velocity
    }

    pub fn linear_acceleration(&self) -> DVec3 {
        self.linear_acceleration
    }
}

impl Sensor for ImuSensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn update(&mut self, context: &SensorContext<'_>) {
        let world = context.world;
        let Ok(frame) = world.get::<&GlobalTransform>(self.body).map(|frame| *frame) else {
            return;
        };
        let velocity = world
            .get::<&BodyVelocity>(self.body)
            .map(|velocity| velocity.0)
            .unwrap_or_default();
        let center_of_mass = world
            .get::<&MassProperties>(self.body)
            .map(|props| frame.transform_point(props.center_of_mass))
            .unwrap_or_else(|_| frame.translation());

        let sensor_frame = frame.0 * self.offset.to_affine();
        let to_sensor = sensor_frame.matrix3.transpose();
        self.orientation = DQuat::from_mat3(&sensor_frame.matrix3);
        self.angular_velocity = to_sensor * velocity.angular;

        // Rigid-body transfer of the centre-of-mass acceleration to the sensor point.
        let acceleration = context
            .dynamics
            .body_acceleration(self.body)
            .map(|body_acceleration| {
                let r = sensor_frame.translation - center_of_mass;
                let omega = velocity.angular;
                body_acceleration.linear
                    + body_acceleration.angular.cross(r)
                    + omega.cross(omega.cross(r))
            })
            .unwrap_or(DVec3::ZERO);
        self.linear_acceleration = to_sensor * (acceleration - context.gravity);
    }

    fn reading(&self) -> SensorReading {
        SensorReading::Imu {
            orientation: self.orientation,
            angular_velocity: self.angular_velocity,
            linear_acceleration: self.linear_acceleration,
        }
    }
}

/// Position and velocity of a 1-DoF joint.
#[derive(Debug, Clone, PartialEq)]
pub struct JointEncoder {
    name: String,
    joint: usize,
    position: f64,
    velocity: f64,
}

impl JointEncoder {
    pub fn new(name: impl Into<String>, joint: usize) -> Self {
        Self {
            name: name.into(),
            joint,
            position: 0.0,
            velocity: 0.0,
        }
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn velocity(&self) -> f64 {
        self.velocity
    }
}

impl Sensor for JointEncoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn update(&mut self, context: &SensorContext<'_>) {
        if let Some(state) = context.joints.by_index(self.joint).one_dof() {
            self.position = state.q;
            self.velocity = state.qd;
        }
    }

    fn reading(&self) -> SensorReading {
        SensorReading::JointEncoder {
            position: self.position,
            velocity: self.velocity,
        }
    }
}
