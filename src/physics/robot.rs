//! A simulated robot: its bodies in the ECS, its joints, and everything that runs per tick.

use std::collections::HashMap;

use glam::DVec3;
use tracing::{error, info};

use crate::ecs::components::physics::{
    AppliedWrench, BodyName, BodyVelocity, ExternalWrench, GroundContactPoints, RobotIndex,
};
use crate::ecs::components::transform::{Children, GlobalTransform, Parent, Transform};
use crate::error::{Result, SimulationError};

use super::collidable::Collidable;
use super::controller::{Controller, ControllerManager};
use super::definition::{RobotDefinition, SensorDefinition};
use super::dynamics::{ArticulatedBodyDynamics, ForwardDynamics};
use super::ground_contact::GroundContactPoint;
use super::integrator::integrate_joints;
use super::joint::{
    JointDampingCalculator, JointSet, JointSoftLimitCalculator, JointSourceMode, JointState,
    JointType, SimJoint,
};
use super::kinematics;
use super::sensor::{ImuSensor, JointEncoder, Sensor, SensorContext};
use super::spatial::{Twist, Wrench};
use super::wrench_estimator::JointWrenchEstimator;

pub struct RobotPhysics {
    name: String,
    index: usize,
    definition: RobotDefinition,
    joints: JointSet,
    /// Body entities in definition order.
    bodies: Vec<hecs::Entity>,
    bodies_by_name: HashMap<String, hecs::Entity>,
    collidables: Vec<Collidable>,
    damping: Vec<JointDampingCalculator>,
    soft_limits: Vec<JointSoftLimitCalculator>,
    forward_dynamics: Box<dyn ForwardDynamics>,
    controllers: ControllerManager,
    sensors: Vec<Box<dyn Sensor>>,
    joint_wrench_estimator: Option<JointWrenchEstimator>,
}

impl RobotPhysics {
    /// Validate `definition` and spawn its bodies into `world`.
    pub fn spawn(world: &mut hecs::World, index: usize, definition: RobotDefinition) -> Result<Self> {
        let order = definition.validate()?;

        let mut bodies = Vec::with_capacity(definition.bodies.len());
        let mut bodies_by_name = HashMap::new();
        let mut collidables = Vec::new();
        for body in &definition.bodies {
            let entity = world.spawn((
                Transform::identity(),
                GlobalTransform::default(),
                BodyVelocity::default(),
                body.mass_properties(),
                ExternalWrench::default(),
                AppliedWrench::default(),
                BodyName(body.name.clone()),
                RobotIndex(index),
            ));
            for shape in &body.collision_shapes {
                collidables.push(
                    Collidable::attached(
                        shape.name.clone(),
                        entity,
                        shape.shape.clone(),
                        shape.pose.to_affine(),
                    )
                    .with_filter(shape.collision_mask, shape.collision_group),
                );
            }
            bodies.push(entity);
            bodies_by_name.insert(body.name.clone(), entity);
        }

        let mut joints = Vec::with_capacity(order.len());
        let mut joint_of_child: HashMap<hecs::Entity, usize> = HashMap::new();
        for &i in &order {
            let def = &definition.joints[i];
            let child = bodies_by_name[&def.child];
            let parent = def.parent.as_ref().map(|name| bodies_by_name[name]);

            if let Some(parent) = parent {
                insert_child(world, parent, child)?;
            }
            if !def.ground_contact_points.is_empty() {
                let points = def
                    .ground_contact_points
                    .iter()
                    .map(|gcp| GroundContactPoint::new(gcp.name.clone(), gcp.offset))
                    .collect();
                insert_component(world, child, GroundContactPoints(points))?;
            }

            let mut joint = SimJoint::new(def.name.clone(), def.joint_type, parent, child);
            joint.parent_joint = parent.and_then(|parent| joint_of_child.get(&parent).copied());
            joint.origin = def.origin;
            joint.axis = def.axis.normalize_or_zero();
            joint.lower_limit = def.lower_limit;
            joint.upper_limit = def.upper_limit;
            joint.effort_limit = def.effort_limit;
            joint.velocity_limit = def.velocity_limit;
            joint.damping = def.damping;
            joint.kp_soft_limit = def.kp_soft_limit;
            joint.kd_soft_limit = def.kd_soft_limit;
            match &mut joint.state {
                JointState::OneDof(state) => {
                    state.q = def.initial_position;
                    state.qd = def.initial_velocity;
                }
                JointState::Floating(state) => state.pose = def.origin,
                JointState::Fixed => {}
            }

            joint_of_child.insert(child, joints.len());
            joints.push(joint);
        }
        let joints = JointSet::new(joints);

        let damping = joints
            .iter()
            .enumerate()
            .filter_map(|(i, joint)| JointDampingCalculator::new(i, joint))
            .collect();
        let soft_limits = joints
            .iter()
            .enumerate()
            .filter_map(|(i, joint)| JointSoftLimitCalculator::new(i, joint))
            .collect();

        let mut sensors: Vec<Box<dyn Sensor>> = Vec::with_capacity(definition.sensors.len());
        for sensor in &definition.sensors {
            match sensor {
                SensorDefinition::Imu { name, body, offset } => {
                    let entity = *bodies_by_name
                        .get(body)
                        .ok_or_else(|| SimulationError::UnknownBody(body.clone()))?;
                    sensors.push(Box::new(ImuSensor::new(name.clone(), entity, *offset)));
                }
                SensorDefinition::JointEncoder { name, joint } => {
                    let index = joints
                        .index_of(joint)
                        .ok_or_else(|| SimulationError::UnknownJoint(joint.clone()))?;
                    sensors.push(Box::new(JointEncoder::new(name.clone(), index)));
                }
            }
        }

        let mut robot = Self {
            name: definition.name.clone(),
            index,
            definition,
            joints,
            bodies,
            bodies_by_name,
            collidables,
            damping,
            soft_limits,
            forward_dynamics: Box::new(ArticulatedBodyDynamics::new()),
            controllers: ControllerManager::new(),
            sensors,
            joint_wrench_estimator: None,
        };
        robot.update_frames(world);
        robot.update_collidables(world);

        info!(
            robot = %robot.name,
            bodies = robot.bodies.len(),
            joints = robot.joints.len(),
            collidables = robot.collidables.len(),
            "robot added"
        );
        Ok(robot)
    }

    /// Replace the bundled forward dynamics with another solver.
    pub fn with_forward_dynamics(mut self, forward_dynamics: Box<dyn ForwardDynamics>) -> Self {
        self.forward_dynamics = forward_dynamics;
        self
    }

    pub fn set_forward_dynamics(&mut self, forward_dynamics: Box<dyn ForwardDynamics>) {
        self.forward_dynamics = forward_dynamics;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registration index in the owning engine.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn definition(&self) -> &RobotDefinition {
        &self.definition
    }

    pub fn joints(&self) -> &JointSet {
        &self.joints
    }

    /// Direct joint access. Call [`RobotPhysics::update_frames`] after changing positions or velocities.
    pub fn joints_mut(&mut self) -> &mut JointSet {
        &mut self.joints
    }

    pub fn bodies(&self) -> &[hecs::Entity] {
        &self.bodies
    }

    pub fn body(&self, name: &str) -> Option<hecs::Entity> {
        self.bodies_by_name.get(name).copied()
    }

    pub fn collidables(&self) -> &[Collidable] {
        &self.collidables
    }

    pub fn forward_dynamics(&self) -> &dyn ForwardDynamics {
        self.forward_dynamics.as_ref()
    }

    pub fn controller_manager(&self) -> &ControllerManager {
        &self.controllers
    }

    pub fn controller_manager_mut(&mut self) -> &mut ControllerManager {
        &mut self.controllers
    }

    pub fn add_controller(&mut self, controller: Box<dyn Controller>) {
        self.controllers.add_controller(controller);
    }

    pub fn add_sensor(&mut self, sensor: Box<dyn Sensor>) {
        self.sensors.push(sensor);
    }

    pub fn sensors(&self) -> &[Box<dyn Sensor>] {
        &self.sensors
    }

    pub fn sensor(&self, name: &str) -> Option<&dyn Sensor> {
        self.sensors
            .iter()
            .find(|sensor| sensor.name() == name)
            .map(|sensor| sensor.as_ref())
    }

    pub fn set_joint_wrench_estimation(&mut self, enabled: bool) {
        match (enabled, self.joint_wrench_estimator.is_some()) {
            (true, false) => self.joint_wrench_estimator = Some(JointWrenchEstimator::new()),
            (false, true) => self.joint_wrench_estimator = None,
            _ => {}
        }
    }

    /// Last estimated joint wrenches, if estimation is enabled.
    pub fn joint_wrenches(&self) -> Option<&[Wrench]> {
        self.joint_wrench_estimator
            .as_ref()
            .map(JointWrenchEstimator::wrenches)
    }

    pub fn set_joint_positions(&mut self, world: &mut hecs::World, positions: &[f64]) -> Result<()> {
        self.joints.set_positions(positions)?;
        self.update_frames(world);
        Ok(())
    }

    pub fn set_joint_velocities(&mut self, world: &mut hecs::World, velocities: &[f64]) -> Result<()> {
        self.joints.set_velocities(velocities)?;
        self.update_frames(world);
        Ok(())
    }

    /// Commanded efforts, held until changed.
    pub fn set_joint_efforts(&mut self, efforts: &[f64]) -> Result<()> {
        self.joints.set_efforts(efforts)
    }

    /// Pinned joints are held at zero velocity and acceleration.
    pub fn pin_joint(&mut self, joint: &str, pinned: bool) -> Result<()> {
        let joint = self
            .joints
            .get_mut(joint)
            .ok_or_else(|| SimulationError::UnknownJoint(joint.to_string()))?;
        joint.pinned = pinned;
        joint.hold_if_pinned();
        Ok(())
    }

    /// Wrench applied to a body every tick until changed, in the body frame about its origin.
    pub fn set_applied_wrench(&mut self, world: &mut hecs::World, body: &str, wrench: Wrench) -> Result<()> {
        let entity = self
            .body(body)
            .ok_or_else(|| SimulationError::UnknownBody(body.to_string()))?;
        let mut applied = world
            .get::<&mut AppliedWrench>(entity)
            .map_err(|_| SimulationError::UnknownBody(body.to_string()))?;
        applied.0 = wrench;
        Ok(())
    }

    /// Ground contact points of every body, in joint order.
    pub fn ground_contact_points(&self, world: &hecs::World) -> Vec<GroundContactPoint> {
        self.joints
            .iter()
            .filter_map(|joint| world.get::<&GroundContactPoints>(joint.child).ok())
            .flat_map(|points| points.0.clone())
            .collect()
    }

    /// Zero the external wrench accumulators and restore the commanded efforts.
    pub fn reset_calculators(&mut self, world: &mut hecs::World) {
        for &body in &self.bodies {
            if let Ok(mut external) = world.get::<&mut ExternalWrench>(body) {
                external.0.set_to_zero();
            }
        }
        for joint in self.joints.iter_mut() {
            joint.reset_effort();
            joint.hold_if_pinned();
        }
    }

    pub fn initialize_controllers(&mut self) {
        self.controllers.initialize_controllers(&self.joints);
    }

    pub fn update_controllers(&mut self, time: f64) {
        self.controllers.update_controllers(time, &mut self.joints);
        // A controller may have written efforts after the reset.
        for joint in self.joints.iter_mut() {
            joint.reset_effort();
        }
    }

    pub fn pause_controllers(&mut self) {
        self.controllers.pause_controllers();
    }

    pub fn compute_joint_damping(&mut self) {
        for calculator in &mut self.damping {
            calculator.compute(&mut self.joints);
        }
    }

    pub fn compute_joint_soft_limits(&mut self) {
        for calculator in &mut self.soft_limits {
            calculator.compute(&mut self.joints);
        }
    }

    pub fn update_collidables(&mut self, world: &hecs::World) {
        for collidable in &mut self.collidables {
            collidable.update(world);
        }
    }

    pub fn do_forward_dynamics(&mut self, world: &hecs::World, gravity: DVec3) -> Result<()> {
        let modes: Vec<JointSourceMode> = self.joints.iter().map(SimJoint::source_mode).collect();
        let source_mode = |i: usize| modes[i];
        self.forward_dynamics
            .compute(world, &self.joints, gravity, &source_mode)
    }

    /// Copy the dynamics output back into joint state.
    ///
    /// Effort sources take the acceleration, capped at `max_acceleration`.
    /// Acceleration sources take the effort, capped at the joint effort limit.
    /// Output of the wrong size is rejected and leaves joint state unchanged.
    pub fn write_joint_accelerations(&mut self, max_acceleration: f64) -> Result<()> {
        let accelerations = self.forward_dynamics.joint_accelerations();
        let efforts = self.forward_dynamics.joint_efforts();
        let expected = self.joints.degrees_of_freedom();
        let actual = if accelerations.len() != expected {
            Some(accelerations.len())
        } else if efforts.len() != expected {
            Some(efforts.len())
        } else {
            None
        };
        if let Some(actual) = actual {
            error!(
                robot = %self.name,
                expected,
                accelerations = accelerations.len(),
                efforts = efforts.len(),
                "forward dynamics output has the wrong size"
            );
            return Err(SimulationError::DimensionMismatch {
                what: "forward dynamics output",
                expected,
                actual,
            });
        }

        for i in 0..self.joints.len() {
            let offset = self.joints.dof_offset(i);
            let joint = self.joints.by_index_mut(i);
            let mode = joint.source_mode();
            let effort_limit = joint.effort_limit;
            match &mut joint.state {
                JointState::OneDof(state) => match mode {
                    JointSourceMode::EffortSource => {
                        state.qdd = accelerations[offset].clamp(-max_acceleration, max_acceleration);
                    }
                    JointSourceMode::AccelerationSource => {
                        state.tau = efforts[offset].clamp(-effort_limit, effort_limit);
                    }
                },
                JointState::Floating(state) => {
                    let a = &accelerations[offset..offset + 6];
                    let e = &efforts[offset..offset + 6];
                    match mode {
                        JointSourceMode::EffortSource => {
                            state.acceleration = Twist::new(
                                DVec3::new(a[0], a[1], a[2]),
                                DVec3::new(a[3], a[4], a[5]),
                            )
                            .clamped(max_acceleration);
                        }
                        JointSourceMode::AccelerationSource => {
                            state.wrench =
                                Wrench::new(DVec3::new(e[0], e[1], e[2]), DVec3::new(e[3], e[4], e[5]));
                        }
                    }
                }
                JointState::Fixed => {}
            }
            joint.hold_if_pinned();
        }
        Ok(())
    }

    /// Fail if any joint would leave the twist bounds after integrating `dt`.
    pub fn check_joint_twists(&self, dt: f64, max_translational: f64, max_rotational: f64) -> Result<()> {
        for joint in self.joints.iter() {
            let (angular, linear) = predicted_twist_magnitudes(joint, dt);
            // NaN fails both comparisons.
            if !(angular <= max_rotational) || !(linear <= max_translational) {
                error!(
                    robot = %self.name,
                    joint = %joint.name,
                    angular,
                    linear,
                    "unreasonable joint acceleration"
                );
                return Err(SimulationError::UnreasonableAcceleration {
                    joint: joint.name.clone(),
                    angular,
                    linear,
                });
            }
        }
        Ok(())
    }

    pub fn integrate_state(&mut self, dt: f64) {
        integrate_joints(&mut self.joints, dt);
    }

    pub fn update_frames(&mut self, world: &mut hecs::World) {
        kinematics::update_frames(world, &self.joints);
    }

    pub fn update_sensors(&mut self, world: &hecs::World, gravity: DVec3) {
        let context = SensorContext {
            world,
            joints: &self.joints,
            dynamics: self.forward_dynamics.as_ref(),
            gravity,
        };
        for sensor in &mut self.sensors {
            sensor.update(&context);
        }
    }

    pub fn estimate_joint_wrenches(&mut self, world: &hecs::World, gravity: DVec3) {
        if let Some(estimator) = &mut self.joint_wrench_estimator {
            estimator.estimate(world, &self.joints, self.forward_dynamics.as_ref(), gravity);
        }
    }
}

impl std::fmt::Debug for RobotPhysics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RobotPhysics")
            .field("name", &self.name)
            .field("index", &self.index)
            .field("joints", &self.joints.len())
            .field("bodies", &self.bodies.len())
            .field("collidables", &self.collidables.len())
            .finish()
    }
}

fn predicted_twist_magnitudes(joint: &SimJoint, dt: f64) -> (f64, f64) {
    match (&joint.state, joint.joint_type) {
        (JointState::OneDof(state), JointType::Revolute) => ((state.qd + state.qdd * dt).abs(), 0.0),
        (JointState::OneDof(state), _) => (0.0, (state.qd + state.qdd * dt).abs()),
        (JointState::Floating(state), _) => {
            let twist = state.twist + state.acceleration * dt;
            (twist.angular.length(), twist.linear.length())
        }
        (JointState::Fixed, _) => (0.0, 0.0),
    }
}

fn insert_child(world: &mut hecs::World, parent: hecs::Entity, child: hecs::Entity) -> Result<()> {
    insert_component(world, child, Parent(parent))?;
    let pushed = match world.get::<&mut Children>(parent) {
        Ok(mut children) => {
            children.0.push(child);
            true
        }
        Err(_) => false,
    };
    if pushed {
        Ok(())
    } else {
        insert_component(world, parent, Children(vec![child]))
    }
}

fn insert_component(
    world: &mut hecs::World,
    entity: hecs::Entity,
    component: impl hecs::Component,
) -> Result<()> {
    world
        .insert_one(entity, component)
        .map_err(|_| SimulationError::InvalidDefinition(format!("body entity {entity:?} was despawned")))
}
