//! Contact-point based physics engine for articulated robots.
//!
//! # Architecture
//!
//! Every tick runs, in order:
//!
//! 1. Reset external wrench accumulators and applied efforts
//! 2. Run controllers (skipped while paused)
//! 3. Add joint damping and soft-limit efforts
//! 4. Refresh collidable poses and bounding boxes
//! 5. Resolve contact forces (ground contact points or penalty pairs)
//! 6. Fold contact and applied wrenches into each body's accumulator
//! 7. Forward dynamics
//! 8. Write accelerations/efforts back into joint state
//! 9. Abort on unreasonable joint twists
//! 10. Integrate joint state
//! 11. Refresh body frames
//! 12. Refresh sensors (and joint wrench estimates when enabled)

pub mod collidable;
pub mod collider;
pub mod contact;
pub mod controller;
pub mod definition;
pub mod dynamics;
pub mod ground_contact;
pub mod integrator;
pub mod joint;
pub mod kinematics;
pub mod narrowphase;
pub mod penalty;
pub mod robot;
pub mod sensor;
pub mod spatial;
pub mod wrench_estimator;

use glam::DVec3;
use tracing::{debug, info};

use crate::ecs::components::physics::{AppliedWrench, ExternalWrench};
use crate::error::{Result, SimulationError};

use self::collidable::Collidable;
use self::contact::{ContactModel, ContactParameters, ContactScene};
use self::definition::{RobotDefinition, TerrainObjectDefinition};
use self::ground_contact::{GroundContactForceCalculator, GroundContactPoint};
use self::penalty::PenaltyCollisionCalculator;
use self::robot::RobotPhysics;
use self::spatial::Wrench;

/// Which contact force model resolves contacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContactModelKind {
    /// Ground contact points against the terrain.
    #[default]
    GroundContactPoints,
    /// Penalty forces between collision shapes.
    Penalty,
}

/// Configuration for the physics simulation.
#[derive(Debug, Clone)]
pub struct PhysicsConfig {
    /// Gravity vector. Default: (0, 0, -9.81).
    pub gravity: DVec3,
    /// Largest joint linear velocity before the run is aborted. Default: 1e12.
    pub max_translational_twist: f64,
    /// Largest joint angular velocity before the run is aborted. Default: 1e7.
    pub max_rotational_twist: f64,
    /// Estimate joint wrenches after every tick. Default: false.
    pub estimate_joint_wrenches: bool,
    /// Default: ground contact points.
    pub contact_model: ContactModelKind,
    /// Cap on each written joint acceleration component. Default: unbounded.
    pub max_joint_acceleration: f64,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            gravity: DVec3::new(0.0, 0.0, -9.81),
            max_translational_twist: 1e12,
            max_rotational_twist: 1e7,
            estimate_joint_wrenches: false,
            contact_model: ContactModelKind::default(),
            max_joint_acceleration: f64::INFINITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    /// Initialized, no tick run yet.
    Initialized,
    SteadyState,
    /// Controllers are suspended; physics keeps stepping.
    Paused,
}

/// The physics engine: owns the body world, the robots and the terrain.
pub struct PhysicsEngine {
    config: PhysicsConfig,
    world: hecs::World,
    robots: Vec<RobotPhysics>,
    terrain_objects: Vec<TerrainObjectDefinition>,
    environment: Vec<Collidable>,
    contact_model: Box<dyn ContactModel>,
    contact_parameters: ContactParameters,
    state: EngineState,
}

impl PhysicsEngine {
    pub fn new(config: PhysicsConfig) -> Self {
        let contact_parameters = ContactParameters::default();
        let contact_model: Box<dyn ContactModel> = match config.contact_model {
            ContactModelKind::GroundContactPoints => {
                Box::new(GroundContactForceCalculator::new(contact_parameters))
            }
            ContactModelKind::Penalty => {
                Box::new(PenaltyCollisionCalculator::new(contact_parameters.penalty))
            }
        };
        Self {
            config,
            world: hecs::World::new(),
            robots: Vec::new(),
            terrain_objects: Vec::new(),
            environment: Vec::new(),
            contact_model,
            contact_parameters,
            state: EngineState::Uninitialized,
        }
    }

    pub fn config(&self) -> &PhysicsConfig {
        &self.config
    }

    /// Validate and add a robot. Returns its index.
    ///
    /// A robot added after initialization is initialized immediately.
    pub fn add_robot(&mut self, definition: RobotDefinition) -> Result<usize> {
        if self.robot(&definition.name).is_some() {
            return Err(SimulationError::InvalidDefinition(format!(
                "robot {} already exists",
                definition.name
            )));
        }
        let index = self.robots.len();
        let mut robot = RobotPhysics::spawn(&mut self.world, index, definition)?;
        robot.set_joint_wrench_estimation(self.config.estimate_joint_wrenches);
        self.robots.push(robot);

        if self.state != EngineState::Uninitialized {
            self.initialize_robot(index)?;
        }
        Ok(index)
    }

    pub fn add_terrain_object(&mut self, definition: TerrainObjectDefinition) {
        for shape in &definition.collision_shapes {
            self.environment.push(
                Collidable::fixed(shape.name.clone(), shape.shape.clone(), shape.pose.to_affine())
                    .with_filter(shape.collision_mask, shape.collision_group),
            );
        }
        info!(
            terrain = %definition.name,
            shapes = definition.collision_shapes.len(),
            "terrain object added"
        );
        self.terrain_objects.push(definition);
    }

    /// Replace the contact parameters used from the next tick on.
    pub fn set_contact_parameters(&mut self, parameters: ContactParameters) {
        self.contact_model.set_parameters(&parameters);
        self.contact_parameters = parameters;
    }

    pub fn contact_parameters(&self) -> &ContactParameters {
        &self.contact_parameters
    }

    pub fn set_estimate_joint_wrenches(&mut self, estimate: bool) {
        self.config.estimate_joint_wrenches = estimate;
        for robot in &mut self.robots {
            robot.set_joint_wrench_estimation(estimate);
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn world(&self) -> &hecs::World {
        &self.world
    }

    pub fn robots(&self) -> &[RobotPhysics] {
        &self.robots
    }

    pub fn robot(&self, name: &str) -> Option<&RobotPhysics> {
        self.robots.iter().find(|robot| robot.name() == name)
    }

    /// Mutable robot access for controllers, sensors and pinning.
    pub fn robot_mut(&mut self, name: &str) -> Option<&mut RobotPhysics> {
        self.robots.iter_mut().find(|robot| robot.name() == name)
    }

    pub fn terrain_objects(&self) -> &[TerrainObjectDefinition] {
        &self.terrain_objects
    }

    pub fn environment_collidables(&self) -> &[Collidable] {
        &self.environment
    }

    /// Snapshot of a robot's ground contact points.
    pub fn ground_contact_points(&self, robot: &str) -> Result<Vec<GroundContactPoint>> {
        let robot = self.find_robot(robot)?;
        Ok(self.robots[robot].ground_contact_points(&self.world))
    }

    pub fn set_joint_positions(&mut self, robot: &str, positions: &[f64]) -> Result<()> {
        let robot = self.find_robot(robot)?;
        self.robots[robot].set_joint_positions(&mut self.world, positions)
    }

    pub fn set_joint_velocities(&mut self, robot: &str, velocities: &[f64]) -> Result<()> {
        let robot = self.find_robot(robot)?;
        self.robots[robot].set_joint_velocities(&mut self.world, velocities)
    }

    pub fn set_joint_efforts(&mut self, robot: &str, efforts: &[f64]) -> Result<()> {
        let robot = self.find_robot(robot)?;
        self.robots[robot].set_joint_efforts(efforts)
    }

    pub fn pin_joint(&mut self, robot: &str, joint: &str, pinned: bool) -> Result<()> {
        let robot = self.find_robot(robot)?;
        self.robots[robot].pin_joint(joint, pinned)
    }

    pub fn set_applied_wrench(&mut self, robot: &str, body: &str, wrench: Wrench) -> Result<()> {
        let robot = self.find_robot(robot)?;
        self.robots[robot].set_applied_wrench(&mut self.world, body, wrench)
    }

    fn find_robot(&self, name: &str) -> Result<usize> {
        self.robots
            .iter()
            .position(|robot| robot.name() == name)
            .ok_or_else(|| SimulationError::UnknownRobot(name.to_string()))
    }

    /// Prepare every robot: frames, a seeding dynamics pass for the sensors, controllers.
    pub fn initialize(&mut self) -> Result<()> {
        for index in 0..self.robots.len() {
            self.initialize_robot(index)?;
        }
        for collidable in &mut self.environment {
            collidable.update_bounding_box();
        }
        self.contact_model.reset(&mut self.world);
        self.state = EngineState::Initialized;
        info!(
            robots = self.robots.len(),
            terrain = self.terrain_objects.len(),
            contact_model = self.contact_model.name(),
            "physics engine initialized"
        );
        Ok(())
    }

    fn initialize_robot(&mut self, index: usize) -> Result<()> {
        let gravity = self.config.gravity;
        let robot = &mut self.robots[index];
        robot.update_frames(&mut self.world);
        robot.reset_calculators(&mut self.world);
        // Accelerations only, so the accelerometers start from a consistent state.
        robot.do_forward_dynamics(&self.world, gravity)?;
        robot.update_sensors(&self.world, gravity);
        robot.initialize_controllers();
        robot.update_collidables(&self.world);
        Ok(())
    }

    /// Suspend the controllers. Physics keeps stepping.
    pub fn pause(&mut self) {
        if matches!(self.state, EngineState::Initialized | EngineState::SteadyState) {
            for robot in &mut self.robots {
                robot.pause_controllers();
            }
            self.state = EngineState::Paused;
            debug!("physics engine paused");
        }
    }

    pub fn resume(&mut self) {
        if self.state == EngineState::Paused {
            self.state = EngineState::SteadyState;
            debug!("physics engine resumed");
        }
    }

    /// Advance the simulation by `dt`. The first call only initializes.
    ///
    /// An [`SimulationError::UnreasonableAcceleration`] means the run diverged:
    /// nothing was integrated and the caller should stop.
    pub fn simulate(&mut self, time: f64, dt: f64) -> Result<()> {
        if self.state == EngineState::Uninitialized {
            return self.initialize();
        }

        let gravity = self.config.gravity;
        let run_controllers = self.state != EngineState::Paused;

        for robot in &mut self.robots {
            robot.reset_calculators(&mut self.world);
            if run_controllers {
                robot.update_controllers(time);
            }
        }

        for robot in &mut self.robots {
            robot.compute_joint_damping();
            robot.compute_joint_soft_limits();
            robot.update_collidables(&self.world);
        }
        for collidable in &mut self.environment {
            collidable.update(&self.world);
        }

        let wrenches = {
            let mut scene = ContactScene {
                world: &mut self.world,
                robot_collidables: self
                    .robots
                    .iter()
                    .flat_map(|robot| robot.collidables())
                    .collect(),
                environment: &self.environment,
            };
            self.contact_model.resolve(&mut scene)
        };

        for contact in wrenches {
            if let Ok(mut external) = self.world.get::<&mut ExternalWrench>(contact.body) {
                external.0 += contact.wrench;
            }
        }
        for (_, (external, applied)) in self
            .world
            .query_mut::<(&mut ExternalWrench, &AppliedWrench)>()
        {
            external.0 += applied.0;
        }

        for robot in &mut self.robots {
            robot.do_forward_dynamics(&self.world, gravity)?;
            robot.write_joint_accelerations(self.config.max_joint_acceleration)?;
        }

        // Every robot is checked before any is integrated.
        for robot in &self.robots {
            robot.check_joint_twists(
                dt,
                self.config.max_translational_twist,
                self.config.max_rotational_twist,
            )?;
        }

        for robot in &mut self.robots {
            robot.integrate_state(dt);
            robot.update_frames(&mut self.world);
            robot.update_sensors(&self.world, gravity);
            robot.estimate_joint_wrenches(&self.world, gravity);
        }

        if self.state == EngineState::Initialized {
            self.state = EngineState::SteadyState;
        }
        Ok(())
    }
}

impl std::fmt::Debug for PhysicsEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicsEngine")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("robots", &self.robots)
            .field("environment", &self.environment.len())
            .field("contact_model", &self.contact_model.name())
            .finish()
    }
}
