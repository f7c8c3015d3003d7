//! Robot controllers and their per-robot manager.

use super::joint::JointSet;

/// User logic run once per tick before efforts are computed.
///
/// Controllers write desired efforts with [`JointSet::set_effort_command`] or
/// [`JointSet::set_efforts`]. Damping and soft-limit efforts are added on top.
/// The applied effort is rebuilt from these commands after the controllers
/// run, so only commands reach the dynamics.
pub trait Controller {
    fn name(&self) -> &str;

    fn initialize(&mut self, _joints: &JointSet) {}

    fn do_control(&mut self, time: f64, joints: &mut JointSet);

    /// Called when the engine is paused.
    fn pause(&mut self) {}
}

/// Runs the wrapped controller at a fixed period instead of every tick.
///
/// The period should be a multiple of the tick length, otherwise the update
/// rate drifts.
pub struct ThrottledController {
    inner: Box<dyn Controller>,
    period: f64,
    next_update: Option<f64>,
}

impl ThrottledController {
    pub fn new(inner: Box<dyn Controller>, period: f64) -> Self {
        Self {
            inner,
            period,
            next_update: None,
        }
    }
}

const THROTTLE_EPSILON: f64 = 1e-9;

impl Controller for ThrottledController {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn initialize(&mut self, joints: &JointSet) {
        self.next_update = None;
        self.inner.initialize(joints);
    }

    fn do_control(&mut self, time: f64, joints: &mut JointSet) {
        if let Some(next) = self.next_update {
            if time + THROTTLE_EPSILON < next {
                return;
            }
        }
        self.inner.do_control(time, joints);
        let next = match self.next_update {
            Some(next) if next + self.period > time => next + self.period,
            _ => time + self.period,
        };
        self.next_update = Some(next);
    }

    fn pause(&mut self) {
        self.inner.pause();
    }
}

/// The controllers of one robot, run in insertion order.
#[derive(Default)]
pub struct ControllerManager {
    controllers: Vec<Box<dyn Controller>>,
    time: f64,
}

impl ControllerManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_controller(&mut self, controller: Box<dyn Controller>) {
        self.controllers.push(controller);
    }

    /// Run `controller` every `period` seconds of simulation time.
    pub fn add_throttled_controller(&mut self, controller: Box<dyn Controller>, period: f64) {
        self.controllers
            .push(Box::new(ThrottledController::new(controller, period)));
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    /// Time passed to the last update.
    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn initialize_controllers(&mut self, joints: &JointSet) {
        self.time = 0.0;
        for controller in &mut self.controllers {
            controller.initialize(joints);
        }
    }

    pub fn update_controllers(&mut self, time: f64, joints: &mut JointSet) {
        self.time = time;
        for controller in &mut self.controllers {
            controller.do_control(time, joints);
        }
    }

    pub fn pause_controllers(&mut self) {
        for controller in &mut self.controllers {
            controller.pause();
        }
    }
}

impl std::fmt::Debug for ControllerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerManager")
            .field(
                "controllers",
                &self.controllers.iter().map(|c| c.name()).collect::<Vec<_>>(),
            )
            .field("time", &self.time)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::joint::{JointType, SimJoint};
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Records the times it ran at and commands the time as effort.
    struct Recorder {
        calls: Rc<RefCell<Vec<f64>>>,
        paused: Rc<RefCell<bool>>,
    }

    impl Controller for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn do_control(&mut self, time: f64, joints: &mut JointSet) {
            self.calls.borrow_mut().push(time);
            joints.set_effort_command("elbow", time).unwrap();
        }

        fn pause(&mut self) {
            *self.paused.borrow_mut() = true;
        }
    }

    fn joints() -> JointSet {
        let mut world = hecs::World::new();
        JointSet::new(vec![SimJoint::new(
            "elbow",
            JointType::Revolute,
            None,
            world.spawn(()),
        )])
    }

    fn recorder() -> (Recorder, Rc<RefCell<Vec<f64>>>, Rc<RefCell<bool>>) {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let paused = Rc::new(RefCell::new(false));
        let recorder = Recorder {
            calls: calls.clone(),
            paused: paused.clone(),
        };
        (recorder, calls, paused)
    }

    #[test]
    fn test_controllers_write_effort_commands() {
        let mut joints = joints();
        let (controller, calls, paused) = recorder();
        let mut manager = ControllerManager::new();
        manager.add_controller(Box::new(controller));

        manager.initialize_controllers(&joints);
        manager.update_controllers(0.25, &mut joints);
        manager.pause_controllers();

        assert_eq!(*calls.borrow(), vec![0.25]);
        assert!(*paused.borrow());
        assert_eq!(joints.by_index(0).one_dof().map(|s| s.tau_command), Some(0.25));
        assert_eq!(manager.time(), 0.25);
    }

    #[test]
    fn test_throttled_controller_runs_at_its_period() {
        let mut joints = joints();
        let (controller, calls, _) = recorder();
        let mut manager = ControllerManager::new();
        manager.add_throttled_controller(Box::new(controller), 0.003);
        manager.initialize_controllers(&joints);

        for tick in 0..10 {
            manager.update_controllers(tick as f64 * 0.001, &mut joints);
        }

        let calls = calls.borrow();
        assert_eq!(calls.len(), 4);
        for (call, expected) in calls.iter().zip([0.0, 0.003, 0.006, 0.009]) {
            assert!((call - expected).abs() < 1e-12);
        }
    }
}
