//! Simulation loop
//!
//! Drives the goal-seeking phase machine over a fixed time horizon: nominal
//! control, safety filtering, semi-implicit Euler integration, and log
//! accumulation, strictly in that order, once per tick.

use nalgebra::Vector2;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Uniform};

use crate::config::Config;
use crate::controller::{Control, TrackingController};
use crate::environment::{Obstacle, World};
use crate::safety_filter::SafetyFilter;
use crate::SimulationError;

/// The robot state under the unicycle model
/// # Example
/// ```
/// use safe_unicycle::simulation::SimulationState;
/// let state = SimulationState::new(1.0, 1.5, std::f64::consts::FRAC_PI_2, 0.0);
/// assert!(state.is_finite());
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct SimulationState {
    /// Position along x in meters
    pub x: f64,
    /// Position along y in meters
    pub y: f64,
    /// Heading in radians
    pub theta: f64,
    /// Forward speed in m/s
    pub v: f64,
}

/// Implementation of the SimulationState
impl SimulationState {
    /// Creates a new state from its components
    /// # Arguments
    /// * `x` - Position along x in meters
    /// * `y` - Position along y in meters
    /// * `theta` - Heading in radians
    /// * `v` - Forward speed in m/s
    /// # Returns
    /// * The new state instance
    pub fn new(x: f64, y: f64, theta: f64, v: f64) -> Self {
        Self { x, y, theta, v }
    }

    /// The planar position as a vector
    pub fn position(&self) -> Vector2<f64> {
        Vector2::new(self.x, self.y)
    }

    /// Checks that every component is a finite number
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.theta.is_finite() && self.v.is_finite()
    }
}

impl From<[f64; 4]> for SimulationState {
    fn from(state: [f64; 4]) -> Self {
        Self::new(state[0], state[1], state[2], state[3])
    }
}

/// A goal pose in the cyclic waypoint list
#[derive(Clone, Copy, Debug)]
pub struct Goal {
    /// Target position along x in meters
    pub x: f64,
    /// Target position along y in meters
    pub y: f64,
    /// Target heading in radians
    pub theta: f64,
    /// Target speed in m/s
    pub v: f64,
}

impl From<[f64; 4]> for Goal {
    fn from(goal: [f64; 4]) -> Self {
        Self {
            x: goal[0],
            y: goal[1],
            theta: goal[2],
            v: goal[3],
        }
    }
}

/// Tracking errors recorded for one tick
#[derive(Clone, Copy, Debug)]
pub struct TrackingError {
    /// Euclidean distance to the goal position in meters
    pub position_error: f64,
    /// Heading error towards the goal in radians
    pub angular_error: f64,
}

/// The goal-seeking phase of the loop
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Driving towards the active goal
    SeekingGoal,
    /// The active goal was reached this tick
    Arrived,
}

/// Append-only record of one run, consumed by the exporter
#[derive(Clone, Debug, Default)]
pub struct RunLog {
    /// Post-integration state per tick
    pub states: Vec<SimulationState>,
    /// Applied (filtered) command per tick
    pub controls: Vec<Control>,
    /// Tracking errors per tick
    pub errors: Vec<TrackingError>,
    /// Ticks whose safety guarantee is void
    pub degraded: Vec<bool>,
    /// The obstacle set, recorded once at startup
    pub obstacles: Vec<Obstacle>,
}

/// Implementation of the RunLog
impl RunLog {
    /// The number of recorded ticks
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// True if no tick has been recorded yet
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// The number of ticks recorded as safety-degraded
    pub fn degraded_count(&self) -> usize {
        self.degraded.iter().filter(|d| **d).count()
    }
}

/// The fixed-step simulation loop
///
/// Owns the robot state and mutates it exactly once per tick. Obstacles are
/// frozen at construction; the goal list is visited cyclically, and goal 0 is
/// perturbed afresh on every visit.
pub struct Simulation {
    state: SimulationState,
    controller: TrackingController,
    filter: SafetyFilter,
    goals: Vec<Goal>,
    goal_index: usize,
    active_goal: Goal,
    phase: Phase,
    dt: f64,
    duration: f64,
    position_tolerance: f64,
    goal_jitter: f64,
    elapsed: f64,
    prev_angular_error: f64,
    last_valid: Control,
    jitter_rng: ChaCha8Rng,
    log: RunLog,
}

/// Implementation of the Simulation
impl Simulation {
    /// Wires the world, controller, and safety filter into a runnable loop
    /// # Arguments
    /// * `config` - The full run configuration, already validated
    /// * `world` - The generated obstacle world
    /// # Returns
    /// * The new simulation instance
    /// # Errors
    /// * `InvalidConfiguration` if the goal list is empty
    /// * `SetupError` if the safety filter cannot be constructed
    pub fn new(config: &Config, world: World) -> Result<Self, SimulationError> {
        if config.goals.is_empty() {
            return Err(SimulationError::InvalidConfiguration(
                "at least one goal is required".to_string(),
            ));
        }
        let state = SimulationState::from(config.initial_state);
        let filter = SafetyFilter::new(&config.safety_filter, &world.obstacles, &state)?;
        let goals: Vec<Goal> = config.goals.iter().map(|g| Goal::from(*g)).collect();
        // The world sampler consumes the base seed; the jitter stream gets its
        // own so goal perturbations never depend on how many obstacle draws
        // were rejected.
        let mut jitter_rng = ChaCha8Rng::seed_from_u64(config.simulation.seed.wrapping_add(1));
        let active_goal = Self::jittered(
            &goals,
            0,
            config.simulation.goal_jitter,
            &mut jitter_rng,
        );
        let log = RunLog {
            obstacles: world.obstacles.clone(),
            ..RunLog::default()
        };
        Ok(Self {
            state,
            controller: TrackingController::new(&config.controller),
            filter,
            goals,
            goal_index: 0,
            active_goal,
            phase: Phase::SeekingGoal,
            dt: config.simulation.dt,
            duration: config.simulation.duration,
            position_tolerance: config.simulation.position_tolerance,
            goal_jitter: config.simulation.goal_jitter,
            elapsed: 0.0,
            prev_angular_error: 0.0,
            last_valid: Control::default(),
            jitter_rng,
            log,
        })
    }

    /// Runs the loop to the end of the time horizon
    /// # Returns
    /// * The accumulated run log
    pub fn run(&mut self) -> &RunLog {
        log::info!(
            "starting run: {} goals, {} obstacles, horizon {:.1}s",
            self.goals.len(),
            self.log.obstacles.len(),
            self.duration
        );
        while self.elapsed < self.duration {
            self.step();
        }
        log::info!(
            "run complete: {} ticks, {} degraded, final position ({:.3}, {:.3})",
            self.log.len(),
            self.log.degraded_count(),
            self.state.x,
            self.state.y
        );
        &self.log
    }

    /// Advances the loop by one tick
    ///
    /// Integration order is fixed: heading from the filtered angular rate,
    /// speed from the filtered acceleration, then position from the new
    /// heading and new speed.
    pub fn step(&mut self) {
        let output =
            self.controller
                .compute(&self.state, &self.active_goal, self.prev_angular_error, self.dt);
        let filtered = self.filter.filter(&self.state, output.control);
        if filtered.degraded {
            log::warn!(
                "tick {}: QP solve degraded, safety guarantee void",
                self.log.len()
            );
        }

        let mut command = filtered.control;
        let mut degraded = filtered.degraded;
        let mut next = Self::integrate(&self.state, &command, self.dt);
        if !next.is_finite() {
            degraded = true;
            command = self.last_valid;
            next = Self::integrate(&self.state, &command, self.dt);
            if !next.is_finite() {
                next = self.state;
            }
            log::warn!(
                "tick {}: non-finite integration output, holding last valid command",
                self.log.len()
            );
        }
        if !degraded {
            self.last_valid = command;
        }

        self.state = next;
        self.elapsed += self.dt;
        self.prev_angular_error = output.angular_error;

        self.log.states.push(self.state);
        self.log.controls.push(command);
        self.log.errors.push(TrackingError {
            position_error: output.position_error,
            angular_error: output.angular_error,
        });
        self.log.degraded.push(degraded);

        if self.phase == Phase::SeekingGoal
            && (output.position_error < self.position_tolerance || self.elapsed >= self.duration)
        {
            self.phase = Phase::Arrived;
        }
        if self.phase == Phase::Arrived {
            self.advance_goal();
            self.phase = Phase::SeekingGoal;
        }
    }

    /// The current robot state
    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    /// The goal currently being tracked, jitter included
    pub fn active_goal(&self) -> &Goal {
        &self.active_goal
    }

    /// The accumulated run log
    pub fn log(&self) -> &RunLog {
        &self.log
    }

    /// Semi-implicit Euler step; the update order is part of the contract
    fn integrate(state: &SimulationState, control: &Control, dt: f64) -> SimulationState {
        let theta = state.theta + control.angular_rate * dt;
        let v = state.v + control.acceleration * dt;
        let x = state.x + v * theta.cos() * dt;
        let y = state.y + v * theta.sin() * dt;
        SimulationState::new(x, y, theta, v)
    }

    /// Switches to the next goal and resets the angular-error memory
    fn advance_goal(&mut self) {
        self.goal_index = (self.goal_index + 1) % self.goals.len();
        self.active_goal = Self::jittered(
            &self.goals,
            self.goal_index,
            self.goal_jitter,
            &mut self.jitter_rng,
        );
        self.prev_angular_error = 0.0;
    }

    /// The target for a goal index; goal 0 gets a fresh bounded perturbation
    fn jittered(goals: &[Goal], index: usize, jitter: f64, rng: &mut ChaCha8Rng) -> Goal {
        let mut goal = goals[index];
        if index == 0 && jitter > 0.0 {
            let offset = Uniform::new(-jitter, jitter);
            goal.x += offset.sample(rng);
            goal.y += 2.0 * offset.sample(rng);
        }
        goal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Obstacle;
    use nalgebra::Vector2;
    use std::f64::consts::FRAC_PI_2;

    /// A world with obstacles too far away to ever activate a constraint
    fn open_world() -> World {
        World {
            x_bounds: [0.0, 10.0],
            y_bounds: [0.0, 10.0],
            obstacles: vec![Obstacle::new(Vector2::new(100.0, 100.0), 0.5)],
        }
    }

    fn approach_config() -> Config {
        let mut config = Config::default();
        config.initial_state = [1.0, 1.5, FRAC_PI_2, 0.0];
        config.goals = vec![[1.5, 8.0, 0.0, 0.0]];
        config.simulation.goal_jitter = 0.0;
        config.simulation.duration = 120.0;
        config
    }

    #[test]
    fn test_unobstructed_approach_reaches_goal() {
        let config = approach_config();
        let mut sim = Simulation::new(&config, open_world()).unwrap();
        sim.run();
        let final_error = sim.log().errors.last().unwrap().position_error;
        assert!(
            final_error < 0.1,
            "final positional error {final_error} not below tolerance"
        );
        assert_eq!(sim.log().degraded_count(), 0);
    }

    #[test]
    fn test_obstacle_on_path_keeps_clearance() {
        let obstacle = Obstacle::new(Vector2::new(3.0, 3.5), 0.45);
        let world = World {
            x_bounds: [0.0, 10.0],
            y_bounds: [0.0, 10.0],
            obstacles: vec![obstacle.clone()],
        };
        let mut config = Config::default();
        config.initial_state = [3.0, 1.0, FRAC_PI_2, 0.0];
        config.goals = vec![[3.0, 6.0, 0.0, 0.0]];
        config.simulation.goal_jitter = 0.0;
        config.simulation.duration = 60.0;
        let clearance = obstacle.clearance(config.safety_filter.robot_diameter);
        let mut sim = Simulation::new(&config, world).unwrap();
        sim.run();
        for (tick, state) in sim.log().states.iter().enumerate() {
            if sim.log().degraded[tick] {
                continue;
            }
            let distance = obstacle.distance_to(&state.position());
            assert!(
                distance >= clearance - 1e-3,
                "tick {tick}: distance {distance} below clearance {clearance}"
            );
        }
    }

    #[test]
    fn test_horizon_terminates_run() {
        let mut config = approach_config();
        config.simulation.duration = 1.0;
        let mut sim = Simulation::new(&config, open_world()).unwrap();
        sim.run();
        let expected = (config.simulation.duration / config.simulation.dt).round() as usize;
        assert_eq!(sim.log().len(), expected);
    }

    #[test]
    fn test_logs_stay_length_consistent() {
        let mut config = approach_config();
        config.simulation.duration = 5.0;
        let mut sim = Simulation::new(&config, open_world()).unwrap();
        sim.run();
        let log = sim.log();
        assert_eq!(log.states.len(), log.controls.len());
        assert_eq!(log.states.len(), log.errors.len());
        assert_eq!(log.states.len(), log.degraded.len());
    }

    #[test]
    fn test_goal_zero_is_jittered_on_each_visit() {
        let mut config = approach_config();
        config.simulation.goal_jitter = 0.5;
        let base = config.goals[0];
        let mut sim = Simulation::new(&config, open_world()).unwrap();
        let first = *sim.active_goal();
        sim.advance_goal();
        let second = *sim.active_goal();
        // Perturbations are fresh draws, so consecutive visits disagree.
        assert!(first.x != second.x || first.y != second.y);
        assert!((first.x - base[0]).abs() <= 0.5);
        assert!((first.y - base[1]).abs() <= 1.0);
        assert!((second.x - base[0]).abs() <= 0.5);
        assert!((second.y - base[1]).abs() <= 1.0);
    }

    #[test]
    fn test_integration_order_is_semi_implicit() {
        let state = SimulationState::new(0.0, 0.0, 0.0, 1.0);
        let control = Control::new(2.0, FRAC_PI_2 / 0.1);
        let next = Simulation::integrate(&state, &control, 0.1);
        // theta and v update first; position must use the NEW values.
        assert!((next.theta - FRAC_PI_2).abs() < 1e-12);
        assert!((next.v - 1.2).abs() < 1e-12);
        assert!((next.x - 1.2 * FRAC_PI_2.cos() * 0.1).abs() < 1e-12);
        assert!((next.y - 1.2 * FRAC_PI_2.sin() * 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_empty_goal_list_is_invalid() {
        let mut config = approach_config();
        config.goals.clear();
        assert!(matches!(
            Simulation::new(&config, open_world()),
            Err(SimulationError::InvalidConfiguration(_))
        ));
    }
}
