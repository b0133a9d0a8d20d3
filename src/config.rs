//! Configuration module
//!
//! This module contains the configuration for the simulation loop, tracking
//! controller, obstacle world, safety filter, and output sinks.
//! The configuration is loaded from a YAML file using the serde library and
//! validated before the run starts.

use serde::Deserialize;

use crate::environment::ExclusionZone;
use crate::SimulationError;

#[derive(Clone, Deserialize)]
#[serde(default)]
/// Configuration for a full run
pub struct Config {
    /// Simulation loop configuration
    pub simulation: SimulationConfig,
    /// Tracking controller configuration
    pub controller: ControllerConfig,
    /// Obstacle world configuration
    pub world: WorldConfig,
    /// Safety filter configuration
    pub safety_filter: SafetyFilterConfig,
    /// Output sink configuration
    pub output: OutputConfig,
    /// Initial robot state as (x, y, theta, v)
    pub initial_state: [f64; 4],
    /// Goal poses as (x, y, theta, v), visited cyclically
    pub goals: Vec<[f64; 4]>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            simulation: SimulationConfig::default(),
            controller: ControllerConfig::default(),
            world: WorldConfig::default(),
            safety_filter: SafetyFilterConfig::default(),
            output: OutputConfig::default(),
            initial_state: [1.0, 1.5, std::f64::consts::FRAC_PI_2, 0.0],
            goals: vec![[1.5, 8.0, 0.0, 0.0], [5.38, 0.6, 0.0, 0.0]],
        }
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
/// Configuration for the simulation loop
pub struct SimulationConfig {
    /// Fixed integration step in seconds
    pub dt: f64,
    /// Total time horizon in seconds; the run stops unconditionally here
    pub duration: f64,
    /// Positional tolerance in meters for declaring a goal reached
    pub position_tolerance: f64,
    /// Amplitude of the uniform perturbation applied to goal 0 on each visit
    pub goal_jitter: f64,
    /// Seed for the world sampling and goal jitter RNG streams
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            dt: 0.05,
            duration: 300.0,
            position_tolerance: 0.1,
            goal_jitter: 0.5,
            seed: 0,
        }
    }
}

#[derive(Clone, Copy, Deserialize)]
#[serde(default)]
/// Configuration for the tracking controller
pub struct ControllerConfig {
    /// Proportional gain on the velocity error
    pub kp_vel: f64,
    /// Derivative gain on the velocity error
    pub kd_vel: f64,
    /// Feedforward gain on the positional error
    pub kff_pos: f64,
    /// Proportional gain on the angular error
    pub kp_theta: f64,
    /// Derivative gain on the angular error
    pub kd_theta: f64,
    /// Gain mapping positional error to desired speed
    pub k_v: f64,
    /// Maximum desired speed in m/s
    pub v_max: f64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            kp_vel: 3.0,
            kd_vel: 0.1,
            kff_pos: 0.2,
            kp_theta: 3.0,
            kd_theta: 0.6,
            k_v: 0.2,
            v_max: 0.2,
        }
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
/// Configuration for the obstacle world
pub struct WorldConfig {
    /// Workspace bounds in the x direction (min, max) in meters
    pub x_bounds: [f64; 2],
    /// Workspace bounds in the y direction (min, max) in meters
    pub y_bounds: [f64; 2],
    /// Total number of obstacles including the anchor obstacle
    pub num_obstacles: usize,
    /// Sampled obstacle radius bounds in meters (min, max)
    pub radius_bounds: [f64; 2],
    /// Rectangles that sampled obstacle centers must avoid
    pub exclusion_zones: Vec<ExclusionZone>,
    /// Center of the fixed anchor obstacle
    pub anchor_center: [f64; 2],
    /// Radius of the fixed anchor obstacle in meters
    pub anchor_radius: f64,
    /// Rejection-sampling retry budget per obstacle
    pub max_sample_attempts: usize,
}

impl Default for WorldConfig {
    fn default() -> Self {
        WorldConfig {
            x_bounds: [0.0, 6.88],
            y_bounds: [0.0, 11.0],
            num_obstacles: 11,
            radius_bounds: [0.2, 0.5],
            exclusion_zones: vec![
                ExclusionZone::new([0.0, 2.0], [0.0, 2.0]),
                ExclusionZone::new([3.5, 6.88], [0.0, 1.5]),
            ],
            anchor_center: [3.4, 4.5],
            anchor_radius: 0.6,
            max_sample_attempts: 1000,
        }
    }
}

#[derive(Clone, Copy, Deserialize)]
#[serde(default)]
/// Configuration for the safety filter
pub struct SafetyFilterConfig {
    /// Robot diameter in meters; half of it pads every obstacle radius
    pub robot_diameter: f64,
    /// Quadratic tracking weight on the acceleration deviation
    pub accel_weight: f64,
    /// Quadratic tracking weight on the angular-rate deviation
    pub rate_weight: f64,
    /// Quadratic penalty on the slack variables
    pub slack_weight: f64,
    /// First pole of the ECBF decay law
    pub pole_1: f64,
    /// Second pole of the ECBF decay law
    pub pole_2: f64,
    /// Lower bound on both control inputs
    pub u_min: f64,
    /// Upper bound on both control inputs
    pub u_max: f64,
    /// OSQP iteration limit; hitting it degrades the tick
    pub max_iterations: u32,
}

impl Default for SafetyFilterConfig {
    fn default() -> Self {
        SafetyFilterConfig {
            robot_diameter: 0.3,
            accel_weight: 2.0,
            rate_weight: 0.01,
            slack_weight: 1e-4,
            pole_1: 1.0,
            pole_2: 1.0,
            u_min: -4.0,
            u_max: 4.0,
            max_iterations: 4000,
        }
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
/// Configuration for the CSV output sinks
pub struct OutputConfig {
    /// Directory the log files are written into
    pub directory: String,
    /// File name of the state log
    pub states: String,
    /// File name of the control log
    pub controls: String,
    /// File name of the tracking-error log
    pub errors: String,
    /// File name of the obstacle snapshot
    pub obstacles: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            directory: ".".to_string(),
            states: "trajectory.csv".to_string(),
            controls: "controls.csv".to_string(),
            errors: "errors.csv".to_string(),
            obstacles: "obstacles.csv".to_string(),
        }
    }
}

/// Implementation of the Config struct
impl Config {
    /// Load configuration from a YAML file.
    /// # Arguments
    /// * `filename` - The name of the file to load.
    /// # Returns
    /// * The configuration object.
    /// # Errors
    /// * If the file cannot be read or the YAML cannot be parsed.
    pub fn from_yaml(filename: &str) -> Result<Self, SimulationError> {
        let contents = std::fs::read_to_string(filename)
            .map_err(|e| SimulationError::SetupError(format!("cannot read {filename}: {e}")))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| SimulationError::SetupError(format!("cannot parse {filename}: {e}")))
    }

    /// Checks the configuration for malformed parameters.
    /// # Returns
    /// * Ok if the configuration is usable for a run.
    /// # Errors
    /// * `InvalidConfiguration` naming the first offending parameter.
    /// # Example
    /// ```
    /// use safe_unicycle::config::Config;
    /// Config::default().validate().unwrap();
    /// ```
    pub fn validate(&self) -> Result<(), SimulationError> {
        if !(self.simulation.dt > 0.0) {
            return Err(SimulationError::InvalidConfiguration(
                "simulation.dt must be positive".to_string(),
            ));
        }
        if !(self.simulation.duration > 0.0) {
            return Err(SimulationError::InvalidConfiguration(
                "simulation.duration must be positive".to_string(),
            ));
        }
        if !(self.simulation.position_tolerance > 0.0) {
            return Err(SimulationError::InvalidConfiguration(
                "simulation.position_tolerance must be positive".to_string(),
            ));
        }
        if self.simulation.goal_jitter < 0.0 {
            return Err(SimulationError::InvalidConfiguration(
                "simulation.goal_jitter must not be negative".to_string(),
            ));
        }
        if self.goals.is_empty() {
            return Err(SimulationError::InvalidConfiguration(
                "at least one goal is required".to_string(),
            ));
        }
        if self.world.x_bounds[0] >= self.world.x_bounds[1]
            || self.world.y_bounds[0] >= self.world.y_bounds[1]
        {
            return Err(SimulationError::InvalidConfiguration(
                "world bounds must satisfy min < max".to_string(),
            ));
        }
        if self.world.num_obstacles == 0 {
            return Err(SimulationError::InvalidConfiguration(
                "world.num_obstacles must be at least 1".to_string(),
            ));
        }
        if !(self.world.radius_bounds[0] > 0.0)
            || self.world.radius_bounds[0] > self.world.radius_bounds[1]
        {
            return Err(SimulationError::InvalidConfiguration(
                "world.radius_bounds must satisfy 0 < min <= max".to_string(),
            ));
        }
        if self.world.max_sample_attempts == 0 {
            return Err(SimulationError::InvalidConfiguration(
                "world.max_sample_attempts must be at least 1".to_string(),
            ));
        }
        if !(self.controller.v_max > 0.0) {
            return Err(SimulationError::InvalidConfiguration(
                "controller.v_max must be positive".to_string(),
            ));
        }
        if self.safety_filter.u_min >= self.safety_filter.u_max {
            return Err(SimulationError::InvalidConfiguration(
                "safety_filter.u_min must be below u_max".to_string(),
            ));
        }
        if !(self.safety_filter.robot_diameter > 0.0) {
            return Err(SimulationError::InvalidConfiguration(
                "safety_filter.robot_diameter must be positive".to_string(),
            ));
        }
        if self.safety_filter.max_iterations == 0 {
            return Err(SimulationError::InvalidConfiguration(
                "safety_filter.max_iterations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
