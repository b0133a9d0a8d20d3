//! # Safety-Filtered Unicycle Controller
//! This crate provides a batch simulation pipeline for a unicycle-model mobile
//! robot navigating among circular obstacles. A PD+feedforward tracking
//! controller proposes an unconstrained command each tick, and an Exponential
//! Control Barrier Function (ECBF) quadratic program projects it onto the
//! nearest command that keeps the robot outside every obstacle's clearance
//! radius.
//! ## Features
//! - Reproducible obstacle world generation with exclusion zones
//! - PD+feedforward tracking of a cyclic waypoint list
//! - Per-tick ECBF-QP safety filtering with a persistent, warm-started OSQP
//!   problem that is updated incrementally between ticks
//! - Graceful degradation: a failed solve falls back to the nominal command
//!   and is recorded for offline audit
//! - CSV export of state, control, tracking-error, and obstacle logs
//! ## Example
//! ```
//! use safe_unicycle::config::ControllerConfig;
//! use safe_unicycle::controller::TrackingController;
//! use safe_unicycle::simulation::{Goal, SimulationState};
//! let controller = TrackingController::new(&ControllerConfig::default());
//! let state = SimulationState::new(1.0, 1.5, std::f64::consts::FRAC_PI_2, 0.0);
//! let goal = Goal::from([1.5, 8.0, 0.0, 0.0]);
//! let output = controller.compute(&state, &goal, 0.0, 0.05);
//! assert!(output.position_error > 0.0);
//! ```
pub mod config;
pub mod controller;
pub mod environment;
pub mod exporter;
pub mod safety_filter;
pub mod simulation;

pub use controller::*;
pub use environment::*;
pub use exporter::*;
pub use safety_filter::*;
pub use simulation::*;

/// Wraps an angle into the interval (-pi, pi]
/// # Arguments
/// * `angle` - The angle in radians
/// # Returns
/// * The equivalent angle in (-pi, pi]
/// # Example
/// ```
/// use safe_unicycle::wrap_angle;
/// let wrapped = wrap_angle(3.0 * std::f64::consts::PI);
/// assert!((wrapped - std::f64::consts::PI).abs() < 1e-9);
/// ```
#[inline]
pub fn wrap_angle(angle: f64) -> f64 {
    angle.sin().atan2(angle.cos())
}

#[derive(thiserror::Error, Debug)]
/// Represents errors that can occur during setup, simulation, and export
/// # Example
/// ```
/// use safe_unicycle::SimulationError;
/// let error = SimulationError::SetupError("QP solver initialization failed".to_string());
/// ```
pub enum SimulationError {
    /// The run cannot start: solver construction or world generation failed
    #[error("setup error: {0}")]
    SetupError(String),
    /// A call received malformed parameters; prior state and logs are intact
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// Error raised while writing delimited output
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    /// Error related to file I/O
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
