use crate::config::ControllerConfig;
use crate::simulation::{Goal, SimulationState};
use crate::wrap_angle;

/// A per-tick control command as an (acceleration, angular rate) pair
/// # Example
/// ```
/// use safe_unicycle::controller::Control;
/// let control = Control::new(0.5, -0.1);
/// assert!(control.is_finite());
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Control {
    /// Longitudinal acceleration in m/s^2
    pub acceleration: f64,
    /// Angular rate in rad/s
    pub angular_rate: f64,
}

/// Implementation of the Control
impl Control {
    /// Creates a new control command
    /// # Arguments
    /// * `acceleration` - Longitudinal acceleration in m/s^2
    /// * `angular_rate` - Angular rate in rad/s
    /// # Returns
    /// * The new control instance
    pub fn new(acceleration: f64, angular_rate: f64) -> Self {
        Self {
            acceleration,
            angular_rate,
        }
    }

    /// Checks that both components are finite numbers
    /// # Returns
    /// * True if neither component is NaN or infinite
    pub fn is_finite(&self) -> bool {
        self.acceleration.is_finite() && self.angular_rate.is_finite()
    }
}

/// The nominal command produced by the tracking controller for one tick
#[derive(Clone, Copy, Debug)]
pub struct ControlOutput {
    /// The unconstrained control command
    pub control: Control,
    /// Euclidean distance to the goal position in meters
    pub position_error: f64,
    /// Heading error towards the goal, wrapped into (-pi, pi]
    pub angular_error: f64,
}

/// PD+feedforward tracking controller for the unicycle model
///
/// Stateless per call: the previous angular error is owned by the caller and
/// passed back in, so it can be reset at every goal transition.
/// # Example
/// ```
/// use safe_unicycle::config::ControllerConfig;
/// use safe_unicycle::controller::TrackingController;
/// use safe_unicycle::simulation::{Goal, SimulationState};
/// let controller = TrackingController::new(&ControllerConfig::default());
/// let state = SimulationState::new(0.0, 0.0, 0.0, 0.0);
/// let goal = Goal::from([1.0, 0.0, 0.0, 0.0]);
/// let output = controller.compute(&state, &goal, 0.0, 0.05);
/// assert!(output.control.acceleration > 0.0);
/// assert_eq!(output.angular_error, 0.0);
/// ```
pub struct TrackingController {
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

/// Implementation of the TrackingController
impl TrackingController {
    /// Creates a new tracking controller from its gain configuration
    /// # Arguments
    /// * `config` - The controller gains
    /// # Returns
    /// * The new controller instance
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            kp_vel: config.kp_vel,
            kd_vel: config.kd_vel,
            kff_pos: config.kff_pos,
            kp_theta: config.kp_theta,
            kd_theta: config.kd_theta,
            k_v: config.k_v,
            v_max: config.v_max,
        }
    }

    /// Computes the unconstrained command towards a goal
    ///
    /// The angular-error derivative is the raw one-step difference divided by
    /// dt; the caller retains the returned angular error and must reset it to
    /// zero when the goal changes.
    /// # Arguments
    /// * `state` - The current robot state
    /// * `goal` - The goal pose being tracked
    /// * `prev_angular_error` - The angular error returned by the previous call
    /// * `dt` - The control period in seconds
    /// # Returns
    /// * The nominal command together with the tracking errors
    pub fn compute(
        &self,
        state: &SimulationState,
        goal: &Goal,
        prev_angular_error: f64,
        dt: f64,
    ) -> ControlOutput {
        let dx = goal.x - state.x;
        let dy = goal.y - state.y;
        let position_error = (dx * dx + dy * dy).sqrt();

        let desired_heading = dy.atan2(dx);
        let angular_error = wrap_angle(desired_heading - state.theta);

        let desired_speed = self.v_max.min(self.k_v * position_error);
        let velocity_error = desired_speed - state.v;

        let angular_error_rate = (angular_error - prev_angular_error) / dt;

        let acceleration = self.kp_vel * velocity_error
            + self.kd_vel * velocity_error / dt
            + self.kff_pos * position_error;
        let angular_rate = self.kp_theta * angular_error + self.kd_theta * angular_error_rate;

        ControlOutput {
            control: Control::new(acceleration, angular_rate),
            position_error,
            angular_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::{FRAC_PI_2, PI};

    fn controller() -> TrackingController {
        TrackingController::new(&ControllerConfig::default())
    }

    #[test]
    fn test_angular_error_wraps() {
        // Goal straight behind the robot: the wrapped error must stay in (-pi, pi].
        let state = SimulationState::new(0.0, 0.0, -FRAC_PI_2, 0.0);
        let goal = Goal::from([0.0, 1.0, 0.0, 0.0]);
        let output = controller().compute(&state, &goal, 0.0, 0.05);
        assert!((output.angular_error - PI).abs() < 1e-9);
    }

    #[test]
    fn test_speed_saturates_at_v_max() {
        // Far goal: desired speed caps at v_max, so from standstill the
        // velocity error equals v_max.
        let state = SimulationState::new(0.0, 0.0, 0.0, 0.0);
        let goal = Goal::from([100.0, 0.0, 0.0, 0.0]);
        let c = controller();
        let output = c.compute(&state, &goal, 0.0, 0.05);
        let expected =
            c.kp_vel * c.v_max + c.kd_vel * c.v_max / 0.05 + c.kff_pos * output.position_error;
        assert!((output.control.acceleration - expected).abs() < 1e-9);
    }

    #[test]
    fn test_hand_computed_case() {
        let c = controller();
        let dt = 0.05;
        let state = SimulationState::new(0.0, 0.0, 0.0, 0.1);
        let goal = Goal::from([1.0, 0.0, 0.0, 0.0]);
        let output = c.compute(&state, &goal, 0.0, dt);
        // e_pos = 1, desired speed = min(0.2, 0.2) = 0.2, e_vel = 0.1
        let expected_accel = 3.0 * 0.1 + 0.1 * 0.1 / dt + 0.2 * 1.0;
        assert!((output.position_error - 1.0).abs() < 1e-12);
        assert!((output.control.acceleration - expected_accel).abs() < 1e-12);
        assert_eq!(output.control.angular_rate, 0.0);
    }

    #[test]
    fn test_angular_derivative_uses_previous_error() {
        let c = controller();
        let dt = 0.05;
        let state = SimulationState::new(0.0, 0.0, 0.0, 0.0);
        let goal = Goal::from([0.0, 1.0, 0.0, 0.0]);
        let fresh = c.compute(&state, &goal, 0.0, dt);
        let warm = c.compute(&state, &goal, fresh.angular_error, dt);
        // Same pose, same error: the derivative term vanishes on the warm call.
        assert!((warm.control.angular_rate - c.kp_theta * warm.angular_error).abs() < 1e-9);
        assert!(fresh.control.angular_rate > warm.control.angular_rate);
    }
}
