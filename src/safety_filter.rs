//! ECBF-QP safety filter
//!
//! Projects the nominal command onto the set of commands satisfying a
//! critically damped second-order barrier condition for every obstacle. The
//! QP is held in a persistent, warm-started OSQP problem whose sparsity
//! pattern is fixed at construction; each tick only rewrites the numeric
//! values (gradient, constraint coefficients, bounds) in place.

use std::borrow::Cow;

use osqp::{CscMatrix, Problem, Settings, Status};

use crate::config::SafetyFilterConfig;
use crate::controller::Control;
use crate::environment::Obstacle;
use crate::simulation::SimulationState;
use crate::SimulationError;

/// Magnitude OSQP treats as infinite
const OSQP_INF: f64 = 1e30;

/// Index of the acceleration variable in the decision vector
const ACCEL: usize = 0;
/// Index of the angular-rate variable in the decision vector
const RATE: usize = 1;
/// Slack slots reserved per obstacle; only the first is wired into a row
const SLACKS_PER_OBSTACLE: usize = 2;

/// Index of the slack variable wired into obstacle `i`'s constraint row
#[inline]
fn active_slack(i: usize) -> usize {
    RATE + 1 + SLACKS_PER_OBSTACLE * i
}

/// Index of obstacle `i`'s reserved slack slot, unused by any row
#[inline]
fn reserved_slack(i: usize) -> usize {
    active_slack(i) + 1
}

/// Linearized barrier terms for one obstacle at the given state
///
/// With `h = ||p - c||^2 - r^2` and its analytic derivative under unicycle
/// kinematics, the admissible set is `-coeff_a * a - coeff_w * w <= bound`
/// (before slack).
fn barrier_terms_at(
    obstacle: &Obstacle,
    clearance: f64,
    a1: f64,
    a2: f64,
    state: &SimulationState,
) -> (f64, f64, f64) {
    let dx = state.x - obstacle.center.x;
    let dy = state.y - obstacle.center.y;
    let (sin_t, cos_t) = state.theta.sin_cos();

    let h = dx * dx + dy * dy - clearance * clearance;
    let h_dot = 2.0 * state.v * (cos_t * dx + sin_t * dy);
    let coeff_a = 2.0 * (cos_t * dx + sin_t * dy);
    let coeff_w = 2.0 * state.v * (cos_t * dy - sin_t * dx);
    let bound = 2.0 * state.v * state.v + a1 * h_dot + a2 * h;
    (coeff_a, coeff_w, bound)
}

/// The outcome of one filtering tick
#[derive(Clone, Copy, Debug)]
pub struct FilteredControl {
    /// The command to apply this tick
    pub control: Control,
    /// True if the solve failed and the safety guarantee is void for the tick
    pub degraded: bool,
}

/// Per-tick QP projection of the nominal command onto the safe set
///
/// The decision vector is `[a, w, s_0, s_0', s_1, s_1', ...]` with two slack
/// slots per obstacle. One persistent solver context is constructed up front
/// and incrementally updated afterwards; it must never be shared across
/// simultaneous solves, so each robot owns its own filter.
/// # Example
/// ```
/// use safe_unicycle::config::SafetyFilterConfig;
/// use safe_unicycle::controller::Control;
/// use safe_unicycle::environment::Obstacle;
/// use safe_unicycle::safety_filter::SafetyFilter;
/// use safe_unicycle::simulation::SimulationState;
/// use nalgebra::Vector2;
/// let state = SimulationState::new(0.0, 0.0, 0.0, 0.0);
/// let obstacles = vec![Obstacle::new(Vector2::new(5.0, 5.0), 0.5)];
/// let mut filter =
///     SafetyFilter::new(&SafetyFilterConfig::default(), &obstacles, &state).unwrap();
/// let result = filter.filter(&state, Control::new(0.1, 0.0));
/// assert!(!result.degraded);
/// ```
pub struct SafetyFilter {
    obstacles: Vec<Obstacle>,
    /// Obstacle radii padded by half the robot diameter
    clearances: Vec<f64>,
    accel_weight: f64,
    rate_weight: f64,
    /// ECBF decay coefficient on the barrier derivative (p1 + p2)
    a1: f64,
    /// ECBF decay coefficient on the barrier value (p1 * p2)
    a2: f64,
    num_vars: usize,
    num_constraints: usize,
    /// Fixed CSC column pointers of the constraint matrix
    a_indptr: Vec<usize>,
    /// Fixed CSC row indices of the constraint matrix
    a_indices: Vec<usize>,
    /// CSC values of the constraint matrix, rewritten each tick
    a_data: Vec<f64>,
    gradient: Vec<f64>,
    lower: Vec<f64>,
    upper: Vec<f64>,
    problem: Problem,
    last_valid: Control,
}

/// Implementation of the SafetyFilter
impl SafetyFilter {
    /// Builds the solver context once, at startup
    ///
    /// The QP dimensions are fixed by the obstacle count for the lifetime of
    /// the filter, which is what makes the incremental updates in
    /// [`SafetyFilter::filter`] safe.
    /// # Arguments
    /// * `config` - The filter weights, poles, and input bounds
    /// * `obstacles` - The obstacle set; the count must not change afterwards
    /// * `initial_state` - The robot state used to seed the first problem
    /// # Returns
    /// * The new filter instance owning a persistent solver context
    /// # Errors
    /// * `SetupError` if the OSQP problem cannot be constructed
    pub fn new(
        config: &SafetyFilterConfig,
        obstacles: &[Obstacle],
        initial_state: &SimulationState,
    ) -> Result<Self, SimulationError> {
        let num_obstacles = obstacles.len();
        let num_vars = RATE + 1 + SLACKS_PER_OBSTACLE * num_obstacles;
        // Barrier rows first, then one identity row per variable so OSQP can
        // express the variable bounds.
        let num_constraints = num_obstacles + num_vars;
        let a1 = config.pole_1 + config.pole_2;
        let a2 = config.pole_1 * config.pole_2;
        let clearances: Vec<f64> = obstacles
            .iter()
            .map(|o| o.clearance(config.robot_diameter))
            .collect();

        let mut hessian_diag = vec![2.0 * config.slack_weight; num_vars];
        hessian_diag[ACCEL] = 2.0 * config.accel_weight;
        hessian_diag[RATE] = 2.0 * config.rate_weight;
        let hessian = CscMatrix {
            nrows: num_vars,
            ncols: num_vars,
            indptr: Cow::Owned((0..=num_vars).collect()),
            indices: Cow::Owned((0..num_vars).collect()),
            data: Cow::Owned(hessian_diag),
        };

        let (a_indptr, a_indices) = Self::constraint_sparsity(num_obstacles, num_vars);
        let mut a_data = vec![1.0; a_indices.len()];

        let gradient = vec![0.0; num_vars];
        let mut lower = vec![-OSQP_INF; num_constraints];
        let mut upper = vec![OSQP_INF; num_constraints];
        lower[num_obstacles + ACCEL] = config.u_min;
        upper[num_obstacles + ACCEL] = config.u_max;
        lower[num_obstacles + RATE] = config.u_min;
        upper[num_obstacles + RATE] = config.u_max;
        for i in 0..num_obstacles {
            lower[num_obstacles + active_slack(i)] = 0.0;
            lower[num_obstacles + reserved_slack(i)] = 0.0;
        }

        let accel_col = 0;
        let rate_col = num_obstacles + 1;
        for (i, obstacle) in obstacles.iter().enumerate() {
            let (coeff_a, coeff_w, bound) =
                barrier_terms_at(obstacle, clearances[i], a1, a2, initial_state);
            a_data[accel_col + i] = -coeff_a;
            a_data[rate_col + i] = -coeff_w;
            upper[i] = bound;
        }

        let settings = Settings::default()
            .verbose(false)
            .warm_start(true)
            .max_iter(config.max_iterations)
            .eps_abs(1e-6)
            .eps_rel(1e-6);
        let problem = Problem::new(
            hessian,
            &gradient,
            CscMatrix {
                nrows: num_constraints,
                ncols: num_vars,
                indptr: Cow::Borrowed(&a_indptr),
                indices: Cow::Borrowed(&a_indices),
                data: Cow::Borrowed(&a_data),
            },
            &lower,
            &upper,
            &settings,
        )
        .map_err(|e| {
            SimulationError::SetupError(format!("QP solver initialization failed: {e:?}"))
        })?;

        Ok(Self {
            obstacles: obstacles.to_vec(),
            clearances,
            accel_weight: config.accel_weight,
            rate_weight: config.rate_weight,
            a1,
            a2,
            num_vars,
            num_constraints,
            a_indptr,
            a_indices,
            a_data,
            gradient,
            lower,
            upper,
            problem,
            last_valid: Control::default(),
        })
    }

    /// Projects a nominal command onto the safe set
    ///
    /// Performs only incremental updates against the persistent problem, then
    /// solves with the warm-started internal state. Any failure (infeasible,
    /// iteration limit, non-finite input or solution) degrades the tick
    /// instead of propagating an error: a degraded tick applies the nominal
    /// command, or the last known-valid command when the input itself is
    /// non-finite.
    /// # Arguments
    /// * `state` - The current robot state
    /// * `nominal` - The unconstrained command to project
    /// # Returns
    /// * The filtered command and whether the tick is degraded
    pub fn filter(&mut self, state: &SimulationState, nominal: Control) -> FilteredControl {
        if !state.is_finite() || !nominal.is_finite() {
            return FilteredControl {
                control: self.last_valid,
                degraded: true,
            };
        }

        self.refresh(state, &nominal);
        self.problem.update_lin_cost(&self.gradient);
        self.problem.update_A(CscMatrix {
            nrows: self.num_constraints,
            ncols: self.num_vars,
            indptr: Cow::Borrowed(&self.a_indptr),
            indices: Cow::Borrowed(&self.a_indices),
            data: Cow::Borrowed(&self.a_data),
        });
        self.problem.update_bounds(&self.lower, &self.upper);

        let control = match self.problem.solve() {
            Status::Solved(solution) | Status::SolvedInaccurate(solution) => {
                let z = solution.x();
                Control::new(z[ACCEL], z[RATE])
            }
            _ => {
                return FilteredControl {
                    control: nominal,
                    degraded: true,
                };
            }
        };
        if !control.is_finite() {
            return FilteredControl {
                control: self.last_valid,
                degraded: true,
            };
        }
        self.last_valid = control;
        FilteredControl {
            control,
            degraded: false,
        }
    }

    /// Linearized barrier terms for one obstacle at the given state
    /// # Arguments
    /// * `state` - The robot state to linearize at
    /// * `index` - The obstacle index
    /// # Returns
    /// * The tuple (coeff_a, coeff_w, bound) such that the obstacle's
    ///   admissible set is `-coeff_a * a - coeff_w * w <= bound`
    pub fn barrier_terms(&self, state: &SimulationState, index: usize) -> (f64, f64, f64) {
        barrier_terms_at(
            &self.obstacles[index],
            self.clearances[index],
            self.a1,
            self.a2,
            state,
        )
    }

    /// The number of obstacles the filter was built against
    pub fn num_obstacles(&self) -> usize {
        self.obstacles.len()
    }

    /// Rewrites the tick-dependent numeric values in place
    fn refresh(&mut self, state: &SimulationState, nominal: &Control) {
        self.gradient[ACCEL] = -2.0 * self.accel_weight * nominal.acceleration;
        self.gradient[RATE] = -2.0 * self.rate_weight * nominal.angular_rate;

        let num_obstacles = self.obstacles.len();
        // Column-major layout: the acceleration column holds its barrier
        // coefficients first, then its identity entry; same for the rate
        // column. Slack columns stay constant at 1.0.
        let accel_col = 0;
        let rate_col = num_obstacles + 1;
        for i in 0..num_obstacles {
            let (coeff_a, coeff_w, bound) = self.barrier_terms(state, i);
            self.a_data[accel_col + i] = -coeff_a;
            self.a_data[rate_col + i] = -coeff_w;
            self.upper[i] = bound;
        }
    }

    /// Fixed sparsity pattern of the constraint matrix
    ///
    /// Rows `0..num_obstacles` are the barrier rows; rows
    /// `num_obstacles..num_obstacles + num_vars` are the identity block
    /// carrying the variable bounds.
    fn constraint_sparsity(num_obstacles: usize, num_vars: usize) -> (Vec<usize>, Vec<usize>) {
        let mut indptr = Vec::with_capacity(num_vars + 1);
        let mut indices = Vec::new();
        indptr.push(0);
        for col in [ACCEL, RATE] {
            for row in 0..num_obstacles {
                indices.push(row);
            }
            indices.push(num_obstacles + col);
            indptr.push(indices.len());
        }
        for i in 0..num_obstacles {
            indices.push(i);
            indices.push(num_obstacles + active_slack(i));
            indptr.push(indices.len());
            indices.push(num_obstacles + reserved_slack(i));
            indptr.push(indices.len());
        }
        (indptr, indices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector2;

    fn far_obstacles() -> Vec<Obstacle> {
        vec![
            Obstacle::new(Vector2::new(50.0, 50.0), 0.5),
            Obstacle::new(Vector2::new(-40.0, 30.0), 0.3),
        ]
    }

    fn filter_with(obstacles: &[Obstacle], state: &SimulationState) -> SafetyFilter {
        SafetyFilter::new(&SafetyFilterConfig::default(), obstacles, state).unwrap()
    }

    #[test]
    fn test_inactive_constraints_pass_nominal_through() {
        let state = SimulationState::new(0.0, 0.0, 0.0, 0.1);
        let mut filter = filter_with(&far_obstacles(), &state);
        let nominal = Control::new(0.5, 0.2);
        let result = filter.filter(&state, nominal);
        assert!(!result.degraded);
        assert!((result.control.acceleration - nominal.acceleration).abs() < 1e-4);
        assert!((result.control.angular_rate - nominal.angular_rate).abs() < 1e-4);
    }

    #[test]
    fn test_filtered_command_satisfies_every_constraint() {
        // Heading straight at a close obstacle with an aggressive nominal.
        let obstacles = vec![
            Obstacle::new(Vector2::new(1.2, 0.0), 0.4),
            Obstacle::new(Vector2::new(3.0, 1.0), 0.3),
        ];
        let state = SimulationState::new(0.0, 0.0, 0.0, 0.2);
        let mut filter = filter_with(&obstacles, &state);
        let result = filter.filter(&state, Control::new(3.0, 0.0));
        assert!(!result.degraded);
        for i in 0..filter.num_obstacles() {
            let (coeff_a, coeff_w, bound) = filter.barrier_terms(&state, i);
            let lhs =
                -coeff_a * result.control.acceleration - coeff_w * result.control.angular_rate;
            assert!(
                lhs <= bound + 1e-4,
                "obstacle {i}: {lhs} exceeds bound {bound}"
            );
        }
    }

    #[test]
    fn test_filtered_command_respects_input_bounds() {
        let obstacles = vec![Obstacle::new(Vector2::new(0.9, 0.0), 0.5)];
        let state = SimulationState::new(0.0, 0.0, 0.0, 0.2);
        let mut filter = filter_with(&obstacles, &state);
        let result = filter.filter(&state, Control::new(100.0, -100.0));
        assert!(!result.degraded);
        assert!(result.control.acceleration <= 4.0 + 1e-4);
        assert!(result.control.acceleration >= -4.0 - 1e-4);
        assert!(result.control.angular_rate <= 4.0 + 1e-4);
        assert!(result.control.angular_rate >= -4.0 - 1e-4);
    }

    #[test]
    fn test_repeated_identical_solves_are_deterministic() {
        let state = SimulationState::new(0.5, 0.5, 1.0, 0.15);
        let obstacles = vec![Obstacle::new(Vector2::new(1.5, 1.5), 0.4)];
        let nominal = Control::new(1.0, -0.5);
        let mut filter_a = filter_with(&obstacles, &state);
        let mut filter_b = filter_with(&obstacles, &state);
        for _ in 0..3 {
            let a = filter_a.filter(&state, nominal);
            let b = filter_b.filter(&state, nominal);
            assert_eq!(a.control.acceleration, b.control.acceleration);
            assert_eq!(a.control.angular_rate, b.control.angular_rate);
        }
    }

    #[test]
    fn test_iteration_limit_degrades_to_nominal() {
        let config = SafetyFilterConfig {
            max_iterations: 1,
            ..SafetyFilterConfig::default()
        };
        let state = SimulationState::new(0.0, 0.0, 0.0, 0.2);
        let obstacles = vec![Obstacle::new(Vector2::new(1.0, 0.0), 0.4)];
        let mut filter = SafetyFilter::new(&config, &obstacles, &state).unwrap();
        let nominal = Control::new(2.0, 0.3);
        let result = filter.filter(&state, nominal);
        assert!(result.degraded);
        assert_eq!(result.control, nominal);
    }

    #[test]
    fn test_non_finite_nominal_uses_last_valid() {
        let state = SimulationState::new(0.0, 0.0, 0.0, 0.1);
        let mut filter = filter_with(&far_obstacles(), &state);
        let good = filter.filter(&state, Control::new(0.3, 0.1));
        assert!(!good.degraded);
        let bad = filter.filter(&state, Control::new(f64::NAN, 0.0));
        assert!(bad.degraded);
        assert_eq!(bad.control, good.control);
    }

    #[test]
    fn test_nominal_strictly_feasible_against_far_obstacles() {
        let state = SimulationState::new(0.0, 0.0, 0.0, 0.1);
        let filter = filter_with(&far_obstacles(), &state);
        let nominal = Control::new(0.5, 0.2);
        for i in 0..filter.num_obstacles() {
            let (coeff_a, coeff_w, bound) = filter.barrier_terms(&state, i);
            assert!(-coeff_a * nominal.acceleration - coeff_w * nominal.angular_rate < bound);
        }
    }
}
