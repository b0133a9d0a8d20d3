use nalgebra::Vector2;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::Deserialize;

use crate::config::WorldConfig;
use crate::SimulationError;

/// Represents a static circular obstacle in the workspace
/// # Example
/// ```
/// use safe_unicycle::environment::Obstacle;
/// use nalgebra::Vector2;
/// let obstacle = Obstacle::new(Vector2::new(3.4, 4.5), 0.6);
/// ```
#[derive(Clone, Debug, Default)]
pub struct Obstacle {
    /// The center of the obstacle
    pub center: Vector2<f64>,
    /// The radius of the obstacle
    pub radius: f64,
}

/// Implementation of the Obstacle
impl Obstacle {
    /// Creates a new obstacle with the given center and radius
    /// # Arguments
    /// * `center` - The center of the obstacle
    /// * `radius` - The radius of the obstacle
    /// # Returns
    /// * The new obstacle instance
    /// # Example
    /// ```
    /// use safe_unicycle::environment::Obstacle;
    /// use nalgebra::Vector2;
    /// let obstacle = Obstacle::new(Vector2::new(1.0, 2.0), 0.3);
    /// ```
    pub fn new(center: Vector2<f64>, radius: f64) -> Self {
        Self { center, radius }
    }

    /// Effective collision radius once the robot's own footprint is added
    /// # Arguments
    /// * `robot_diameter` - The robot diameter in meters
    /// # Returns
    /// * The obstacle radius padded by half the robot diameter
    /// # Example
    /// ```
    /// use safe_unicycle::environment::Obstacle;
    /// use nalgebra::Vector2;
    /// let obstacle = Obstacle::new(Vector2::zeros(), 0.5);
    /// assert_eq!(obstacle.clearance(0.3), 0.65);
    /// ```
    pub fn clearance(&self, robot_diameter: f64) -> f64 {
        self.radius + robot_diameter / 2.0
    }

    /// Distance from a point to the obstacle center
    /// # Arguments
    /// * `point` - The query point
    /// # Returns
    /// * The Euclidean distance to the obstacle center
    pub fn distance_to(&self, point: &Vector2<f64>) -> f64 {
        (point - self.center).norm()
    }
}

/// Axis-aligned rectangle that sampled obstacle centers must avoid
/// # Example
/// ```
/// use safe_unicycle::environment::ExclusionZone;
/// use nalgebra::Vector2;
/// let zone = ExclusionZone::new([0.0, 2.0], [0.0, 2.0]);
/// assert!(zone.contains(&Vector2::new(1.0, 1.5)));
/// assert!(!zone.contains(&Vector2::new(3.0, 1.5)));
/// ```
#[derive(Clone, Debug, Deserialize)]
pub struct ExclusionZone {
    /// The zone bounds in the x direction (min, max)
    pub x_bounds: [f64; 2],
    /// The zone bounds in the y direction (min, max)
    pub y_bounds: [f64; 2],
}

/// Implementation of the ExclusionZone
impl ExclusionZone {
    /// Creates a new exclusion zone from its axis bounds
    /// # Arguments
    /// * `x_bounds` - The zone bounds in the x direction (min, max)
    /// * `y_bounds` - The zone bounds in the y direction (min, max)
    /// # Returns
    /// * The new exclusion zone instance
    pub fn new(x_bounds: [f64; 2], y_bounds: [f64; 2]) -> Self {
        Self { x_bounds, y_bounds }
    }

    /// Checks whether a point lies inside the zone, boundaries included
    /// # Arguments
    /// * `point` - The query point
    /// # Returns
    /// * True if the point lies inside the zone
    pub fn contains(&self, point: &Vector2<f64>) -> bool {
        point.x >= self.x_bounds[0]
            && point.x <= self.x_bounds[1]
            && point.y >= self.y_bounds[0]
            && point.y <= self.y_bounds[1]
    }
}

/// The static obstacle world the robot navigates in
///
/// Obstacle centers are drawn uniformly inside the workspace bounds and
/// rejected while they fall into an exclusion zone; the last obstacle is the
/// fixed anchor obstacle. The obstacle set is immutable for the rest of the
/// run.
#[derive(Clone, Debug)]
pub struct World {
    /// The workspace bounds in the x direction (min, max)
    pub x_bounds: [f64; 2],
    /// The workspace bounds in the y direction (min, max)
    pub y_bounds: [f64; 2],
    /// The obstacles in the workspace
    pub obstacles: Vec<Obstacle>,
}

/// Implementation of the World
impl World {
    /// Generates a world by rejection sampling
    /// # Arguments
    /// * `config` - The world configuration
    /// * `rng` - The RNG stream used for sampling
    /// # Returns
    /// * The generated world
    /// # Errors
    /// * `SetupError` if an obstacle cannot be placed within the retry budget
    /// # Example
    /// ```
    /// use safe_unicycle::config::WorldConfig;
    /// use safe_unicycle::environment::World;
    /// use rand::SeedableRng;
    /// use rand_chacha::ChaCha8Rng;
    /// let mut rng = ChaCha8Rng::seed_from_u64(0);
    /// let world = World::generate(&WorldConfig::default(), &mut rng).unwrap();
    /// assert_eq!(world.obstacles.len(), 11);
    /// ```
    pub fn generate(config: &WorldConfig, rng: &mut ChaCha8Rng) -> Result<Self, SimulationError> {
        if config.num_obstacles == 0 {
            return Err(SimulationError::InvalidConfiguration(
                "world.num_obstacles must be at least 1".to_string(),
            ));
        }
        let mut obstacles = Vec::with_capacity(config.num_obstacles);
        for _ in 0..config.num_obstacles - 1 {
            obstacles.push(Self::sample_obstacle(config, rng)?);
        }
        obstacles.push(Obstacle::new(
            Vector2::from(config.anchor_center),
            config.anchor_radius,
        ));
        Ok(Self {
            x_bounds: config.x_bounds,
            y_bounds: config.y_bounds,
            obstacles,
        })
    }

    /// Draws one obstacle, retrying while the center lands in an exclusion zone
    fn sample_obstacle(
        config: &WorldConfig,
        rng: &mut ChaCha8Rng,
    ) -> Result<Obstacle, SimulationError> {
        for _ in 0..config.max_sample_attempts {
            let center = Vector2::new(
                rng.gen_range(config.x_bounds[0]..config.x_bounds[1]),
                rng.gen_range(config.y_bounds[0]..config.y_bounds[1]),
            );
            let radius = rng.gen_range(config.radius_bounds[0]..config.radius_bounds[1]);
            if config.exclusion_zones.iter().any(|z| z.contains(&center)) {
                continue;
            }
            return Ok(Obstacle::new(center, radius));
        }
        Err(SimulationError::SetupError(format!(
            "obstacle sampling exhausted {} attempts; exclusion zones may cover the workspace",
            config.max_sample_attempts
        )))
    }
}
