//! Landmark-based particle filter localization toolbox
//!
//! This crate provides a particle filter (sequential Monte Carlo estimator) that tracks the planar pose of a
//! moving agent by fusing a noisy constant-turn-rate motion model with noisy observations of known landmarks.
//! The filter is a struct that is initialized once from a GPS-like pose estimate and then stepped forward with
//! control inputs (velocity and yaw rate) and batches of sensor observations given in the agent's own frame.
//! It does not estimate the landmark positions themselves; the map is known a priori and read-only.
//!
//! Each time step runs the classic bootstrap filter sequence:
//!
//! 1. **Prediction**: every particle is moved by the kinematic model and perturbed by process noise.
//! 2. **Association**: each observation is transformed into the map frame using the particle's pose and matched
//!    to the nearest landmark within sensor range.
//! 3. **Weighting**: the particle's importance weight becomes the product of bivariate Gaussian densities of its
//!    observations around their associated landmarks. Weights are then normalized.
//! 4. **Resampling**: a new population of the same size is drawn with replacement proportional to weight.
//!
//! This crate is primarily built off of three additional dependencies:
//! - [`nalgebra`](https://crates.io/crates/nalgebra): Provides the rotations and small matrices used for frame
//!   transforms and pose covariance.
//! - [`rand`](https://crates.io/crates/rand) and [`rand_distr`](https://crates.io/crates/rand_distr): Provide the
//!   seedable random number generator and Gaussian sampling used by the filter.
//! - [`rayon`](https://crates.io/crates/rayon): Provides the parallel iterator used to score particles.
//!
//! All other functionality is auxiliary (e.g. I/O, configuration, simulation).
//!
//! ## Crate overview
//!
//! - [association]: Nearest-neighbor data association between observations and candidate landmarks.
//! - [config]: Serializable filter and simulation configuration (JSON/YAML/TOML).
//! - [map]: Landmark map type and map-file loading.
//! - [measurements]: Landmark observations and the bivariate Gaussian sensor model.
//! - [particle]: The particle filter itself along with resampling and averaging strategies.
//! - [sim]: Telemetry loading, synthetic scenario generation, and the replay loop used to evaluate the filter.
//!
//! ## Coordinate and state definitions
//!
//! The state of a single hypothesis is the planar pose
//!
//! $$
//! x = [p_x, p_y, \theta]
//! $$
//!
//! where $p_x$ and $p_y$ are the position in the global (map) frame in meters and $\theta$ is the heading in
//! radians measured counter-clockwise from the map's x axis. Heading is left unbounded by the filter; use
//! [wrap_to_pi] when a canonical range is required.
//!
//! Observations are expressed in the local (vehicle) frame, with x pointing forward along the heading. A local
//! point $(x_l, y_l)$ maps to the global frame by a rotation followed by a translation:
//!
//! $$
//! \begin{bmatrix} x_g \\\\ y_g \end{bmatrix} =
//! \begin{bmatrix} \cos\theta & -\sin\theta \\\\ \sin\theta & \cos\theta \end{bmatrix}
//! \begin{bmatrix} x_l \\\\ y_l \end{bmatrix} + \begin{bmatrix} p_x \\\\ p_y \end{bmatrix}
//! $$
//!
//! ## Motion model
//!
//! The forward propagation step is a constant velocity, constant turn rate model. For a yaw rate
//! $\dot\theta$ that is not numerically zero:
//!
//! $$
//! p_x(+) = p_x(-) + \frac{v}{\dot\theta} \left( \sin(\theta + \dot\theta t) - \sin\theta \right)
//! $$
//!
//! $$
//! p_y(+) = p_y(-) + \frac{v}{\dot\theta} \left( \cos\theta - \cos(\theta + \dot\theta t) \right)
//! $$
//!
//! $$
//! \theta(+) = \theta(-) + \dot\theta t
//! $$
//!
//! and for $|\dot\theta| <$ [YAW_RATE_EPSILON] the straight-line limit is used instead.
pub mod association;
pub mod config;
pub mod map;
pub mod measurements;
pub mod particle;
pub mod sim;

use nalgebra::{Rotation2, Vector2};
use serde::{Deserialize, Serialize};

use std::fmt::{self, Display};

/// Yaw rates with a magnitude below this value are treated as straight-line motion.
pub const YAW_RATE_EPSILON: f64 = f64::EPSILON;

/// Planar pose of the agent (or of one hypothesis of it) in the global frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// Position along the map x axis in meters
    pub x: f64,
    /// Position along the map y axis in meters
    pub y: f64,
    /// Heading in radians, counter-clockwise from the map x axis. Not wrapped.
    pub theta: f64,
}
impl Display for Pose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pose {{ x: {:.4} m, y: {:.4} m, theta: {:.4} rad }}",
            self.x, self.y, self.theta
        )
    }
}
impl From<[f64; 3]> for Pose {
    fn from(values: [f64; 3]) -> Self {
        Pose::new(values[0], values[1], values[2])
    }
}
impl From<Pose> for Vec<f64> {
    fn from(pose: Pose) -> Self {
        vec![pose.x, pose.y, pose.theta]
    }
}
impl Pose {
    pub fn new(x: f64, y: f64, theta: f64) -> Self {
        Pose { x, y, theta }
    }
    /// Position component of the pose as a vector
    pub fn position(&self) -> Vector2<f64> {
        Vector2::new(self.x, self.y)
    }
    /// Rotation from the local (vehicle) frame into the global frame
    pub fn rotation(&self) -> Rotation2<f64> {
        Rotation2::new(self.theta)
    }
    /// Transform a point from this pose's local frame into the global frame (rotate, then translate).
    ///
    /// # Example
    /// ```rust
    /// use localizer::Pose;
    /// use nalgebra::Vector2;
    /// let pose = Pose::new(4.0, 5.0, -std::f64::consts::FRAC_PI_2);
    /// let global = pose.to_global(&Vector2::new(2.0, 2.0));
    /// assert!((global[0] - 6.0).abs() < 1e-12);
    /// assert!((global[1] - 3.0).abs() < 1e-12);
    /// ```
    pub fn to_global(&self, local: &Vector2<f64>) -> Vector2<f64> {
        self.rotation() * local + self.position()
    }
    /// Inverse of [Pose::to_global]: express a global point in this pose's local frame.
    pub fn to_local(&self, global: &Vector2<f64>) -> Vector2<f64> {
        self.rotation().inverse() * (global - self.position())
    }
    /// Euclidean distance from this pose's position to a point in the global frame
    pub fn distance_to(&self, x: f64, y: f64) -> f64 {
        (self.x - x).hypot(self.y - y)
    }
}

/// Commanded motion for one time step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlInput {
    /// Forward velocity in m/s
    pub velocity: f64,
    /// Yaw rate in rad/s
    pub yaw_rate: f64,
}
impl Display for ControlInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ControlInput {{ velocity: {:.4} m/s, yaw_rate: {:.4} rad/s }}",
            self.velocity, self.yaw_rate
        )
    }
}
impl ControlInput {
    pub fn new(velocity: f64, yaw_rate: f64) -> Self {
        ControlInput { velocity, yaw_rate }
    }
}

/// Noise-free constant velocity / constant turn rate propagation of a pose.
///
/// The particle filter applies process noise on top of this step; the simulation utilities use it directly to
/// generate ground truth.
///
/// # Arguments
/// * `pose` - The pose to propagate, modified in place.
/// * `control` - Velocity and yaw rate held constant over the step.
/// * `dt` - Step duration in seconds.
///
/// # Example
/// ```rust
/// use localizer::{ControlInput, Pose, forward};
/// let mut pose = Pose::new(0.0, 0.0, 0.0);
/// forward(&mut pose, ControlInput::new(2.0, 0.0), 0.5);
/// assert!((pose.x - 1.0).abs() < 1e-12);
/// ```
pub fn forward(pose: &mut Pose, control: ControlInput, dt: f64) {
    let ControlInput { velocity, yaw_rate } = control;
    if yaw_rate.abs() < YAW_RATE_EPSILON {
        pose.x += velocity * pose.theta.cos() * dt;
        pose.y += velocity * pose.theta.sin() * dt;
    } else {
        let theta_1 = pose.theta + yaw_rate * dt;
        pose.x += (velocity / yaw_rate) * (theta_1.sin() - pose.theta.sin());
        pose.y += (velocity / yaw_rate) * (pose.theta.cos() - theta_1.cos());
        pose.theta = theta_1;
    }
}

/// Wrap an angle to the range $\pm\pi$ radians
///
/// Angles already inside the range are returned unchanged, including both endpoints. Angles more than two
/// turns away are first reduced with a floating point remainder. Non-finite angles have no heading and map to NaN.
///
/// # Arguments
/// * `angle` - The angle to be wrapped.
/// # Returns
/// * The wrapped angle, which will be in the range -π to π radians.
/// # Example
/// ```rust
/// use localizer::wrap_to_pi;
/// use std::f64::consts::PI;
/// let angle = 3.0 * PI / 2.0; // radians
/// let wrapped_angle = wrap_to_pi(angle);
/// assert_eq!(wrapped_angle, -PI / 2.0);
/// ```
pub fn wrap_to_pi(angle: f64) -> f64 {
    use std::f64::consts::{PI, TAU};
    if !angle.is_finite() {
        return f64::NAN;
    }
    let mut wrapped = if angle.abs() > 2.0 * TAU { angle % TAU } else { angle };
    while wrapped > PI {
        wrapped -= TAU;
    }
    while wrapped < -PI {
        wrapped += TAU;
    }
    wrapped
}
