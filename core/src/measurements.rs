//! Landmark observations and the sensor model used to weight particles.
//!
//! A raw observation is a point reported by the ranging sensor in the vehicle's local frame. To score a
//! particle, observations are moved into the global frame using that particle's pose, associated with a
//! landmark (see [crate::association]), and evaluated under an axis-aligned bivariate Gaussian centered on the
//! associated landmark:
//!
//! $$
//! p(z \mid \mu) = \frac{1}{2 \pi \sigma_x \sigma_y}
//! \exp\left( -\left( \frac{(z_x - \mu_x)^2}{2 \sigma_x^2} + \frac{(z_y - \mu_y)^2}{2 \sigma_y^2} \right) \right)
//! $$
//!
//! The particle likelihood is the product of these densities over every observation. Because that product of
//! many small numbers underflows quickly, [LandmarkMeasurementModel] evaluates it as a sum of log densities.
use nalgebra::Vector2;
use std::f64::consts::PI;
use std::fmt::{self, Display};

use crate::Pose;
use crate::map::Landmark;

/// A single observed (or predicted) landmark point.
///
/// For raw sensor observations `id` is `None` and the position is in the vehicle frame. After transformation
/// and association the position is global and `id` holds the matched landmark identity. Landmarks converted
/// with `From<&Landmark>` carry their ground-truth identity and global position.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LandmarkObservation {
    pub id: Option<u32>,
    pub x: f64,
    pub y: f64,
}
impl Display for LandmarkObservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Some(id) => write!(f, "LandmarkObservation {{ id: {}, x: {:.4}, y: {:.4} }}", id, self.x, self.y),
            None => write!(f, "LandmarkObservation {{ id: -, x: {:.4}, y: {:.4} }}", self.x, self.y),
        }
    }
}
impl From<&Landmark> for LandmarkObservation {
    fn from(landmark: &Landmark) -> Self {
        LandmarkObservation::with_id(landmark.id, landmark.x, landmark.y)
    }
}
impl LandmarkObservation {
    /// An unassociated observation
    pub fn new(x: f64, y: f64) -> Self {
        LandmarkObservation { id: None, x, y }
    }
    pub fn with_id(id: u32, x: f64, y: f64) -> Self {
        LandmarkObservation { id: Some(id), x, y }
    }
    pub fn position(&self) -> Vector2<f64> {
        Vector2::new(self.x, self.y)
    }
    pub fn distance_to(&self, other: &LandmarkObservation) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Transform local-frame observations into the global frame as seen from `pose`.
///
/// Identities are cleared so that the result is ready for association.
pub fn transform_observations(pose: &Pose, observations: &[LandmarkObservation]) -> Vec<LandmarkObservation> {
    observations
        .iter()
        .map(|observation| {
            let global = pose.to_global(&observation.position());
            LandmarkObservation::new(global[0], global[1])
        })
        .collect()
}

/// Axis-aligned bivariate Gaussian sensor model for landmark observations.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LandmarkMeasurementModel {
    /// Standard deviation of the observation error along the global x axis (m)
    pub std_x: f64,
    /// Standard deviation of the observation error along the global y axis (m)
    pub std_y: f64,
}
impl From<[f64; 2]> for LandmarkMeasurementModel {
    fn from(std: [f64; 2]) -> Self {
        LandmarkMeasurementModel::new(std[0], std[1])
    }
}
impl LandmarkMeasurementModel {
    pub fn new(std_x: f64, std_y: f64) -> Self {
        debug_assert!(
            std_x > 0.0 && std_y > 0.0,
            "Landmark measurement standard deviations must be positive"
        );
        LandmarkMeasurementModel { std_x, std_y }
    }
    fn exponent(&self, dx: f64, dy: f64) -> f64 {
        dx * dx / (2.0 * self.std_x * self.std_x) + dy * dy / (2.0 * self.std_y * self.std_y)
    }
    /// Density of a residual `(dx, dy)` between an observation and its landmark
    pub fn density(&self, dx: f64, dy: f64) -> f64 {
        (-self.exponent(dx, dy)).exp() / (2.0 * PI * self.std_x * self.std_y)
    }
    /// Natural log of [LandmarkMeasurementModel::density]
    pub fn log_density(&self, dx: f64, dy: f64) -> f64 {
        -self.exponent(dx, dy) - (2.0 * PI * self.std_x * self.std_y).ln()
    }
    /// Log-likelihood of a set of associated global-frame observations.
    ///
    /// Each observation is scored against the candidate carrying its associated id. An observation without a
    /// matching candidate is scored against the origin `(0, 0)`, which heavily penalizes the particle rather
    /// than rejecting it.
    pub fn log_likelihood(
        &self,
        observations: &[LandmarkObservation],
        candidates: &[LandmarkObservation],
    ) -> f64 {
        observations
            .iter()
            .map(|observation| {
                let (mu_x, mu_y) = observation
                    .id
                    .and_then(|id| candidates.iter().rev().find(|c| c.id == Some(id)))
                    .map_or((0.0, 0.0), |c| (c.x, c.y));
                self.log_density(observation.x - mu_x, observation.y - mu_y)
            })
            .sum()
    }
    /// Likelihood (product of densities) of a set of associated observations
    pub fn likelihood(
        &self,
        observations: &[LandmarkObservation],
        candidates: &[LandmarkObservation],
    ) -> f64 {
        self.log_likelihood(observations, candidates).exp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_density_peak() {
        let model = LandmarkMeasurementModel::new(0.3, 0.3);
        let peak = model.density(0.0, 0.0);
        assert_approx_eq!(peak, 1.0 / (2.0 * PI * 0.3 * 0.3), 1e-12);
        assert_approx_eq!(peak, 1.768, 1e-3);
        assert!(model.density(0.1, 0.0) < peak);
        assert!(model.density(0.0, -0.1) < peak);
    }
    #[test]
    fn test_density_matches_formula() {
        let model = LandmarkMeasurementModel::new(0.3, 0.5);
        let (dx, dy): (f64, f64) = (0.2, -0.4);
        let expected = (-(dx * dx / (2.0 * 0.09) + dy * dy / (2.0 * 0.25))).exp() / (2.0 * PI * 0.3 * 0.5);
        assert_approx_eq!(model.density(dx, dy), expected, 1e-12);
        assert_approx_eq!(model.log_density(dx, dy), expected.ln(), 1e-12);
    }
    #[test]
    fn test_likelihood_is_product_of_densities() {
        let model = LandmarkMeasurementModel::from([0.3, 0.3]);
        let candidates = vec![
            LandmarkObservation::with_id(1, 0.0, 0.0),
            LandmarkObservation::with_id(2, 10.0, 10.0),
        ];
        let observations = vec![
            LandmarkObservation::with_id(1, 0.1, -0.2),
            LandmarkObservation::with_id(2, 10.3, 9.9),
        ];
        let expected = model.density(0.1, -0.2) * model.density(0.3, -0.1);
        assert_approx_eq!(model.likelihood(&observations, &candidates), expected, 1e-12);
    }
    #[test]
    fn test_unmatched_observation_scores_against_origin() {
        let model = LandmarkMeasurementModel::new(1.0, 1.0);
        let observations = vec![LandmarkObservation::new(1.0, 2.0)];
        assert_approx_eq!(
            model.log_likelihood(&observations, &[]),
            model.log_density(1.0, 2.0),
            1e-12
        );
    }
    #[test]
    fn test_empty_observations_have_unit_likelihood() {
        let model = LandmarkMeasurementModel::new(0.3, 0.3);
        assert_eq!(model.likelihood(&[], &[]), 1.0);
    }
    #[test]
    fn test_transform_observations() {
        let pose = Pose::new(4.0, 5.0, -std::f64::consts::FRAC_PI_2);
        let observations = vec![
            LandmarkObservation::with_id(9, 2.0, 2.0),
            LandmarkObservation::new(3.0, -2.0),
            LandmarkObservation::new(0.0, -4.0),
        ];
        let global = transform_observations(&pose, &observations);
        assert_eq!(global.len(), 3);
        assert!(global.iter().all(|o| o.id.is_none()));
        assert_approx_eq!(global[0].x, 6.0, 1e-12);
        assert_approx_eq!(global[0].y, 3.0, 1e-12);
        assert_approx_eq!(global[1].x, 2.0, 1e-12);
        assert_approx_eq!(global[1].y, 2.0, 1e-12);
        assert_approx_eq!(global[2].x, 0.0, 1e-12);
        assert_approx_eq!(global[2].y, 5.0, 1e-12);
    }
}
