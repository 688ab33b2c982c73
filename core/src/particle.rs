//! Particle filter localization against a known landmark map.
//!
//! [ParticleFilter] owns a fixed-size population of [Particle]s and a seedable random number generator. A
//! filter step is the sequence [ParticleFilter::prediction], [ParticleFilter::update_weights],
//! [ParticleFilter::resample]; [ParticleFilter::init] must run once before the first step.
//!
//! ```rust
//! use localizer::map::{Landmark, Map};
//! use localizer::measurements::LandmarkObservation;
//! use localizer::particle::ParticleFilter;
//!
//! let map = Map::new(vec![Landmark::new(1, 5.0, 0.0), Landmark::new(2, 0.0, 5.0)]);
//! let mut pf = ParticleFilter::new(50, Some(1), None, None);
//! pf.init(0.0, 0.0, 0.0, [0.3, 0.3, 0.01]);
//! pf.prediction(0.1, [0.1, 0.1, 0.01], 1.0, 0.0);
//! let observations = vec![LandmarkObservation::new(4.9, 0.0), LandmarkObservation::new(-0.1, 5.0)];
//! pf.update_weights(20.0, [0.3, 0.3], &observations, &map);
//! pf.resample();
//! assert_eq!(pf.len(), 50);
//! ```
use nalgebra::{Matrix3, Vector3};
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug, Display};

use crate::association::nearest_neighbor;
use crate::config::FilterConfig;
use crate::map::Map;
use crate::measurements::{LandmarkMeasurementModel, LandmarkObservation, transform_observations};
use crate::{ControlInput, Pose, forward, wrap_to_pi};

/// Total weights at or below this value are considered degenerate and are not normalized.
pub const WEIGHT_EPSILON: f64 = f64::EPSILON;

/// One pose hypothesis.
///
/// `id` is the slot index assigned at initialization. Resampling copies particles wholesale, so after the first
/// resample several particles may share an id and the id does not track a hypothesis across steps.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Particle {
    pub id: usize,
    pub x: f64,
    pub y: f64,
    /// Heading in radians, not wrapped
    pub theta: f64,
    pub weight: f64,
    /// Landmark ids this particle was last associated with (diagnostics only)
    pub associations: Vec<u32>,
    /// Global x of each associated observation (diagnostics only)
    pub sense_x: Vec<f64>,
    /// Global y of each associated observation (diagnostics only)
    pub sense_y: Vec<f64>,
}
impl Display for Particle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Particle")
            .field("id", &self.id)
            .field("x", &self.x)
            .field("y", &self.y)
            .field("theta", &self.theta)
            .field("weight", &self.weight)
            .finish()
    }
}
impl Particle {
    pub fn new(id: usize, pose: Pose, weight: f64) -> Particle {
        Particle {
            id,
            x: pose.x,
            y: pose.y,
            theta: pose.theta,
            weight,
            ..Default::default()
        }
    }
    pub fn pose(&self) -> Pose {
        Pose::new(self.x, self.y, self.theta)
    }
    pub fn set_pose(&mut self, pose: Pose) {
        self.x = pose.x;
        self.y = pose.y;
        self.theta = pose.theta;
    }
    /// Attach association bookkeeping. The three sequences must be index-aligned.
    pub fn set_associations(&mut self, associations: Vec<u32>, sense_x: Vec<f64>, sense_y: Vec<f64>) {
        assert!(
            associations.len() == sense_x.len() && sense_x.len() == sense_y.len(),
            "associations, sense_x and sense_y must have equal lengths ({}, {}, {})",
            associations.len(),
            sense_x.len(),
            sense_y.len()
        );
        self.associations = associations;
        self.sense_x = sense_x;
        self.sense_y = sense_y;
    }
    /// Associated landmark ids as space separated text
    pub fn get_associations(&self) -> String {
        join_with_spaces(self.associations.iter())
    }
    /// Associated global x coordinates as space separated text
    pub fn get_sense_x(&self) -> String {
        join_with_spaces(self.sense_x.iter().map(|&v| v as f32))
    }
    /// Associated global y coordinates as space separated text
    pub fn get_sense_y(&self) -> String {
        join_with_spaces(self.sense_y.iter().map(|&v| v as f32))
    }
}

fn join_with_spaces<T: Display>(values: impl Iterator<Item = T>) -> String {
    values.map(|v| v.to_string()).collect::<Vec<_>>().join(" ")
}

/// How a single pose estimate is extracted from the population.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "snake_case")]
pub enum ParticleAveragingStrategy {
    /// Weighted mean position and circular mean heading
    WeightedAverage,
    /// Plain mean position and circular mean heading
    UnweightedAverage,
    /// Pose of the particle with the largest weight
    #[default]
    HighestWeight,
}

/// Sampling scheme used to draw the next generation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "snake_case")]
pub enum ParticleResamplingStrategy {
    /// Independent draws proportional to weight
    #[default]
    Multinomial,
    /// One uniform offset and evenly spaced pointers (low variance)
    Systematic,
    /// One uniform draw inside each of the evenly sized strata
    Stratified,
    /// Deterministic copies of `floor(N w)` followed by systematic sampling of the remainders
    Residual,
}
impl ParticleResamplingStrategy {
    /// Draw `count` indices proportional to `weights`.
    ///
    /// Weights need not be normalized. Returns `None` when the weights cannot define a distribution (empty,
    /// negative, non-finite, or summing to zero).
    pub fn select<R: Rng + ?Sized>(&self, weights: &[f64], count: usize, rng: &mut R) -> Option<Vec<usize>> {
        match self {
            ParticleResamplingStrategy::Multinomial => multinomial_resample(weights, count, rng),
            ParticleResamplingStrategy::Systematic => systematic_resample(weights, count, rng),
            ParticleResamplingStrategy::Stratified => stratified_resample(weights, count, rng),
            ParticleResamplingStrategy::Residual => residual_resample(weights, count, rng),
        }
    }
    /// Draw a new population of the same size, cloning the selected particles.
    pub fn resample<R: Rng + ?Sized>(&self, particles: &[Particle], rng: &mut R) -> Option<Vec<Particle>> {
        let weights: Vec<f64> = particles.iter().map(|p| p.weight).collect();
        let indices = self.select(&weights, particles.len(), rng)?;
        Some(indices.into_iter().map(|i| particles[i].clone()).collect())
    }
}

fn total_weight(weights: &[f64]) -> Option<f64> {
    if weights.is_empty() || weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
        return None;
    }
    let sum: f64 = weights.iter().sum();
    if sum > 0.0 && sum.is_finite() { Some(sum) } else { None }
}

/// Walk the cumulative weights with sorted pointers in `[0, total)`.
fn select_sorted(weights: &[f64], positions: &[f64]) -> Vec<usize> {
    let last = weights.len() - 1;
    let mut indices = Vec::with_capacity(positions.len());
    let mut i = 0;
    let mut cumsum = weights[0];
    for &u in positions {
        while u >= cumsum && i < last {
            i += 1;
            cumsum += weights[i];
        }
        indices.push(i);
    }
    indices
}

pub fn multinomial_resample<R: Rng + ?Sized>(weights: &[f64], count: usize, rng: &mut R) -> Option<Vec<usize>> {
    total_weight(weights)?;
    let distribution = WeightedIndex::new(weights).ok()?;
    Some((0..count).map(|_| distribution.sample(rng)).collect())
}

pub fn systematic_resample<R: Rng + ?Sized>(weights: &[f64], count: usize, rng: &mut R) -> Option<Vec<usize>> {
    let total = total_weight(weights)?;
    let step = total / count as f64;
    let offset = rng.random::<f64>() * step;
    let positions: Vec<f64> = (0..count).map(|k| offset + k as f64 * step).collect();
    Some(select_sorted(weights, &positions))
}

pub fn stratified_resample<R: Rng + ?Sized>(weights: &[f64], count: usize, rng: &mut R) -> Option<Vec<usize>> {
    let total = total_weight(weights)?;
    let step = total / count as f64;
    let positions: Vec<f64> = (0..count)
        .map(|k| (k as f64 + rng.random::<f64>()) * step)
        .collect();
    Some(select_sorted(weights, &positions))
}

pub fn residual_resample<R: Rng + ?Sized>(weights: &[f64], count: usize, rng: &mut R) -> Option<Vec<usize>> {
    let total = total_weight(weights)?;
    let n = count as f64;
    let mut indices = Vec::with_capacity(count);
    let mut residual: Vec<f64> = vec![0.0; weights.len()];
    for (i, &w) in weights.iter().enumerate() {
        let expected = w / total * n;
        let copies = expected.floor() as usize;
        residual[i] = expected - copies as f64;
        indices.extend(std::iter::repeat_n(i, copies));
    }
    // Rounding can overshoot by one copy when expected counts land just below an integer.
    indices.truncate(count);
    let remaining = count - indices.len();
    if remaining > 0 {
        match systematic_resample(&residual, remaining, rng) {
            Some(extra) => indices.extend(extra),
            None => indices.extend(systematic_resample(weights, remaining, rng)?),
        }
    }
    Some(indices)
}

/// Candidate landmarks within range of `pose` and the associated global-frame observations.
fn associate_from(
    pose: &Pose,
    sensor_range: f64,
    observations: &[LandmarkObservation],
    map: &Map,
) -> (Vec<LandmarkObservation>, Vec<LandmarkObservation>) {
    let candidates: Vec<LandmarkObservation> = map
        .landmarks_in_range(pose.x, pose.y, sensor_range)
        .map(LandmarkObservation::from)
        .collect();
    let mut transformed = transform_observations(pose, observations);
    nearest_neighbor(&candidates, &mut transformed);
    (candidates, transformed)
}

/// Logarithm of the sum of `exp(l)` over the log-weights, shifted by the largest term to avoid underflow.
///
/// Returns negative infinity when the largest term is not finite, e.g. when every weight is zero.
pub fn log_sum_exp(log_weights: &[f64]) -> f64 {
    let max_log_weight = log_weights.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if !max_log_weight.is_finite() {
        return f64::NEG_INFINITY;
    }
    max_log_weight
        + log_weights
            .iter()
            .map(|l| (l - max_log_weight).exp())
            .sum::<f64>()
            .ln()
}

/// Landmark particle filter with an owned, seedable random number generator.
#[derive(Clone)]
pub struct ParticleFilter {
    particles: Vec<Particle>,
    num_particles: usize,
    is_initialized: bool,
    pub averaging_strategy: ParticleAveragingStrategy,
    pub resampling_strategy: ParticleResamplingStrategy,
    rng: StdRng,
}
impl Debug for ParticleFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let min_weight = self
            .particles
            .iter()
            .map(|p| p.weight)
            .fold(f64::INFINITY, f64::min);
        let max_weight = self.particles.iter().map(|p| p.weight).fold(0.0, f64::max);
        let mut s = f.debug_struct("ParticleFilter");
        s.field("num_particles", &self.num_particles)
            .field("is_initialized", &self.is_initialized)
            .field("effective_particles", &self.effective_sample_size())
            .field(
                "weight_range",
                &format_args!("[{:.4e}, {:.4e}]", min_weight, max_weight),
            );
        if let Some(estimate) = self.try_estimate() {
            s.field(
                "estimate",
                &format_args!(
                    "({:.3} m, {:.3} m, {:.4} rad)",
                    estimate.x, estimate.y, estimate.theta
                ),
            );
        }
        s.finish()
    }
}
impl ParticleFilter {
    /// Create an uninitialized filter.
    ///
    /// # Arguments
    /// * `num_particles` - Population size, fixed for the lifetime of the filter.
    /// * `seed` - Seed for the random number generator. `None` seeds from the operating system.
    /// * `averaging_strategy` - Defaults to [ParticleAveragingStrategy::HighestWeight].
    /// * `resampling_strategy` - Defaults to [ParticleResamplingStrategy::Multinomial].
    pub fn new(
        num_particles: usize,
        seed: Option<u64>,
        averaging_strategy: Option<ParticleAveragingStrategy>,
        resampling_strategy: Option<ParticleResamplingStrategy>,
    ) -> Self {
        assert!(num_particles > 0, "Particle filter needs at least one particle");
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        ParticleFilter {
            particles: Vec::with_capacity(num_particles),
            num_particles,
            is_initialized: false,
            averaging_strategy: averaging_strategy.unwrap_or_default(),
            resampling_strategy: resampling_strategy.unwrap_or_default(),
            rng,
        }
    }
    pub fn from_config(config: &FilterConfig) -> Self {
        ParticleFilter::new(
            config.num_particles,
            config.seed,
            Some(config.averaging_strategy),
            Some(config.resampling_strategy),
        )
    }
    /// Sample the population around an initial pose estimate.
    ///
    /// Every particle gets an independent Gaussian draw per axis, weight 1 and its slot index as id. Calling
    /// this again discards the current population.
    ///
    /// # Arguments
    /// * `x`, `y`, `theta` - Initial pose estimate (e.g. from GPS).
    /// * `std` - Standard deviations of the estimate [x (m), y (m), theta (rad)].
    pub fn init(&mut self, x: f64, y: f64, theta: f64, std: [f64; 3]) {
        debug_assert!(
            std.iter().all(|s| *s >= 0.0),
            "Initial standard deviations must be non-negative"
        );
        let rng = &mut self.rng;
        self.particles = (0..self.num_particles)
            .map(|id| {
                let pose = Pose::new(
                    x + std[0] * rng.sample::<f64, _>(StandardNormal),
                    y + std[1] * rng.sample::<f64, _>(StandardNormal),
                    theta + std[2] * rng.sample::<f64, _>(StandardNormal),
                );
                Particle::new(id, pose, 1.0)
            })
            .collect();
        self.is_initialized = true;
        log::debug!(
            "Initialized {} particles around ({:.3}, {:.3}, {:.4})",
            self.num_particles,
            x,
            y,
            theta
        );
    }
    pub fn is_initialized(&self) -> bool {
        self.is_initialized
    }
    fn assert_initialized(&self, operation: &str) {
        assert!(
            self.is_initialized,
            "ParticleFilter::{operation} called before ParticleFilter::init"
        );
    }
    /// Move every particle with the constant turn rate model and add process noise.
    ///
    /// # Arguments
    /// * `delta_t` - Time step (s).
    /// * `std_pos` - Process noise standard deviations [x (m), y (m), theta (rad)].
    /// * `velocity` - Commanded velocity (m/s).
    /// * `yaw_rate` - Commanded yaw rate (rad/s).
    pub fn prediction(&mut self, delta_t: f64, std_pos: [f64; 3], velocity: f64, yaw_rate: f64) {
        self.assert_initialized("prediction");
        debug_assert!(
            std_pos.iter().all(|s| *s >= 0.0),
            "Process noise standard deviations must be non-negative"
        );
        let control = ControlInput::new(velocity, yaw_rate);
        let rng = &mut self.rng;
        for particle in &mut self.particles {
            let mut pose = particle.pose();
            forward(&mut pose, control, delta_t);
            pose.x += std_pos[0] * rng.sample::<f64, _>(StandardNormal);
            pose.y += std_pos[1] * rng.sample::<f64, _>(StandardNormal);
            pose.theta += std_pos[2] * rng.sample::<f64, _>(StandardNormal);
            particle.set_pose(pose);
        }
    }
    /// Score every particle against a batch of observations and normalize the weights.
    ///
    /// For each particle the landmarks within `sensor_range` become candidates, the observations are moved to
    /// the global frame with the particle's pose, associated to their nearest candidate, and the weight becomes
    /// the product of the bivariate Gaussian densities. The products are accumulated as logs; the stored
    /// weights are normalized unless their sum is at or below [WEIGHT_EPSILON], in which case the raw products
    /// are kept.
    ///
    /// # Arguments
    /// * `sensor_range` - Maximum landmark range (m).
    /// * `std_landmark` - Observation standard deviations [x (m), y (m)].
    /// * `observations` - Observations in the vehicle frame.
    /// * `map` - Landmark map.
    pub fn update_weights(
        &mut self,
        sensor_range: f64,
        std_landmark: [f64; 2],
        observations: &[LandmarkObservation],
        map: &Map,
    ) {
        self.assert_initialized("update_weights");
        let model = LandmarkMeasurementModel::from(std_landmark);
        let log_weights: Vec<f64> = self
            .particles
            .par_iter()
            .map(|particle| {
                let (candidates, transformed) =
                    associate_from(&particle.pose(), sensor_range, observations, map);
                model.log_likelihood(&transformed, &candidates)
            })
            .collect();

        let log_total = log_sum_exp(&log_weights);
        let normalize = log_total.exp() > WEIGHT_EPSILON;
        for (particle, log_weight) in self.particles.iter_mut().zip(log_weights) {
            particle.weight = if normalize {
                (log_weight - log_total).exp()
            } else {
                log_weight.exp()
            };
        }
        if !normalize {
            log::warn!(
                "Total particle weight is negligible (log total {:.3}); weights left unnormalized",
                log_total
            );
        }
    }
    /// Replace the population with a weight-proportional draw of the same size.
    ///
    /// If the weights cannot define a distribution (e.g. they are all zero) the population is left unchanged
    /// and a warning is logged.
    pub fn resample(&mut self) {
        self.assert_initialized("resample");
        match self.resampling_strategy.resample(&self.particles, &mut self.rng) {
            Some(particles) => self.particles = particles,
            None => log::warn!(
                "Skipping {:?} resampling: particle weights do not form a distribution",
                self.resampling_strategy
            ),
        }
    }
    /// Run one complete filter step: prediction, weight update and resampling.
    pub fn step(
        &mut self,
        config: &FilterConfig,
        control: ControlInput,
        observations: &[LandmarkObservation],
        map: &Map,
    ) {
        self.prediction(
            config.delta_t,
            config.process_noise_std,
            control.velocity,
            control.yaw_rate,
        );
        self.update_weights(config.sensor_range, config.landmark_std, observations, map);
        self.resample();
    }
    /// Overwrite particle weights, e.g. for floor-weighting by the caller.
    pub fn set_weights(&mut self, weights: &[f64]) {
        assert_eq!(weights.len(), self.particles.len());
        for (particle, &w) in self.particles.iter_mut().zip(weights.iter()) {
            particle.weight = w;
        }
    }
    /// Attach association bookkeeping to the particle at `index`.
    pub fn set_associations(
        &mut self,
        index: usize,
        associations: Vec<u32>,
        sense_x: Vec<f64>,
        sense_y: Vec<f64>,
    ) {
        self.particles[index].set_associations(associations, sense_x, sense_y);
    }
    /// The associations the particle at `index` makes for `observations`, without changing any state.
    ///
    /// Returns the matched landmark ids and the global coordinates of the matched observations, ready for
    /// [ParticleFilter::set_associations]. Unmatched observations are skipped.
    pub fn associate_particle(
        &self,
        index: usize,
        sensor_range: f64,
        observations: &[LandmarkObservation],
        map: &Map,
    ) -> (Vec<u32>, Vec<f64>, Vec<f64>) {
        let (_, transformed) =
            associate_from(&self.particles[index].pose(), sensor_range, observations, map);
        let mut associations = Vec::with_capacity(transformed.len());
        let mut sense_x = Vec::with_capacity(transformed.len());
        let mut sense_y = Vec::with_capacity(transformed.len());
        for observation in transformed {
            if let Some(id) = observation.id {
                associations.push(id);
                sense_x.push(observation.x);
                sense_y.push(observation.y);
            }
        }
        (associations, sense_x, sense_y)
    }
    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }
    pub fn len(&self) -> usize {
        self.particles.len()
    }
    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }
    pub fn num_particles(&self) -> usize {
        self.num_particles
    }
    pub fn weights(&self) -> Vec<f64> {
        self.particles.iter().map(|p| p.weight).collect()
    }
    /// Index of the particle with the largest weight (first one on ties)
    pub fn best_index(&self) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (i, particle) in self.particles.iter().enumerate() {
            if best.is_none_or(|(_, w)| particle.weight > w) {
                best = Some((i, particle.weight));
            }
        }
        best.map(|(i, _)| i)
    }
    pub fn best_particle(&self) -> Option<&Particle> {
        self.best_index().map(|i| &self.particles[i])
    }
    /// `1 / Σ w²` over normalized weights; 0 for an empty or weightless population.
    pub fn effective_sample_size(&self) -> f64 {
        let sum: f64 = self.particles.iter().map(|p| p.weight).sum();
        if !(sum > 0.0 && sum.is_finite()) {
            return 0.0;
        }
        let sum_of_squares: f64 = self
            .particles
            .iter()
            .map(|p| (p.weight / sum).powi(2))
            .sum();
        1.0 / sum_of_squares
    }
    fn try_estimate(&self) -> Option<Pose> {
        match self.averaging_strategy {
            ParticleAveragingStrategy::HighestWeight => self.best_particle().map(Particle::pose),
            ParticleAveragingStrategy::WeightedAverage => self.weighted_average_pose(true),
            ParticleAveragingStrategy::UnweightedAverage => self.weighted_average_pose(false),
        }
    }
    fn weighted_average_pose(&self, use_weights: bool) -> Option<Pose> {
        if self.particles.is_empty() {
            return None;
        }
        let sum: f64 = self.particles.iter().map(|p| p.weight).sum();
        let use_weights = use_weights && sum > 0.0 && sum.is_finite();
        let n = self.particles.len() as f64;
        let (mut x, mut y, mut sin, mut cos) = (0.0, 0.0, 0.0, 0.0);
        for particle in &self.particles {
            let w = if use_weights { particle.weight / sum } else { 1.0 / n };
            x += w * particle.x;
            y += w * particle.y;
            sin += w * particle.theta.sin();
            cos += w * particle.theta.cos();
        }
        Some(Pose::new(x, y, sin.atan2(cos)))
    }
    /// Pose estimate according to [ParticleFilter::averaging_strategy].
    ///
    /// The averaged strategies return a heading in $[-\pi, \pi]$; the highest-weight strategy returns the
    /// particle's raw heading.
    pub fn get_estimate(&self) -> Pose {
        self.assert_initialized("get_estimate");
        self.try_estimate().unwrap_or_default()
    }
    /// Weighted covariance of `[x, y, theta]` about [ParticleFilter::get_estimate].
    ///
    /// Heading residuals are wrapped to $[-\pi, \pi]$.
    pub fn get_certainty(&self) -> Matrix3<f64> {
        let mean = self.get_estimate();
        let sum: f64 = self.particles.iter().map(|p| p.weight).sum();
        let use_weights = sum > 0.0 && sum.is_finite();
        let n = self.particles.len() as f64;
        let mut cov = Matrix3::<f64>::zeros();
        for particle in &self.particles {
            let w = if use_weights { particle.weight / sum } else { 1.0 / n };
            let diff = Vector3::new(
                particle.x - mean.x,
                particle.y - mean.y,
                wrap_to_pi(particle.theta - mean.theta),
            );
            cov += w * diff * diff.transpose();
        }
        cov
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::Landmark;
    use assert_approx_eq::assert_approx_eq;

    fn seeded_filter(n: usize) -> ParticleFilter {
        let mut pf = ParticleFilter::new(n, Some(42), None, None);
        pf.init(0.0, 0.0, 0.0, [0.0, 0.0, 0.0]);
        pf
    }
    fn square_map() -> Map {
        Map::new(vec![
            Landmark::new(1, 5.0, 0.0),
            Landmark::new(2, 0.0, 5.0),
            Landmark::new(3, -5.0, 0.0),
            Landmark::new(4, 0.0, -5.0),
        ])
    }

    #[test]
    fn test_init_population() {
        let mut pf = ParticleFilter::new(100, Some(1), None, None);
        assert!(!pf.is_initialized());
        pf.init(10.0, -3.0, 1.0, [0.3, 0.3, 0.01]);
        assert!(pf.is_initialized());
        assert_eq!(pf.len(), 100);
        for (i, particle) in pf.particles().iter().enumerate() {
            assert_eq!(particle.id, i);
            assert_eq!(particle.weight, 1.0);
            assert!(particle.associations.is_empty());
        }
        let mean_x = pf.particles().iter().map(|p| p.x).sum::<f64>() / 100.0;
        let mean_y = pf.particles().iter().map(|p| p.y).sum::<f64>() / 100.0;
        assert_approx_eq!(mean_x, 10.0, 0.15);
        assert_approx_eq!(mean_y, -3.0, 0.15);
    }
    #[test]
    fn test_init_zero_std_is_exact() {
        let mut pf = ParticleFilter::new(5, Some(1), None, None);
        pf.init(1.0, 2.0, 3.0, [0.0, 0.0, 0.0]);
        assert!(pf.particles().iter().all(|p| p.pose() == Pose::new(1.0, 2.0, 3.0)));
    }
    #[test]
    fn test_seeded_filters_are_reproducible() {
        let mut a = ParticleFilter::new(20, Some(9), None, None);
        let mut b = ParticleFilter::new(20, Some(9), None, None);
        a.init(0.0, 0.0, 0.0, [1.0, 1.0, 0.1]);
        b.init(0.0, 0.0, 0.0, [1.0, 1.0, 0.1]);
        a.prediction(0.1, [0.2, 0.2, 0.05], 3.0, 0.2);
        b.prediction(0.1, [0.2, 0.2, 0.05], 3.0, 0.2);
        assert_eq!(a.particles(), b.particles());
    }
    #[test]
    #[should_panic(expected = "called before ParticleFilter::init")]
    fn test_prediction_before_init_panics() {
        let mut pf = ParticleFilter::new(10, Some(1), None, None);
        pf.prediction(0.1, [0.0, 0.0, 0.0], 1.0, 0.0);
    }
    #[test]
    #[should_panic(expected = "called before ParticleFilter::init")]
    fn test_update_before_init_panics() {
        let mut pf = ParticleFilter::new(10, Some(1), None, None);
        pf.update_weights(10.0, [0.3, 0.3], &[], &square_map());
    }
    #[test]
    #[should_panic(expected = "called before ParticleFilter::init")]
    fn test_resample_before_init_panics() {
        let mut pf = ParticleFilter::new(10, Some(1), None, None);
        pf.resample();
    }
    #[test]
    fn test_prediction_straight_line_without_noise() {
        let mut pf = ParticleFilter::new(3, Some(1), None, None);
        pf.init(1.0, 1.0, 0.5, [0.0, 0.0, 0.0]);
        pf.prediction(2.0, [0.0, 0.0, 0.0], 4.0, 0.0);
        for particle in pf.particles() {
            assert_approx_eq!(particle.x, 1.0 + 4.0 * 0.5_f64.cos() * 2.0, 1e-12);
            assert_approx_eq!(particle.y, 1.0 + 4.0 * 0.5_f64.sin() * 2.0, 1e-12);
            assert_eq!(particle.theta, 0.5);
        }
    }
    #[test]
    fn test_prediction_curved_without_noise() {
        let mut pf = seeded_filter(3);
        pf.prediction(1.0, [0.0, 0.0, 0.0], 1.0, 0.1);
        for particle in pf.particles() {
            assert_approx_eq!(particle.x, 0.9983, 1e-3);
            assert_approx_eq!(particle.y, 0.04996, 1e-3);
            assert_approx_eq!(particle.theta, 0.1, 1e-3);
        }
    }
    #[test]
    fn test_prediction_noise_spreads_particles() {
        let mut pf = seeded_filter(200);
        pf.prediction(0.1, [0.5, 0.5, 0.1], 0.0, 0.0);
        let var_x = pf.particles().iter().map(|p| p.x * p.x).sum::<f64>() / 200.0;
        assert!(var_x > 0.1 && var_x < 0.5, "unexpected variance {var_x}");
    }
    #[test]
    fn test_population_size_invariance() {
        let map = square_map();
        let mut pf = ParticleFilter::new(64, Some(3), None, None);
        pf.init(0.0, 0.0, 0.0, [0.5, 0.5, 0.05]);
        let observations = vec![LandmarkObservation::new(5.0, 0.0), LandmarkObservation::new(0.0, 5.0)];
        for strategy in [
            ParticleResamplingStrategy::Multinomial,
            ParticleResamplingStrategy::Systematic,
            ParticleResamplingStrategy::Stratified,
            ParticleResamplingStrategy::Residual,
        ] {
            pf.resampling_strategy = strategy;
            pf.prediction(0.1, [0.1, 0.1, 0.01], 0.0, 0.0);
            assert_eq!(pf.len(), 64);
            pf.update_weights(10.0, [0.3, 0.3], &observations, &map);
            assert_eq!(pf.len(), 64);
            pf.resample();
            assert_eq!(pf.len(), 64);
        }
    }
    #[test]
    fn test_weights_normalized_after_update() {
        let map = square_map();
        let mut pf = ParticleFilter::new(50, Some(5), None, None);
        pf.init(0.0, 0.0, 0.0, [0.3, 0.3, 0.02]);
        let observations = vec![
            LandmarkObservation::new(5.0, 0.0),
            LandmarkObservation::new(0.0, 5.0),
            LandmarkObservation::new(-5.0, 0.0),
        ];
        pf.update_weights(10.0, [0.3, 0.3], &observations, &map);
        let sum: f64 = pf.weights().iter().sum();
        assert_approx_eq!(sum, 1.0, 1e-9);
        assert!(pf.weights().iter().all(|w| *w >= 0.0));
    }
    #[test]
    fn test_update_matches_direct_product() {
        let map = square_map();
        let mut pf = ParticleFilter::new(2, Some(5), None, None);
        pf.init(0.0, 0.0, 0.0, [0.0, 0.0, 0.0]);
        pf.prediction(1.0, [0.0, 0.0, 0.0], 0.0, 0.0);
        // Move the second particle off the true pose.
        let mut particles = pf.particles().to_vec();
        particles[1].x = 0.2;
        pf = ParticleFilter { particles, ..pf };
        let observations = vec![LandmarkObservation::new(5.0, 0.0), LandmarkObservation::new(0.0, 5.0)];
        pf.update_weights(10.0, [0.3, 0.3], &observations, &map);

        let model = LandmarkMeasurementModel::new(0.3, 0.3);
        let w0 = model.density(0.0, 0.0) * model.density(0.0, 0.0);
        let w1 = model.density(0.2, 0.0) * model.density(0.2, 0.0);
        assert_approx_eq!(pf.weights()[0], w0 / (w0 + w1), 1e-9);
        assert_approx_eq!(pf.weights()[1], w1 / (w0 + w1), 1e-9);
    }
    #[test]
    fn test_negligible_total_weight_is_not_normalized() {
        let map = Map::new(vec![Landmark::new(1, 0.0, 0.0)]);
        let mut pf = seeded_filter(4);
        // The only landmark is far from the observation, so every density underflows.
        let observations = vec![LandmarkObservation::new(1000.0, 0.0)];
        pf.update_weights(1.0, [0.3, 0.3], &observations, &map);
        let sum: f64 = pf.weights().iter().sum();
        assert!(sum <= WEIGHT_EPSILON);
        assert!(pf.weights().iter().all(|w| w.is_finite() && *w >= 0.0));
    }
    #[test]
    fn test_log_sum_exp() {
        assert_approx_eq!(log_sum_exp(&[0.5_f64.ln(), 0.25_f64.ln()]), 0.75_f64.ln(), 1e-12);
        assert_approx_eq!(log_sum_exp(&[-1000.0, -1000.0]), -1000.0 + 2.0_f64.ln(), 1e-9);
        assert_eq!(log_sum_exp(&[f64::NEG_INFINITY, f64::NEG_INFINITY]), f64::NEG_INFINITY);
        assert_eq!(log_sum_exp(&[]), f64::NEG_INFINITY);
    }
    #[test]
    fn test_zero_likelihood_everywhere_leaves_zero_weights() {
        let map = Map::new(vec![Landmark::new(1, 0.0, 0.0)]);
        let mut pf = seeded_filter(4);
        // The variance underflows the exponent, so every log-weight is negative infinity.
        let observations = vec![LandmarkObservation::new(1000.0, 0.0)];
        pf.update_weights(1.0, [1e-160, 1e-160], &observations, &map);
        assert!(pf.weights().iter().all(|w| *w == 0.0));
        let before = pf.particles().to_vec();
        pf.resample();
        assert_eq!(pf.particles(), before.as_slice());
    }
    #[test]
    fn test_out_of_range_particle_gets_origin_fallback() {
        let map = Map::new(vec![Landmark::new(1, 100.0, 0.0)]);
        let mut pf = seeded_filter(1);
        let observations = vec![LandmarkObservation::new(0.1, 0.0)];
        pf.update_weights(10.0, [1.0, 1.0], &observations, &map);
        let model = LandmarkMeasurementModel::new(1.0, 1.0);
        // A single particle normalizes to 1 whenever its density is not negligible.
        assert_approx_eq!(pf.weights()[0], 1.0, 1e-12);
        assert!(model.density(0.1, 0.0) > WEIGHT_EPSILON);
    }
    #[test]
    fn test_resampling_proportionality() {
        let weights = [0.9, 0.05, 0.05];
        let mut rng = StdRng::seed_from_u64(11);
        let indices = multinomial_resample(&weights, 100_000, &mut rng).unwrap();
        let fraction = indices.iter().filter(|&&i| i == 0).count() as f64 / 100_000.0;
        assert_approx_eq!(fraction, 0.9, 0.02);
    }
    #[test]
    fn test_all_strategies_follow_weights() {
        let weights = [0.1, 0.6, 0.0, 0.3];
        let mut rng = StdRng::seed_from_u64(2);
        for strategy in [
            ParticleResamplingStrategy::Multinomial,
            ParticleResamplingStrategy::Systematic,
            ParticleResamplingStrategy::Stratified,
            ParticleResamplingStrategy::Residual,
        ] {
            let indices = strategy.select(&weights, 10_000, &mut rng).unwrap();
            assert_eq!(indices.len(), 10_000);
            assert!(indices.iter().all(|&i| i != 2), "{strategy:?} drew a zero-weight index");
            let fraction = indices.iter().filter(|&&i| i == 1).count() as f64 / 10_000.0;
            assert_approx_eq!(fraction, 0.6, 0.03);
        }
    }
    #[test]
    fn test_systematic_and_residual_are_near_deterministic() {
        let weights = [0.5, 0.25, 0.25];
        let mut rng = StdRng::seed_from_u64(8);
        let indices = systematic_resample(&weights, 4, &mut rng).unwrap();
        assert_eq!(indices, vec![0, 0, 1, 2]);
        let indices = residual_resample(&weights, 4, &mut rng).unwrap();
        assert_eq!(indices, vec![0, 0, 1, 2]);
    }
    #[test]
    fn test_unnormalized_weights_resample_the_same() {
        let mut rng = StdRng::seed_from_u64(4);
        let indices = systematic_resample(&[5.0, 2.5, 2.5], 4, &mut rng).unwrap();
        assert_eq!(indices, vec![0, 0, 1, 2]);
    }
    #[test]
    fn test_degenerate_weights_rejected() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(multinomial_resample(&[0.0, 0.0], 2, &mut rng).is_none());
        assert!(systematic_resample(&[], 2, &mut rng).is_none());
        assert!(stratified_resample(&[f64::NAN, 1.0], 2, &mut rng).is_none());
        assert!(residual_resample(&[-1.0, 2.0], 2, &mut rng).is_none());
    }
    #[test]
    fn test_resample_with_zero_weights_keeps_population() {
        let mut pf = ParticleFilter::new(3, Some(1), None, None);
        pf.init(0.0, 0.0, 0.0, [1.0, 1.0, 0.1]);
        pf.set_weights(&[0.0, 0.0, 0.0]);
        let before = pf.particles().to_vec();
        pf.resample();
        assert_eq!(pf.particles(), before.as_slice());
    }
    #[test]
    fn test_resample_concentrates_on_dominant_particle() {
        let mut pf = ParticleFilter::new(10, Some(1), None, None);
        pf.init(0.0, 0.0, 0.0, [1.0, 1.0, 0.1]);
        let mut weights = vec![0.0; 10];
        weights[7] = 1.0;
        pf.set_weights(&weights);
        let chosen = pf.particles()[7].clone();
        pf.resample();
        assert!(pf.particles().iter().all(|p| *p == chosen));
    }
    #[test]
    fn test_diagnostics_strings() {
        let mut pf = seeded_filter(2);
        pf.set_associations(1, vec![3, 14, 15], vec![1.5, -2.25, 3.0], vec![0.1, 0.2, 0.3]);
        let particle = &pf.particles()[1];
        assert_eq!(particle.get_associations(), "3 14 15");
        assert_eq!(particle.get_sense_x(), "1.5 -2.25 3");
        assert_eq!(particle.get_sense_y(), "0.1 0.2 0.3");
        assert_eq!(pf.particles()[0].get_associations(), "");
    }
    #[test]
    #[should_panic(expected = "must have equal lengths")]
    fn test_set_associations_length_mismatch_panics() {
        let mut pf = seeded_filter(1);
        pf.set_associations(0, vec![1, 2], vec![0.0], vec![0.0, 1.0]);
    }
    #[test]
    fn test_associate_particle_does_not_touch_state() {
        let map = square_map();
        let mut pf = seeded_filter(2);
        let observations = vec![
            LandmarkObservation::new(4.8, 0.1),
            LandmarkObservation::new(0.2, -5.1),
        ];
        let before = pf.particles().to_vec();
        let (ids, xs, ys) = pf.associate_particle(0, 10.0, &observations, &map);
        assert_eq!(pf.particles(), before.as_slice());
        assert_eq!(ids, vec![1, 4]);
        assert_approx_eq!(xs[0], 4.8, 1e-12);
        assert_approx_eq!(ys[1], -5.1, 1e-12);
        pf.set_associations(0, ids, xs, ys);
        assert_eq!(pf.particles()[0].get_associations(), "1 4");
    }
    #[test]
    fn test_estimates() {
        let mut pf = ParticleFilter::new(2, Some(1), None, None);
        pf.init(0.0, 0.0, 0.0, [0.0, 0.0, 0.0]);
        let particles = vec![
            Particle::new(0, Pose::new(0.0, 0.0, 0.1), 0.25),
            Particle::new(1, Pose::new(4.0, 8.0, -0.1), 0.75),
        ];
        pf = ParticleFilter { particles, ..pf };

        pf.averaging_strategy = ParticleAveragingStrategy::HighestWeight;
        assert_eq!(pf.get_estimate(), Pose::new(4.0, 8.0, -0.1));

        pf.averaging_strategy = ParticleAveragingStrategy::WeightedAverage;
        let estimate = pf.get_estimate();
        assert_approx_eq!(estimate.x, 3.0, 1e-12);
        assert_approx_eq!(estimate.y, 6.0, 1e-12);
        assert!(estimate.theta < 0.0);

        pf.averaging_strategy = ParticleAveragingStrategy::UnweightedAverage;
        let estimate = pf.get_estimate();
        assert_approx_eq!(estimate.x, 2.0, 1e-12);
        assert_approx_eq!(estimate.y, 4.0, 1e-12);
        assert_approx_eq!(estimate.theta, 0.0, 1e-12);

        let cov = pf.get_certainty();
        assert_approx_eq!(cov[(0, 0)], 0.25 * 4.0 + 0.75 * 4.0, 1e-12);
        assert_approx_eq!(cov[(0, 1)], cov[(1, 0)], 1e-12);
    }
    #[test]
    fn test_circular_mean_handles_wraparound() {
        let mut pf = ParticleFilter::new(2, Some(1), Some(ParticleAveragingStrategy::UnweightedAverage), None);
        pf.init(0.0, 0.0, 0.0, [0.0, 0.0, 0.0]);
        let particles = vec![
            Particle::new(0, Pose::new(0.0, 0.0, std::f64::consts::PI - 0.1), 1.0),
            Particle::new(1, Pose::new(0.0, 0.0, -std::f64::consts::PI + 0.1), 1.0),
        ];
        pf = ParticleFilter { particles, ..pf };
        assert_approx_eq!(pf.get_estimate().theta.abs(), std::f64::consts::PI, 1e-9);
    }
    #[test]
    fn test_effective_sample_size() {
        let mut pf = seeded_filter(4);
        assert_approx_eq!(pf.effective_sample_size(), 4.0, 1e-12);
        pf.set_weights(&[1.0, 0.0, 0.0, 0.0]);
        assert_approx_eq!(pf.effective_sample_size(), 1.0, 1e-12);
        pf.set_weights(&[0.0; 4]);
        assert_eq!(pf.effective_sample_size(), 0.0);
    }
    #[test]
    fn test_best_particle_first_on_ties() {
        let mut pf = seeded_filter(3);
        pf.set_weights(&[0.2, 0.4, 0.4]);
        assert_eq!(pf.best_index(), Some(1));
        assert_eq!(pf.best_particle().map(|p| p.id), Some(1));
    }
    #[test]
    fn test_step_tracks_static_agent() {
        let map = square_map();
        let config = FilterConfig {
            num_particles: 200,
            seed: Some(21),
            sensor_range: 10.0,
            process_noise_std: [0.05, 0.05, 0.005],
            ..Default::default()
        };
        let mut pf = ParticleFilter::from_config(&config);
        pf.init(0.5, -0.5, 0.0, [0.5, 0.5, 0.05]);
        let observations: Vec<LandmarkObservation> = map
            .landmarks()
            .iter()
            .map(|l| LandmarkObservation::new(l.x, l.y))
            .collect();
        for _ in 0..20 {
            pf.step(&config, ControlInput::new(0.0, 0.0), &observations, &map);
        }
        let estimate = pf.get_estimate();
        assert!(estimate.x.abs() < 0.3, "x estimate {}", estimate.x);
        assert!(estimate.y.abs() < 0.3, "y estimate {}", estimate.y);
        assert!(format!("{pf:?}").contains("ParticleFilter"));
    }
}
