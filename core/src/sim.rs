//! Data loading, synthetic scenarios, and the replay loop used to evaluate the filter.
//!
//! This module provides:
//! - Loaders for the whitespace separated telemetry files of a recorded data set (map, control, ground truth,
//!   and one observation file per step)
//! - A [Scenario] struct bundling everything one replay needs, which can be read from and written to a data set
//!   directory
//! - A seeded synthetic scenario generator ([simulate_scenario])
//! - The replay loop ([run_filter]) producing one [NavigationResult] per step, and error summaries
//!
//! A data set directory has the following layout:
//!
//! ```text
//! map_data.txt                      x y id        (one landmark per line)
//! control_data.txt                  v yaw_rate    (one line per step)
//! gt_data.txt                       x y theta     (one line per step, optional)
//! observation/observations_000001.txt   x y       (one observation per line, vehicle frame)
//! observation/observations_000002.txt
//! ...
//! ```
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::{FilterConfig, ScenarioConfig};
use crate::map::Map;
use crate::measurements::LandmarkObservation;
use crate::particle::ParticleFilter;
use crate::{ControlInput, Pose, forward, wrap_to_pi};

pub const MAP_FILE: &str = "map_data.txt";
pub const CONTROL_FILE: &str = "control_data.txt";
pub const GROUND_TRUTH_FILE: &str = "gt_data.txt";
pub const OBSERVATION_DIR: &str = "observation";

/// Name of the observation file for a 1-based step number, e.g. `observations_000001.txt`.
pub fn observation_file_name(step: usize) -> String {
    format!("observations_{:06}.txt", step)
}

/// Reads a headerless, whitespace separated numeric table.
///
/// Blank lines and lines starting with `#` are skipped. Every remaining line must hold at least
/// `min_columns` numbers; extra columns are kept.
///
/// # Arguments
/// * `path` - Path to the text file.
/// * `min_columns` - Minimum number of values per line.
///
/// # Returns
/// * `Ok(rows)` with one vector per data line.
/// * `Err` if the file cannot be read, a value is not a finite number, or a line is too short.
pub fn read_columns<P: AsRef<Path>>(path: P, min_columns: usize) -> Result<Vec<Vec<f64>>, Box<dyn Error>> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);
    let mut rows = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let row = line
            .split_whitespace()
            .map(|value| value.parse::<f64>())
            .collect::<Result<Vec<f64>, _>>()
            .map_err(|e| format!("{}:{}: {}", path.display(), number + 1, e))?;
        if let Some(value) = row.iter().find(|value| !value.is_finite()) {
            return Err(format!("{}:{}: non-finite value '{}'", path.display(), number + 1, value).into());
        }
        if row.len() < min_columns {
            return Err(format!(
                "{}:{}: expected at least {} columns, found {}",
                path.display(),
                number + 1,
                min_columns,
                row.len()
            )
            .into());
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Writes rows of numbers as a headerless, space separated table.
pub fn write_columns<P, I>(path: P, rows: I) -> io::Result<()>
where
    P: AsRef<Path>,
    I: IntoIterator<Item = Vec<f64>>,
{
    let mut writer = BufWriter::new(File::create(path)?);
    for row in rows {
        let line: Vec<String> = row.iter().map(|v| v.to_string()).collect();
        writeln!(writer, "{}", line.join(" "))?;
    }
    writer.flush()
}

/// Reads a control file with one `velocity yaw_rate` pair per line.
pub fn load_control<P: AsRef<Path>>(path: P) -> Result<Vec<ControlInput>, Box<dyn Error>> {
    Ok(read_columns(path, 2)?
        .into_iter()
        .map(|row| ControlInput::new(row[0], row[1]))
        .collect())
}

/// Reads a ground-truth file with one `x y theta` pose per line.
pub fn load_ground_truth<P: AsRef<Path>>(path: P) -> Result<Vec<Pose>, Box<dyn Error>> {
    Ok(read_columns(path, 3)?
        .into_iter()
        .map(|row| Pose::new(row[0], row[1], row[2]))
        .collect())
}

/// Reads one step's observations (`x y` per line, vehicle frame). An empty file is an empty batch.
pub fn load_observations<P: AsRef<Path>>(path: P) -> Result<Vec<LandmarkObservation>, Box<dyn Error>> {
    Ok(read_columns(path, 2)?
        .into_iter()
        .map(|row| LandmarkObservation::new(row[0], row[1]))
        .collect())
}

/// Reads consecutive observation files `observations_000001.txt`, `observations_000002.txt`, ... from `dir`,
/// stopping at the first missing step.
pub fn load_observation_dir<P: AsRef<Path>>(dir: P) -> Result<Vec<Vec<LandmarkObservation>>, Box<dyn Error>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(format!("Observation directory '{}' does not exist.", dir.display()).into());
    }
    let mut batches = Vec::new();
    loop {
        let file = dir.join(observation_file_name(batches.len() + 1));
        if !file.is_file() {
            break;
        }
        batches.push(load_observations(&file)?);
    }
    if batches.is_empty() {
        return Err(format!(
            "No observation files found in '{}' (expected {})",
            dir.display(),
            observation_file_name(1)
        )
        .into());
    }
    Ok(batches)
}

/// Everything needed to replay the filter over a sequence of steps.
///
/// Step `i` consists of `observations[i]` and, when present, `ground_truth[i]`. `controls[i]` is the command
/// applied between step `i` and step `i + 1`, so the filter predicts into step `i` with `controls[i - 1]`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Scenario {
    /// Time between steps (s)
    pub delta_t: f64,
    /// Pose estimate used to initialize the filter (GPS-like)
    pub initial_pose: Pose,
    pub controls: Vec<ControlInput>,
    pub observations: Vec<Vec<LandmarkObservation>>,
    /// True poses; empty when the data set has no ground truth
    pub ground_truth: Vec<Pose>,
}
impl Scenario {
    /// Number of filter steps in the scenario
    pub fn len(&self) -> usize {
        self.observations.len()
    }
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
    /// Check that the controls and ground truth cover every step and that the inputs driving the filter are finite.
    pub fn validate(&self) -> Result<(), String> {
        if self.is_empty() {
            return Err("Scenario has no observation steps".to_string());
        }
        if self.controls.len() + 1 < self.len() {
            return Err(format!(
                "Scenario has {} steps but only {} controls (need at least {})",
                self.len(),
                self.controls.len(),
                self.len() - 1
            ));
        }
        if !self.ground_truth.is_empty() && self.ground_truth.len() < self.len() {
            return Err(format!(
                "Scenario has {} steps but only {} ground-truth poses",
                self.len(),
                self.ground_truth.len()
            ));
        }
        if !(self.delta_t > 0.0) || !self.delta_t.is_finite() {
            return Err(format!("Time step must be positive and finite, got {}", self.delta_t));
        }
        let start = self.initial_pose;
        if ![start.x, start.y, start.theta].iter().all(|value| value.is_finite()) {
            return Err(format!("Initial pose is not finite: {}", start));
        }
        if let Some(step) = self
            .controls
            .iter()
            .position(|control| !(control.velocity.is_finite() && control.yaw_rate.is_finite()))
        {
            return Err(format!("Control {} is not finite", step + 1));
        }
        Ok(())
    }
    /// Build a scenario from recorded files.
    ///
    /// The filter is initialized from `initial_pose` when given, otherwise from the first ground-truth pose.
    ///
    /// # Arguments
    /// * `control` - Control file (`v yaw_rate` per line).
    /// * `observations` - Directory of `observations_NNNNNN.txt` files.
    /// * `ground_truth` - Optional ground-truth file (`x y theta` per line).
    /// * `delta_t` - Time between steps (s).
    /// * `initial_pose` - Optional explicit initial pose estimate.
    pub fn from_files(
        control: &Path,
        observations: &Path,
        ground_truth: Option<&Path>,
        delta_t: f64,
        initial_pose: Option<Pose>,
    ) -> Result<Self, Box<dyn Error>> {
        let controls = load_control(control)?;
        let observations = load_observation_dir(observations)?;
        let ground_truth = match ground_truth {
            Some(path) => load_ground_truth(path)?,
            None => Vec::new(),
        };
        let initial_pose = match initial_pose.or_else(|| ground_truth.first().copied()) {
            Some(pose) => pose,
            None => return Err("An initial pose or a ground-truth file is required".into()),
        };
        let scenario = Scenario {
            delta_t,
            initial_pose,
            controls,
            observations,
            ground_truth,
        };
        scenario.validate()?;
        Ok(scenario)
    }
    /// Read a scenario from a data set directory (see the module documentation for the layout).
    pub fn load<P: AsRef<Path>>(dir: P, delta_t: f64) -> Result<Self, Box<dyn Error>> {
        let dir = dir.as_ref();
        let ground_truth = dir.join(GROUND_TRUTH_FILE);
        Scenario::from_files(
            &dir.join(CONTROL_FILE),
            &dir.join(OBSERVATION_DIR),
            ground_truth.is_file().then_some(ground_truth.as_path()),
            delta_t,
            None,
        )
    }
    /// Write the scenario into a data set directory, creating it if needed.
    ///
    /// The initial pose is not stored; [Scenario::load] uses the first ground-truth pose instead.
    pub fn save<P: AsRef<Path>>(&self, dir: P) -> io::Result<()> {
        let dir = dir.as_ref();
        let observation_dir = dir.join(OBSERVATION_DIR);
        fs::create_dir_all(&observation_dir)?;
        write_columns(
            dir.join(CONTROL_FILE),
            self.controls.iter().map(|c| vec![c.velocity, c.yaw_rate]),
        )?;
        if !self.ground_truth.is_empty() {
            write_columns(dir.join(GROUND_TRUTH_FILE), self.ground_truth.iter().map(|&p| Vec::<f64>::from(p)))?;
        }
        for (i, batch) in self.observations.iter().enumerate() {
            write_columns(
                observation_dir.join(observation_file_name(i + 1)),
                batch.iter().map(|o| vec![o.x, o.y]),
            )?;
        }
        Ok(())
    }
}

/// Path of the map file inside a data set directory
pub fn map_path<P: AsRef<Path>>(dir: P) -> PathBuf {
    dir.as_ref().join(MAP_FILE)
}

/// Generate a synthetic scenario and the map it was observed in.
///
/// The true pose starts at `config.initial_pose` and moves with the constant command
/// (`config.velocity`, `config.yaw_rate`) perturbed by Gaussian actuation noise each step. The recorded controls
/// are the noise-free commands. At every step each landmark within `config.sensor_range` is observed in the
/// vehicle frame with Gaussian sensor noise. The initial pose estimate is the true starting pose plus GPS-like
/// noise. Output is fully determined by `config.seed`.
pub fn simulate_scenario(config: &ScenarioConfig) -> (Map, Scenario) {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let map = if config.landmarks.is_empty() {
        Map::grid(config.extent, config.landmark_spacing)
    } else {
        Map::new(config.landmarks.clone())
    };
    let command = ControlInput::new(config.velocity, config.yaw_rate);
    let mut truth = config.initial_pose;
    let mut scenario = Scenario {
        delta_t: config.delta_t,
        initial_pose: Pose::new(
            truth.x + config.gps_std[0] * rng.sample::<f64, _>(StandardNormal),
            truth.y + config.gps_std[1] * rng.sample::<f64, _>(StandardNormal),
            truth.theta + config.gps_std[2] * rng.sample::<f64, _>(StandardNormal),
        ),
        controls: Vec::with_capacity(config.steps),
        observations: Vec::with_capacity(config.steps),
        ground_truth: Vec::with_capacity(config.steps),
    };
    for _ in 0..config.steps {
        let batch: Vec<LandmarkObservation> = map
            .landmarks_in_range(truth.x, truth.y, config.sensor_range)
            .map(|landmark| {
                let local = truth.to_local(&nalgebra::Vector2::new(landmark.x, landmark.y));
                LandmarkObservation::new(
                    local[0] + config.observation_noise_std[0] * rng.sample::<f64, _>(StandardNormal),
                    local[1] + config.observation_noise_std[1] * rng.sample::<f64, _>(StandardNormal),
                )
            })
            .collect();
        scenario.observations.push(batch);
        scenario.ground_truth.push(truth);
        scenario.controls.push(command);

        let actual = ControlInput::new(
            command.velocity + config.control_noise_std[0] * rng.sample::<f64, _>(StandardNormal),
            command.yaw_rate + config.control_noise_std[1] * rng.sample::<f64, _>(StandardNormal),
        );
        forward(&mut truth, actual, config.delta_t);
    }
    (map, scenario)
}

/// Filter output for one step.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NavigationResult {
    /// 1-based step number
    pub step: usize,
    pub x: f64,
    pub y: f64,
    /// Estimated heading wrapped to [-π, π]
    pub theta: f64,
    /// Weight of the best particle before resampling
    pub best_weight: f64,
    /// Effective sample size before resampling
    pub effective_sample_size: f64,
    /// Euclidean position error against ground truth (m)
    pub position_error: Option<f64>,
    /// Heading error against ground truth wrapped to [-π, π] (rad)
    pub yaw_error: Option<f64>,
    /// Landmark ids associated by the best particle
    pub associations: String,
    pub sense_x: String,
    pub sense_y: String,
}
impl NavigationResult {
    /// Writes results to a CSV file with a header row.
    pub fn to_csv<P: AsRef<Path>>(results: &[Self], path: P) -> io::Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for result in results {
            writer.serialize(result)?;
        }
        writer.flush()?;
        Ok(())
    }
    /// Reads results previously written with [NavigationResult::to_csv].
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Vec<Self>, Box<dyn Error>> {
        let mut rdr = csv::Reader::from_path(path)?;
        let mut results = Vec::new();
        for result in rdr.deserialize() {
            let record: Self = result?;
            results.push(record);
        }
        Ok(results)
    }
}

/// Run the filter over every step of a scenario.
///
/// The filter is initialized around `scenario.initial_pose` with `config.init_std`. Step 0 goes straight to the
/// weight update; every later step first predicts with the previous step's control. After resampling the
/// estimate is extracted and the best particle's associations are attached for diagnostics.
///
/// # Errors
/// Returns an error if the scenario does not cover every step (see [Scenario::validate]).
pub fn run_filter(
    filter: &mut ParticleFilter,
    map: &Map,
    scenario: &Scenario,
    config: &FilterConfig,
) -> Result<Vec<NavigationResult>, Box<dyn Error>> {
    scenario.validate()?;
    let start = scenario.initial_pose;
    filter.init(start.x, start.y, start.theta, config.init_std);
    let mut results = Vec::with_capacity(scenario.len());
    for (i, observations) in scenario.observations.iter().enumerate() {
        if i > 0 {
            let control = scenario.controls[i - 1];
            filter.prediction(
                scenario.delta_t,
                config.process_noise_std,
                control.velocity,
                control.yaw_rate,
            );
        }
        filter.update_weights(config.sensor_range, config.landmark_std, observations, map);
        let effective_sample_size = filter.effective_sample_size();
        let best_weight = filter.best_particle().map_or(0.0, |p| p.weight);
        filter.resample();

        let estimate = filter.get_estimate();
        let (associations, sense_x, sense_y) = match filter.best_index() {
            Some(best) => {
                let (ids, xs, ys) = filter.associate_particle(best, config.sensor_range, observations, map);
                filter.set_associations(best, ids, xs, ys);
                let particle = &filter.particles()[best];
                (particle.get_associations(), particle.get_sense_x(), particle.get_sense_y())
            }
            None => Default::default(),
        };
        let truth = scenario.ground_truth.get(i);
        let result = NavigationResult {
            step: i + 1,
            x: estimate.x,
            y: estimate.y,
            theta: wrap_to_pi(estimate.theta),
            best_weight,
            effective_sample_size,
            position_error: truth.map(|t| t.distance_to(estimate.x, estimate.y)),
            yaw_error: truth.map(|t| wrap_to_pi(estimate.theta - t.theta)),
            associations,
            sense_x,
            sense_y,
        };
        log::debug!(
            "Step {}: estimate ({:.3}, {:.3}, {:.4}), ESS {:.1}, {} observations, position error {:?}",
            result.step,
            result.x,
            result.y,
            result.theta,
            effective_sample_size,
            observations.len(),
            result.position_error
        );
        results.push(result);
    }
    if let Some(summary) = summarize(&results) {
        log::info!("{}", summary);
    } else {
        log::info!("Processed {} steps (no ground truth)", results.len());
    }
    Ok(results)
}

/// Aggregate error statistics over a replay.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ErrorSummary {
    /// Number of steps with ground truth
    pub steps: usize,
    pub mean_position_error: f64,
    pub max_position_error: f64,
    /// Mean absolute heading error (rad)
    pub mean_yaw_error: f64,
    /// Largest absolute heading error (rad)
    pub max_yaw_error: f64,
    pub final_position_error: f64,
}
impl std::fmt::Display for ErrorSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} steps: position error mean {:.3} m / max {:.3} m / final {:.3} m, yaw error mean {:.4} rad / max {:.4} rad",
            self.steps,
            self.mean_position_error,
            self.max_position_error,
            self.final_position_error,
            self.mean_yaw_error,
            self.max_yaw_error
        )
    }
}

/// Summarize the errors of the steps that have ground truth. Returns `None` if no step has any.
pub fn summarize(results: &[NavigationResult]) -> Option<ErrorSummary> {
    let errors: Vec<(f64, f64)> = results
        .iter()
        .filter_map(|r| Some((r.position_error?, r.yaw_error?.abs())))
        .collect();
    let &(final_position_error, _) = errors.last()?;
    let n = errors.len() as f64;
    Some(ErrorSummary {
        steps: errors.len(),
        mean_position_error: errors.iter().map(|e| e.0).sum::<f64>() / n,
        max_position_error: errors.iter().map(|e| e.0).fold(0.0, f64::max),
        mean_yaw_error: errors.iter().map(|e| e.1).sum::<f64>() / n,
        max_yaw_error: errors.iter().map(|e| e.1).fold(0.0, f64::max),
        final_position_error,
    })
}
