//! LOCALIZER SIM: replay and simulation tool for the landmark particle filter.
//!
//! The tool can operate in three modes:
//!
//! - Run: replays a recorded data set (landmark map, per-step controls, per-step observation files, and
//!   optional ground truth) through the particle filter.
//! - Simulate: generates a synthetic scenario from a seeded vehicle and sensor model, runs the filter on it,
//!   and optionally saves the generated data set for later replay.
//! - Template: writes a default configuration file to edit.
//!
//! Filter and scenario parameters come from a configuration file (TOML/JSON/YAML) passed with `--config`;
//! command line flags override individual values. Each run writes one CSV row per step with the pose estimate,
//! the error against ground truth when available, and the best particle's landmark associations.

mod common;

use clap::{Args, Parser, Subcommand};
use common::{DataSetPaths, ensure_parent_dir, init_logger};
use log::{error, info, warn};
use std::error::Error;
use std::path::{Path, PathBuf};

use localizer::Pose;
use localizer::config::{FilterConfig, SimulationConfig};
use localizer::map::Map;
use localizer::particle::{ParticleAveragingStrategy, ParticleFilter, ParticleResamplingStrategy};
use localizer::sim::{NavigationResult, Scenario, map_path, run_filter, simulate_scenario, summarize};

const LONG_ABOUT: &str = "LOCALIZER SIM: replay and simulation tool for the landmark particle filter.

The filter tracks a vehicle's planar pose (x, y, heading) by moving a population of particles with a
constant turn rate motion model and weighting them by how well the vehicle-frame landmark observations
line up with a known landmark map.

- run: replay a recorded data set (map, controls, observation files, optional ground truth)
- simulate: generate a synthetic scenario from a seeded model and run the filter on it
- template: write a default configuration file

Parameters are read from --config (TOML/JSON/YAML) when given; command line flags take precedence.";

/// Command line arguments
#[derive(Parser)]
#[command(author, version, about = "Replay and simulation tool for the landmark particle filter.", long_about = LONG_ABOUT)]
struct Cli {
    /// Configuration file (TOML/JSON/YAML) with filter, scenario and logging settings
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,

    /// Log level (off, error, warn, info, debug, trace); overrides the configuration file
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log file path (if not specified, logs to stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

/// Top-level commands
#[derive(Subcommand, Clone, Debug)]
enum Command {
    #[command(
        about = "Replay a recorded data set through the filter",
        long_about = "Replay a recorded data set through the particle filter. Inputs can be given as a data set directory (map_data.txt, control_data.txt, gt_data.txt, observation/) or as individual files. The filter is initialized from --initial-pose, or from the first ground-truth pose when no initial pose is given."
    )]
    Run(RunArgs),
    #[command(
        about = "Generate a synthetic scenario and run the filter on it",
        long_about = "Generate a synthetic scenario (landmark grid or configured landmarks, constant commands with actuation noise, noisy vehicle-frame observations) and run the particle filter on it. The generated data set can be saved with --save-data for later replay with the run command."
    )]
    Simulate(SimulateArgs),
    #[command(about = "Write a default configuration file")]
    Template(TemplateArgs),
}

/// Overrides for the filter section of the configuration
#[derive(Args, Clone, Debug, Default)]
struct FilterArgs {
    /// Number of particles
    #[arg(long)]
    particles: Option<usize>,

    /// Seed for the filter's random number generator
    #[arg(long)]
    filter_seed: Option<u64>,

    /// Maximum sensor range (m)
    #[arg(long)]
    sensor_range: Option<f64>,

    /// Resampling scheme
    #[arg(long, value_enum)]
    resampling: Option<ParticleResamplingStrategy>,

    /// How the reported pose estimate is formed from the particles
    #[arg(long, value_enum)]
    averaging: Option<ParticleAveragingStrategy>,
}
impl FilterArgs {
    fn apply(&self, config: &mut FilterConfig) {
        if let Some(particles) = self.particles {
            config.num_particles = particles;
        }
        if let Some(seed) = self.filter_seed {
            config.seed = Some(seed);
        }
        if let Some(range) = self.sensor_range {
            config.sensor_range = range;
        }
        if let Some(resampling) = self.resampling {
            config.resampling_strategy = resampling;
        }
        if let Some(averaging) = self.averaging {
            config.averaging_strategy = averaging;
        }
    }
}

#[derive(Args, Clone, Debug)]
struct RunArgs {
    /// Data set directory with the standard file layout
    #[arg(short, long)]
    data: Option<PathBuf>,

    /// Landmark map file (x y id per line, or CSV with an id,x,y header)
    #[arg(long, required_unless_present = "data", conflicts_with = "data")]
    map: Option<PathBuf>,

    /// Control file (velocity yaw_rate per line)
    #[arg(long, required_unless_present = "data", conflicts_with = "data")]
    control: Option<PathBuf>,

    /// Directory with observations_NNNNNN.txt files
    #[arg(long, required_unless_present = "data", conflicts_with = "data")]
    observations: Option<PathBuf>,

    /// Ground truth file (x y theta per line)
    #[arg(long, conflicts_with = "data")]
    ground_truth: Option<PathBuf>,

    /// Initial pose estimate: x y theta
    #[arg(long, num_args = 3, value_names = ["X", "Y", "THETA"], allow_negative_numbers = true)]
    initial_pose: Option<Vec<f64>>,

    /// Output CSV file
    #[arg(short, long)]
    output: PathBuf,

    #[command(flatten)]
    filter: FilterArgs,
}
impl RunArgs {
    fn data_set_paths(&self) -> Result<DataSetPaths, Box<dyn Error>> {
        let paths = match &self.data {
            Some(dir) => DataSetPaths::from_dir(dir),
            None => DataSetPaths {
                map: self.map.clone().ok_or("--map is required")?,
                control: self.control.clone().ok_or("--control is required")?,
                observations: self.observations.clone().ok_or("--observations is required")?,
                ground_truth: self.ground_truth.clone(),
            },
        };
        paths.validate()?;
        Ok(paths)
    }
}

#[derive(Args, Clone, Debug)]
struct SimulateArgs {
    /// Output CSV file
    #[arg(short, long)]
    output: PathBuf,

    /// Number of time steps to generate
    #[arg(long)]
    steps: Option<usize>,

    /// Seed for the scenario generator
    #[arg(long)]
    seed: Option<u64>,

    /// Also write the generated data set (map, controls, ground truth, observations) to this directory
    #[arg(long)]
    save_data: Option<PathBuf>,

    #[command(flatten)]
    filter: FilterArgs,
}

#[derive(Args, Clone, Debug)]
struct TemplateArgs {
    /// Output configuration file (.toml, .json, .yaml)
    #[arg(short, long, default_value = "localizer.toml")]
    output: PathBuf,
}

fn write_results(results: &[NavigationResult], output: &Path) -> Result<(), Box<dyn Error>> {
    ensure_parent_dir(output)?;
    NavigationResult::to_csv(results, output)?;
    info!("Wrote {} results to {}", results.len(), output.display());
    if let Some(summary) = summarize(results) {
        println!("{}", summary);
    }
    Ok(())
}

fn run_replay(args: &RunArgs, mut config: SimulationConfig) -> Result<(), Box<dyn Error>> {
    args.filter.apply(&mut config.filter);
    let paths = args.data_set_paths()?;
    let initial_pose = args
        .initial_pose
        .as_deref()
        .map(|values| Pose::new(values[0], values[1], values[2]));

    let map = Map::load(&paths.map)?;
    info!("Loaded {} landmarks from {}", map.len(), paths.map.display());
    let scenario = Scenario::from_files(
        &paths.control,
        &paths.observations,
        paths.ground_truth.as_deref(),
        config.filter.delta_t,
        initial_pose,
    )?;
    info!(
        "Loaded {} steps from {} (ground truth: {})",
        scenario.len(),
        paths.observations.display(),
        if scenario.ground_truth.is_empty() { "no" } else { "yes" }
    );
    if map.is_empty() {
        warn!("Map has no landmarks; every particle will score against the origin");
    }

    let mut filter = ParticleFilter::from_config(&config.filter);
    info!(
        "Running {} particles with {:?} resampling",
        config.filter.num_particles, config.filter.resampling_strategy
    );
    let results = run_filter(&mut filter, &map, &scenario, &config.filter)?;
    write_results(&results, &args.output)
}

fn run_simulation(args: &SimulateArgs, mut config: SimulationConfig) -> Result<(), Box<dyn Error>> {
    args.filter.apply(&mut config.filter);
    if let Some(steps) = args.steps {
        config.scenario.steps = steps;
    }
    if let Some(seed) = args.seed {
        config.scenario.seed = seed;
    }

    let (map, scenario) = simulate_scenario(&config.scenario);
    info!(
        "Generated {} steps over {} landmarks (seed {})",
        scenario.len(),
        map.len(),
        config.scenario.seed
    );
    if let Some(dir) = &args.save_data {
        scenario.save(dir)?;
        map.to_file(map_path(dir))?;
        info!("Saved generated data set to {}", dir.display());
    }

    let mut filter = ParticleFilter::from_config(&config.filter);
    let results = run_filter(&mut filter, &map, &scenario, &config.filter)?;
    write_results(&results, &args.output)
}

fn write_template(args: &TemplateArgs) -> Result<(), Box<dyn Error>> {
    ensure_parent_dir(&args.output)?;
    SimulationConfig::default().to_file(&args.output)?;
    println!("Wrote default configuration to {}", args.output.display());
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => SimulationConfig::from_file(path)
            .map_err(|e| format!("Failed to read configuration '{}': {}", path.display(), e))?,
        None => SimulationConfig::default(),
    };

    // CLI flags take precedence over the configuration file
    let log_level = cli.log_level.as_deref().unwrap_or(config.logging.level.as_str());
    let config_log_file = config.logging.file.as_ref().map(PathBuf::from);
    let log_file = cli.log_file.as_ref().or(config_log_file.as_ref());
    init_logger(log_level, log_file)?;

    let result = match &cli.command {
        Command::Run(args) => run_replay(args, config),
        Command::Simulate(args) => run_simulation(args, config),
        Command::Template(args) => write_template(args),
    };
    if let Err(e) = &result {
        error!("{}", e);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use tempfile::tempdir;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_with_data_dir() {
        let cli = Cli::try_parse_from([
            "localizer-sim",
            "--log-level",
            "debug",
            "run",
            "--data",
            "data",
            "--output",
            "out.csv",
            "--resampling",
            "systematic",
            "--initial-pose",
            "6.3",
            "1.9",
            "-0.5",
        ])
        .unwrap();
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.data, Some(PathBuf::from("data")));
                assert_eq!(args.initial_pose, Some(vec![6.3, 1.9, -0.5]));
                assert_eq!(args.filter.resampling, Some(ParticleResamplingStrategy::Systematic));
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_run_requires_inputs() {
        assert!(Cli::try_parse_from(["localizer-sim", "run", "--output", "out.csv"]).is_err());
        assert!(
            Cli::try_parse_from([
                "localizer-sim",
                "run",
                "--data",
                "d",
                "--map",
                "m.txt",
                "--output",
                "out.csv"
            ])
            .is_err()
        );
    }

    #[test]
    fn test_filter_overrides() {
        let args = FilterArgs {
            particles: Some(500),
            filter_seed: Some(9),
            averaging: Some(ParticleAveragingStrategy::WeightedAverage),
            ..Default::default()
        };
        let mut config = FilterConfig::default();
        args.apply(&mut config);
        assert_eq!(config.num_particles, 500);
        assert_eq!(config.seed, Some(9));
        assert_eq!(config.averaging_strategy, ParticleAveragingStrategy::WeightedAverage);
        assert_eq!(config.sensor_range, FilterConfig::default().sensor_range);
        assert_eq!(config.resampling_strategy, ParticleResamplingStrategy::default());
    }

    #[test]
    fn test_simulate_then_replay() {
        let dir = tempdir().unwrap();
        let data = dir.path().join("data");
        let simulated = dir.path().join("out").join("simulated.csv");
        let replayed = dir.path().join("replayed.csv");
        let mut config = SimulationConfig::default();
        config.filter.seed = Some(5);

        let args = SimulateArgs {
            output: simulated.clone(),
            steps: Some(15),
            seed: None,
            save_data: Some(data.clone()),
            filter: FilterArgs::default(),
        };
        run_simulation(&args, config.clone()).unwrap();
        assert_eq!(NavigationResult::from_csv(&simulated).unwrap().len(), 15);

        let args = RunArgs {
            data: Some(data),
            map: None,
            control: None,
            observations: None,
            ground_truth: None,
            initial_pose: None,
            output: replayed.clone(),
            filter: FilterArgs::default(),
        };
        run_replay(&args, config).unwrap();
        let results = NavigationResult::from_csv(&replayed).unwrap();
        assert_eq!(results.len(), 15);
        assert!(results.iter().all(|r| r.position_error.is_some()));
    }

    #[test]
    fn test_write_template() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("localizer.yaml");
        write_template(&TemplateArgs {
            output: output.clone(),
        })
        .unwrap();
        assert_eq!(SimulationConfig::from_file(&output).unwrap(), SimulationConfig::default());
    }
}
