//! Filter and simulation configuration.
//!
//! All configuration structs are serde-serializable and every field has a default, so a configuration file only
//! needs to list the values it changes. [SimulationConfig] can be read from and written to JSON, YAML, or TOML,
//! choosing the format by file extension.
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use crate::Pose;
use crate::map::Landmark;
use crate::particle::{ParticleAveragingStrategy, ParticleResamplingStrategy};

/// Particle filter tuning parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Fixed population size
    pub num_particles: usize,
    /// Seed for the filter's random number generator; `None` seeds from the operating system
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Time between steps (s)
    pub delta_t: f64,
    /// Maximum sensor range (m)
    pub sensor_range: f64,
    /// Standard deviations of the initial pose estimate [x (m), y (m), theta (rad)]
    pub init_std: [f64; 3],
    /// Process noise standard deviations applied each prediction [x (m), y (m), theta (rad)]
    pub process_noise_std: [f64; 3],
    /// Landmark observation standard deviations [x (m), y (m)]
    pub landmark_std: [f64; 2],
    pub resampling_strategy: ParticleResamplingStrategy,
    pub averaging_strategy: ParticleAveragingStrategy,
}
impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            num_particles: 100,
            seed: None,
            delta_t: 0.1,
            sensor_range: 50.0,
            init_std: [0.3, 0.3, 0.01],
            process_noise_std: [0.3, 0.3, 0.01],
            landmark_std: [0.3, 0.3],
            resampling_strategy: ParticleResamplingStrategy::default(),
            averaging_strategy: ParticleAveragingStrategy::default(),
        }
    }
}

/// Parameters of the synthetic scenario generator (see [crate::sim::simulate_scenario]).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    /// Number of time steps to generate
    pub steps: usize,
    /// Time between steps (s)
    pub delta_t: f64,
    /// Commanded forward velocity (m/s)
    pub velocity: f64,
    /// Commanded yaw rate (rad/s)
    pub yaw_rate: f64,
    /// Noise on the reported control [velocity (m/s), yaw rate (rad/s)]
    pub control_noise_std: [f64; 2],
    /// Noise on the GPS-like initial pose [x (m), y (m), theta (rad)]
    pub gps_std: [f64; 3],
    /// Noise on each observation in the vehicle frame [x (m), y (m)]
    pub observation_noise_std: [f64; 2],
    /// Maximum range at which landmarks are observed (m)
    pub sensor_range: f64,
    /// Half-width of the generated landmark grid (m); only used when `landmarks` is empty
    pub extent: f64,
    /// Spacing of the generated landmark grid (m); only used when `landmarks` is empty
    pub landmark_spacing: f64,
    pub seed: u64,
    /// True starting pose
    pub initial_pose: Pose,
    /// Explicit landmark list; a grid is generated when empty
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub landmarks: Vec<Landmark>,
}
impl Default for ScenarioConfig {
    fn default() -> Self {
        ScenarioConfig {
            steps: 500,
            delta_t: 0.1,
            velocity: 5.0,
            yaw_rate: 0.05,
            control_noise_std: [0.05, 0.002],
            gps_std: [0.3, 0.3, 0.01],
            observation_noise_std: [0.3, 0.3],
            sensor_range: 50.0,
            extent: 150.0,
            landmark_spacing: 25.0,
            seed: 42,
            initial_pose: Pose::new(0.0, -100.0, 0.0),
            landmarks: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (off, error, warn, info, debug, trace)
    pub level: String,
    /// Optional log file; logs go to stderr when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}
impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Top-level configuration for a localization run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub filter: FilterConfig,
    pub scenario: ScenarioConfig,
    pub logging: LoggingConfig,
}
impl SimulationConfig {
    /// Write the configuration to a JSON file (pretty-printed).
    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self).map_err(io::Error::other)
    }
    /// Read the configuration from a JSON file.
    pub fn from_json<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_json::from_reader(file).map_err(io::Error::other)
    }
    /// Write the configuration as YAML.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = serde_yaml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }
    /// Read the configuration from YAML.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_yaml::from_reader(file).map_err(io::Error::other)
    }
    /// Write the configuration as TOML.
    pub fn to_toml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = toml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }
    /// Read the configuration from TOML.
    pub fn from_toml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let mut s = String::new();
        let mut file = File::open(path)?;
        file.read_to_string(&mut s)?;
        toml::from_str(&s).map_err(io::Error::other)
    }
    /// Generic write: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let p = path.as_ref();
        let ext = p
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_lowercase());
        match ext.as_deref() {
            Some("json") => self.to_json(p),
            Some("yaml") | Some("yml") => self.to_yaml(p),
            Some("toml") => self.to_toml(p),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unsupported file extension",
            )),
        }
    }
    /// Generic read: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let p = path.as_ref();
        let ext = p
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_lowercase());
        match ext.as_deref() {
            Some("json") => Self::from_json(p),
            Some("yaml") | Some("yml") => Self::from_yaml(p),
            Some("toml") => Self::from_toml(p),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unsupported file extension",
            )),
        }
    }
}
