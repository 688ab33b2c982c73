//! Shared helpers for the command line tool: logger initialization and input/output path handling.

use std::error::Error;
use std::path::{Path, PathBuf};

use localizer::sim::{CONTROL_FILE, GROUND_TRUTH_FILE, OBSERVATION_DIR, map_path};

/// Initialize the logger with the specified configuration.
///
/// # Arguments
/// * `log_level` - Log level string (off, error, warn, info, debug, trace)
/// * `log_file` - Optional path to log file (logs to stderr if None)
///
/// # Errors
/// Returns an error if the log file cannot be opened or logger initialization fails.
pub fn init_logger(log_level: &str, log_file: Option<&PathBuf>) -> Result<(), Box<dyn Error>> {
    use std::io::Write;

    let level = log_level.parse::<log::LevelFilter>().unwrap_or_else(|_| {
        eprintln!("Invalid log level '{}', defaulting to 'info'", log_level);
        log::LevelFilter::Info
    });

    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} [{}] {} - {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.target(),
            record.args()
        )
    });

    if let Some(log_path) = log_file {
        ensure_parent_dir(log_path)?;
        let target = Box::new(
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_path)?,
        );
        builder.target(env_logger::Target::Pipe(target));
    }

    builder.try_init()?;
    Ok(())
}

/// Create the parent directory of a file path if it does not exist yet.
pub fn ensure_parent_dir(path: &Path) -> Result<(), Box<dyn Error>> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Validate that an input file exists.
pub fn validate_input_file(input: &Path) -> Result<(), Box<dyn Error>> {
    if !input.is_file() {
        return Err(format!("Input file '{}' does not exist.", input.display()).into());
    }
    Ok(())
}

/// Validate that an input directory exists.
pub fn validate_input_dir(input: &Path) -> Result<(), Box<dyn Error>> {
    if !input.is_dir() {
        return Err(format!("Input directory '{}' does not exist.", input.display()).into());
    }
    Ok(())
}

/// Locations of the files making up one recorded data set.
#[derive(Clone, Debug, PartialEq)]
pub struct DataSetPaths {
    pub map: PathBuf,
    pub control: PathBuf,
    pub observations: PathBuf,
    pub ground_truth: Option<PathBuf>,
}
impl DataSetPaths {
    /// Standard layout inside a data set directory. Ground truth is only used when the file exists.
    pub fn from_dir(dir: &Path) -> Self {
        let ground_truth = dir.join(GROUND_TRUTH_FILE);
        DataSetPaths {
            map: map_path(dir),
            control: dir.join(CONTROL_FILE),
            observations: dir.join(OBSERVATION_DIR),
            ground_truth: ground_truth.is_file().then_some(ground_truth),
        }
    }
    /// Check that every referenced file or directory exists.
    pub fn validate(&self) -> Result<(), Box<dyn Error>> {
        validate_input_file(&self.map)?;
        validate_input_file(&self.control)?;
        validate_input_dir(&self.observations)?;
        if let Some(ground_truth) = &self.ground_truth {
            validate_input_file(ground_truth)?;
        }
        Ok(())
    }
}
