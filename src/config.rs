//! Configuration loading for ddmetrics.
//!
//! Settings come from three layers, highest precedence first:
//! 1. command-line flags
//! 2. an optional TOML file (`--config`, or `config.toml` in the user
//!    config directory when it exists)
//! 3. built-in defaults

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};

use crate::driver::{DEFAULT_LOOP_COUNT, DEFAULT_STARTUP_DELAY, DriverConfig, default_trials};
use crate::runner::{DEFAULT_COMMAND_TIMEOUT, DEFAULT_DD_PROGRAM, DdCommand, RunnerConfig, Trial};
use crate::temp_path::FilePolicy;

/// Default config directory name.
const CONFIG_DIR_NAME: &str = "ddmetrics";

/// Default config file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default listen address for the metrics endpoint.
pub const DEFAULT_BIND: &str = ":8080";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config from {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config from {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Contents of the TOML config file. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub bind: Option<String>,
    pub loop_count: Option<u32>,
    pub write_on_dir: Option<PathBuf>,
    pub file_policy: Option<FilePolicy>,
    pub startup_delay_secs: Option<u64>,
    pub command_timeout_secs: Option<u64>,
    pub dd_program: Option<String>,
    pub dd_args: Option<Vec<String>>,
    pub trials: Option<Vec<Trial>>,
}

/// Values supplied on the command line.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub bind: Option<String>,
    pub loop_count: Option<u32>,
    pub write_on_dir: Option<PathBuf>,
    pub file_policy: Option<FilePolicy>,
}

/// Fully resolved settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub bind: String,
    pub loop_count: u32,
    pub write_on_dir: PathBuf,
    pub file_policy: FilePolicy,
    pub startup_delay: Duration,
    pub command_timeout: Duration,
    pub command: DdCommand,
    pub trials: Vec<Trial>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            loop_count: DEFAULT_LOOP_COUNT,
            write_on_dir: std::env::temp_dir(),
            file_policy: FilePolicy::default(),
            startup_delay: DEFAULT_STARTUP_DELAY,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            command: DdCommand::default(),
            trials: default_trials(),
        }
    }
}

impl Settings {
    /// Layer file values and then CLI values over the defaults.
    pub fn resolve(file: FileConfig, cli: CliOverrides) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let command_timeout = match file.command_timeout_secs {
            Some(0) => {
                return Err(ConfigError::Invalid(
                    "command_timeout_secs must be greater than 0".to_string(),
                ));
            }
            Some(secs) => Duration::from_secs(secs),
            None => defaults.command_timeout,
        };

        let trials = file.trials.unwrap_or(defaults.trials);
        if trials.is_empty() {
            return Err(ConfigError::Invalid("trials must not be empty".to_string()));
        }

        let settings = Self {
            bind: cli.bind.or(file.bind).unwrap_or(defaults.bind),
            loop_count: cli
                .loop_count
                .or(file.loop_count)
                .unwrap_or(defaults.loop_count),
            write_on_dir: cli
                .write_on_dir
                .or(file.write_on_dir)
                .unwrap_or(defaults.write_on_dir),
            file_policy: cli
                .file_policy
                .or(file.file_policy)
                .unwrap_or(defaults.file_policy),
            startup_delay: file
                .startup_delay_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.startup_delay),
            command_timeout,
            command: DdCommand {
                program: file.dd_program.unwrap_or_else(|| DEFAULT_DD_PROGRAM.to_string()),
                leading_args: file.dd_args.unwrap_or_default(),
            },
            trials,
        };

        debug!(?settings, "Resolved settings");
        Ok(settings)
    }

    /// Socket address string for the listener. A bare `:port` listens on
    /// all interfaces.
    pub fn listen_addr(&self) -> String {
        normalize_bind(&self.bind)
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig::new(&self.write_on_dir)
            .with_file_policy(self.file_policy)
            .with_command(self.command.clone())
            .with_timeout(self.command_timeout)
    }

    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            startup_delay: self.startup_delay,
            loop_count: self.loop_count,
            trials: self.trials.clone(),
        }
    }
}

/// Turn `:8080` into `0.0.0.0:8080`; anything else is returned as-is.
pub fn normalize_bind(bind: &str) -> String {
    let bind = bind.trim();
    if bind.starts_with(':') {
        format!("0.0.0.0{}", bind)
    } else {
        bind.to_string()
    }
}

/// Get the configuration directory path.
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("com", "ddmetrics", CONFIG_DIR_NAME)
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Load the config file.
///
/// An explicit path must exist. Without one, the default location is used
/// when present and defaults apply otherwise.
pub fn load_file_config(path: Option<&Path>) -> Result<FileConfig, ConfigError> {
    let config_path = match path {
        Some(p) => p.to_path_buf(),
        None => match config_dir().map(|dir| dir.join(CONFIG_FILE_NAME)) {
            Some(p) if p.exists() => p,
            _ => {
                debug!("No config file found, using defaults");
                return Ok(FileConfig::default());
            }
        },
    };

    info!("Loading config from {:?}", config_path);
    let contents = std::fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
        path: config_path.clone(),
        source,
    })?;

    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: config_path,
        source,
    })
}

/// Generate an example config.toml.
pub fn example_config() -> String {
    r#"# ddmetrics configuration
# Place this file at ~/.config/ddmetrics/config.toml or pass --config.

# Address for the /metrics endpoint
bind = ":8080"

# Passes over the trial matrix
loop_count = 10

# Directory on the disk under test
write_on_dir = "/tmp"

# "unique" writes a new file per trial, "reuse" overwrites one file
file_policy = "unique"

# Wait before the first write so the endpoint is up (seconds)
startup_delay_secs = 20

# Kill dd after this many seconds
command_timeout_secs = 120

# Write program and arguments placed before the trial arguments
dd_program = "dd"
dd_args = []

[[trials]]
bs = "1G"
count = "1"

[[trials]]
bs = "64M"
count = "1"

[[trials]]
bs = "1M"
count = "256"

[[trials]]
bs = "8k"
count = "10k"

[[trials]]
bs = "512"
count = "1000"
"#
    .to_string()
}
