//! Sink configuration.
//!
//! Loaded from YAML files and `SQLSINK`-prefixed environment variables.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

use crate::error::{Result, SinkError};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "sqlsink.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "SQLSINK_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "SQLSINK";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "SQLSINK_LOG";

/// Default store file.
pub const DEFAULT_PATH: &str = "sqlsink.sqlite";
/// Default pending-row threshold.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Policy for nested message fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum NestingMode {
    /// Flatten scalar messages into dotted columns, JSON-encode message arrays.
    #[default]
    Off,
    /// Child tables for message arrays only.
    Array,
    /// Child tables for every nested message field.
    All,
}

impl NestingMode {
    pub fn is_enabled(self) -> bool {
        self != NestingMode::Off
    }

    pub fn nests_arrays(self) -> bool {
        self.is_enabled()
    }

    pub fn nests_messages(self) -> bool {
        self == NestingMode::All
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NestingMode::Off => "off",
            NestingMode::Array => "array",
            NestingMode::All => "all",
        }
    }
}

impl FromStr for NestingMode {
    type Err = SinkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "off" | "none" => Ok(NestingMode::Off),
            "array" | "lists" => Ok(NestingMode::Array),
            "all" => Ok(NestingMode::All),
            other => Err(SinkError::Configuration(format!(
                "unknown nesting mode {:?}, expected one of off, array, all",
                other
            ))),
        }
    }
}

impl TryFrom<String> for NestingMode {
    type Error = SinkError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// Store configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Path of the SQLite store file.
    pub path: PathBuf,
    /// Nesting mode for message fields.
    pub nesting: NestingMode,
    /// Pending statements that trigger a commit; 0 means autocommit.
    pub batch_size: usize,
    /// Replace an existing store instead of appending to it.
    pub overwrite: bool,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_PATH),
            nesting: NestingMode::Off,
            batch_size: DEFAULT_BATCH_SIZE,
            overwrite: false,
        }
    }
}

impl SinkConfig {
    /// Configuration for a store at `path` with defaults otherwise.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    pub fn with_nesting(mut self, nesting: NestingMode) -> Self {
        self.nesting = nesting;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Load configuration from files and environment.
    ///
    /// Later sources override earlier ones: `sqlsink.yaml` in the working
    /// directory, the file given as `path`, the file named by
    /// `SQLSINK_CONFIG`, then `SQLSINK__*` environment variables.
    pub fn load(path: Option<&str>) -> Result<Self> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| SinkError::Configuration(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| SinkError::Configuration(e.to_string()))
    }
}
