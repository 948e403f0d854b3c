//! Database configuration.
//!
//! Configuration is either built in code or loaded from environment
//! variables.
//!
//! # Environment Variables
//!
//! - `OBJECTDB_DATABASE_DIRECTORY`: Directory holding the collection files (default: `./data`)
//! - `OBJECTDB_BLOCK_SIZE`: Block size for newly created files (default: `8192`)
//! - `OBJECTDB_BLOB_THRESHOLD`: Encoded field size above which a value moves to the BLOB file
//!   (default: `256`)
//!
//! # Invariants
//!
//! - `block_size` is a power of two between 1024 and 65536
//! - `blob_threshold` is at least 16 and fits inline in a leaf of `block_size`

use std::path::PathBuf;

use crate::storage::{DEFAULT_BLOCK_SIZE, is_valid_block_size, max_record_size};

const ENV_DATABASE_DIRECTORY: &str = "OBJECTDB_DATABASE_DIRECTORY";
const ENV_BLOCK_SIZE: &str = "OBJECTDB_BLOCK_SIZE";
const ENV_BLOB_THRESHOLD: &str = "OBJECTDB_BLOB_THRESHOLD";

/// Database configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// Directory where collection files are stored.
    /// Ignored when `in_memory` is set.
    pub directory: PathBuf,
    /// Block size used when a file is created. Existing files keep the
    /// size recorded in their header.
    pub block_size: usize,
    /// Encoded field size above which a value is stored as a BLOB.
    pub blob_threshold: usize,
    /// Keep every file in memory instead of on disk.
    pub in_memory: bool,
}

/// Error returned when loading or validating configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable is missing.
    MissingEnvVar(String),
    /// A setting has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingEnvVar(name) => {
                write!(f, "missing required environment variable: {name}")
            }
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(Self::DEFAULT_DATABASE_DIRECTORY),
            block_size: DEFAULT_BLOCK_SIZE,
            blob_threshold: Self::DEFAULT_BLOB_THRESHOLD,
            in_memory: false,
        }
    }
}

impl DatabaseConfig {
    /// Default database directory.
    pub const DEFAULT_DATABASE_DIRECTORY: &'static str = "./data";
    /// Default BLOB threshold in bytes.
    pub const DEFAULT_BLOB_THRESHOLD: usize = 256;
    /// Smallest accepted BLOB threshold.
    pub const MIN_BLOB_THRESHOLD: usize = 16;

    /// Configuration for a database stored in `directory`.
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Self::default()
        }
    }

    /// Configuration for a database that lives only in memory.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            in_memory: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    #[must_use]
    pub const fn with_blob_threshold(mut self, blob_threshold: usize) -> Self {
        self.blob_threshold = blob_threshold;
        self
    }

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an unparsable value or the
    /// resulting configuration is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through a variable lookup function.
    ///
    /// # Errors
    ///
    /// Same as [`from_env`](Self::from_env).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let directory = lookup(ENV_DATABASE_DIRECTORY)
            .map_or_else(|| PathBuf::from(Self::DEFAULT_DATABASE_DIRECTORY), PathBuf::from);
        let block_size = load_usize(&lookup, ENV_BLOCK_SIZE, DEFAULT_BLOCK_SIZE)?;
        let blob_threshold =
            load_usize(&lookup, ENV_BLOB_THRESHOLD, Self::DEFAULT_BLOB_THRESHOLD)?;

        let config = Self {
            directory,
            block_size,
            blob_threshold,
            in_memory: false,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants listed in the module documentation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] naming the offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_block_size(self.block_size) {
            return Err(ConfigError::InvalidValue {
                name: ENV_BLOCK_SIZE.to_string(),
                message: format!(
                    "{} is not a power of two between 1024 and 65536",
                    self.block_size
                ),
            });
        }
        let max = max_record_size(self.block_size);
        if self.blob_threshold < Self::MIN_BLOB_THRESHOLD || self.blob_threshold > max {
            return Err(ConfigError::InvalidValue {
                name: ENV_BLOB_THRESHOLD.to_string(),
                message: format!(
                    "{} is outside {}..={max} for block size {}",
                    self.blob_threshold,
                    Self::MIN_BLOB_THRESHOLD,
                    self.block_size
                ),
            });
        }
        Ok(())
    }
}

fn load_usize(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: usize,
) -> Result<usize, ConfigError> {
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse::<usize>()
            .map_err(|_| ConfigError::InvalidValue {
                name: name.to_string(),
                message: format!("'{value}' is not a valid size"),
            }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_default_values() {
        let config = DatabaseConfig::from_lookup(lookup(&[])).expect("defaults are valid");
        assert_eq!(config.directory, PathBuf::from("./data"));
        assert_eq!(config.block_size, 8192);
        assert_eq!(config.blob_threshold, 256);
        assert!(!config.in_memory);
    }

    #[test]
    fn test_values_from_lookup() {
        let config = DatabaseConfig::from_lookup(lookup(&[
            ("OBJECTDB_DATABASE_DIRECTORY", "/var/lib/objects"),
            ("OBJECTDB_BLOCK_SIZE", "4096"),
            ("OBJECTDB_BLOB_THRESHOLD", " 100 "),
        ]))
        .expect("valid config");
        assert_eq!(config.directory, PathBuf::from("/var/lib/objects"));
        assert_eq!(config.block_size, 4096);
        assert_eq!(config.blob_threshold, 100);
    }

    #[test]
    fn test_invalid_block_size() {
        for value in ["abc", "1000", "512", "131072"] {
            let err = DatabaseConfig::from_lookup(lookup(&[("OBJECTDB_BLOCK_SIZE", value)]))
                .expect_err("invalid block size");
            assert!(
                matches!(&err, ConfigError::InvalidValue { name, .. } if name == "OBJECTDB_BLOCK_SIZE"),
                "{value}: {err}"
            );
        }
    }

    #[test]
    fn test_blob_threshold_bounds() {
        let too_small = DatabaseConfig::in_memory().with_blob_threshold(8);
        assert!(too_small.validate().is_err());

        let too_large = DatabaseConfig::in_memory()
            .with_block_size(1024)
            .with_blob_threshold(1024);
        assert!(too_large.validate().is_err());

        let max = max_record_size(1024);
        let fits = DatabaseConfig::in_memory()
            .with_block_size(1024)
            .with_blob_threshold(max);
        assert!(fits.validate().is_ok());
    }

    #[test]
    fn test_config_error_display() {
        let error = ConfigError::MissingEnvVar("TEST_VAR".to_string());
        assert_eq!(
            error.to_string(),
            "missing required environment variable: TEST_VAR"
        );
        let error = ConfigError::InvalidValue {
            name: "TEST_VAR".to_string(),
            message: "bad value".to_string(),
        };
        assert_eq!(error.to_string(), "invalid value for TEST_VAR: bad value");
    }
}
