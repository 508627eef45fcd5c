//! Configuration for the CognitiveSense service.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable overriding [`Config::model_path`].
pub const ENV_MODEL: &str = "COGNITIVESENSE_MODEL";
/// Environment variable overriding [`Config::metadata_path`].
pub const ENV_METADATA: &str = "COGNITIVESENSE_METADATA";
/// Environment variable overriding [`Config::eye_source`].
pub const ENV_EYE_SOURCE: &str = "COGNITIVESENSE_EYE_SOURCE";
/// Environment variable overriding [`Config::port`].
pub const ENV_PORT: &str = "COGNITIVESENSE_PORT";

/// Main configuration for the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Duration of each sampling window
    #[serde(with = "secs_serde")]
    pub window_duration: Duration,

    /// Pause after each broadcast before the next window starts
    #[serde(with = "secs_serde")]
    pub cycle_pause: Duration,

    /// Number of predictions kept in the rolling history
    pub history_capacity: usize,

    /// Eye sampler tick
    #[serde(with = "millis_serde")]
    pub eye_sample_interval: Duration,

    pub bind_address: String,
    pub port: u16,

    /// Model artifact
    pub model_path: PathBuf,

    /// Optional side-car metadata for the model artifact
    pub metadata_path: Option<PathBuf>,

    /// Line-oriented EAR/landmark stream; none runs the eye collector degraded
    pub eye_source: Option<PathBuf>,

    /// Origins allowed by the CORS layer
    pub allowed_origins: Vec<String>,

    /// Queued messages per streaming subscriber before it is dropped
    pub subscriber_buffer: usize,

    /// Path for collected datasets
    pub data_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cognitivesense");

        Self {
            window_duration: Duration::from_secs(3),
            cycle_pause: Duration::from_secs(3),
            history_capacity: 60,
            eye_sample_interval: Duration::from_millis(30),
            bind_address: "127.0.0.1".to_string(),
            port: 8000,
            model_path: PathBuf::from("models").join("rf_baseline.json"),
            metadata_path: None,
            eye_source: None,
            allowed_origins: vec!["http://localhost:5173".to_string()],
            subscriber_buffer: 16,
            data_path: data_dir,
        }
    }
}

impl Config {
    /// Load configuration from the default location, then apply
    /// environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::config_path())?;
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Load configuration from `path`; a missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Apply overrides from the environment. `lookup` returns the value of
    /// a variable, if set.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(model) = lookup(ENV_MODEL) {
            self.model_path = PathBuf::from(model);
        }
        if let Some(metadata) = lookup(ENV_METADATA) {
            self.metadata_path = Some(PathBuf::from(metadata));
        }
        if let Some(source) = lookup(ENV_EYE_SOURCE) {
            self.eye_source = Some(PathBuf::from(source));
        }
        if let Some(port) = lookup(ENV_PORT) {
            self.port = port.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                name: ENV_PORT,
                value: port.clone(),
            })?;
        }
        Ok(())
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io_error = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(io_error)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cognitivesense")
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path).map_err(|source| ConfigError::Io {
            path: self.data_path.clone(),
            source,
        })
    }

    /// Default location for a collected dataset.
    pub fn dataset_path(&self) -> PathBuf {
        self.data_path.join("behavior_dataset.jsonl")
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid value for {name}: {value:?}")]
    InvalidEnv { name: &'static str, value: String },
}

/// Serde support for Duration as fractional seconds.
mod secs_serde {
    use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(de::Error::custom)
    }
}

/// Serde support for Duration as whole milliseconds.
mod millis_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
