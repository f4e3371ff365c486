//! Configuration types for the worker pool and task queue.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::thread;

/// Complete engine configuration.
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker pool configuration
    pub pool: PoolConfig,
    /// Task queue configuration
    pub queue: QueueConfig,
}

/// Worker pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of worker threads
    pub workers: usize,
    /// Prefix for worker thread names (`{prefix}-{index}`)
    pub thread_name_prefix: String,
    /// Stack size in bytes for worker threads (platform default when unset)
    pub stack_size: Option<usize>,
    /// Create one journal per worker during initialization
    pub preallocate_journals: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: thread::available_parallelism().map_or(1, NonZeroUsize::get),
            thread_name_prefix: "weft-worker".to_owned(),
            stack_size: None,
            preallocate_journals: true,
        }
    }
}

/// Task queue configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Tracking-list capacity reserved up front
    pub initial_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 64,
        }
    }
}

impl EngineConfig {
    /// Environment variable overriding the worker count.
    pub const ENV_WORKERS: &'static str = "WEFT_WORKERS";
    /// Environment variable overriding the worker thread name prefix.
    pub const ENV_THREAD_PREFIX: &'static str = "WEFT_THREAD_PREFIX";

    /// Configuration with the given worker count and defaults elsewhere.
    #[must_use]
    pub fn with_workers(workers: usize) -> Self {
        let mut config = Self::default();
        config.pool.workers = workers;
        config
    }

    /// Get the default config directory path (`~/.weft`)
    ///
    /// # Errors
    /// Returns an error if the home directory cannot be determined
    pub fn config_dir() -> Result<PathBuf> {
        use dirs::home_dir;
        let home = home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_owned()))?;
        Ok(home.join(".weft"))
    }

    /// Get the default config file path (`~/.weft/engine.toml`)
    ///
    /// # Errors
    /// Returns an error if the home directory cannot be determined
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("engine.toml"))
    }

    /// Load config from the default location, creating it with defaults if missing.
    /// Environment overrides are applied afterwards.
    ///
    /// # Errors
    /// Returns an error if the config cannot be read, parsed, or created
    pub fn load_or_create() -> Result<Self> {
        let config_path = Self::config_path()?;

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            let config = Self::default();
            config.save_to_file(&config_path)?;
            config
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load config from a specific file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed
    pub fn load_from_file(path: &Path) -> Result<Self> {
        use toml::from_str;
        let contents = fs::read_to_string(path)?;
        from_str(&contents)
            .map_err(|error| EngineError::Config(format!("Failed to parse config: {error}")))
    }

    /// Save config to a specific file
    ///
    /// # Errors
    /// Returns an error if the file cannot be written
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        use toml::to_string_pretty;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = to_string_pretty(self)
            .map_err(|error| EngineError::Config(format!("Failed to serialize config: {error}")))?;

        let header = "# Weft engine configuration\n\
                      # Generated with default values; edit to tune the worker pool\n\n";

        fs::write(path, format!("{header}{contents}"))?;
        Ok(())
    }

    /// Apply `WEFT_WORKERS` / `WEFT_THREAD_PREFIX` when set.
    ///
    /// # Errors
    /// Returns an error if `WEFT_WORKERS` is not a positive integer
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(
            env::var(Self::ENV_WORKERS).ok().as_deref(),
            env::var(Self::ENV_THREAD_PREFIX).ok().as_deref(),
        )
    }

    fn apply_overrides(&mut self, workers: Option<&str>, prefix: Option<&str>) -> Result<()> {
        if let Some(raw) = workers {
            self.pool.workers = raw.trim().parse().map_err(|error| {
                EngineError::Config(format!("Invalid {}={raw}: {error}", Self::ENV_WORKERS))
            })?;
        }
        if let Some(prefix) = prefix
            && !prefix.is_empty()
        {
            prefix.clone_into(&mut self.pool.thread_name_prefix);
        }
        self.validate()
    }

    /// Check settings that would make the pool unusable.
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidWorkerCount`] for zero workers
    pub fn validate(&self) -> Result<()> {
        if self.pool.workers == 0 {
            return Err(EngineError::InvalidWorkerCount);
        }
        if self.pool.stack_size == Some(0) {
            return Err(EngineError::Config("stack_size must be positive".to_owned()));
        }
        Ok(())
    }
}
