// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Runtime configuration.
//!
//! Every section has a default, so a config file only needs to name the
//! fields it changes:
//!
//! ```rust
//! use khora_threads::RuntimeConfig;
//!
//! let config = RuntimeConfig::from_ron_str("(scheduler: (worker_count: 2, seed: Some(7)))").unwrap();
//! assert_eq!(config.scheduler.worker_count, 2);
//! assert_eq!(config.bus.name, "khora-message-bus");
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration for a single [`Worker`](crate::Worker).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Name given to the worker's OS thread.
    pub name: String,
    /// Stack size of the worker thread in bytes. `None` uses the platform default.
    pub stack_size: Option<usize>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "khora-worker".to_string(),
            stack_size: None,
        }
    }
}

impl WorkerConfig {
    /// Creates a config with the given thread name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Configuration for a [`Scheduler`](crate::Scheduler) and the workers it spawns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Name given to the scheduler's OS thread.
    pub name: String,
    /// Number of workers the scheduler spawns on start-up.
    /// More can be attached later with [`Scheduler::add_worker`](crate::Scheduler::add_worker).
    pub worker_count: usize,
    /// Seed for worker selection. `None` seeds from the OS.
    pub seed: Option<u64>,
    /// Template for spawned workers; the worker index is appended to the name.
    pub worker: WorkerConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            name: "khora-scheduler".to_string(),
            worker_count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            seed: None,
            worker: WorkerConfig::default(),
        }
    }
}

/// Configuration for an [`AsyncMessageBus`](crate::AsyncMessageBus).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AsyncBusConfig {
    /// Name given to the bus thread.
    pub name: String,
}

impl Default for AsyncBusConfig {
    fn default() -> Self {
        Self {
            name: "khora-message-bus".to_string(),
        }
    }
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Scheduler section, including its worker template.
    pub scheduler: SchedulerConfig,
    /// Asynchronous message bus section.
    pub bus: AsyncBusConfig,
}

/// Failure to read or parse a runtime configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read runtime config '{}'", path.display())]
    Io {
        /// The file that failed to load.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The text is not a valid RON runtime config.
    #[error("invalid runtime config: {0}")]
    Parse(#[from] ron::error::SpannedError),
    /// The config could not be serialised.
    #[error("failed to serialise runtime config: {0}")]
    Serialize(#[from] ron::Error),
}

impl RuntimeConfig {
    /// Parses a config from RON text.
    pub fn from_ron_str(text: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(text)?)
    }

    /// Reads and parses a RON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_ron_str(&text)?;
        log::debug!("Loaded runtime config from '{}'.", path.display());
        Ok(config)
    }

    /// Serialises the config as pretty-printed RON.
    pub fn to_ron_string(&self) -> Result<String, ConfigError> {
        let pretty = ron::ser::PrettyConfig::default().indentor("  ".to_string());
        Ok(ron::ser::to_string_pretty(self, pretty)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = RuntimeConfig::from_ron_str("()").unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.scheduler.name, "khora-scheduler");
        assert!(config.scheduler.worker_count >= 1);
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let config = RuntimeConfig::from_ron_str(
            r#"(
                scheduler: (
                    worker_count: 4,
                    worker: (name: "render-worker", stack_size: Some(1048576)),
                ),
                bus: (name: "input-bus"),
            )"#,
        )
        .unwrap();

        assert_eq!(config.scheduler.worker_count, 4);
        assert_eq!(config.scheduler.seed, None);
        assert_eq!(config.scheduler.worker.name, "render-worker");
        assert_eq!(config.scheduler.worker.stack_size, Some(1_048_576));
        assert_eq!(config.bus.name, "input-bus");
    }

    #[test]
    fn test_invalid_text_is_a_parse_error() {
        let err = RuntimeConfig::from_ron_str("(scheduler: (worker_count: \"four\"))").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "(scheduler: (worker_count: 3, seed: Some(11)))").unwrap();

        let config = RuntimeConfig::load(file.path()).unwrap();
        assert_eq!(config.scheduler.worker_count, 3);
        assert_eq!(config.scheduler.seed, Some(11));
    }

    #[test]
    fn test_missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = RuntimeConfig::load(dir.path().join("missing.ron")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("missing.ron"));
    }

    #[test]
    fn test_written_config_reads_back() {
        let mut config = RuntimeConfig::default();
        config.scheduler.worker_count = 6;
        config.bus.name = "audio-bus".to_string();

        let text = config.to_ron_string().unwrap();
        assert_eq!(RuntimeConfig::from_ron_str(&text).unwrap(), config);
    }

    #[test]
    fn test_worker_config_named() {
        let config = WorkerConfig::named("asset-io");
        assert_eq!(config.name, "asset-io");
        assert_eq!(config.stack_size, None);
    }
}
