//! Configuration management for the training monitor.
//! Handles loading and saving the monitor.json file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// The external training job: launched verbatim, never interpreted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobConfig {
    /// Interpreter or launcher to execute
    pub program: String,
    /// Arguments handed to the program as-is (script, data paths, epochs, ...)
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory; empty means inherit
    #[serde(default)]
    pub working_directory: String,
    /// File receiving the job's stdout
    #[serde(default = "default_stdout_log")]
    pub stdout_log: PathBuf,
    /// File receiving the job's stderr
    #[serde(default = "default_stderr_log")]
    pub stderr_log: PathBuf,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec!["train.py".to_string()],
            working_directory: String::new(),
            stdout_log: default_stdout_log(),
            stderr_log: default_stderr_log(),
        }
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitorConfig {
    /// JSONL file the training job appends to
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,
    #[serde(default)]
    pub job: JobConfig,
    /// Timer refresh period
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Quiet period used to coalesce bursts of file-change events
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// How long to wait after SIGTERM before a hard kill
    #[serde(default = "default_terminate_grace_ms")]
    pub terminate_grace_ms: u64,
    /// Number of raw log lines kept in the published snapshot
    #[serde(default = "default_tail_lines")]
    pub tail_lines: usize,
    /// Address of the HTTP status endpoint
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_log_path() -> PathBuf {
    PathBuf::from("training_output/training_params_and_metrics_global0.jsonl")
}

fn sink_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("training-monitor")
}

fn default_stdout_log() -> PathBuf {
    sink_dir().join("stdout.log")
}

fn default_stderr_log() -> PathBuf {
    sink_dir().join("stderr.log")
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_debounce_ms() -> u64 {
    200
}

fn default_terminate_grace_ms() -> u64 {
    3000
}

fn default_tail_lines() -> usize {
    20
}

fn default_bind() -> String {
    "127.0.0.1:8710".to_string()
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            log_path: default_log_path(),
            job: JobConfig::default(),
            poll_interval_ms: default_poll_interval_ms(),
            debounce_ms: default_debounce_ms(),
            terminate_grace_ms: default_terminate_grace_ms(),
            tail_lines: default_tail_lines(),
            bind: default_bind(),
        }
    }
}

impl MonitorConfig {
    /// Get the default path to the config file (next to the executable)
    pub fn config_path() -> PathBuf {
        let exe_path = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("."));
        let exe_dir = exe_path.parent().unwrap_or_else(|| Path::new("."));
        exe_dir.join("monitor.json")
    }

    /// Load config from `path`. A missing file yields the defaults; a file
    /// that exists but cannot be read or parsed is an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Save config to `path`
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }
}
