//! Error types that cross module boundaries.
//!
//! Transient states (missing log file, half-written line, a latest record that
//! is not reportable yet) are not errors; they are `Progress::Pending`.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from loading or saving the monitor config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to write config file {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to serialize config: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Errors from launching the training process.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to open output sink {}: {source}", path.display())]
    Sink {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
}

/// Operator-visible failures of monitor commands.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("a training job is already running")]
    AlreadyRunning,
    #[error("the last job completed; reset before starting a new one")]
    NotAcknowledged,
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
}
