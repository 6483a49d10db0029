//! The monitor: job lifecycle plus the refresh routine that turns the log and
//! the process status into one published snapshot.
//!
//! Every state change (refresh, start, stop, reset) runs under the same lock
//! and publishes while still holding it, so a subscriber never sees progress
//! from one tick paired with a status from another.

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::config::{JobConfig, MonitorConfig};
use crate::error::MonitorError;
use crate::log_tail::{self, LogTail, TailRead};
use crate::process_manager::{ProcessPoll, ProcessSupervisor, SupervisedProcess, TerminateOutcome};
use crate::progress::{self, InvalidReason, Progress};
use crate::watcher::{self, FileWatcher};

/// Lifecycle of the supervised training job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    NotStarted,
    Running,
    Completed,
    Stopped,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::NotStarted => write!(f, "Not started"),
            JobStatus::Running => write!(f, "Running"),
            JobStatus::Completed => write!(f, "Completed"),
            JobStatus::Stopped => write!(f, "Stopped"),
        }
    }
}

/// What the presentation layer sees
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorSnapshot {
    /// Fraction complete in `[0, 1]`
    pub progress: f64,
    pub status: JobStatus,
    pub last_refresh: Option<DateTime<Utc>>,
    pub run_id: Option<Uuid>,
    pub pid: Option<u32>,
    /// When the tracked process was spawned
    pub started_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    /// Last operator-visible message (spawn or termination failure, exit)
    pub message: Option<String>,
    /// Newest raw log lines, oldest first
    pub recent_lines: Vec<String>,
}

/// Result of a stop request
#[derive(Debug, Clone, Serialize)]
pub struct StopReport {
    /// `None` when no process was being tracked
    #[serde(serialize_with = "serialize_outcome")]
    pub outcome: Option<TerminateOutcome>,
    pub snapshot: MonitorSnapshot,
}

fn serialize_outcome<S: serde::Serializer>(
    outcome: &Option<TerminateOutcome>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match outcome {
        Some(outcome) => serializer.serialize_str(&outcome.to_string()),
        None => serializer.serialize_str("No running job"),
    }
}

/// The log file as it was before the job was spawned. Until the file differs
/// from this, its contents belong to an earlier run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LogBaseline {
    modified: Option<SystemTime>,
    len: u64,
}

impl LogBaseline {
    fn capture(path: &Path) -> Option<Self> {
        let meta = fs::metadata(path).ok()?;
        Some(Self {
            modified: meta.modified().ok(),
            len: meta.len(),
        })
    }
}

struct MonitorState {
    status: JobStatus,
    process: Option<SupervisedProcess>,
    run_id: Option<Uuid>,
    log_baseline: Option<LogBaseline>,
    last_invalid: Option<InvalidReason>,
    progress: f64,
    exit_code: Option<i32>,
    message: Option<String>,
    recent_lines: Vec<String>,
    last_refresh: Option<DateTime<Utc>>,
}

impl MonitorState {
    fn new() -> Self {
        Self {
            status: JobStatus::NotStarted,
            process: None,
            run_id: None,
            log_baseline: None,
            last_invalid: None,
            progress: 0.0,
            exit_code: None,
            message: None,
            recent_lines: Vec::new(),
            last_refresh: None,
        }
    }

    fn snapshot(&self) -> MonitorSnapshot {
        MonitorSnapshot {
            progress: self.progress,
            status: self.status,
            last_refresh: self.last_refresh,
            run_id: self.run_id,
            pid: self.process.as_ref().map(SupervisedProcess::pid),
            started_at: self.process.as_ref().map(SupervisedProcess::started_at),
            exit_code: self.exit_code,
            message: self.message.clone(),
            recent_lines: self.recent_lines.clone(),
        }
    }

    fn apply_log(&mut self, read: TailRead, tail_lines: usize) {
        let text = match read {
            TailRead::Content {
                text,
                modified,
                len,
            } => {
                if self.log_baseline == Some(LogBaseline { modified, len }) {
                    tracing::debug!("log unchanged since the job started, waiting for new output");
                    return;
                }
                // Once the job has touched the file, everything in it is ours.
                self.log_baseline = None;
                text
            }
            TailRead::NotFound => {
                tracing::debug!("log file not created yet");
                return;
            }
            TailRead::Unreadable(e) => {
                tracing::debug!(error = %e, "log file unreadable this tick");
                return;
            }
        };

        self.recent_lines = log_tail::recent_lines(&text, tail_lines);
        match progress::compute(&text) {
            Progress::Ready(fraction) => {
                self.progress = fraction;
                self.last_invalid = None;
            }
            Progress::Pending => tracing::debug!("progress not reportable yet"),
            Progress::Invalid(reason) if self.last_invalid == Some(reason) => {
                tracing::debug!(%reason, kept = self.progress, "training log still invalid");
            }
            Progress::Invalid(reason) => {
                tracing::warn!(
                    %reason,
                    kept = self.progress,
                    "training log reports impossible counters, keeping last progress"
                );
                self.last_invalid = Some(reason);
            }
        }
    }
}

struct Inner {
    state: Mutex<MonitorState>,
    snapshot_tx: watch::Sender<MonitorSnapshot>,
    log: LogTail,
    supervisor: ProcessSupervisor,
    job: JobConfig,
    tail_lines: usize,
}

/// Shared handle to the monitor; clones refer to the same job.
#[derive(Clone)]
pub struct Monitor {
    inner: Arc<Inner>,
}

impl Monitor {
    pub fn new(config: &MonitorConfig) -> Self {
        let state = MonitorState::new();
        let (snapshot_tx, _snapshot_rx) = watch::channel(state.snapshot());
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                snapshot_tx,
                log: LogTail::new(&config.log_path),
                supervisor: ProcessSupervisor::new(config.terminate_grace()),
                job: config.job.clone(),
                tail_lines: config.tail_lines,
            }),
        }
    }

    pub fn log_path(&self) -> &Path {
        self.inner.log.path()
    }

    pub fn subscribe(&self) -> watch::Receiver<MonitorSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    /// Last published snapshot
    pub fn snapshot(&self) -> MonitorSnapshot {
        self.inner.snapshot_tx.borrow().clone()
    }

    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        // A panic mid-refresh must not wedge the monitor for good.
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &MonitorState) -> MonitorSnapshot {
        let snapshot = state.snapshot();
        self.inner.snapshot_tx.send_replace(snapshot.clone());
        snapshot
    }

    /// Launch the training job.
    pub fn start(&self) -> Result<MonitorSnapshot, MonitorError> {
        let mut state = self.lock();
        match state.status {
            JobStatus::Running => return Err(MonitorError::AlreadyRunning),
            JobStatus::Completed => return Err(MonitorError::NotAcknowledged),
            JobStatus::NotStarted | JobStatus::Stopped => {}
        }

        let log_baseline = LogBaseline::capture(self.inner.log.path());
        let job = &self.inner.job;
        let working_dir = Some(Path::new(&job.working_directory)).filter(|d| !d.as_os_str().is_empty());
        let proc = match self.inner.supervisor.start(
            &job.program,
            &job.args,
            working_dir,
            &job.stdout_log,
            &job.stderr_log,
        ) {
            Ok(proc) => proc,
            Err(e) => {
                tracing::warn!(error = %e, "failed to start training job");
                state.message = Some(e.to_string());
                self.publish(&state);
                return Err(e.into());
            }
        };

        let run_id = Uuid::new_v4();
        tracing::info!(
            %run_id,
            pid = proc.pid(),
            stdout = %proc.stdout_log().display(),
            stderr = %proc.stderr_log().display(),
            "training job started"
        );
        state.status = JobStatus::Running;
        state.run_id = Some(run_id);
        state.log_baseline = log_baseline;
        state.last_invalid = None;
        state.process = Some(proc);
        state.progress = 0.0;
        state.exit_code = None;
        state.message = None;
        state.recent_lines.clear();
        Ok(self.publish(&state))
    }

    /// One tick: poll the process, read the log, derive progress, publish.
    pub fn refresh(&self) -> MonitorSnapshot {
        let mut state = self.lock();

        let supervisor = &self.inner.supervisor;
        let exited = state.process.as_mut().and_then(|proc| match supervisor.poll(proc) {
            ProcessPoll::Running => None,
            ProcessPoll::Exited(code) => Some((proc.pid(), code)),
        });

        // Read after the poll: a job seen as exited has already written its last line.
        if state.status == JobStatus::Running {
            state.apply_log(self.inner.log.read(), self.inner.tail_lines);
        }

        if let Some((pid, code)) = exited {
            tracing::info!(pid, ?code, progress = state.progress, "training job exited");
            state.process = None;
            state.status = JobStatus::Completed;
            state.exit_code = code;
            state.message = Some(match code {
                Some(code) => format!("Training exited with code {}", code),
                None => "Training exited without a status code".to_string(),
            });
        }

        state.last_refresh = Some(Utc::now());
        self.publish(&state)
    }

    /// Terminate the job if one is tracked. The process reference is dropped
    /// and progress reset whatever the termination outcome. A completed job
    /// is left alone; only `reset` acknowledges it.
    pub fn stop(&self) -> StopReport {
        let mut state = self.lock();

        if state.status == JobStatus::Completed {
            tracing::info!("stop requested after the training job completed, nothing to do");
            return StopReport {
                outcome: None,
                snapshot: state.snapshot(),
            };
        }

        let outcome = state
            .process
            .take()
            .map(|mut proc| self.inner.supervisor.terminate(&mut proc));
        state.message = match &outcome {
            Some(TerminateOutcome::Failed(e)) => {
                tracing::warn!(error = %e, "failed to terminate training job");
                Some(format!("Failed to terminate training process: {}", e))
            }
            Some(outcome) => {
                tracing::info!(%outcome, "training job stopped");
                None
            }
            None => {
                tracing::warn!("stop requested with no running training job");
                None
            }
        };

        state.status = JobStatus::Stopped;
        state.progress = 0.0;
        state.log_baseline = None;
        state.last_invalid = None;
        state.recent_lines.clear();

        StopReport {
            outcome,
            snapshot: self.publish(&state),
        }
    }

    /// Acknowledge a finished or stopped job and return to `NotStarted`.
    pub fn reset(&self) -> Result<MonitorSnapshot, MonitorError> {
        let mut state = self.lock();
        if state.status == JobStatus::Running {
            return Err(MonitorError::AlreadyRunning);
        }
        let last_refresh = state.last_refresh;
        *state = MonitorState::new();
        state.last_refresh = last_refresh;
        Ok(self.publish(&state))
    }
}

/// Run `refresh` off the async runtime; a panic inside it is logged, not fatal.
async fn refresh_blocking(monitor: &Monitor) {
    let monitor = monitor.clone();
    if let Err(e) = tokio::task::spawn_blocking(move || monitor.refresh()).await {
        tracing::error!(error = %e, "refresh task failed");
    }
}

fn try_watch(path: &Path, tx: &mpsc::Sender<()>) -> Option<FileWatcher> {
    match watcher::watch_file(path, tx.clone()) {
        Ok(w) => {
            tracing::debug!(dir = %w.dir().display(), "watching for log changes");
            Some(w)
        }
        Err(e) => {
            tracing::debug!(error = %e, "log directory not watchable yet, polling only");
            None
        }
    }
}

/// Drive refreshes from the timer and from log change notifications until
/// `shutdown` turns true.
pub async fn run(
    monitor: Monitor,
    poll_interval: Duration,
    debounce: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let (notify_tx, mut notify_rx) = mpsc::channel::<()>(16);
    let mut file_watcher = try_watch(monitor.log_path(), &notify_tx);

    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // The job may create the log directory after we start.
                if file_watcher.is_none() {
                    file_watcher = try_watch(monitor.log_path(), &notify_tx);
                }
                refresh_blocking(&monitor).await;
            }
            Some(()) = notify_rx.recv() => {
                // Coalesce a burst of writes into one refresh.
                tokio::time::sleep(debounce).await;
                while notify_rx.try_recv().is_ok() {}
                refresh_blocking(&monitor).await;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::debug!("monitor loop shutting down");
                    break;
                }
            }
        }
    }
}
