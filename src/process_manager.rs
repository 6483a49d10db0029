//! Process supervision for the training job: start, poll, terminate.
//!
//! Only the spawned process itself is tracked. Workers it forks are not part
//! of a managed group, so terminating the job does not guarantee they exit.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::error::SupervisorError;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);
/// How long a killed process gets to disappear before we give up on it.
const KILL_WAIT: Duration = Duration::from_secs(2);

/// Liveness of a supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessPoll {
    Running,
    /// Exit code, `None` when killed by a signal or the status was lost.
    Exited(Option<i32>),
}

/// Result of a termination request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminateOutcome {
    Terminated,
    /// Already gone; nothing left to stop.
    NotFound,
    Failed(String),
}

impl std::fmt::Display for TerminateOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminateOutcome::Terminated => write!(f, "Terminated"),
            TerminateOutcome::NotFound => write!(f, "Not found"),
            TerminateOutcome::Failed(e) => write!(f, "Failed: {}", e),
        }
    }
}

/// A spawned training process and where its output goes
pub struct SupervisedProcess {
    child: Child,
    pid: u32,
    started_at: DateTime<Utc>,
    stdout_log: PathBuf,
    stderr_log: PathBuf,
    exit: Option<ExitStatus>,
}

impl SupervisedProcess {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn stdout_log(&self) -> &Path {
        &self.stdout_log
    }

    pub fn stderr_log(&self) -> &Path {
        &self.stderr_log
    }

    /// Non-blocking reap; remembers the status once seen.
    fn try_exit(&mut self) -> std::io::Result<Option<ExitStatus>> {
        if self.exit.is_none() {
            self.exit = self.child.try_wait()?;
        }
        Ok(self.exit)
    }

    /// Poll for exit until `deadline`. `Ok(None)` means it is still alive.
    fn exit_before(&mut self, deadline: Instant) -> std::io::Result<Option<ExitStatus>> {
        loop {
            match self.try_exit()? {
                Some(status) => return Ok(Some(status)),
                None if Instant::now() < deadline => thread::sleep(EXIT_POLL_INTERVAL),
                None => return Ok(None),
            }
        }
    }
}

impl std::fmt::Debug for SupervisedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisedProcess")
            .field("pid", &self.pid)
            .field("started_at", &self.started_at)
            .field("exit", &self.exit)
            .finish()
    }
}

/// Starts, polls and stops training processes
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    terminate_grace: Duration,
    kill_wait: Duration,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new(Duration::from_secs(3))
    }
}

impl ProcessSupervisor {
    /// `terminate_grace` bounds how long `terminate` waits after SIGTERM
    /// before it falls back to a hard kill.
    pub fn new(terminate_grace: Duration) -> Self {
        Self {
            terminate_grace,
            kill_wait: KILL_WAIT,
        }
    }

    /// Spawn `program` with stdout/stderr redirected to the sink files.
    /// Returns as soon as the process exists.
    pub fn start(
        &self,
        program: &str,
        args: &[String],
        working_directory: Option<&Path>,
        stdout_log: &Path,
        stderr_log: &Path,
    ) -> Result<SupervisedProcess, SupervisorError> {
        let stdout = open_sink(stdout_log)?;
        let stderr = open_sink(stderr_log)?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));

        if let Some(dir) = working_directory {
            cmd.current_dir(dir);
        }

        // Hide console window on Windows
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            cmd.creation_flags(0x08000000); // CREATE_NO_WINDOW
        }

        let child = cmd.spawn().map_err(|source| SupervisorError::Spawn {
            command: program.to_string(),
            source,
        })?;
        let pid = child.id();
        tracing::info!(pid, program, ?args, "spawned training process");

        Ok(SupervisedProcess {
            child,
            pid,
            started_at: Utc::now(),
            stdout_log: stdout_log.to_path_buf(),
            stderr_log: stderr_log.to_path_buf(),
            exit: None,
        })
    }

    /// Non-blocking liveness check.
    pub fn poll(&self, proc: &mut SupervisedProcess) -> ProcessPoll {
        match proc.try_exit() {
            Ok(Some(status)) => ProcessPoll::Exited(status.code()),
            Ok(None) => ProcessPoll::Running,
            Err(e) => {
                // The status can't be recovered; report it gone so nothing waits on it.
                tracing::warn!(pid = proc.pid, error = %e, "failed to poll training process");
                ProcessPoll::Exited(None)
            }
        }
    }

    /// Ask the process to exit (SIGTERM), escalating to a hard kill after the
    /// grace period. The process is reaped before this returns `Terminated`.
    /// Every wait is bounded: a process that survives the kill is reported as
    /// `Failed` rather than waited on.
    pub fn terminate(&self, proc: &mut SupervisedProcess) -> TerminateOutcome {
        match proc.try_exit() {
            Ok(Some(_)) => return TerminateOutcome::NotFound,
            Ok(None) => {}
            Err(e) => return TerminateOutcome::Failed(e.to_string()),
        }

        if let Err(outcome) = send_terminate(proc) {
            return outcome;
        }

        match proc.exit_before(Instant::now() + self.terminate_grace) {
            Ok(Some(status)) => {
                tracing::info!(pid = proc.pid, %status, "training process terminated");
                return TerminateOutcome::Terminated;
            }
            Ok(None) => {}
            Err(e) => return TerminateOutcome::Failed(e.to_string()),
        }

        tracing::warn!(
            pid = proc.pid,
            grace_ms = self.terminate_grace.as_millis() as u64,
            "training process ignored SIGTERM, killing"
        );
        if let Err(e) = proc.child.kill() {
            return TerminateOutcome::Failed(e.to_string());
        }
        match proc.exit_before(Instant::now() + self.kill_wait) {
            Ok(Some(status)) => {
                tracing::info!(pid = proc.pid, %status, "training process killed");
                TerminateOutcome::Terminated
            }
            Ok(None) => {
                tracing::error!(
                    pid = proc.pid,
                    wait_ms = self.kill_wait.as_millis() as u64,
                    "training process survived SIGKILL, giving up on it"
                );
                TerminateOutcome::Failed("process did not exit after SIGKILL".to_string())
            }
            Err(e) => TerminateOutcome::Failed(e.to_string()),
        }
    }
}

fn open_sink(path: &Path) -> Result<File, SupervisorError> {
    let sink_err = |source: std::io::Error| SupervisorError::Sink {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(sink_err)?;
    }
    File::create(path).map_err(sink_err)
}

#[cfg(unix)]
fn send_terminate(proc: &SupervisedProcess) -> Result<(), TerminateOutcome> {
    let Ok(pid) = libc::pid_t::try_from(proc.pid) else {
        return Err(TerminateOutcome::Failed(format!("pid {} out of range", proc.pid)));
    };
    // SAFETY: kill(2) has no memory-safety preconditions. The pid belongs to
    // our unreaped child, so it cannot have been recycled.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Err(TerminateOutcome::NotFound)
    } else {
        Err(TerminateOutcome::Failed(err.to_string()))
    }
}

#[cfg(not(unix))]
fn send_terminate(proc: &mut SupervisedProcess) -> Result<(), TerminateOutcome> {
    match proc.child.kill() {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Err(TerminateOutcome::NotFound),
        Err(e) => Err(TerminateOutcome::Failed(e.to_string())),
    }
}
