// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Process launching and the I/O pumps that report back to the scheduler.
//
// The scheduler never blocks on a child.  Each spawned process gets a tokio
// task that awaits its exit, and each status pipe gets a task that reads it;
// both forward `JobEvent`s over one channel to the scheduler loop.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::PathBuf;
use std::process::Stdio;

use nix::fcntl::OFlag;
use nix::sys::signal::{Signal, kill};
use nix::unistd::{Pid, pipe2};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use spoolwerk_core::types::JobId;

/// Identifies one pipeline run of a job.  Restarting a job bumps `run`, so
/// late events from the previous run can be recognised and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunKey {
    pub job: JobId,
    pub run: u64,
}

/// Something happened to a job's processes or status pipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    StatusData { key: RunKey, bytes: Vec<u8> },
    /// EOF or read error on the status pipe.
    StatusClosed { key: RunKey },
    /// A stage exited; `code` is the exit code or 128 + signal.
    ChildExited { key: RunKey, pid: u32, code: i32 },
}

/// Standard input of a stage.
#[derive(Debug)]
pub enum StageInput {
    /// `/dev/null`; the first stage reads its file by name.
    Null,
    /// Read end of the previous stage's pipe.
    Pipe(OwnedFd),
}

/// Standard output of a stage.
#[derive(Debug)]
pub enum StageOutput {
    /// Write end of the pipe feeding the next stage.
    NextStage(OwnedFd),
    /// The destination file of a `file:` device.
    TerminalFile(File),
    /// `/dev/null`.
    Discard,
}

/// Everything needed to start one pipeline stage.
#[derive(Debug)]
pub struct SpawnRequest {
    pub program: PathBuf,
    pub arg0: String,
    pub args: Vec<String>,
    /// Complete environment; the scheduler's own is not inherited.
    pub env: BTreeMap<String, String>,
    pub stdin: StageInput,
    pub stdout: StageOutput,
    /// Write end of the job's status pipe.
    pub stderr: OwnedFd,
}

/// Owns the reader of a job's status pipe.  Dropping it stops reading and
/// closes the pipe.
pub struct StatusWatch {
    inner: WatchInner,
}

enum WatchInner {
    Task(AbortHandle),
    /// Read end held open with nobody reading it.
    Parked(#[allow(dead_code)] OwnedFd),
}

impl StatusWatch {
    pub fn parked(reader: OwnedFd) -> Self {
        Self {
            inner: WatchInner::Parked(reader),
        }
    }

    fn task(handle: AbortHandle) -> Self {
        Self {
            inner: WatchInner::Task(handle),
        }
    }
}

impl Drop for StatusWatch {
    fn drop(&mut self) {
        if let WatchInner::Task(handle) = &self.inner {
            handle.abort();
        }
    }
}

impl fmt::Debug for StatusWatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            WatchInner::Task(_) => f.write_str("StatusWatch(task)"),
            WatchInner::Parked(fd) => write!(f, "StatusWatch(parked fd {})", fd.as_raw_fd()),
        }
    }
}

/// Starts pipeline processes and watches status pipes.
pub trait Launcher {
    /// Start a stage and return its pid.  The exit must later be reported as
    /// a `ChildExited` event tagged with `key`.
    fn spawn(&mut self, key: RunKey, req: SpawnRequest) -> io::Result<u32>;

    /// Start reading a status pipe, reporting `StatusData` and finally
    /// `StatusClosed` tagged with `key`.
    fn watch_status(&mut self, key: RunKey, reader: OwnedFd) -> io::Result<StatusWatch>;

    /// SIGTERM, or SIGKILL when `force` is set.
    fn signal(&mut self, pid: u32, force: bool) -> io::Result<()>;
}

/// Launcher backed by `tokio::process`.  Must be used inside a tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioLauncher {
    events: mpsc::UnboundedSender<JobEvent>,
}

impl TokioLauncher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<JobEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (Self { events }, rx)
    }
}

impl Launcher for TokioLauncher {
    fn spawn(&mut self, key: RunKey, req: SpawnRequest) -> io::Result<u32> {
        let mut cmd = tokio::process::Command::new(&req.program);
        cmd.arg0(&req.arg0)
            .args(&req.args)
            .env_clear()
            .envs(&req.env)
            .stdin(match req.stdin {
                StageInput::Null => Stdio::null(),
                StageInput::Pipe(fd) => Stdio::from(fd),
            })
            .stdout(match req.stdout {
                StageOutput::NextStage(fd) => Stdio::from(fd),
                StageOutput::TerminalFile(file) => Stdio::from(file),
                StageOutput::Discard => Stdio::null(),
            })
            .stderr(Stdio::from(req.stderr));

        let mut child = cmd.spawn()?;
        // The parent's copies of the pipe ends go with the command.
        drop(cmd);

        let pid = child
            .id()
            .ok_or_else(|| io::Error::other("child exited before its pid was read"))?;
        debug!(job_id = %key.job, pid, program = %req.program.display(), "spawned stage");

        let events = self.events.clone();
        tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => status.code().unwrap_or_else(|| {
                    use std::os::unix::process::ExitStatusExt;
                    128 + status.signal().unwrap_or(0)
                }),
                Err(e) => {
                    warn!(job_id = %key.job, pid, error = %e, "failed to wait for stage");
                    1
                }
            };
            let _ = events.send(JobEvent::ChildExited { key, pid, code });
        });

        Ok(pid)
    }

    fn watch_status(&mut self, key: RunKey, reader: OwnedFd) -> io::Result<StatusWatch> {
        let mut pipe = tokio::net::unix::pipe::Receiver::from_file(File::from(reader))?;
        let events = self.events.clone();

        let handle = tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            loop {
                match pipe.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        let bytes = buf[..n].to_vec();
                        if events.send(JobEvent::StatusData { key, bytes }).is_err() {
                            return;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        warn!(job_id = %key.job, error = %e, "status pipe read failed");
                        break;
                    }
                }
            }
            let _ = events.send(JobEvent::StatusClosed { key });
        });

        Ok(StatusWatch::task(handle.abort_handle()))
    }

    fn signal(&mut self, pid: u32, force: bool) -> io::Result<()> {
        let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
        let pid = i32::try_from(pid).map_err(|_| io::Error::other(format!("pid {pid} out of range")))?;
        kill(Pid::from_raw(pid), signal).map_err(io::Error::from)
    }
}

/// A pipe whose ends are close-on-exec, so only the stage they are handed to
/// (as stdin/stdout/stderr) inherits them.
pub fn cloexec_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    pipe2(OFlag::O_CLOEXEC).map_err(io::Error::from)
}
