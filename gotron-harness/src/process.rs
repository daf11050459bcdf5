// Copyright (c) The gotron Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ownership of a single OS process.

use crate::{
    config::RoleKind,
    errors::{StartError, WaitError},
};
use camino::{Utf8Path, Utf8PathBuf};
use std::{
    fmt, io,
    process::{Child, Command, ExitStatus, Stdio},
};
use tracing::{debug, warn};

/// What to do with a launched process's standard streams.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum StdioPolicy {
    /// Discard stdout and stderr. The target programs are chatty and log everything that matters
    /// to files anyway.
    #[default]
    Null,

    /// Let stdout and stderr go to the harness's own streams.
    Inherit,
}

impl StdioPolicy {
    fn output(self) -> Stdio {
        match self {
            Self::Null => Stdio::null(),
            Self::Inherit => Stdio::inherit(),
        }
    }
}

/// The result of [`ProcessHandle::kill`].
///
/// Killing is best-effort, so this is not a `Result`: callers decide which outcomes they care
/// about.
#[derive(Debug)]
pub enum KillOutcome {
    /// The process was running and has been killed.
    Killed,

    /// The process had already exited by the time it was killed.
    AlreadyExited,

    /// The handle was never started, so there was nothing to kill.
    NotStarted,

    /// Killing failed for some other reason. This has already been logged.
    Error(io::Error),
}

impl KillOutcome {
    /// Returns true if this call actually killed the process.
    pub fn is_killed(&self) -> bool {
        matches!(self, Self::Killed)
    }

    /// Returns true if the process is known not to be running any more.
    pub fn is_gone(&self) -> bool {
        matches!(self, Self::Killed | Self::AlreadyExited)
    }
}

impl fmt::Display for KillOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Killed => write!(f, "killed"),
            Self::AlreadyExited => write!(f, "already exited"),
            Self::NotStarted => write!(f, "not started"),
            Self::Error(error) => write!(f, "kill failed: {error}"),
        }
    }
}

#[derive(Debug)]
enum ProcessState {
    NotStarted,
    Running(Child),
    Exited(ExitStatus),
}

/// Owns exactly one OS process for one role.
///
/// A handle goes through `NotStarted -> Running -> Exited` once and is never restarted.
#[derive(Debug)]
pub struct ProcessHandle {
    role: RoleKind,
    label: String,
    program: Utf8PathBuf,
    state: ProcessState,
}

impl ProcessHandle {
    /// Creates a handle that will run `program`. `label` identifies the process in logs and
    /// errors, e.g. `client 2`.
    pub fn new(role: RoleKind, label: impl Into<String>, program: impl Into<Utf8PathBuf>) -> Self {
        Self {
            role,
            label: label.into(),
            program: program.into(),
            state: ProcessState::NotStarted,
        }
    }

    /// The role this process plays.
    pub fn role(&self) -> RoleKind {
        self.role
    }

    /// The label this handle was created with.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The program this handle runs.
    pub fn program(&self) -> &Utf8Path {
        &self.program
    }

    /// The OS process ID, if the process is running.
    pub fn pid(&self) -> Option<u32> {
        match &self.state {
            ProcessState::Running(child) => Some(child.id()),
            ProcessState::NotStarted | ProcessState::Exited(_) => None,
        }
    }

    /// The exit status, if the process is known to have exited.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        match &self.state {
            ProcessState::Exited(status) => Some(*status),
            ProcessState::NotStarted | ProcessState::Running(_) => None,
        }
    }

    /// Launches the program with `args`, running in `working_dir`.
    ///
    /// Returns as soon as the OS has spawned the process: there is no readiness check.
    pub fn start(
        &mut self,
        args: &[String],
        working_dir: &Utf8Path,
        stdio: StdioPolicy,
    ) -> Result<(), StartError> {
        if !matches!(self.state, ProcessState::NotStarted) {
            return Err(StartError::new(
                self.role,
                &self.program,
                io::Error::other(format!("{} was already started", self.label)),
            ));
        }

        let mut command = Command::new(&self.program);
        command
            .args(args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(stdio.output())
            .stderr(stdio.output());

        let child = command
            .spawn()
            .map_err(|error| StartError::new(self.role, &self.program, error))?;
        debug!(
            label = %self.label,
            program = %self.program,
            pid = child.id(),
            ?args,
            %working_dir,
            "started process"
        );
        self.state = ProcessState::Running(child);
        Ok(())
    }

    /// Kills the process immediately, without any graceful shutdown.
    ///
    /// Calling this more than once, or after the process has exited on its own, returns
    /// [`KillOutcome::AlreadyExited`].
    pub fn kill(&mut self) -> KillOutcome {
        let child = match &mut self.state {
            ProcessState::NotStarted => return KillOutcome::NotStarted,
            ProcessState::Exited(_) => return KillOutcome::AlreadyExited,
            ProcessState::Running(child) => child,
        };

        if let Ok(Some(status)) = child.try_wait() {
            debug!(label = %self.label, %status, "process exited before kill");
            self.state = ProcessState::Exited(status);
            return KillOutcome::AlreadyExited;
        }

        let pid = child.id();
        match child.kill() {
            Ok(()) => {}
            Err(error) if is_already_gone(&error) => {
                debug!(label = %self.label, pid, "process exited before kill");
                self.reap();
                return KillOutcome::AlreadyExited;
            }
            Err(error) => {
                warn!(label = %self.label, pid, "failed to kill process: {error}");
                return KillOutcome::Error(error);
            }
        }

        debug!(label = %self.label, pid, "killed process");
        self.reap();
        KillOutcome::Killed
    }

    /// Blocks until the process exits, then returns its exit status.
    ///
    /// Once the process has exited, further calls return the same status.
    pub fn wait(&mut self) -> Result<ExitStatus, WaitError> {
        match &mut self.state {
            ProcessState::NotStarted => Err(WaitError::NotStarted { role: self.role }),
            ProcessState::Exited(status) => Ok(*status),
            ProcessState::Running(child) => {
                let pid = child.id();
                let status = child.wait().map_err(|error| WaitError::Io {
                    role: self.role,
                    pid,
                    error,
                })?;
                debug!(label = %self.label, pid, %status, "process exited");
                self.state = ProcessState::Exited(status);
                Ok(status)
            }
        }
    }

    /// Returns the exit status if the process has exited, without blocking.
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>, WaitError> {
        match &mut self.state {
            ProcessState::NotStarted => Err(WaitError::NotStarted { role: self.role }),
            ProcessState::Exited(status) => Ok(Some(*status)),
            ProcessState::Running(child) => {
                let pid = child.id();
                let status = child.try_wait().map_err(|error| WaitError::Io {
                    role: self.role,
                    pid,
                    error,
                })?;
                if let Some(status) = status {
                    self.state = ProcessState::Exited(status);
                }
                Ok(status)
            }
        }
    }

    fn reap(&mut self) {
        if let ProcessState::Running(child) = &mut self.state {
            match child.wait() {
                Ok(status) => self.state = ProcessState::Exited(status),
                Err(error) => {
                    warn!(label = %self.label, "failed to reap killed process: {error}");
                }
            }
        }
    }
}

fn is_already_gone(error: &io::Error) -> bool {
    // Older standard libraries report killing a reaped child as InvalidInput.
    if error.kind() == io::ErrorKind::InvalidInput {
        return true;
    }
    cfg_if::cfg_if! {
        if #[cfg(unix)] {
            error.raw_os_error() == Some(nix::errno::Errno::ESRCH as i32)
        } else {
            false
        }
    }
}
