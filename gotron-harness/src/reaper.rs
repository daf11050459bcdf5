// Copyright (c) The gotron Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Last-resort cleanup of role processes that no handle owns.
//!
//! A scenario that crashed or was interrupted can leave servers and clients running, holding the
//! ports the next scenario needs. The reaper finds them by executable name and force-kills them.
//! It has no locking against the system-wide process table: processes from unrelated runs with
//! the same name are killed too.

use crate::{config::HarnessConfig, errors::ReapError};
use std::{fmt, io};
use tracing::{debug, trace, warn};

/// One entry in the OS process table.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProcessEntry {
    /// The OS process ID.
    pub pid: u32,

    /// The executable name, or `None` if the process vanished or couldn't be queried while the
    /// table was being read.
    pub name: Option<String>,
}

/// A source of running processes that can also kill them.
pub trait ProcessTable {
    /// Lists every running process.
    ///
    /// The outer error means the table couldn't be read at all. An inner error is one entry that
    /// couldn't be read.
    fn processes(&self) -> io::Result<Vec<io::Result<ProcessEntry>>>;

    /// Force-kills `pid`, with no chance for a graceful shutdown.
    ///
    /// Returns an error of kind [`io::ErrorKind::NotFound`] if the process no longer exists.
    fn force_kill(&self, pid: u32) -> io::Result<()>;

    /// The length at which this table truncates executable names, if it does.
    fn name_limit(&self) -> Option<usize> {
        None
    }
}

/// The result of a sweep.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ReapSummary {
    /// Matching processes that were killed.
    pub reaped: usize,

    /// Processes that vanished or couldn't be queried mid-sweep, including unreadable table
    /// entries.
    pub skipped: usize,

    /// Matching processes that couldn't be killed for another reason. Each one has been logged.
    pub failed: usize,
}

impl fmt::Display for ReapSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} reaped, {} skipped, {} failed",
            self.reaped, self.skipped, self.failed
        )
    }
}

/// Force-kills processes whose executable name is one of a fixed list.
#[derive(Clone, Debug)]
pub struct ProcessReaper {
    names: Vec<String>,
    own_pid: u32,
}

impl ProcessReaper {
    /// Creates a reaper matching exactly `names`.
    pub fn new(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            own_pid: std::process::id(),
        }
    }

    /// Creates a reaper matching every role binary name in `config`, including suffix variants.
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new(config.role_binary_names())
    }

    /// The names this reaper matches.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Returns true if a process called `name` should be reaped.
    ///
    /// `name_limit` is the table's truncation length: a name exactly that long also matches any
    /// longer role name it is a prefix of.
    pub fn matches(&self, name: &str, name_limit: Option<usize>) -> bool {
        self.names.iter().any(|candidate| {
            candidate == name
                || name_limit.is_some_and(|limit| {
                    name.len() == limit && candidate.len() > limit && candidate.starts_with(name)
                })
        })
    }

    /// Kills every process in `table` with a matching name, except the current process.
    ///
    /// Only a failure to list processes at all is an error.
    pub fn reap_stray(&self, table: &impl ProcessTable) -> Result<ReapSummary, ReapError> {
        let processes = table.processes().map_err(ReapError::new)?;
        let name_limit = table.name_limit();
        let mut summary = ReapSummary::default();

        for entry in processes {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => {
                    trace!("skipping unreadable process table entry: {error}");
                    summary.skipped += 1;
                    continue;
                }
            };
            if entry.pid == self.own_pid {
                continue;
            }
            let Some(name) = &entry.name else {
                trace!(pid = entry.pid, "skipping unqueryable process");
                summary.skipped += 1;
                continue;
            };
            if !self.matches(name, name_limit) {
                continue;
            }

            match table.force_kill(entry.pid) {
                Ok(()) => {
                    debug!(pid = entry.pid, name, "reaped stray process");
                    summary.reaped += 1;
                }
                Err(error) if error.kind() == io::ErrorKind::NotFound => {
                    debug!(pid = entry.pid, name, "stray process exited before it was reaped");
                    summary.skipped += 1;
                }
                Err(error) => {
                    warn!(pid = entry.pid, name, "failed to reap stray process: {error}");
                    summary.failed += 1;
                }
            }
        }

        debug!(%summary, "stray process sweep finished");
        Ok(summary)
    }
}

/// The process table of the running system.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemProcessTable;

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        impl ProcessTable for SystemProcessTable {
            fn processes(&self) -> io::Result<Vec<io::Result<ProcessEntry>>> {
                let mut entries = Vec::new();
                for dir_entry in fs_err::read_dir("/proc")? {
                    let dir_entry = match dir_entry {
                        Ok(dir_entry) => dir_entry,
                        Err(error) => {
                            entries.push(Err(error));
                            continue;
                        }
                    };
                    let Some(pid) = dir_entry
                        .file_name()
                        .to_str()
                        .and_then(|name| name.parse::<u32>().ok())
                    else {
                        continue;
                    };
                    // Reading comm fails if the process exited after read_dir listed it.
                    let name = std::fs::read_to_string(dir_entry.path().join("comm"))
                        .ok()
                        .map(|comm| comm.trim_end_matches('\n').to_owned());
                    entries.push(Ok(ProcessEntry { pid, name }));
                }
                Ok(entries)
            }

            fn force_kill(&self, pid: u32) -> io::Result<()> {
                unix_force_kill(pid)
            }

            fn name_limit(&self) -> Option<usize> {
                // TASK_COMM_LEN is 16, including the trailing NUL.
                Some(15)
            }
        }
    } else if #[cfg(unix)] {
        impl ProcessTable for SystemProcessTable {
            fn processes(&self) -> io::Result<Vec<io::Result<ProcessEntry>>> {
                let output = duct::cmd!("ps", "-A", "-o", "pid=,comm=")
                    .stderr_null()
                    .read()?;
                Ok(parse_ps_output(&output).into_iter().map(Ok).collect())
            }

            fn force_kill(&self, pid: u32) -> io::Result<()> {
                unix_force_kill(pid)
            }
        }
    } else if #[cfg(windows)] {
        impl ProcessTable for SystemProcessTable {
            fn processes(&self) -> io::Result<Vec<io::Result<ProcessEntry>>> {
                let output = duct::cmd!("tasklist", "/FO", "CSV", "/NH")
                    .stderr_null()
                    .read()?;
                Ok(parse_tasklist_output(&output).into_iter().map(Ok).collect())
            }

            fn force_kill(&self, pid: u32) -> io::Result<()> {
                let output = duct::cmd!("taskkill", "/F", "/PID", pid.to_string())
                    .stdout_null()
                    .stderr_capture()
                    .unchecked()
                    .run()?;
                if output.status.success() {
                    return Ok(());
                }
                let message = String::from_utf8_lossy(&output.stderr).trim().to_owned();
                // taskkill exits with 128 when the process doesn't exist.
                if output.status.code() == Some(128) {
                    Err(io::Error::new(io::ErrorKind::NotFound, message))
                } else {
                    Err(io::Error::other(message))
                }
            }
        }
    }
}

#[cfg(unix)]
fn unix_force_kill(pid: u32) -> io::Result<()> {
    use nix::{
        errno::Errno,
        sys::signal::{Signal, kill},
        unistd::Pid,
    };

    let raw = i32::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, format!("invalid pid {pid}")))?;
    match kill(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("process {pid} no longer exists"),
        )),
        Err(errno) => Err(io::Error::from(errno)),
    }
}

/// Parses `ps -o pid=,comm=` output. Some systems report the full executable path as `comm`.
///
/// A row with a pid but no `comm` becomes an entry with no name.
#[cfg_attr(target_os = "linux", allow(dead_code))]
fn parse_ps_output(output: &str) -> Vec<ProcessEntry> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let (pid, comm) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
            let pid = pid.parse().ok()?;
            let comm = comm.trim();
            let name = comm.rsplit('/').next().unwrap_or(comm);
            Some(ProcessEntry {
                pid,
                name: (!name.is_empty()).then(|| name.to_owned()),
            })
        })
        .collect()
}

/// Parses `tasklist /FO CSV /NH` output: `"image","pid","session","#","memory"`.
#[cfg_attr(not(windows), allow(dead_code))]
fn parse_tasklist_output(output: &str) -> Vec<ProcessEntry> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.trim().split("\",\"");
            let name = fields.next()?.trim_start_matches('"');
            let pid = fields.next()?.trim_end_matches('"').parse().ok()?;
            Some(ProcessEntry {
                pid,
                name: Some(name.to_owned()),
            })
        })
        .collect()
}
