// Copyright (c) The gotron Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by the gotron harness.

use crate::{
    config::RoleKind,
    process::{KillOutcome, ProcessHandle},
};
use camino::Utf8PathBuf;
use config::ConfigError;
use itertools::Itertools;
use std::{fmt, io};
use thiserror::Error;

/// An error that occurred while parsing the harness config.
#[derive(Debug, Error)]
#[error("failed to parse harness config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    kind: ConfigParseErrorKind,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, kind: ConfigParseErrorKind) -> Self {
        Self {
            config_file: config_file.into(),
            kind,
        }
    }

    /// Returns the config file for this error.
    pub fn config_file(&self) -> &Utf8PathBuf {
        &self.config_file
    }

    /// Returns the kind of error.
    pub fn kind(&self) -> &ConfigParseErrorKind {
        &self.kind
    }
}

/// The kind of error that occurred while parsing a config.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseErrorKind {
    /// An error occurred while building the config.
    #[error(transparent)]
    BuildError(Box<ConfigError>),

    /// An error occurred while deserializing the config.
    #[error(transparent)]
    DeserializeError(Box<serde_path_to_error::Error<ConfigError>>),

    /// The config deserialized, but a value is out of range.
    #[error("invalid value for `{key}`: {reason}")]
    InvalidValue {
        /// The offending key.
        key: &'static str,

        /// Why the value was rejected.
        reason: String,
    },
}

/// No candidate path for a role's binary exists as a regular file.
#[derive(Clone, Debug, Error)]
#[error(
    "couldn't find {role} binary `{name}` (tried: {})",
    .candidates.iter().join(", ")
)]
pub struct BinaryNotFound {
    role: RoleKind,
    name: String,
    candidates: Vec<Utf8PathBuf>,
}

impl BinaryNotFound {
    pub(crate) fn new(role: RoleKind, name: impl Into<String>, candidates: Vec<Utf8PathBuf>) -> Self {
        Self {
            role,
            name: name.into(),
            candidates,
        }
    }

    /// The role whose binary was not found.
    pub fn role(&self) -> RoleKind {
        self.role
    }

    /// Every path that was tried, in order.
    pub fn candidates(&self) -> &[Utf8PathBuf] {
        &self.candidates
    }
}

/// The OS refused to launch a resolved binary.
#[derive(Debug, Error)]
#[error("failed to start {role} `{program}`")]
pub struct StartError {
    role: RoleKind,
    program: Utf8PathBuf,
    #[source]
    error: io::Error,
}

impl StartError {
    pub(crate) fn new(role: RoleKind, program: impl Into<Utf8PathBuf>, error: io::Error) -> Self {
        Self {
            role,
            program: program.into(),
            error,
        }
    }

    /// The role that failed to start.
    pub fn role(&self) -> RoleKind {
        self.role
    }
}

/// An error returned by [`ProcessHandle::wait`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WaitError {
    /// The handle was never started.
    #[error("{role} process was never started")]
    NotStarted {
        /// The role of the handle.
        role: RoleKind,
    },

    /// Waiting on the child failed.
    #[error("failed to wait for {role} process {pid}")]
    Io {
        /// The role of the handle.
        role: RoleKind,

        /// The OS process ID.
        pid: u32,

        /// The underlying error.
        #[source]
        error: io::Error,
    },
}

/// An error computing the ports for a cluster.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum TopologyError {
    /// More clients were requested than the room supports.
    #[error("requested {requested} clients, but at most {max} are supported")]
    TooManyClients {
        /// The requested client count.
        requested: usize,

        /// The configured maximum.
        max: usize,
    },

    /// A derived port would be below zero.
    #[error("ports for client {index} would underflow (base {base}, stride {stride})")]
    PortUnderflow {
        /// The client index.
        index: usize,

        /// The base port that underflowed.
        base: u16,

        /// The configured stride.
        stride: u16,
    },

    /// Two derived ports are the same.
    #[error("port {port} is assigned more than once in the cluster")]
    Collision {
        /// The duplicated port.
        port: u16,
    },
}

/// The stage of a cluster launch that failed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LaunchStage {
    /// Checking the requested cluster shape, before anything is started.
    Topology,

    /// Launching the matchmaking server.
    Server,

    /// Launching the client with this index.
    Client(usize),
}

impl fmt::Display for LaunchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Topology => write!(f, "cluster topology"),
            Self::Server => write!(f, "server"),
            Self::Client(index) => write!(f, "client {index}"),
        }
    }
}

/// The reason a cluster launch failed.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LaunchErrorKind {
    /// The binary for the stage could not be found.
    #[error(transparent)]
    BinaryNotFound(#[from] BinaryNotFound),

    /// The binary was found but could not be started.
    #[error(transparent)]
    Start(#[from] StartError),

    /// The requested topology is invalid.
    #[error(transparent)]
    Topology(#[from] TopologyError),
}

/// A cluster launch failed.
///
/// Processes started earlier in the same launch are kept here so that they can still be cleaned
/// up.
#[derive(Debug, Error)]
#[error("failed to launch {stage}")]
pub struct LaunchError {
    stage: LaunchStage,
    #[source]
    kind: LaunchErrorKind,
    started: Vec<ProcessHandle>,
}

impl LaunchError {
    pub(crate) fn new(
        stage: LaunchStage,
        kind: impl Into<LaunchErrorKind>,
        started: Vec<ProcessHandle>,
    ) -> Self {
        Self {
            stage,
            kind: kind.into(),
            started,
        }
    }

    /// The stage that failed.
    pub fn stage(&self) -> LaunchStage {
        self.stage
    }

    /// The reason the stage failed.
    pub fn kind(&self) -> &LaunchErrorKind {
        &self.kind
    }

    /// Handles started before the failure, in launch order.
    pub fn started_mut(&mut self) -> &mut [ProcessHandle] {
        &mut self.started
    }

    /// Consumes the error, returning the handles started before the failure.
    pub fn into_started(self) -> Vec<ProcessHandle> {
        self.started
    }

    /// Kills every handle started before the failure. Returns the number of processes killed.
    pub fn kill_started(&mut self) -> usize {
        self.started
            .iter_mut()
            .map(|handle| handle.kill())
            .filter(KillOutcome::is_killed)
            .count()
    }
}

/// An error reading a log file.
#[derive(Debug, Error)]
#[error("failed to read log file `{path}`")]
pub struct LogReadError {
    path: Utf8PathBuf,
    #[source]
    error: io::Error,
}

impl LogReadError {
    pub(crate) fn new(path: impl Into<Utf8PathBuf>, error: io::Error) -> Self {
        Self {
            path: path.into(),
            error,
        }
    }

    /// The log file that couldn't be read.
    pub fn path(&self) -> &Utf8PathBuf {
        &self.path
    }
}

/// The process table couldn't be enumerated at all.
///
/// Individual processes vanishing mid-sweep are not errors: they are counted as skipped.
#[derive(Debug, Error)]
#[error("failed to enumerate running processes")]
pub struct ReapError {
    #[source]
    error: io::Error,
}

impl ReapError {
    pub(crate) fn new(error: io::Error) -> Self {
        Self { error }
    }
}

/// A line is not a causal header.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum HeaderParseError {
    /// The line doesn't have the `<address> {...}` shape.
    #[error("line is not of the form `<address> {{\"<peer>\":<n>, ...}}`")]
    Shape,

    /// The clock map is not valid JSON.
    #[error("vector clock is not a map of addresses to counters: {message}")]
    Clock {
        /// The JSON error message.
        message: String,
    },
}

/// The stage of a scenario that failed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScenarioStage {
    /// Stray-process cleanup before the scenario failed.
    Setup,

    /// A role binary is missing.
    BinaryMissing,

    /// A process could not be started.
    StartFailed,

    /// A log assertion did not hold.
    Assertion,
}

impl fmt::Display for ScenarioStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Setup => write!(f, "setup"),
            Self::BinaryMissing => write!(f, "binary missing"),
            Self::StartFailed => write!(f, "process failed to start"),
            Self::Assertion => write!(f, "assertion failed"),
        }
    }
}

/// A scenario failed.
#[derive(Debug, Error)]
#[error("scenario failed ({stage}): {message}")]
pub struct ScenarioError {
    stage: ScenarioStage,
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ScenarioError {
    /// Creates a new assertion failure.
    pub fn assertion(message: impl Into<String>) -> Self {
        Self {
            stage: ScenarioStage::Assertion,
            message: message.into(),
            source: None,
        }
    }

    pub(crate) fn new(stage: ScenarioStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            source: None,
        }
    }

    pub(crate) fn with_source(
        stage: ScenarioStage,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            stage,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// The stage that failed.
    pub fn stage(&self) -> ScenarioStage {
        self.stage
    }
}

impl From<LaunchError> for ScenarioError {
    fn from(mut error: LaunchError) -> Self {
        // Anything started before the failure is not tracked by a cluster, so clean it up here.
        error.kill_started();
        let stage = match error.kind() {
            LaunchErrorKind::BinaryNotFound(_) => ScenarioStage::BinaryMissing,
            LaunchErrorKind::Start(_) | LaunchErrorKind::Topology(_) => ScenarioStage::StartFailed,
        };
        let message = error.to_string();
        Self::with_source(stage, message, error)
    }
}

impl From<ReapError> for ScenarioError {
    fn from(error: ReapError) -> Self {
        let message = error.to_string();
        Self::with_source(ScenarioStage::Setup, message, error)
    }
}

impl From<LogReadError> for ScenarioError {
    fn from(error: LogReadError) -> Self {
        let message = error.to_string();
        Self::with_source(ScenarioStage::Assertion, message, error)
    }
}
