// Copyright (c) The gotron Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Harness configuration.
//!
//! The config is built once from an embedded default, optionally layered with a repository
//! config file, and then passed by reference to everything that needs it.

use crate::errors::{ConfigParseError, ConfigParseErrorKind};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigBuilder, ConfigError, File, FileFormat, builder::DefaultState};
use serde::Deserialize;
use std::{collections::BTreeSet, fmt, time::Duration};
use tracing::warn;

/// One of the two kinds of process in a cluster.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum RoleKind {
    /// The matchmaking server.
    Server,

    /// A peer client.
    Client,
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server => write!(f, "server"),
            Self::Client => write!(f, "client"),
        }
    }
}

/// Overall configuration for the harness.
#[derive(Clone, Debug)]
pub struct HarnessConfig {
    project_root: Utf8PathBuf,
    exe_suffixes: Vec<String>,
    server: RoleConfig,
    client: RoleConfig,
    ports: PortConfig,
    delays: SettleDelays,
}

impl HarnessConfig {
    /// The default location of the config within the project root.
    pub const CONFIG_PATH: &'static str = ".config/gotron.toml";

    /// Contains the default config as a TOML file.
    ///
    /// Repository-specific configuration is layered on top of the default config.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../default-config.toml");

    /// Reads the config from the given file, or if not specified from `.config/gotron.toml` in the
    /// project root.
    ///
    /// If no config file is specified and the project root doesn't have `.config/gotron.toml`,
    /// uses the default config options.
    pub fn from_sources(
        project_root: impl Into<Utf8PathBuf>,
        config_file: Option<&Utf8Path>,
    ) -> Result<Self, ConfigParseError> {
        let project_root = project_root.into();
        let (config_file, source) = match config_file {
            Some(file) => (file.to_owned(), File::new(file.as_str(), FileFormat::Toml)),
            None => {
                let config_file = project_root.join(Self::CONFIG_PATH);
                let source = File::new(config_file.as_str(), FileFormat::Toml).required(false);
                (config_file, source)
            }
        };

        let builder = Self::make_default_config().add_source(source);
        let (deserialized, unknown) = Self::build_and_deserialize_config(&builder)
            .map_err(|kind| ConfigParseError::new(&config_file, kind))?;

        if !unknown.is_empty() {
            warn!(
                "ignoring unknown config keys in `{config_file}`: {}",
                unknown.into_iter().collect::<Vec<_>>().join(", ")
            );
        }

        deserialized
            .validate()
            .map_err(|kind| ConfigParseError::new(&config_file, kind))?;

        Ok(deserialized.into_config(project_root))
    }

    /// Returns the default config, rooted at `project_root`.
    pub fn default_config(project_root: impl Into<Utf8PathBuf>) -> Self {
        let builder = Self::make_default_config();
        let (deserialized, _) = Self::build_and_deserialize_config(&builder)
            .expect("default config is always valid");
        deserialized.into_config(project_root.into())
    }

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    fn build_and_deserialize_config(
        builder: &ConfigBuilder<DefaultState>,
    ) -> Result<(HarnessConfigDeserialize, BTreeSet<String>), ConfigParseErrorKind> {
        let config = builder
            .build_cloned()
            .map_err(|error| ConfigParseErrorKind::BuildError(Box::new(error)))?;

        let mut ignored = BTreeSet::new();
        let mut cb = |path: serde_ignored::Path| {
            ignored.insert(path.to_string());
        };
        let ignored_de = serde_ignored::Deserializer::new(config, &mut cb);
        let config: HarnessConfigDeserialize = serde_path_to_error::deserialize(ignored_de)
            .map_err(|error| {
                // The config crate also reports the key: drop it in favor of the serde path.
                let path = error.path().clone();
                let config_error = error.into_inner();
                let error = match config_error {
                    ConfigError::At { error, .. } => *error,
                    other => other,
                };
                ConfigParseErrorKind::DeserializeError(Box::new(serde_path_to_error::Error::new(
                    path, error,
                )))
            })?;

        Ok((config, ignored))
    }

    /// The project root that relative paths are resolved against.
    pub fn project_root(&self) -> &Utf8Path {
        &self.project_root
    }

    /// Executable suffixes tried for every candidate stem, in order.
    pub fn exe_suffixes(&self) -> &[String] {
        &self.exe_suffixes
    }

    /// Returns the configuration for a role.
    pub fn role(&self, role: RoleKind) -> &RoleConfig {
        match role {
            RoleKind::Server => &self.server,
            RoleKind::Client => &self.client,
        }
    }

    /// Returns the absolute working directory for a role.
    pub fn working_dir(&self, role: RoleKind) -> Utf8PathBuf {
        self.project_root.join(&self.role(role).working_dir)
    }

    /// Port assignment for clusters.
    pub fn ports(&self) -> &PortConfig {
        &self.ports
    }

    /// Every settle delay used by the harness.
    pub fn delays(&self) -> &SettleDelays {
        &self.delays
    }

    /// Replaces the settle delays. Mostly useful for tests against fast fake binaries.
    pub fn set_delays(&mut self, delays: SettleDelays) -> &mut Self {
        self.delays = delays;
        self
    }

    /// Every executable name the stray-process sweep should match, including suffix variants.
    pub fn role_binary_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for role in [&self.server, &self.client] {
            for suffix in &self.exe_suffixes {
                let name = format!("{}{suffix}", role.name);
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        names
    }
}

/// Configuration for one role's binary and its runtime environment.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct RoleConfig {
    /// The executable stem, without any suffix.
    pub name: String,

    /// The directory the process runs in, relative to the project root.
    pub working_dir: Utf8PathBuf,

    /// Candidate stems, relative to the project root, in probing order.
    #[serde(default)]
    pub candidates: Vec<Utf8PathBuf>,

    /// Environment variables naming extra directories to look for `name` in.
    #[serde(default)]
    pub env_dirs: Vec<String>,

    /// The host component the process uses to name its own log files.
    pub log_host: String,
}

/// Port assignment for a cluster.
///
/// Client `i` gets `node_base - stride * i`, `rpc_base - stride * i` and
/// `http_base - stride * i`.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct PortConfig {
    /// The host used in every address passed on the command line.
    pub host: String,

    /// The matchmaking server port.
    pub server: u16,

    /// Node port of client 0.
    pub node_base: u16,

    /// RPC port of client 0.
    pub rpc_base: u16,

    /// HTTP port of client 0.
    pub http_base: u16,

    /// Distance between the ports of consecutive clients.
    pub stride: u16,

    /// The room size limit of the matchmaking server.
    pub max_clients: usize,
}

/// Every settle delay the harness imposes between lifecycle steps.
///
/// The target programs expose no readiness signal, so these are the only knobs for tuning
/// flakiness.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct SettleDelays {
    /// After starting the server, before starting any client.
    #[serde(with = "humantime_serde")]
    pub server_start: Duration,

    /// Between consecutive client launches.
    #[serde(with = "humantime_serde")]
    pub client_stagger: Duration,

    /// For clients to register with the server and for the server to log it.
    #[serde(with = "humantime_serde")]
    pub registration: Duration,

    /// After killing a process, before reading logs.
    #[serde(with = "humantime_serde")]
    pub post_kill: Duration,

    /// For leader re-election to complete after a leader is killed.
    #[serde(with = "humantime_serde")]
    pub reelection: Duration,

    /// The matchmaking server's countdown before starting an under-full room. The countdown
    /// starts when the server does.
    #[serde(with = "humantime_serde")]
    pub game_start_timeout: Duration,

    /// After a game starts, for clients to take up their node and leader roles.
    #[serde(with = "humantime_serde")]
    pub game_running: Duration,
}

impl SettleDelays {
    /// Returns a set of delays where every delay is `delay`.
    pub fn uniform(delay: Duration) -> Self {
        Self {
            server_start: delay,
            client_stagger: delay,
            registration: delay,
            post_kill: delay,
            reelection: delay,
            game_start_timeout: delay,
            game_running: delay,
        }
    }

    /// How long after server start a game started by the countdown is running, with roles
    /// assigned. Faults injected earlier hit a room that never started playing.
    pub fn game_running_at(&self) -> Duration {
        self.game_start_timeout + self.game_running
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct HarnessConfigDeserialize {
    exe_suffixes: Vec<String>,
    server: RoleConfig,
    client: RoleConfig,
    ports: PortConfig,
    delays: SettleDelays,
}

impl HarnessConfigDeserialize {
    fn validate(&self) -> Result<(), ConfigParseErrorKind> {
        if self.exe_suffixes.is_empty() {
            return Err(ConfigParseErrorKind::InvalidValue {
                key: "exe-suffixes",
                reason: "at least one suffix (possibly empty) is required".to_owned(),
            });
        }
        for (key, role) in [("server", &self.server), ("client", &self.client)] {
            if role.name.is_empty() {
                return Err(ConfigParseErrorKind::InvalidValue {
                    key,
                    reason: "`name` must not be empty".to_owned(),
                });
            }
            if role.candidates.is_empty() && role.env_dirs.is_empty() {
                return Err(ConfigParseErrorKind::InvalidValue {
                    key,
                    reason: "no `candidates` or `env-dirs` to search".to_owned(),
                });
            }
        }
        if self.ports.stride == 0 {
            return Err(ConfigParseErrorKind::InvalidValue {
                key: "ports.stride",
                reason: "must be at least 1".to_owned(),
            });
        }
        if self.ports.max_clients == 0 {
            return Err(ConfigParseErrorKind::InvalidValue {
                key: "ports.max-clients",
                reason: "must be at least 1".to_owned(),
            });
        }
        Ok(())
    }

    fn into_config(self, project_root: Utf8PathBuf) -> HarnessConfig {
        HarnessConfig {
            project_root,
            exe_suffixes: self.exe_suffixes,
            server: self.server,
            client: self.client,
            ports: self.ports,
            delays: self.delays,
        }
    }
}
