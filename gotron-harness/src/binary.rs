// Copyright (c) The gotron Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Locating the executables for each role.

use crate::{
    config::{HarnessConfig, RoleKind},
    errors::BinaryNotFound,
};
use camino::{Utf8Path, Utf8PathBuf};
use std::{ffi::OsString, sync::OnceLock};
use tracing::{debug, trace};

/// The binary for one role: an ordered list of candidate paths and, once resolved, the path that
/// was picked.
///
/// Resolution happens at most once; the resolved path never changes afterwards.
#[derive(Debug)]
pub struct BinarySpec {
    role: RoleKind,
    name: String,
    candidates: Vec<Utf8PathBuf>,
    env_candidates: Vec<Utf8PathBuf>,
    resolved: OnceLock<Utf8PathBuf>,
}

impl BinarySpec {
    /// Builds the spec for `role` from the config, reading `env-dirs` from the process
    /// environment.
    pub fn from_config(config: &HarnessConfig, role: RoleKind) -> Self {
        Self::from_config_with_env(config, role, |var| std::env::var_os(var))
    }

    /// Builds the spec for `role`, looking up environment variables through `env`.
    pub fn from_config_with_env(
        config: &HarnessConfig,
        role: RoleKind,
        env: impl Fn(&str) -> Option<OsString>,
    ) -> Self {
        let role_config = config.role(role);
        let suffixes = config.exe_suffixes();

        let candidates = role_config
            .candidates
            .iter()
            .flat_map(|stem| {
                let stem = config.project_root().join(stem);
                with_suffixes(stem, suffixes)
            })
            .collect();

        let env_candidates = role_config
            .env_dirs
            .iter()
            .filter_map(|var| {
                let dir = env(var)?;
                match Utf8PathBuf::try_from(std::path::PathBuf::from(dir)) {
                    Ok(dir) => Some(dir),
                    Err(error) => {
                        debug!("ignoring {var}: not valid UTF-8 ({error})");
                        None
                    }
                }
            })
            .flat_map(|dir| with_suffixes(dir.join(&role_config.name), suffixes))
            .collect();

        Self {
            role,
            name: role_config.name.clone(),
            candidates,
            env_candidates,
            resolved: OnceLock::new(),
        }
    }

    /// The role this binary is for.
    pub fn role(&self) -> RoleKind {
        self.role
    }

    /// The executable stem.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Every candidate in probing order: configured candidates first, then environment-derived
    /// ones.
    pub fn all_candidates(&self) -> impl Iterator<Item = &Utf8Path> {
        self.candidates
            .iter()
            .chain(&self.env_candidates)
            .map(|path| path.as_path())
    }

    /// Returns the first candidate that exists as a regular file.
    ///
    /// The result is cached: later calls return the same path without probing again.
    pub fn resolve(&self) -> Result<&Utf8Path, BinaryNotFound> {
        if let Some(path) = self.resolved.get() {
            return Ok(path);
        }

        let found = self
            .all_candidates()
            .find(|candidate| {
                let is_file = candidate.is_file();
                trace!(role = %self.role, %candidate, is_file, "probing binary candidate");
                is_file
            })
            .map(|path| path.to_owned());

        match found {
            Some(path) => {
                let path = self.resolved.get_or_init(|| path);
                debug!(role = %self.role, %path, "resolved binary");
                Ok(path)
            }
            None => Err(BinaryNotFound::new(
                self.role,
                &self.name,
                self.all_candidates().map(|path| path.to_owned()).collect(),
            )),
        }
    }

    /// Returns the resolved path, if [`Self::resolve`] has succeeded before.
    pub fn resolved(&self) -> Option<&Utf8Path> {
        self.resolved.get().map(|path| path.as_path())
    }
}

fn with_suffixes(stem: Utf8PathBuf, suffixes: &[String]) -> impl Iterator<Item = Utf8PathBuf> {
    suffixes.iter().map(move |suffix| {
        if suffix.is_empty() {
            stem.clone()
        } else {
            let mut path = stem.clone().into_string();
            path.push_str(suffix);
            Utf8PathBuf::from(path)
        }
    })
}
