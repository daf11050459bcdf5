// Copyright (c) The gotron Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scaffolding shared by every end-to-end scenario.
//!
//! A [`Scenario`] sweeps stray role processes on setup, tracks the cluster it launches, and on
//! drop kills everything it tracks and sweeps again, however the scenario ended.

use crate::{
    cluster::{Cluster, ClusterLauncher, ClusterMember},
    config::{HarnessConfig, SettleDelays},
    errors::{ScenarioError, ScenarioStage},
    log_oracle::{CausalLog, LocalLog, LogOracle},
    process::KillOutcome,
    reaper::{ProcessReaper, ProcessTable, ReapSummary, SystemProcessTable},
    topology::LogPaths,
};
use std::{thread, time::Duration};
use tracing::{debug, info, warn};

/// One end-to-end scenario against a single cluster.
#[derive(Debug)]
pub struct Scenario<'cfg, T: ProcessTable = SystemProcessTable> {
    config: &'cfg HarnessConfig,
    launcher: ClusterLauncher<'cfg>,
    oracle: LogOracle<'cfg>,
    reaper: ProcessReaper,
    table: T,
    cluster: Option<Cluster>,
    torn_down: bool,
}

impl<'cfg> Scenario<'cfg> {
    /// Sets up a scenario against the system process table.
    pub fn setup(config: &'cfg HarnessConfig) -> Result<Self, ScenarioError> {
        Self::setup_with_table(config, SystemProcessTable)
    }
}

impl<'cfg, T: ProcessTable> Scenario<'cfg, T> {
    /// Sets up a scenario, sweeping strays from `table` first.
    pub fn setup_with_table(config: &'cfg HarnessConfig, table: T) -> Result<Self, ScenarioError> {
        let reaper = ProcessReaper::from_config(config);
        let summary = reaper.reap_stray(&table)?;
        if summary.reaped > 0 {
            info!(%summary, "cleaned up stray processes from an earlier run");
        }

        Ok(Self {
            config,
            launcher: ClusterLauncher::new(config),
            oracle: LogOracle::new(config),
            reaper,
            table,
            cluster: None,
            torn_down: false,
        })
    }

    /// The config the scenario runs with.
    pub fn config(&self) -> &'cfg HarnessConfig {
        self.config
    }

    /// The configured settle delays.
    pub fn delays(&self) -> SettleDelays {
        *self.config.delays()
    }

    /// The launcher, e.g. to change the stdio policy before launching.
    pub fn launcher_mut(&mut self) -> &mut ClusterLauncher<'cfg> {
        &mut self.launcher
    }

    /// The log oracle.
    pub fn oracle(&self) -> &LogOracle<'cfg> {
        &self.oracle
    }

    /// Launches a server on the configured port and `client_count` clients.
    ///
    /// A scenario runs a single cluster: launching a second one is an error.
    pub fn launch(&mut self, client_count: usize) -> Result<&mut Cluster, ScenarioError> {
        if self.cluster.is_some() {
            return Err(ScenarioError::new(
                ScenarioStage::Setup,
                "a cluster is already running in this scenario",
            ));
        }
        let cluster = self
            .launcher
            .launch(self.config.ports().server, client_count)?;
        Ok(self.cluster.insert(cluster))
    }

    /// Adds one client to the running cluster.
    pub fn add_client(&mut self) -> Result<&ClusterMember, ScenarioError> {
        let cluster = self.cluster.as_mut().ok_or_else(not_launched)?;
        Ok(self.launcher.launch_client(cluster)?)
    }

    /// The running cluster.
    pub fn cluster(&self) -> Result<&Cluster, ScenarioError> {
        self.cluster.as_ref().ok_or_else(not_launched)
    }

    /// The running cluster, mutably.
    pub fn cluster_mut(&mut self) -> Result<&mut Cluster, ScenarioError> {
        self.cluster.as_mut().ok_or_else(not_launched)
    }

    /// Sleeps for `delay`, letting the cluster make progress.
    pub fn settle(&self, delay: Duration) {
        debug!(?delay, "scenario settling");
        thread::sleep(delay);
    }

    /// Sleeps until `delay` has passed since the server was started. Returns at once if it
    /// already has.
    ///
    /// The server's game countdown runs from its own start, so waits that have to land before or
    /// after a game starts are measured from there rather than from the last launch.
    pub fn settle_since_server_start(&self, delay: Duration) -> Result<(), ScenarioError> {
        let elapsed = self.cluster()?.server_started_at().elapsed();
        let remaining = delay.saturating_sub(elapsed);
        if !remaining.is_zero() {
            self.settle(remaining);
        }
        Ok(())
    }

    /// Kills client `index`.
    pub fn kill_client(&mut self, index: usize) -> Result<KillOutcome, ScenarioError> {
        self.cluster_mut()?
            .kill_client(index)
            .ok_or_else(|| no_such_client(index))
    }

    /// Reads the server's plain-text log.
    pub fn server_local_log(&self) -> Result<LocalLog, ScenarioError> {
        let paths = self.server_log_paths()?;
        Ok(self.oracle.read_local(&paths)?)
    }

    /// Reads the server's causal log.
    pub fn server_causal_log(&self) -> Result<CausalLog<'_>, ScenarioError> {
        let paths = self.server_log_paths()?;
        Ok(self.oracle.read_causal(&paths)?)
    }

    /// Reads client `index`'s plain-text log.
    pub fn client_local_log(&self, index: usize) -> Result<LocalLog, ScenarioError> {
        let paths = self.client_log_paths(index)?;
        Ok(self.oracle.read_local(&paths)?)
    }

    /// Reads client `index`'s causal log.
    pub fn client_causal_log(&self, index: usize) -> Result<CausalLog<'_>, ScenarioError> {
        let paths = self.client_log_paths(index)?;
        Ok(self.oracle.read_causal(&paths)?)
    }

    fn server_log_paths(&self) -> Result<LogPaths, ScenarioError> {
        Ok(self.cluster()?.server().log_paths().clone())
    }

    fn client_log_paths(&self, index: usize) -> Result<LogPaths, ScenarioError> {
        let client = self.cluster()?.client(index).ok_or_else(|| no_such_client(index))?;
        Ok(client.log_paths().clone())
    }

    /// Fails the scenario with `message` unless `condition` holds.
    pub fn check(
        &self,
        condition: bool,
        message: impl FnOnce() -> String,
    ) -> Result<(), ScenarioError> {
        if condition {
            Ok(())
        } else {
            Err(ScenarioError::assertion(message()))
        }
    }

    /// Kills every tracked process, then sweeps strays.
    ///
    /// Dropping the scenario does the same thing, logging the summary instead of returning it.
    pub fn teardown(mut self) -> Result<ReapSummary, ScenarioError> {
        self.kill_tracked();
        self.torn_down = true;
        Ok(self.reaper.reap_stray(&self.table)?)
    }

    fn kill_tracked(&mut self) {
        if let Some(cluster) = &mut self.cluster {
            for (label, outcome) in cluster.kill_all() {
                if let KillOutcome::Error(error) = outcome {
                    warn!(label, "failed to kill cluster member during teardown: {error}");
                }
            }
        }
    }
}

impl<T: ProcessTable> Drop for Scenario<'_, T> {
    fn drop(&mut self) {
        if self.torn_down {
            return;
        }
        self.kill_tracked();
        match self.reaper.reap_stray(&self.table) {
            Ok(summary) => debug!(%summary, "scenario teardown finished"),
            Err(error) => warn!("scenario teardown sweep failed: {error}"),
        }
    }
}

fn not_launched() -> ScenarioError {
    ScenarioError::new(ScenarioStage::Setup, "no cluster has been launched")
}

fn no_such_client(index: usize) -> ScenarioError {
    ScenarioError::new(
        ScenarioStage::Setup,
        format!("client {index} was never launched"),
    )
}
