// Copyright (c) The gotron Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::OutputOpts;
use camino::Utf8PathBuf;
use clap::Parser;
use color_eyre::{
    Result,
    eyre::{WrapErr, bail},
};
use gotron_harness::{
    cluster::{Cluster, ClusterLauncher},
    config::HarnessConfig,
    process::{KillOutcome, StdioPolicy},
    reaper::{ProcessReaper, SystemProcessTable},
};
use std::time::Duration;
use tracing::{error, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Launch a local matchmaking server and clients for manual testing.
///
/// Clients start one at a time, so client 0 joins first and becomes the leader. Press Ctrl-C to
/// kill everything.
#[derive(Debug, Parser)]
#[command(name = "gotron-faststart", version)]
pub(crate) struct FaststartApp {
    /// Number of clients to launch
    #[arg(value_parser = clap::value_parser!(u8).range(2..=6))]
    client_count: u8,

    /// Directory containing MatchMaking/ and Node-Client/
    #[arg(long, env = "GOTRON_PROJECT_ROOT", default_value = ".", value_name = "DIR")]
    project_root: Utf8PathBuf,

    /// Config file [default: <project-root>/.config/gotron.toml]
    #[arg(long, value_name = "PATH")]
    config: Option<Utf8PathBuf>,

    /// Port for the matchmaking server [default: from config]
    #[arg(long, value_name = "PORT")]
    server_port: Option<u16>,

    /// Show the output of the launched programs
    #[arg(long)]
    show_output: bool,

    #[command(flatten)]
    output: OutputOpts,
}

impl FaststartApp {
    pub(crate) fn init_output(&self) {
        self.output.init();
    }

    pub(crate) fn exec(self) -> Result<()> {
        let config = HarnessConfig::from_sources(&self.project_root, self.config.as_deref())?;
        let reaper = ProcessReaper::from_config(&config);
        let table = SystemProcessTable;

        let summary = reaper.reap_stray(&table)?;
        if summary.reaped > 0 {
            info!(%summary, "killed processes left over from an earlier run");
        }

        let mut launcher = ClusterLauncher::new(&config);
        if self.show_output {
            launcher.set_stdio(StdioPolicy::Inherit);
        }
        let server_port = self.server_port.unwrap_or(config.ports().server);
        let mut cluster = launcher
            .launch(server_port, usize::from(self.client_count))
            .map_err(|mut error| {
                error.kill_started();
                error
            })
            .wrap_err("failed to launch cluster")?;
        info!(
            server_port,
            clients = cluster.clients().len(),
            "cluster running, press Ctrl-C to stop"
        );

        let failed_members = match wait_or_interrupt(&mut cluster)? {
            WaitOutcome::Interrupted => {
                info!("interrupted, killing cluster");
                0
            }
            WaitOutcome::AllExited => {
                let failed = cluster.unsuccessful_exits();
                for (label, status) in &failed {
                    error!("{label} exited unsuccessfully: {status}");
                }
                failed.len()
            }
        };
        for (label, outcome) in cluster.kill_all() {
            if let KillOutcome::Error(error) = outcome {
                warn!("failed to kill {label}: {error}");
            }
        }
        let summary = reaper.reap_stray(&table)?;
        info!(%summary, "stray process sweep finished");

        if failed_members > 0 {
            bail!("{failed_members} cluster member(s) exited unsuccessfully");
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum WaitOutcome {
    Interrupted,
    AllExited,
}

/// Waits until every member of the cluster has exited, or until Ctrl-C.
fn wait_or_interrupt(cluster: &mut Cluster) -> Result<WaitOutcome> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .wrap_err("failed to start async runtime")?;

    runtime.block_on(async {
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let mut interval = tokio::time::interval(POLL_INTERVAL);

        loop {
            tokio::select! {
                result = &mut ctrl_c => {
                    result.wrap_err("failed to listen for Ctrl-C")?;
                    return Ok::<_, color_eyre::Report>(WaitOutcome::Interrupted);
                }
                _ = interval.tick() => {
                    let statuses = cluster.try_wait_all()?;
                    if statuses.iter().all(Option::is_some) {
                        info!("every cluster member has exited");
                        return Ok(WaitOutcome::AllExited);
                    }
                }
            }
        }
    })
}
