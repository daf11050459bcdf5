// Copyright (c) The gotron Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bringing up a matchmaking server and its clients.

use crate::{
    binary::BinarySpec,
    config::{HarnessConfig, PortConfig, RoleKind},
    errors::{LaunchError, LaunchErrorKind, LaunchStage, WaitError},
    process::{KillOutcome, ProcessHandle, StdioPolicy},
    topology::{ClientTopology, LaunchSpec, LogPaths},
};
use std::{
    process::ExitStatus,
    thread,
    time::{Duration, Instant},
};
use tracing::{debug, info};

/// Starts clusters: one server, then clients in index order with a settle delay between each.
#[derive(Debug)]
pub struct ClusterLauncher<'cfg> {
    config: &'cfg HarnessConfig,
    server: BinarySpec,
    client: BinarySpec,
    stdio: StdioPolicy,
}

impl<'cfg> ClusterLauncher<'cfg> {
    /// Creates a launcher that finds binaries as described by `config`.
    ///
    /// Binaries are resolved lazily, on first launch.
    pub fn new(config: &'cfg HarnessConfig) -> Self {
        Self::with_binaries(
            config,
            BinarySpec::from_config(config, RoleKind::Server),
            BinarySpec::from_config(config, RoleKind::Client),
        )
    }

    /// Creates a launcher with explicitly constructed binary specs.
    pub fn with_binaries(
        config: &'cfg HarnessConfig,
        server: BinarySpec,
        client: BinarySpec,
    ) -> Self {
        Self {
            config,
            server,
            client,
            stdio: StdioPolicy::default(),
        }
    }

    /// Sets the stdio policy for every process launched from now on.
    pub fn set_stdio(&mut self, stdio: StdioPolicy) -> &mut Self {
        self.stdio = stdio;
        self
    }

    /// The config this launcher was created with.
    pub fn config(&self) -> &'cfg HarnessConfig {
        self.config
    }

    /// The binary spec for `role`.
    pub fn binary(&self, role: RoleKind) -> &BinarySpec {
        match role {
            RoleKind::Server => &self.server,
            RoleKind::Client => &self.client,
        }
    }

    /// Starts a server on `server_port`, then `client_count` clients.
    ///
    /// Sleeps for the server-start delay after the server, and for the client-stagger delay after
    /// each client. If any stage fails, the processes started so far are returned inside the
    /// error.
    pub fn launch(&self, server_port: u16, client_count: usize) -> Result<Cluster, LaunchError> {
        let ports = PortConfig {
            server: server_port,
            ..self.config.ports().clone()
        };
        ports
            .validate_cluster(client_count)
            .map_err(|error| LaunchError::new(LaunchStage::Topology, error, Vec::new()))?;

        info!(server_port, client_count, "launching cluster");
        let server = self
            .start_member(RoleKind::Server, LaunchSpec::server(self.config, server_port), None)
            .map_err(|kind| LaunchError::new(LaunchStage::Server, kind, Vec::new()))?;
        let mut cluster = Cluster {
            ports,
            server,
            server_started_at: Instant::now(),
            clients: Vec::new(),
        };
        self.settle(cluster.server.label(), self.config.delays().server_start);

        for _ in 0..client_count {
            if let Err((stage, kind)) = self.add_client(&mut cluster) {
                return Err(LaunchError::new(stage, kind, cluster.into_handles()));
            }
        }
        Ok(cluster)
    }

    /// Starts one more client in an existing cluster, with the next free index.
    ///
    /// On failure the cluster is left as it was, so the error never holds any handles.
    pub fn launch_client<'c>(
        &self,
        cluster: &'c mut Cluster,
    ) -> Result<&'c ClusterMember, LaunchError> {
        let index = self
            .add_client(cluster)
            .map_err(|(stage, kind)| LaunchError::new(stage, kind, Vec::new()))?;
        Ok(&cluster.clients[index])
    }

    fn add_client(&self, cluster: &mut Cluster) -> Result<usize, (LaunchStage, LaunchErrorKind)> {
        let index = cluster.clients.len();
        let stage = LaunchStage::Client(index);
        cluster
            .ports
            .validate_cluster(index + 1)
            .map_err(|error| (stage, error.into()))?;
        let topology = ClientTopology::new(&cluster.ports, index).map_err(|error| (stage, error.into()))?;
        let spec = LaunchSpec::client(self.config, &topology);

        let member = self
            .start_member(RoleKind::Client, spec, Some(topology))
            .map_err(|kind| (stage, kind))?;
        cluster.clients.push(member);
        self.settle(&stage.to_string(), self.config.delays().client_stagger);
        Ok(index)
    }

    fn start_member(
        &self,
        role: RoleKind,
        spec: LaunchSpec,
        topology: Option<ClientTopology>,
    ) -> Result<ClusterMember, LaunchErrorKind> {
        let program = self.binary(role).resolve()?;
        let mut handle = ProcessHandle::new(role, spec.label.clone(), program);
        handle.start(&spec.args, &spec.working_dir, self.stdio)?;
        info!(%spec, "started {role}");
        Ok(ClusterMember {
            spec,
            topology,
            handle,
        })
    }

    fn settle(&self, label: &str, delay: Duration) {
        if !delay.is_zero() {
            debug!(label, ?delay, "settling");
            thread::sleep(delay);
        }
    }
}

/// One launched process, with everything needed to find its logs.
#[derive(Debug)]
pub struct ClusterMember {
    spec: LaunchSpec,
    topology: Option<ClientTopology>,
    handle: ProcessHandle,
}

impl ClusterMember {
    /// The role this member plays.
    pub fn role(&self) -> RoleKind {
        self.spec.role
    }

    /// A short name for the member, e.g. `client 1`.
    pub fn label(&self) -> &str {
        &self.spec.label
    }

    /// How the member was launched.
    pub fn spec(&self) -> &LaunchSpec {
        &self.spec
    }

    /// The member's position in the cluster. `None` for the server.
    pub fn topology(&self) -> Option<&ClientTopology> {
        self.topology.as_ref()
    }

    /// The address the member uses to identify itself in its logs.
    pub fn log_address(&self) -> &str {
        &self.spec.log_address
    }

    /// Where the member writes its logs.
    pub fn log_paths(&self) -> &LogPaths {
        &self.spec.log_paths
    }

    /// The process handle.
    pub fn handle(&self) -> &ProcessHandle {
        &self.handle
    }

    /// The process handle, mutably.
    pub fn handle_mut(&mut self) -> &mut ProcessHandle {
        &mut self.handle
    }

    /// Kills the member's process. See [`ProcessHandle::kill`].
    pub fn kill(&mut self) -> KillOutcome {
        self.handle.kill()
    }
}

/// A server and its clients, in launch order.
#[derive(Debug)]
pub struct Cluster {
    ports: PortConfig,
    server: ClusterMember,
    server_started_at: Instant,
    clients: Vec<ClusterMember>,
}

impl Cluster {
    /// The ports the cluster was laid out with.
    pub fn ports(&self) -> &PortConfig {
        &self.ports
    }

    /// The matchmaking server.
    pub fn server(&self) -> &ClusterMember {
        &self.server
    }

    /// The matchmaking server, mutably.
    pub fn server_mut(&mut self) -> &mut ClusterMember {
        &mut self.server
    }

    /// When the server was started. The server's game countdown runs from here.
    pub fn server_started_at(&self) -> Instant {
        self.server_started_at
    }

    /// The clients, in index order.
    pub fn clients(&self) -> &[ClusterMember] {
        &self.clients
    }

    /// The client with `index`, if it was launched.
    pub fn client(&self, index: usize) -> Option<&ClusterMember> {
        self.clients.get(index)
    }

    /// The client with `index`, mutably.
    pub fn client_mut(&mut self, index: usize) -> Option<&mut ClusterMember> {
        self.clients.get_mut(index)
    }

    /// Every member, server first.
    pub fn members(&self) -> impl Iterator<Item = &ClusterMember> {
        std::iter::once(&self.server).chain(&self.clients)
    }

    /// Every member, server first, mutably.
    pub fn members_mut(&mut self) -> impl Iterator<Item = &mut ClusterMember> {
        std::iter::once(&mut self.server).chain(&mut self.clients)
    }

    /// Kills client `index`. Returns `None` if no such client was launched.
    pub fn kill_client(&mut self, index: usize) -> Option<KillOutcome> {
        let client = self.clients.get_mut(index)?;
        Some(client.kill())
    }

    /// Kills every member, clients first, and returns each outcome labeled by member.
    pub fn kill_all(&mut self) -> Vec<(String, KillOutcome)> {
        let mut outcomes = Vec::with_capacity(self.clients.len() + 1);
        for member in self.clients.iter_mut().chain(std::iter::once(&mut self.server)) {
            let outcome = member.kill();
            debug!(label = member.label(), %outcome, "tore down cluster member");
            outcomes.push((member.label().to_owned(), outcome));
        }
        outcomes
    }

    /// Blocks until every member exits. Statuses are returned server first.
    pub fn wait_all(&mut self) -> Result<Vec<ExitStatus>, WaitError> {
        self.members_mut()
            .map(|member| member.handle.wait())
            .collect()
    }

    /// Polls every member without blocking. Statuses are returned server first, `None` for
    /// members still running.
    pub fn try_wait_all(&mut self) -> Result<Vec<Option<ExitStatus>>, WaitError> {
        self.members_mut()
            .map(|member| member.handle.try_wait())
            .collect()
    }

    /// Members known to have exited with a failure status, server first.
    ///
    /// Only exits already observed through a wait or a kill are reported.
    pub fn unsuccessful_exits(&self) -> Vec<(&str, ExitStatus)> {
        self.members()
            .filter_map(|member| {
                let status = member.handle.exit_status()?;
                (!status.success()).then_some((member.label(), status))
            })
            .collect()
    }

    /// Consumes the cluster, returning its handles server first.
    pub fn into_handles(self) -> Vec<ProcessHandle> {
        std::iter::once(self.server)
            .chain(self.clients)
            .map(|member| member.handle)
            .collect()
    }
}
