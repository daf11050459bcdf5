// Copyright (c) The gotron Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deterministic addresses, ports and log file locations for a cluster.
//!
//! Everything here is a pure function of the config, so log file names can be reconstructed
//! without asking the launched processes anything.

use crate::{
    config::{HarnessConfig, PortConfig, RoleKind},
    errors::TopologyError,
};
use camino::{Utf8Path, Utf8PathBuf};
use std::{collections::BTreeSet, fmt};

/// The ports owned by one client.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ClientPorts {
    /// UDP port for peer-to-peer game traffic.
    pub node: u16,

    /// RPC port the matchmaking server calls back on.
    pub rpc: u16,

    /// HTTP port serving the UI.
    pub http: u16,
}

impl ClientPorts {
    /// Returns the ports as an array, in `[node, rpc, http]` order.
    pub fn as_array(&self) -> [u16; 3] {
        [self.node, self.rpc, self.http]
    }
}

impl PortConfig {
    /// Returns the ports for client `index`.
    ///
    /// Each client steps down from the base ports by `stride`, so with the default stride of 3 the
    /// clients occupy adjacent, non-overlapping blocks.
    pub fn client_ports(&self, index: usize) -> Result<ClientPorts, TopologyError> {
        let step = u16::try_from(index)
            .ok()
            .and_then(|index| index.checked_mul(self.stride));
        let derive = |base: u16| {
            step.and_then(|step| base.checked_sub(step))
                .ok_or(TopologyError::PortUnderflow {
                    index,
                    base,
                    stride: self.stride,
                })
        };

        Ok(ClientPorts {
            node: derive(self.node_base)?,
            rpc: derive(self.rpc_base)?,
            http: derive(self.http_base)?,
        })
    }

    /// Checks that a cluster of `client_count` clients fits in the room and that every port in it
    /// is distinct, including the server port.
    pub fn validate_cluster(&self, client_count: usize) -> Result<(), TopologyError> {
        if client_count > self.max_clients {
            return Err(TopologyError::TooManyClients {
                requested: client_count,
                max: self.max_clients,
            });
        }

        let mut seen = BTreeSet::from([self.server]);
        for index in 0..client_count {
            for port in self.client_ports(index)?.as_array() {
                if !seen.insert(port) {
                    return Err(TopologyError::Collision { port });
                }
            }
        }
        Ok(())
    }

    /// Formats `port` as an address on the configured host.
    pub fn address(&self, port: u16) -> String {
        format!("{}:{port}", self.host)
    }
}

/// Where a client sits in a cluster.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientTopology {
    /// The client's index in launch order.
    pub index: usize,

    /// The client's own ports.
    pub ports: ClientPorts,

    /// The matchmaking server port shared by the whole cluster.
    pub server_port: u16,

    host: String,
}

impl ClientTopology {
    /// Computes the topology for client `index`.
    pub fn new(ports: &PortConfig, index: usize) -> Result<Self, TopologyError> {
        Ok(Self {
            index,
            ports: ports.client_ports(index)?,
            server_port: ports.server,
            host: ports.host.clone(),
        })
    }

    /// The address peers use to reach this client, e.g. `localhost:9999`.
    pub fn node_address(&self) -> String {
        format!("{}:{}", self.host, self.ports.node)
    }

    /// The matchmaking server's address.
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.server_port)
    }

    /// The client command line: node, RPC, matchmaking server and HTTP addresses, in that order.
    pub fn args(&self) -> Vec<String> {
        vec![
            self.node_address(),
            format!("{}:{}", self.host, self.ports.rpc),
            self.server_address(),
            format!("{}:{}", self.host, self.ports.http),
        ]
    }
}

/// The two log files a process writes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LogPaths {
    /// Plain-text log.
    pub local: Utf8PathBuf,

    /// Causal log: vector-clock headers alternating with payload lines.
    pub causal: Utf8PathBuf,
}

impl LogPaths {
    /// Suffix of the plain-text log.
    pub const LOCAL_SUFFIX: &'static str = "-local.txt";

    /// Suffix of the causal log.
    pub const CAUSAL_SUFFIX: &'static str = "-Log.txt";

    /// Derives the log paths for a process that identifies itself as `address` and runs in
    /// `working_dir`.
    ///
    /// The programs strip colons from their address to build the file name, since colons are not
    /// allowed in Windows paths.
    pub fn derive(working_dir: &Utf8Path, address: &str) -> Self {
        let stem = address.replace(':', "");
        Self {
            local: working_dir.join(format!("{stem}{}", Self::LOCAL_SUFFIX)),
            causal: working_dir.join(format!("{stem}{}", Self::CAUSAL_SUFFIX)),
        }
    }
}

/// Everything needed to start one process and find its logs afterwards.
///
/// Server and client launches differ only in the values held here.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LaunchSpec {
    /// The role being launched.
    pub role: RoleKind,

    /// A short name for logs and errors, e.g. `client 2`.
    pub label: String,

    /// Positional command-line arguments.
    pub args: Vec<String>,

    /// The directory to run in.
    pub working_dir: Utf8PathBuf,

    /// The address the process uses to identify itself in its logs.
    pub log_address: String,

    /// Where the process will write its logs.
    pub log_paths: LogPaths,
}

impl LaunchSpec {
    /// The launch spec for the matchmaking server listening on `port`.
    pub fn server(config: &HarnessConfig, port: u16) -> Self {
        let ports = config.ports();
        let working_dir = config.working_dir(RoleKind::Server);
        let log_address = format!("{}:{port}", config.role(RoleKind::Server).log_host);
        let log_paths = LogPaths::derive(&working_dir, &log_address);
        Self {
            role: RoleKind::Server,
            label: "server".to_owned(),
            args: vec![ports.address(port)],
            working_dir,
            log_address,
            log_paths,
        }
    }

    /// The launch spec for a client.
    pub fn client(config: &HarnessConfig, topology: &ClientTopology) -> Self {
        let working_dir = config.working_dir(RoleKind::Client);
        let log_address = format!(
            "{}:{}",
            config.role(RoleKind::Client).log_host,
            topology.ports.node
        );
        let log_paths = LogPaths::derive(&working_dir, &log_address);
        Self {
            role: RoleKind::Client,
            label: format!("client {}", topology.index),
            args: topology.args(),
            working_dir,
            log_address,
            log_paths,
        }
    }
}

impl fmt::Display for LaunchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label, self.args.join(" "))
    }
}
