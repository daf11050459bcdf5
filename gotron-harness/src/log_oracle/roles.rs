// Copyright (c) The gotron Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::markers;
use std::fmt;

/// The two mutually exclusive roles a client can hold in a running game.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum NodeRole {
    /// A regular node.
    Node,

    /// The leader.
    Leader,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node => write!(f, "node"),
            Self::Leader => write!(f, "leader"),
        }
    }
}

/// What a newly elected leader is allowed to do afterwards.
///
/// Which of these the client actually guarantees has not been settled, so scenarios state the one
/// they rely on.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ReelectionInvariant {
    /// Once a client becomes leader it never reports the node role again.
    #[default]
    LeaderIsSticky,

    /// A leader may report the node role again later, e.g. after a stale view of the cluster.
    LeaderMayStepDown,
}

/// The roles a client reported, in order, with consecutive repeats collapsed.
///
/// Clients report their role on every tick, so a log normally contains long runs of the same
/// marker.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RoleHistory {
    transitions: Vec<NodeRole>,
}

impl RoleHistory {
    /// Builds the history from plain-text log lines.
    pub fn from_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> Self {
        let mut transitions: Vec<NodeRole> = Vec::new();
        for line in lines {
            let role = if line.contains(markers::LEADER) {
                NodeRole::Leader
            } else if line.contains(markers::NODE) {
                NodeRole::Node
            } else {
                continue;
            };
            if transitions.last() != Some(&role) {
                transitions.push(role);
            }
        }
        Self { transitions }
    }

    /// The distinct roles reported, in order.
    pub fn transitions(&self) -> &[NodeRole] {
        &self.transitions
    }

    /// The role reported last, if any.
    pub fn current(&self) -> Option<NodeRole> {
        self.transitions.last().copied()
    }

    /// Returns true if the client was a node at some point.
    pub fn was_node(&self) -> bool {
        self.transitions.contains(&NodeRole::Node)
    }

    /// Returns true if the client was the leader at some point.
    pub fn became_leader(&self) -> bool {
        self.transitions.contains(&NodeRole::Leader)
    }

    /// Returns true if the client never reported the node role.
    pub fn never_node(&self) -> bool {
        !self.was_node()
    }

    /// Returns true if the client moved directly from `from` to `to` at some point.
    pub fn transitioned(&self, from: NodeRole, to: NodeRole) -> bool {
        self.transitions
            .windows(2)
            .any(|pair| pair[0] == from && pair[1] == to)
    }

    /// Returns true if the client reported the node role after having been leader.
    pub fn reverted_to_node_after_leader(&self) -> bool {
        self.transitioned(NodeRole::Leader, NodeRole::Node)
    }

    /// Returns true if this history is allowed under `invariant`.
    pub fn satisfies(&self, invariant: ReelectionInvariant) -> bool {
        match invariant {
            ReelectionInvariant::LeaderIsSticky => !self.reverted_to_node_after_leader(),
            ReelectionInvariant::LeaderMayStepDown => true,
        }
    }
}

impl fmt::Display for RoleHistory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.transitions.is_empty() {
            return write!(f, "(no role reported)");
        }
        for (i, role) in self.transitions.iter().enumerate() {
            if i > 0 {
                write!(f, " -> ")?;
            }
            write!(f, "{role}")?;
        }
        Ok(())
    }
}
