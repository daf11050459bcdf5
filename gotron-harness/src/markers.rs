// Copyright (c) The gotron Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Log lines written by the matchmaking server and the clients.
//!
//! These are an external contract: they have to match what the programs actually print.

/// Logged by the server when a room starts, either because it filled up or because the countdown
/// expired.
pub const STARTING_GAME: &str = "Starting Game";

/// Logged by a client each time it finds itself holding the leader role.
pub const LEADER: &str = "Im a leader";

/// Logged by a client each time it finds itself holding the node role.
pub const NODE: &str = "Im a node";

/// Logged by the server after each join, e.g. `[Join: 3 players]`.
///
/// The count is never singularized.
pub fn player_count(count: usize) -> String {
    format!("{count} players")
}

/// Causal-log payload written by the server when `node_address` joins.
pub fn server_join(node_address: &str) -> String {
    format!("AD: new node: IP: {node_address}")
}

/// Causal-log payload written by the server when it tells `node_address` to start the game.
pub fn server_start_game(node_address: &str) -> String {
    format!("Rpc Call NodeService.StartGame to {node_address}")
}

/// Causal-log payload written by a client when it asks the server at `server_address` to join.
pub fn client_join(server_address: &str) -> String {
    format!("Rpc Call Context.Join to {server_address}")
}

/// Causal-log payload written by a client when the server at `server_address` starts the game.
pub fn client_start_game(server_address: &str) -> String {
    format!("Rpc Called Start Game to {server_address}")
}

/// Matches an interval update sent to a peer. The capture is the peer's address.
pub(crate) const INTERVAL_UPDATE_SENT: &str = r"^Sending: Interval update.* at ip (.*)\]";

/// Matches a packet received from a peer. The capture is the sending node's address, taken from
/// the JSON body.
pub(crate) const PACKET_RECEIVED: &str = r#"^Received packet from .* \{.*"Node".*"Ip":"([^"]*)","Curr"#;
