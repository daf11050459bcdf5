// Copyright (c) The gotron Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end scenarios against the real matchmaking server and clients.
//!
//! Every scenario relies on settle delays rather than readiness signals, so a slow machine can
//! make them fail. Tune `[delays]` in the project's `.config/gotron.toml` rather than editing
//! these tests.
//!
//! The server's game countdown runs from server start, so waits around game start are measured
//! from there. Clients only report their role once a game is running, so node failures are
//! injected after `game_running_at()`.

use crate::fixtures::real_project;
use gotron_harness::{
    errors::ScenarioError,
    log_oracle::ReelectionInvariant,
    markers,
    scenario::Scenario,
};

type ScenarioResult = Result<(), ScenarioError>;

/// What a newly elected leader is assumed to guarantee.
const REELECTION: ReelectionInvariant = ReelectionInvariant::LeaderIsSticky;

fn check_player_counts(
    scenario: &Scenario<'_>,
    counts: &[usize],
    game_started: bool,
) -> ScenarioResult {
    let log = scenario.server_local_log()?;
    for &count in counts {
        scenario.check(log.contains_player_count(count), || {
            format!("server never logged {}", markers::player_count(count))
        })?;
    }
    scenario.check(log.contains(markers::STARTING_GAME) == game_started, || {
        if game_started {
            "game should have started".to_owned()
        } else {
            "game should not have started".to_owned()
        }
    })
}

/// Client `index` led from the start and never reported being a node.
fn check_kept_leadership(scenario: &Scenario<'_>, index: usize) -> ScenarioResult {
    let history = scenario.client_local_log(index)?.role_history();
    scenario.check(history.became_leader() && history.never_node(), || {
        format!("client {index} should have stayed the leader, but was: {history}")
    })
}

/// Client `index` went from node to leader, within the re-election guarantee.
fn check_took_over(scenario: &Scenario<'_>, index: usize) -> ScenarioResult {
    let history = scenario.client_local_log(index)?.role_history();
    scenario.check(history.was_node() && history.became_leader(), || {
        format!("client {index} should have become the leader, but was: {history}")
    })?;
    scenario.check(history.satisfies(REELECTION), || {
        format!("client {index} violated {REELECTION:?}: {history}")
    })
}

/// Client `index` was a node throughout.
fn check_stayed_node(scenario: &Scenario<'_>, index: usize) -> ScenarioResult {
    let history = scenario.client_local_log(index)?.role_history();
    scenario.check(history.was_node() && !history.became_leader(), || {
        format!("client {index} should have stayed a node, but was: {history}")
    })
}

#[test]
#[ignore]
fn connect_disconnect() -> ScenarioResult {
    let (_serial, config) = real_project();
    let mut scenario = Scenario::setup(&config)?;
    let delays = scenario.delays();

    scenario.launch(1)?;
    scenario.settle(delays.registration);
    scenario.kill_client(0)?;
    scenario.settle(delays.post_kill);

    check_player_counts(&scenario, &[1], false)
}

#[test]
#[ignore]
fn too_little_players() -> ScenarioResult {
    let (_serial, config) = real_project();
    let mut scenario = Scenario::setup(&config)?;
    let delays = scenario.delays();

    scenario.launch(1)?;
    // A lone player never gets a game, even after the countdown.
    scenario.settle_since_server_start(delays.game_start_timeout + delays.registration)?;

    check_player_counts(&scenario, &[1], false)
}

#[test]
#[ignore]
fn start_by_max_players() -> ScenarioResult {
    let (_serial, config) = real_project();
    let mut scenario = Scenario::setup(&config)?;
    let delays = scenario.delays();

    let max_clients = config.ports().max_clients;
    scenario.launch(max_clients)?;
    scenario.settle(delays.registration);

    let log = scenario.server_local_log()?;
    scenario.check(log.player_counts_in_order(max_clients), || {
        format!("server should have logged 1 to {max_clients} players, in order")
    })?;
    check_player_counts(&scenario, &[max_clients], true)
}

#[test]
#[ignore]
fn start_by_timeout() -> ScenarioResult {
    let (_serial, config) = real_project();
    let mut scenario = Scenario::setup(&config)?;
    let delays = scenario.delays();

    scenario.launch(1)?;
    scenario.settle_since_server_start(delays.game_start_timeout / 2)?;
    scenario.add_client()?;
    scenario.settle_since_server_start(delays.game_start_timeout + delays.registration)?;

    check_player_counts(&scenario, &[1, 2], true)
}

#[test]
#[ignore]
fn disconnect_before_game_start() -> ScenarioResult {
    let (_serial, config) = real_project();
    let mut scenario = Scenario::setup(&config)?;
    let delays = scenario.delays();

    scenario.launch(1)?;
    scenario.settle(delays.registration);
    scenario.add_client()?;
    scenario.settle(delays.registration);
    scenario.kill_client(0)?;
    scenario.settle(delays.post_kill);
    // Only the countdown can start an under-full room, so wait it out: with one player left, it
    // must not start a game.
    scenario.settle_since_server_start(delays.game_running_at())?;

    check_player_counts(&scenario, &[1, 2], false)
}

#[test]
#[ignore]
fn leader_failure() -> ScenarioResult {
    let (_serial, config) = real_project();
    let mut scenario = Scenario::setup(&config)?;
    let delays = scenario.delays();

    // Clients join one at a time, so client 0 leads.
    scenario.launch(3)?;
    scenario.settle_since_server_start(delays.game_running_at())?;
    scenario.kill_client(0)?;
    scenario.settle(delays.reelection);

    check_took_over(&scenario, 1)?;
    check_stayed_node(&scenario, 2)
}

#[test]
#[ignore]
fn client_failure() -> ScenarioResult {
    let (_serial, config) = real_project();
    let mut scenario = Scenario::setup(&config)?;
    let delays = scenario.delays();

    scenario.launch(3)?;
    scenario.settle_since_server_start(delays.game_running_at())?;
    scenario.kill_client(1)?;
    // Re-election shouldn't happen, but give it the chance to.
    scenario.settle(delays.reelection);

    check_kept_leadership(&scenario, 0)?;
    check_stayed_node(&scenario, 2)
}

#[test]
#[ignore]
fn multi_client_failure() -> ScenarioResult {
    let (_serial, config) = real_project();
    let mut scenario = Scenario::setup(&config)?;
    let delays = scenario.delays();

    scenario.launch(4)?;
    scenario.settle_since_server_start(delays.game_running_at())?;
    scenario.kill_client(1)?;
    scenario.kill_client(2)?;
    scenario.settle(delays.reelection);

    check_kept_leadership(&scenario, 0)?;
    check_stayed_node(&scenario, 3)
}

#[test]
#[ignore]
fn leader_then_client_failure() -> ScenarioResult {
    let (_serial, config) = real_project();
    let mut scenario = Scenario::setup(&config)?;
    let delays = scenario.delays();

    scenario.launch(4)?;
    scenario.settle_since_server_start(delays.game_running_at())?;
    scenario.kill_client(0)?;
    scenario.kill_client(1)?;
    scenario.settle(delays.reelection);

    check_took_over(&scenario, 2)?;
    check_stayed_node(&scenario, 3)
}

#[test]
#[ignore]
fn client_then_leader_failure() -> ScenarioResult {
    let (_serial, config) = real_project();
    let mut scenario = Scenario::setup(&config)?;
    let delays = scenario.delays();

    scenario.launch(4)?;
    scenario.settle_since_server_start(delays.game_running_at())?;
    scenario.kill_client(2)?;
    scenario.kill_client(0)?;
    scenario.settle(delays.reelection);

    check_took_over(&scenario, 1)?;
    check_stayed_node(&scenario, 3)
}

#[test]
#[ignore]
fn causal_log_format() -> ScenarioResult {
    let (_serial, config) = real_project();
    let mut scenario = Scenario::setup(&config)?;
    let delays = scenario.delays();

    let client_count = scenario.launch(2)?.clients().len();
    scenario.settle(delays.registration * 2);

    let server_address = scenario.cluster()?.server().log_address().to_owned();
    let server_log = scenario.server_causal_log()?;
    let violations = server_log.alternation_violations();
    scenario.check(violations.is_empty(), || {
        format!("server causal log is malformed: {violations:#?}")
    })?;
    let violations = server_log.sender_violations(&server_address);
    scenario.check(violations.is_empty(), || {
        format!("server causal log has foreign senders: {violations:#?}")
    })?;

    for index in 0..client_count {
        let log = scenario.client_causal_log(index)?;
        let violations = log.alternation_violations();
        scenario.check(violations.is_empty(), || {
            format!("client {index} causal log is malformed: {violations:#?}")
        })?;
    }
    Ok(())
}

#[test]
#[ignore]
fn matchmaking_messages() -> ScenarioResult {
    let (_serial, config) = real_project();
    let mut scenario = Scenario::setup(&config)?;
    let delays = scenario.delays();

    let cluster = scenario.launch(2)?;
    let clients: Vec<(usize, String, String)> = cluster
        .clients()
        .iter()
        .filter_map(|client| {
            let topology = client.topology()?;
            Some((topology.index, topology.node_address(), topology.server_address()))
        })
        .collect();
    scenario.settle_since_server_start(delays.game_running_at())?;

    let server_log = scenario.server_causal_log()?;
    for (index, node_address, _) in &clients {
        scenario.check(
            server_log.contains_payload(&markers::server_join(node_address)),
            || format!("server should have logged that client {index} joined"),
        )?;
        scenario.check(
            server_log.contains_payload(&markers::server_start_game(node_address)),
            || format!("server should have told client {index} to start the game"),
        )?;
    }

    let logs = clients
        .iter()
        .map(|(index, _, _)| scenario.client_causal_log(*index))
        .collect::<Result<Vec<_>, _>>()?;
    for ((index, node_address, server_address), log) in clients.iter().zip(&logs) {
        scenario.check(log.contains_payload(&markers::client_join(server_address)), || {
            format!("client {index} should have asked the server to join")
        })?;
        scenario.check(
            log.contains_payload(&markers::client_start_game(server_address)),
            || format!("client {index} should have been told the game is starting"),
        )?;

        for ((other, other_address, _), other_log) in clients.iter().zip(&logs) {
            if other == index {
                continue;
            }
            let correlation =
                scenario
                    .oracle()
                    .correlate(log, node_address, other_log, other_address);
            scenario.check(correlation.is_complete(), || {
                format!("interval updates from client {index} to client {other}: {correlation:?}")
            })?;
        }
    }
    Ok(())
}
