// Copyright (c) The gotron Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use gotron_harness::{
    cluster::ClusterLauncher,
    config::RoleKind,
    errors::{LaunchStage, ScenarioError},
    log_oracle::LogOracle,
    markers,
    process::KillOutcome,
    scenario::Scenario,
};
use pretty_assertions::assert_eq;
use std::{os::unix::process::ExitStatusExt, time::Duration};

#[test]
fn cluster_members_write_logs_where_expected() {
    let project = FakeProject::new();
    let config = project.config();
    let launcher = ClusterLauncher::new(config);
    let mut cluster = launcher
        .launch(config.ports().server, 3)
        .expect("cluster launched");

    for role in [RoleKind::Server, RoleKind::Client] {
        assert_eq!(
            launcher.binary(role).resolved(),
            Some(project.binary_path(role).as_path()),
            "{role} resolved to the fake peer"
        );
    }
    for member in cluster.members() {
        assert!(
            wait_for_file(&member.log_paths().local),
            "{} wrote {}",
            member.label(),
            member.log_paths().local
        );
    }

    // The oracle derives the same paths from the config alone.
    let oracle = LogOracle::new(config);
    assert_eq!(
        &oracle.server_log_paths(config.ports().server),
        cluster.server().log_paths()
    );
    for (index, client) in cluster.clients().iter().enumerate() {
        assert_eq!(&oracle.client_log_paths(index).unwrap(), client.log_paths());
    }

    let server_local = oracle.read_local(cluster.server().log_paths()).unwrap();
    assert!(server_local.contains("[args: localhost:2222]"));
    let server_causal = oracle.read_causal(cluster.server().log_paths()).unwrap();
    assert_eq!(server_causal.alternation_violations(), vec![]);
    assert_eq!(
        server_causal.sender_violations(cluster.server().log_address()),
        vec![]
    );

    for client in cluster.clients() {
        let local = oracle.read_local(client.log_paths()).unwrap();
        let args = client.spec().args.join(" ");
        assert!(
            local.contains(&format!("[args: {args}]")),
            "{} was started with node, rpc, ms, http addresses",
            client.label()
        );
        assert!(local.role_history().was_node());

        let causal = oracle.read_causal(client.log_paths()).unwrap();
        assert_eq!(causal.alternation_violations(), vec![]);
        assert_eq!(causal.sender_violations(client.log_address()), vec![]);
        assert_eq!(causal.clock_regressions(), vec![]);
        assert!(causal.contains_payload(&markers::client_join("localhost:2222")));
    }

    for (label, outcome) in cluster.kill_all() {
        assert!(outcome.is_killed(), "{label}: {outcome}");
    }
    for status in cluster.wait_all().unwrap() {
        assert!(!status.success(), "killed processes don't exit successfully");
    }
}

#[test]
fn kill_races_with_running_processes() {
    let project = FakeProject::new();
    let config = project.config();
    let mut cluster = ClusterLauncher::new(config)
        .launch(config.ports().server, 1)
        .unwrap();
    assert!(wait_for_file(&cluster.client(0).unwrap().log_paths().local));

    let first = cluster.kill_client(0).unwrap();
    assert!(first.is_killed(), "{first}");
    let second = cluster.kill_client(0).unwrap();
    assert!(matches!(second, KillOutcome::AlreadyExited), "{second}");

    // The server is unaffected.
    let statuses = cluster.try_wait_all().unwrap();
    assert_eq!(statuses[0], None);
    assert!(statuses[1].is_some());

    assert!(cluster.kill_all().iter().all(|(_, outcome)| outcome.is_gone()));
}

#[test]
fn late_client_gets_next_ports() {
    let project = FakeProject::new();
    let config = project.config();
    let launcher = ClusterLauncher::new(config);
    let mut cluster = launcher.launch(config.ports().server, 1).unwrap();

    let added = launcher.launch_client(&mut cluster).unwrap();
    assert_eq!(added.log_address(), "localhost:9996");
    let paths = added.log_paths().clone();
    assert!(wait_for_file(&paths.local));
    assert_eq!(
        paths.local,
        project.root().join("Node-Client/localhost9996-local.txt")
    );

    cluster.kill_all();
}

#[test]
fn scenario_reads_logs_and_cleans_up() -> Result<(), ScenarioError> {
    let project = FakeProject::new();
    let mut scenario = Scenario::setup(project.config())?;
    let cluster = scenario.launch(2)?;
    let pids: Vec<u32> = cluster
        .members()
        .map(|member| member.handle().pid().expect("member is running"))
        .collect();
    let paths: Vec<_> = cluster
        .members()
        .map(|member| member.log_paths().local.clone())
        .collect();
    for path in &paths {
        assert!(wait_for_file(path), "{path} was written");
    }

    let history = scenario.client_local_log(1)?.role_history();
    scenario.check(history.was_node(), || format!("client 1 history: {history}"))?;
    scenario.check(!history.became_leader(), || {
        format!("client 1 never leads: {history}")
    })?;
    let error = scenario
        .check(scenario.server_local_log()?.contains(markers::STARTING_GAME), || {
            "fake peers never start a game".to_owned()
        })
        .expect_err("check fails");
    assert_eq!(
        error.stage(),
        gotron_harness::errors::ScenarioStage::Assertion
    );

    drop(scenario);
    cfg_if::cfg_if! {
        if #[cfg(target_os = "linux")] {
            for pid in pids {
                assert!(
                    !std::path::Path::new(&format!("/proc/{pid}")).exists(),
                    "process {pid} was killed and reaped on drop"
                );
            }
        } else {
            let _ = pids;
        }
    }
    Ok(())
}

#[test]
fn failed_client_launch_kills_started_server() {
    let project = FakeProject::new();
    project.remove_binary(RoleKind::Client);
    let config = project.config();
    let server_log = LogOracle::new(config)
        .server_log_paths(config.ports().server)
        .local;

    let mut error = ClusterLauncher::new(config)
        .launch(config.ports().server, 2)
        .expect_err("client binary is missing");
    assert_eq!(error.stage(), LaunchStage::Client(0));
    assert_eq!(error.started_mut().len(), 1);
    assert!(error.started_mut()[0].pid().is_some(), "server is running");
    assert!(wait_for_file(&server_log), "server wrote {server_log}");

    assert_eq!(error.kill_started(), 1);
    let server = &error.started_mut()[0];
    assert_eq!(server.pid(), None);
    let status = server.exit_status().expect("killed server was reaped");
    assert_eq!(status.signal(), Some(9), "killed with SIGKILL");

    // Everything is already gone.
    assert_eq!(error.kill_started(), 0);
}

#[test]
fn settles_relative_to_server_start() -> Result<(), ScenarioError> {
    let project = FakeProject::new();
    let mut scenario = Scenario::setup(project.config())?;
    scenario.launch(1)?;
    let started_at = scenario.cluster()?.server_started_at();

    let delay = Duration::from_millis(300);
    scenario.settle_since_server_start(delay)?;
    assert!(started_at.elapsed() >= delay, "slept until {delay:?} after server start");

    // A point that has already passed doesn't sleep again.
    scenario.settle_since_server_start(Duration::ZERO)?;
    Ok(())
}
