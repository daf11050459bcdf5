// Copyright (c) The gotron Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use camino_tempfile::Utf8TempDir;
use gotron_harness::{
    config::RoleKind,
    errors::ScenarioStage,
    reaper::{ProcessReaper, SystemProcessTable},
    scenario::Scenario,
};
use std::{
    os::unix::process::ExitStatusExt,
    process::{Command, Stdio},
};

#[test]
fn reaps_unowned_processes_by_name() {
    let dir = Utf8TempDir::with_prefix("gotron-reaper-").unwrap();
    let name = unique_exe_name('r');
    let exe = dir.path().join(&name);
    link_fake_peer(&exe);

    // Started outside of any handle, as if left over from a crashed run.
    let mut stray = Command::new(&exe)
        .arg("localhost:4000")
        .current_dir(dir.path())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("fake peer started");
    assert!(wait_for_file(&dir.path().join("127.0.0.14000-local.txt")));

    let summary = ProcessReaper::new([name.as_str()])
        .reap_stray(&SystemProcessTable)
        .expect("process table is readable");
    assert_eq!(summary.reaped, 1, "{summary}");
    assert_eq!(summary.failed, 0, "{summary}");

    let status = stray.wait().unwrap();
    assert_eq!(status.signal(), Some(9), "killed with SIGKILL");

    // Nothing is left to reap.
    let summary = ProcessReaper::new([name.as_str()])
        .reap_stray(&SystemProcessTable)
        .unwrap();
    assert_eq!(summary.reaped, 0, "{summary}");
}

#[test]
fn failed_scenario_launch_leaves_no_server_behind() {
    let project = FakeProject::new();
    project.remove_binary(RoleKind::Client);
    let server_name = project.config().role(RoleKind::Server).name.clone();

    let mut scenario = Scenario::setup(project.config()).unwrap();
    let error = scenario.launch(1).expect_err("client binary is missing");
    assert_eq!(error.stage(), ScenarioStage::BinaryMissing);

    // The server was started before the client failed, and converting the error killed it.
    let summary = ProcessReaper::new([server_name.as_str()])
        .reap_stray(&SystemProcessTable)
        .expect("process table is readable");
    assert_eq!(summary.reaped, 0, "{summary}");
}
