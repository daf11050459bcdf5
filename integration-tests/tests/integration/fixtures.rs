// Copyright (c) The gotron Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::{Utf8Path, Utf8PathBuf};
use camino_tempfile::Utf8TempDir;
use gotron_harness::config::{HarnessConfig, RoleKind};
use indoc::formatdoc;
use std::{
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

pub(crate) const FAKE_PEER: &str = env!("CARGO_BIN_EXE_fake-peer");

/// How long to wait for a freshly launched fake peer to write its logs.
const LOG_TIMEOUT: Duration = Duration::from_secs(10);

static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

/// Returns an executable name unique to this test process.
///
/// The name stays under 15 bytes so that it survives the kernel's comm truncation intact, and is
/// unique so that sweeps in concurrently running tests never match each other's processes.
pub(crate) fn unique_exe_name(tag: char) -> String {
    format!(
        "gf{tag}{}-{}",
        std::process::id(),
        NEXT_ID.fetch_add(1, Ordering::SeqCst)
    )
}

/// Makes `link` run the fake peer.
///
/// A symlink rather than a copy: executing a file that was just written can fail with ETXTBSY if
/// another test thread forks in the meantime.
pub(crate) fn link_fake_peer(link: &Utf8Path) {
    std::os::unix::fs::symlink(FAKE_PEER, link)
        .unwrap_or_else(|error| panic!("failed to link {FAKE_PEER} to {link}: {error}"));
}

/// Polls until `path` exists. Fake peers write their logs atomically, so an existing file is
/// complete.
pub(crate) fn wait_for_file(path: &Utf8Path) -> bool {
    let start = Instant::now();
    while start.elapsed() < LOG_TIMEOUT {
        if path.exists() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    false
}

/// A project root whose role binaries are fake peers with unique names, and whose settle delays
/// are all zero.
pub(crate) struct FakeProject {
    dir: Utf8TempDir,
    config: HarnessConfig,
}

impl FakeProject {
    pub(crate) fn new() -> Self {
        let dir = Utf8TempDir::with_prefix("gotron-").expect("created temp dir");
        let server = unique_exe_name('s');
        let client = unique_exe_name('c');

        for sub in ["MatchMaking", "Node-Client", ".config"] {
            fs_err::create_dir_all(dir.path().join(sub)).expect("created project dir");
        }
        link_fake_peer(&dir.path().join("MatchMaking").join(&server));
        link_fake_peer(&dir.path().join("Node-Client").join(&client));

        let config_toml = formatdoc! {r#"
            [server]
            name = "{server}"
            candidates = ["MatchMaking/{server}"]

            [client]
            name = "{client}"
            candidates = ["Node-Client/{client}"]

            [delays]
            server-start = "0s"
            client-stagger = "0s"
            registration = "0s"
            post-kill = "0s"
            reelection = "0s"
            game-start-timeout = "0s"
            game-running = "0s"
        "#};
        fs_err::write(dir.path().join(HarnessConfig::CONFIG_PATH), config_toml)
            .expect("wrote project config");

        let config = HarnessConfig::from_sources(dir.path(), None).expect("project config is valid");
        Self { dir, config }
    }

    pub(crate) fn root(&self) -> &Utf8Path {
        self.dir.path()
    }

    pub(crate) fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub(crate) fn binary_path(&self, role: RoleKind) -> Utf8PathBuf {
        let role_config = self.config.role(role);
        self.config.working_dir(role).join(&role_config.name)
    }

    /// Deletes the binary for `role`, so that launching it fails with a missing binary.
    pub(crate) fn remove_binary(&self, role: RoleKind) {
        fs_err::remove_file(self.binary_path(role)).expect("removed role binary");
    }
}

static REAL_CLUSTER: Mutex<()> = Mutex::new(());

/// The config for a checkout with real `MS` and `Node-Client` binaries, rooted at
/// `GOTRON_PROJECT_ROOT`.
///
/// Real clusters all bind the same ports, so the returned guard serializes them within this test
/// process. Across processes, the `real-cluster` test group in `.config/nextest.toml` does the
/// same. Keep the guard alive until the scenario has been dropped.
pub(crate) fn real_project() -> (MutexGuard<'static, ()>, HarnessConfig) {
    let guard = REAL_CLUSTER.lock().unwrap_or_else(PoisonError::into_inner);
    let root = std::env::var("GOTRON_PROJECT_ROOT").unwrap_or_else(|_| {
        panic!("GOTRON_PROJECT_ROOT must point at a checkout with built MS and Node-Client binaries")
    });
    let config = HarnessConfig::from_sources(root, None).expect("project config is valid");
    (guard, config)
}
