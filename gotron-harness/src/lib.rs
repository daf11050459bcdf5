// Copyright (c) The gotron Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Process orchestration and log oracle for end-to-end tests of the gotron matchmaking server
//! (`MS`) and its peer clients (`Node-Client`).
//!
//! The basic flow of a scenario:
//!
//! 1. Build a [`HarnessConfig`](config::HarnessConfig) once and pass it around by reference.
//! 2. Sweep stray role processes with a [`ProcessReaper`](reaper::ProcessReaper).
//! 3. Launch a server and clients with a [`ClusterLauncher`](cluster::ClusterLauncher).
//! 4. Sleep for the configured settle delays, killing members to inject faults.
//! 5. Read and query the logs they wrote with a [`LogOracle`](log_oracle::LogOracle).
//! 6. Kill everything and sweep again.
//!
//! [`Scenario`](scenario::Scenario) packages these steps, including teardown on drop.

pub mod binary;
pub mod cluster;
pub mod config;
pub mod errors;
pub mod log_oracle;
pub mod markers;
pub mod process;
pub mod reaper;
pub mod scenario;
pub mod topology;
