// Copyright (c) The gotron Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Starts a matchmaking server and a handful of clients on this machine, then waits for them.

mod app;
mod output;

use app::FaststartApp;
use clap::Parser;
use color_eyre::Result;

fn main() -> Result<()> {
    color_eyre::install()?;
    let _ = enable_ansi_support::enable_ansi_support();

    let opts = FaststartApp::parse();
    opts.init_output();
    opts.exec()
}
