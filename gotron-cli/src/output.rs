// Copyright (c) The gotron Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use clap::Args;
use std::sync::Once;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    Layer, filter::Targets, layer::SubscriberExt, util::SubscriberInitExt,
};

static INIT_LOGGER: Once = Once::new();

#[derive(Copy, Clone, Debug, Args)]
#[must_use]
pub(crate) struct OutputOpts {
    /// Verbose output: log every launch, kill and settle delay
    #[arg(long, short, global = true, env = "GOTRON_VERBOSE")]
    pub(crate) verbose: bool,
}

impl OutputOpts {
    /// Installs the global logger.
    ///
    /// `GOTRON_LOG` takes precedence over `--verbose`, using the `Targets` syntax, e.g.
    /// `gotron_harness=trace`.
    pub(crate) fn init(self) {
        INIT_LOGGER.call_once(|| {
            let level_str = std::env::var_os("GOTRON_LOG").unwrap_or_default();
            let level_str = level_str.to_string_lossy();

            let targets = if level_str.is_empty() {
                let default = if self.verbose {
                    LevelFilter::DEBUG
                } else {
                    LevelFilter::INFO
                };
                Targets::new().with_default(default)
            } else {
                match level_str.parse() {
                    Ok(targets) => targets,
                    Err(error) => {
                        eprintln!("warning: ignoring invalid GOTRON_LOG `{level_str}`: {error}");
                        Targets::new().with_default(LevelFilter::INFO)
                    }
                }
            };

            let layer = tracing_subscriber::fmt::layer()
                .with_target(false)
                .without_time()
                .with_writer(std::io::stderr)
                .with_filter(targets);

            tracing_subscriber::registry().with(layer).init();
        });
    }
}
