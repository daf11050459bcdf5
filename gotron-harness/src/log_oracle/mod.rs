// Copyright (c) The gotron Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Queries over the logs written by cluster processes.
//!
//! Each process writes two files: a plain-text local log, and a causal log in which vector-clock
//! headers alternate with payload lines. The oracle reads them once and answers questions about
//! them.
//!
//! The oracle never waits or retries. By the time it is called, the scenario must already have
//! slept long enough for the process to flush what it is looking for: a missing line is reported
//! as missing.

mod causal;
mod roles;

pub use causal::{CausalHeader, CausalViolation, LineKind};
pub use roles::{NodeRole, ReelectionInvariant, RoleHistory};

use crate::{
    config::HarnessConfig,
    errors::{LogReadError, TopologyError},
    markers,
    topology::{ClientTopology, LaunchSpec, LogPaths},
};
use camino::{Utf8Path, Utf8PathBuf};
use causal::HeaderShape;
use regex::Regex;

/// Reads and queries cluster logs.
#[derive(Clone, Debug)]
pub struct LogOracle<'cfg> {
    config: &'cfg HarnessConfig,
    patterns: LogPatterns,
}

impl<'cfg> LogOracle<'cfg> {
    /// Creates a new oracle for clusters launched with `config`.
    pub fn new(config: &'cfg HarnessConfig) -> Self {
        Self {
            config,
            patterns: LogPatterns::new(),
        }
    }

    /// The log paths of the server listening on `port`, derived from the config alone.
    pub fn server_log_paths(&self, port: u16) -> LogPaths {
        LaunchSpec::server(self.config, port).log_paths
    }

    /// The log paths of client `index`, derived from the config alone.
    pub fn client_log_paths(&self, index: usize) -> Result<LogPaths, TopologyError> {
        let topology = ClientTopology::new(self.config.ports(), index)?;
        Ok(LaunchSpec::client(self.config, &topology).log_paths)
    }

    /// Reads the plain-text log at `paths.local`.
    pub fn read_local(&self, paths: &LogPaths) -> Result<LocalLog, LogReadError> {
        Ok(LocalLog {
            path: paths.local.clone(),
            lines: read_lines(&paths.local)?,
        })
    }

    /// Reads the causal log at `paths.causal`.
    pub fn read_causal(&self, paths: &LogPaths) -> Result<CausalLog<'_>, LogReadError> {
        Ok(CausalLog {
            path: paths.causal.clone(),
            lines: read_lines(&paths.causal)?,
            patterns: &self.patterns,
        })
    }

    /// Checks interval-update exchange from `a` to `b`: `a` logged sending an update to
    /// `b_address`, and `b` logged receiving an update from `a_address`.
    pub fn correlate(
        &self,
        a: &CausalLog<'_>,
        a_address: &str,
        b: &CausalLog<'_>,
        b_address: &str,
    ) -> PeerCorrelation {
        PeerCorrelation {
            sent: a.sent_interval_update_to(b_address),
            received: b.received_interval_update_from(a_address),
        }
    }
}

/// The outcome of [`LogOracle::correlate`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PeerCorrelation {
    /// The sender logged an interval update addressed to the receiver.
    pub sent: bool,

    /// The receiver logged an interval update from the sender.
    pub received: bool,
}

impl PeerCorrelation {
    /// Returns true if both halves of the exchange were logged.
    pub fn is_complete(&self) -> bool {
        self.sent && self.received
    }
}

#[derive(Clone, Debug)]
struct LogPatterns {
    header: HeaderShape,
    interval_sent: Regex,
    packet_received: Regex,
}

impl LogPatterns {
    fn new() -> Self {
        Self {
            header: HeaderShape::new(),
            interval_sent: Regex::new(markers::INTERVAL_UPDATE_SENT)
                .expect("interval update regex is valid"),
            packet_received: Regex::new(markers::PACKET_RECEIVED)
                .expect("packet received regex is valid"),
        }
    }
}

fn read_lines(path: &Utf8Path) -> Result<Vec<String>, LogReadError> {
    let contents = fs_err::read(path).map_err(|error| LogReadError::new(path, error))?;
    // The programs log raw packet contents, so don't insist on UTF-8.
    Ok(String::from_utf8_lossy(&contents)
        .lines()
        .map(|line| line.to_owned())
        .collect())
}

fn player_count_regex(count: usize) -> Regex {
    Regex::new(&format!(r"\b{}\b", regex::escape(&markers::player_count(count))))
        .expect("player count regex is valid")
}

/// A plain-text log. Every line is a payload.
#[derive(Clone, Debug)]
pub struct LocalLog {
    path: Utf8PathBuf,
    lines: Vec<String>,
}

impl LocalLog {
    /// Creates a log from lines already in memory.
    pub fn from_lines(path: impl Into<Utf8PathBuf>, lines: impl IntoIterator<Item = String>) -> Self {
        Self {
            path: path.into(),
            lines: lines.into_iter().collect(),
        }
    }

    /// The file this log was read from.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// All lines.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(|line| line.as_str())
    }

    /// Returns true if any line contains `marker`.
    pub fn contains(&self, marker: &str) -> bool {
        self.position(marker).is_some()
    }

    /// The index of the first line containing `marker`.
    pub fn position(&self, marker: &str) -> Option<usize> {
        self.lines().position(|line| line.contains(marker))
    }

    /// Returns true if the server logged a room of exactly `count` players.
    pub fn contains_player_count(&self, count: usize) -> bool {
        self.player_count_position(count).is_some()
    }

    /// The index of the first line reporting a room of exactly `count` players.
    pub fn player_count_position(&self, count: usize) -> Option<usize> {
        let regex = player_count_regex(count);
        self.lines().position(|line| regex.is_match(line))
    }

    /// Returns true if the first occurrences of `1 players`, `2 players`, ..., `count players`
    /// all exist and appear in that order.
    pub fn player_counts_in_order(&self, count: usize) -> bool {
        in_order((1..=count).map(|n| self.player_count_position(n)))
    }

    /// Returns true if the first occurrences of all `markers` exist and appear in the given order.
    pub fn markers_in_order<S: AsRef<str>>(&self, markers: &[S]) -> bool {
        in_order(markers.iter().map(|marker| self.position(marker.as_ref())))
    }

    /// The roles this client reported over time.
    pub fn role_history(&self) -> RoleHistory {
        RoleHistory::from_lines(self.lines())
    }
}

fn in_order(positions: impl Iterator<Item = Option<usize>>) -> bool {
    let mut last = None;
    for position in positions {
        match (position, last) {
            (None, _) => return false,
            (Some(position), Some(last)) if position <= last => return false,
            (Some(position), _) => last = Some(position),
        }
    }
    true
}

/// A causal log: headers on even lines, payloads on odd lines.
#[derive(Clone, Debug)]
pub struct CausalLog<'o> {
    path: Utf8PathBuf,
    lines: Vec<String>,
    patterns: &'o LogPatterns,
}

impl CausalLog<'_> {
    /// The file this log was read from.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// The number of lines, headers included.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Returns true if the log is empty.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Header lines, with their 0-based line indexes.
    pub fn header_lines(&self) -> impl Iterator<Item = (usize, &str)> {
        self.lines
            .iter()
            .enumerate()
            .step_by(2)
            .map(|(index, line)| (index, line.as_str()))
    }

    /// Payload lines. Each one describes the event stamped by the header just before it.
    pub fn payloads(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().skip(1).step_by(2).map(|line| line.as_str())
    }

    /// Every header that parses, with its 0-based line index.
    pub fn headers(&self) -> impl Iterator<Item = (usize, CausalHeader)> + '_ {
        self.header_lines()
            .filter_map(|(index, line)| Some((index, self.patterns.header.parse(line).ok()?)))
    }

    /// Returns true if any payload line contains `marker`.
    pub fn contains_payload(&self, marker: &str) -> bool {
        self.payloads().any(|line| line.contains(marker))
    }

    /// Checks that even lines are headers and odd lines are not.
    pub fn alternation_violations(&self) -> Vec<CausalViolation> {
        self.lines
            .iter()
            .enumerate()
            .filter_map(|(index, line)| match LineKind::for_index(index) {
                LineKind::Header => match self.patterns.header.parse(line) {
                    Ok(_) => None,
                    Err(error) => Some(CausalViolation::HeaderExpected {
                        index,
                        line: line.clone(),
                        error,
                    }),
                },
                LineKind::Payload => {
                    self.patterns
                        .header
                        .is_match(line)
                        .then(|| CausalViolation::PayloadExpected {
                            index,
                            line: line.clone(),
                        })
                }
            })
            .collect()
    }

    /// Checks that every header was stamped by `expected`.
    ///
    /// A process only timestamps its own events, so any other sender means the log is corrupt.
    /// Lines that aren't headers at all are reported by [`Self::alternation_violations`] instead.
    pub fn sender_violations(&self, expected: &str) -> Vec<CausalViolation> {
        self.headers()
            .filter(|(_, header)| header.sender != expected)
            .map(|(index, header)| CausalViolation::ForeignSender {
                index,
                expected: expected.to_owned(),
                actual: header.sender,
            })
            .collect()
    }

    /// Checks that the sender's own counter strictly increases from header to header.
    pub fn clock_regressions(&self) -> Vec<CausalViolation> {
        let mut violations = Vec::new();
        let mut previous = None;
        for (index, header) in self.headers() {
            let Some(current) = header.own_counter() else {
                continue;
            };
            if let Some(previous) = previous {
                if current <= previous {
                    violations.push(CausalViolation::ClockRegression {
                        index,
                        sender: header.sender.clone(),
                        previous,
                        current,
                    });
                }
            }
            previous = Some(current);
        }
        violations
    }

    /// Returns true if this process logged sending an interval update to `peer_address`.
    pub fn sent_interval_update_to(&self, peer_address: &str) -> bool {
        self.payloads().any(|line| {
            self.patterns
                .interval_sent
                .captures(line)
                .is_some_and(|captures| &captures[1] == peer_address)
        })
    }

    /// Returns true if this process logged receiving an interval update from `peer_address`.
    pub fn received_interval_update_from(&self, peer_address: &str) -> bool {
        self.payloads().any(|line| {
            self.patterns
                .packet_received
                .captures(line)
                .is_some_and(|captures| &captures[1] == peer_address)
        })
    }
}
