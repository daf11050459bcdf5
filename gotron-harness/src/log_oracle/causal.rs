// Copyright (c) The gotron Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::HeaderParseError;
use indexmap::IndexMap;
use regex::Regex;
use std::fmt;

/// Whether a causal log line is a header or a payload.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LineKind {
    /// `<sender> {<vector clock>}`: even lines, counting from 0.
    Header,

    /// Free text describing the event: odd lines.
    Payload,
}

impl LineKind {
    /// The kind a line at `index` (0-based) must have.
    pub fn for_index(index: usize) -> Self {
        if index % 2 == 0 {
            Self::Header
        } else {
            Self::Payload
        }
    }
}

impl fmt::Display for LineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Header => write!(f, "causal header"),
            Self::Payload => write!(f, "payload"),
        }
    }
}

/// A parsed causal header: the sender and its vector clock.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CausalHeader {
    /// The address of the process that recorded the event.
    pub sender: String,

    /// Event counters keyed by peer address, in the order they appear in the log.
    pub clock: IndexMap<String, u64>,
}

impl CausalHeader {
    /// The sender's own counter, if present in the clock.
    pub fn own_counter(&self) -> Option<u64> {
        self.clock.get(&self.sender).copied()
    }
}

/// The compiled shape of a causal header line.
#[derive(Clone, Debug)]
pub(super) struct HeaderShape {
    regex: Regex,
}

impl HeaderShape {
    pub(super) fn new() -> Self {
        Self {
            regex: Regex::new(r"^(\S+:\d{1,5}) (\{.*\})\s*$").expect("header regex is valid"),
        }
    }

    /// Returns true if `line` looks like a header. Payload lines must never look like one.
    pub(super) fn is_match(&self, line: &str) -> bool {
        self.regex.is_match(line)
    }

    pub(super) fn parse(&self, line: &str) -> Result<CausalHeader, HeaderParseError> {
        let captures = self.regex.captures(line).ok_or(HeaderParseError::Shape)?;
        let sender = captures[1].to_owned();
        let clock: IndexMap<String, u64> =
            serde_json::from_str(&captures[2]).map_err(|error| HeaderParseError::Clock {
                message: error.to_string(),
            })?;
        if clock.is_empty() {
            return Err(HeaderParseError::Clock {
                message: "clock is empty".to_owned(),
            });
        }
        Ok(CausalHeader { sender, clock })
    }
}

/// A way in which a causal log breaks its structural rules.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CausalViolation {
    /// An even line is not a well-formed header.
    HeaderExpected {
        /// 0-based line index.
        index: usize,

        /// The offending line.
        line: String,

        /// Why the line isn't a header.
        error: HeaderParseError,
    },

    /// An odd line looks like a header.
    PayloadExpected {
        /// 0-based line index.
        index: usize,

        /// The offending line.
        line: String,
    },

    /// A header names a sender other than the log's owner.
    ForeignSender {
        /// 0-based line index.
        index: usize,

        /// The owner's address.
        expected: String,

        /// The address found in the header.
        actual: String,
    },

    /// The sender's own counter did not increase from one header to the next.
    ClockRegression {
        /// 0-based line index.
        index: usize,

        /// The sender whose counter regressed.
        sender: String,

        /// The counter in the previous header from this sender.
        previous: u64,

        /// The counter in this header.
        current: u64,
    },
}

impl CausalViolation {
    /// The 0-based index of the offending line.
    pub fn index(&self) -> usize {
        match self {
            Self::HeaderExpected { index, .. }
            | Self::PayloadExpected { index, .. }
            | Self::ForeignSender { index, .. }
            | Self::ClockRegression { index, .. } => *index,
        }
    }
}

impl fmt::Display for CausalViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HeaderExpected { index, line, error } => {
                write!(f, "line {index}: expected a causal header ({error}): {line:?}")
            }
            Self::PayloadExpected { index, line } => {
                write!(f, "line {index}: expected regular text: {line:?}")
            }
            Self::ForeignSender {
                index,
                expected,
                actual,
            } => write!(f, "line {index}: header sender is {actual}, expected {expected}"),
            Self::ClockRegression {
                index,
                sender,
                previous,
                current,
            } => write!(
                f,
                "line {index}: clock for {sender} went from {previous} to {current}"
            ),
        }
    }
}
