//! The G-code line protocol.
//!
//! Bytes come in from a serial link or from stored media and are assembled into
//! lines by the [`Framer`]. Serial lines carry optional line numbers and
//! checksums that the host uses to recover from corruption: a bad line is
//! answered with an `Error:` line and a `Resend:` request instead of being
//! executed. Lines that survive are queued in a small [`CommandQueue`] and later
//! split into a verb and parameters by [`Command::parse`].

#![cfg_attr(not(feature = "std"), no_std)]

pub mod command;
pub mod framer;
pub mod queue;
pub mod response;

pub use command::{Command, Verb};
pub use framer::{Framer, Rejection, RejectionKind, SequenceTracker};
pub use queue::CommandQueue;
pub use response::Response;

/// The longest line we will assemble, including room for the terminator.
pub const MAX_CMD_SIZE: usize = 96;

/// How many complete lines can wait for the dispatcher.
pub const BUFSIZE: usize = 4;

pub type LineText = heapless::String<MAX_CMD_SIZE>;

/// Where a line came from. Only serial lines are validated and acknowledged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Source {
    Serial,
    Media,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CommandLine {
    pub text: LineText,
    pub source: Source,
}

impl CommandLine {
    pub fn as_str(&self) -> &str {
        self.text.as_str()
    }
}
