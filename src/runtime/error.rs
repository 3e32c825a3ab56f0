//! Error types shared by both sides of the bridge.

use std::time::Duration;

use thiserror::Error;

use super::channel::ProcessId;

/// A message or payload that does not match the agreed wire shape.
///
/// Both ends are built from this crate, so these only surface when a peer is
/// corrupt or speaks a different version. Handlers log and drop the message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("missing argument {index}")]
    MissingArgument { index: usize },
    #[error("argument {index} is not of type {expected}")]
    ArgumentType { index: usize, expected: &'static str },
    #[error("task id blob has {0} bytes, expected at least 8")]
    TaskIdLength(usize),
    #[error("payload truncated: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },
    #[error("unknown value tag {0}")]
    UnknownTag(u8),
    #[error("unexpected message {0:?}")]
    UnexpectedMessage(String),
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("channel to the {0} process is closed")]
    ChannelClosed(ProcessId),
    #[error("failed to initialize script runtime: {0}")]
    RuntimeInit(String),
    #[error("failed to spawn executor thread: {0}")]
    ThreadSpawn(#[from] std::io::Error),
    #[error("browser {0} has been closed")]
    BrowserClosed(i32),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Outcome of awaiting an evaluation through [`super::pending::PendingEvals`].
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("javascript error: {}", .0.as_deref().unwrap_or("no detail"))]
    Failed(Option<String>),
    #[error("evaluation timed out after {0:?}")]
    Timeout(Duration),
    #[error("evaluation response was dropped")]
    Dropped,
    #[error("failed to submit evaluation: {0}")]
    Submit(#[from] BridgeError),
}
