//! Named process messages and the evaluation request/response shapes.
//!
//! A [`ProcessMessage`] is a name plus a positional argument list of binary
//! blobs, strings and int32s. The evaluation protocol uses two names:
//!
//! | name | args |
//! |---|---|
//! | `EvalJavascript` | `[0]` task id (8 bytes), `[1]` script, `[2]` source url, `[3]` start line |
//! | `EvalJavascriptReturn` | `[0]` task id blob echoed verbatim, `[1]` encoded [`EvalResult`] |
//!
//! `ExecuteJavascript` (`[0]` script, `[1]` source url, `[2]` start line) runs a
//! script without producing a response.

use super::codec::EvalResult;
use super::error::ProtocolError;

pub const EVAL_JAVASCRIPT: &str = "EvalJavascript";
pub const EVAL_JAVASCRIPT_RETURN: &str = "EvalJavascriptReturn";
pub const EXECUTE_JAVASCRIPT: &str = "ExecuteJavascript";

#[derive(Clone, Debug, PartialEq)]
pub enum MessageArg {
    Binary(Vec<u8>),
    String(String),
    Int(i32),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProcessMessage {
    name: String,
    args: Vec<MessageArg>,
}

impl ProcessMessage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    pub fn with_binary(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.args.push(MessageArg::Binary(data.into()));
        self
    }

    pub fn with_string(mut self, value: impl Into<String>) -> Self {
        self.args.push(MessageArg::String(value.into()));
        self
    }

    pub fn with_int(mut self, value: i32) -> Self {
        self.args.push(MessageArg::Int(value));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[MessageArg] {
        &self.args
    }

    fn arg(&self, index: usize) -> Result<&MessageArg, ProtocolError> {
        self.args
            .get(index)
            .ok_or(ProtocolError::MissingArgument { index })
    }

    pub fn binary(&self, index: usize) -> Result<&[u8], ProtocolError> {
        match self.arg(index)? {
            MessageArg::Binary(data) => Ok(data),
            _ => Err(ProtocolError::ArgumentType {
                index,
                expected: "binary",
            }),
        }
    }

    pub fn string(&self, index: usize) -> Result<&str, ProtocolError> {
        match self.arg(index)? {
            MessageArg::String(value) => Ok(value),
            _ => Err(ProtocolError::ArgumentType {
                index,
                expected: "string",
            }),
        }
    }

    pub fn int(&self, index: usize) -> Result<i32, ProtocolError> {
        match self.arg(index)? {
            MessageArg::Int(value) => Ok(*value),
            _ => Err(ProtocolError::ArgumentType {
                index,
                expected: "int",
            }),
        }
    }

    fn expect_name(&self, expected: &str) -> Result<(), ProtocolError> {
        if self.name != expected {
            return Err(ProtocolError::UnexpectedMessage(self.name.clone()));
        }
        Ok(())
    }
}

/// Read the task id from the first 8 bytes of a task id blob.
pub fn task_id_from_blob(blob: &[u8]) -> Result<u64, ProtocolError> {
    let bytes: [u8; 8] = blob
        .get(..8)
        .and_then(|head| head.try_into().ok())
        .ok_or(ProtocolError::TaskIdLength(blob.len()))?;
    Ok(u64::from_ne_bytes(bytes))
}

/// A request to evaluate `script` and report its completion value.
///
/// `script_url` and `start_line` only feed engine diagnostics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvalRequest {
    pub task_id: u64,
    pub script: String,
    pub script_url: String,
    pub start_line: i32,
}

impl EvalRequest {
    pub fn new(task_id: u64, script: impl Into<String>, script_url: impl Into<String>) -> Self {
        Self {
            task_id,
            script: script.into(),
            script_url: script_url.into(),
            start_line: 0,
        }
    }

    pub fn with_start_line(mut self, start_line: i32) -> Self {
        self.start_line = start_line;
        self
    }

    pub fn into_message(self) -> ProcessMessage {
        ProcessMessage::new(EVAL_JAVASCRIPT)
            .with_binary(self.task_id.to_ne_bytes())
            .with_string(self.script)
            .with_string(self.script_url)
            .with_int(self.start_line)
    }

    pub fn from_message(message: &ProcessMessage) -> Result<Self, ProtocolError> {
        message.expect_name(EVAL_JAVASCRIPT)?;
        Ok(Self {
            task_id: task_id_from_blob(message.binary(0)?)?,
            script: message.string(1)?.to_owned(),
            script_url: message.string(2)?.to_owned(),
            start_line: message.int(3)?,
        })
    }
}

/// A script to run for its side effects only.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecuteRequest {
    pub script: String,
    pub script_url: String,
    pub start_line: i32,
}

impl ExecuteRequest {
    pub fn into_message(self) -> ProcessMessage {
        ProcessMessage::new(EXECUTE_JAVASCRIPT)
            .with_string(self.script)
            .with_string(self.script_url)
            .with_int(self.start_line)
    }

    pub fn from_message(message: &ProcessMessage) -> Result<Self, ProtocolError> {
        message.expect_name(EXECUTE_JAVASCRIPT)?;
        Ok(Self {
            script: message.string(0)?.to_owned(),
            script_url: message.string(1)?.to_owned(),
            start_line: message.int(2)?,
        })
    }
}

/// The decoded form of an `EvalJavascriptReturn` message.
#[derive(Clone, Debug, PartialEq)]
pub struct EvalResponse {
    pub task_id: u64,
    pub result: EvalResult,
}

impl EvalResponse {
    /// Build the reply for a request whose task id arrived as `task_blob`.
    /// The blob is echoed byte for byte.
    pub fn reply(task_blob: &[u8], result: &EvalResult) -> ProcessMessage {
        ProcessMessage::new(EVAL_JAVASCRIPT_RETURN)
            .with_binary(task_blob)
            .with_binary(result.encode())
    }

    pub fn from_message(message: &ProcessMessage) -> Result<Self, ProtocolError> {
        message.expect_name(EVAL_JAVASCRIPT_RETURN)?;
        Ok(Self {
            task_id: task_id_from_blob(message.binary(0)?)?,
            result: EvalResult::decode(message.binary(1)?)?,
        })
    }
}
