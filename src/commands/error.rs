//! Handler errors and the error replies derived from them.

use crate::protocol::RespValue;
use thiserror::Error;

/// Error returned by a command handler.
///
/// The dispatch loop turns it into an `ERR` reply; handlers never build error
/// replies for these cases themselves.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The request had the wrong number of arguments. Replied to as
    /// `ERR wrong number of arguments for '<name>' command`.
    #[error("wrong number of arguments")]
    WrongArgs,

    /// Any other failure, replied to as `ERR <message>`.
    #[error("{0}")]
    Message(String),

    #[error("{0:#}")]
    Other(#[from] anyhow::Error),
}

impl CommandError {
    pub fn msg(message: impl Into<String>) -> Self {
        CommandError::Message(message.into())
    }
}

/// What a handler returns.
pub type HandlerResult = Result<RespValue, CommandError>;

pub(crate) fn unknown_command(name: &str) -> RespValue {
    RespValue::error(format!("ERR unknown command '{}'", name))
}

pub(crate) fn wrong_args(name: &str) -> RespValue {
    RespValue::error(format!(
        "ERR wrong number of arguments for '{}' command",
        name
    ))
}

/// Translates a handler failure for command `name` into a reply.
pub(crate) fn error_reply(name: &str, err: &CommandError) -> RespValue {
    match err {
        CommandError::WrongArgs => wrong_args(name),
        other => RespValue::error(format!("ERR {}", sanitize(&other.to_string()))),
    }
}

// CR and LF delimit RESP lines; one inside an error line would split the frame.
fn sanitize(text: &str) -> String {
    if text.contains(['\r', '\n']) {
        text.replace(['\r', '\n'], " ")
    } else {
        text.to_string()
    }
}
