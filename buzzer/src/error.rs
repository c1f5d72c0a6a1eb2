use std::io;

use thiserror::Error;

/// Errors surfaced by the Buzzer client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The socket never reached the open state.
    #[error("failed to connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    /// A line was sent on a connection that is not open.
    #[error("connection is not open")]
    NotOpen,

    /// The connection closed while a reply was still outstanding.
    #[error("connection closed while awaiting reply")]
    ConnectionClosed,

    /// The server refused the command; carries the server's own text.
    #[error("{0}")]
    Rejected(String),

    /// No reply arrived within the configured request timeout.
    #[error("timed out waiting for reply to {verb}")]
    Timeout { verb: &'static str },

    /// An argument would break single-line framing.
    #[error("invalid {what}: {value:?}")]
    InvalidArgument { what: &'static str, value: String },

    #[error("invalid endpoint {0:?}: expected ws://, wss://, tcp:// or host:port")]
    InvalidEndpoint(String),

    #[error("invalid search {0:?}: query must be a single @username or #tag")]
    InvalidSearch(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ClientError {
    /// The server-provided detail for a rejected command.
    pub fn rejection(&self) -> Option<&str> {
        match self {
            ClientError::Rejected(detail) => Some(detail),
            _ => None,
        }
    }
}
