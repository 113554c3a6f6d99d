use std::io;

/// Failures while talking to the engine
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("connection with debugger is closed")]
    ConnectionClosed,
}

/// A line that does not form a valid protocol message
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("empty message")]
    Empty,
    #[error("invalid message type {0:?}")]
    InvalidType(String),
    #[error("unknown message type {0}")]
    UnknownType(i64),
    #[error("{message} expects {expected} fields, got {got}")]
    Arity {
        message: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("{message}: invalid {field} {value:?}")]
    InvalidField {
        message: &'static str,
        field: &'static str,
        value: String,
    },
}
