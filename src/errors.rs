// src/errors.rs

//! Defines the error type shared by the wire protocol and the TCP clients.

use std::sync::Arc;
use thiserror::Error;

/// Errors produced while encoding, decoding, or exchanging protocol frames.
/// Using `thiserror` allows for clean error definitions and automatic `From`
/// trait implementations.
#[derive(Error, Debug, Clone)]
pub enum VigilError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Incomplete data in stream")]
    IncompleteData,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Timed out waiting for reply")]
    Timeout,
}

impl From<std::io::Error> for VigilError {
    fn from(e: std::io::Error) -> Self {
        VigilError::Io(Arc::new(e))
    }
}
