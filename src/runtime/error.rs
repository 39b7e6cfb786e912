//! Error types for the kernel runtime
//!
//! Each concern gets its own `thiserror` enum; [`KernelError`] is what the
//! dispatcher catches and forwards to a context's error sender.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::interpreter::EvalError;

/// Per-message failure caught at the dispatcher boundary.
#[derive(Debug, Error)]
pub enum KernelError {
    /// The inbound action is not one of the known four.
    #[error("Unhandled action: {0}")]
    UnhandledAction(String),

    /// A `reply` named a context that does not exist.
    #[error("Received a reply for a missing context: {0}")]
    MissingContextForReply(String),

    /// Reply correlation failed.
    #[error(transparent)]
    Request(#[from] RequestError),

    /// The evaluated code faulted.
    #[error(transparent)]
    Evaluation(#[from] EvalError),

    /// The message was well-formed JSON but carried unusable fields.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A fault that escaped every handler (panics included).
    #[error("Uncaught fault: {0}")]
    Uncaught(String),
}

impl KernelError {
    /// Error class name reported in an error frame.
    pub fn ename(&self) -> String {
        match self {
            KernelError::Evaluation(error) => error.ename().to_string(),
            _ => "Error".to_string(),
        }
    }

    /// Error message reported in an error frame.
    pub fn evalue(&self) -> String {
        match self {
            KernelError::Evaluation(error) => error.evalue(),
            other => other.to_string(),
        }
    }
}

/// Reply correlator failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// No waiter is registered under the id.
    #[error("Unknown request id: {0}")]
    UnknownRequestId(u64),

    /// The waiter was dropped before the reply could be delivered.
    #[error("Request {0} was abandoned before its reply arrived")]
    Abandoned(u64),
}

/// Inbound message decoding failures.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The line was not valid JSON.
    #[error("Malformed message: {0}")]
    Json(#[from] serde_json::Error),

    /// The JSON did not have the expected tuple shape.
    #[error("Malformed message: {0}")]
    Shape(String),
}

/// Server configuration failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("Failed to read config file {}: {source}", path.display())]
    Io {
        /// File that failed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// The config file was not valid JSON for [`super::ServerConfig`].
    #[error("Invalid config file {}: {source}", path.display())]
    Parse {
        /// File that failed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },
}

/// Result alias for dispatcher operations
pub type KernelResult<T> = Result<T, KernelError>;

/// Result alias for correlator operations
pub type RequestResult<T> = Result<T, RequestError>;

/// Result alias for decoding
pub type ProtocolResult<T> = Result<T, ProtocolError>;
