//! Centralized error types for popattach.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the popattach library.
#[derive(Error, Debug)]
pub enum Error {
    /// Socket-level failure while connecting to or talking to the server.
    #[error("Connection to '{host}' failed: {source}")]
    Connection {
        host: String,
        source: std::io::Error,
    },

    /// The server rejected the credentials.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The server answered a command with a non-success status.
    #[error("Server rejected {command}: {response}")]
    Protocol { command: String, response: String },

    /// The connection was closed in the middle of a response.
    #[error("Connection closed by server")]
    UnexpectedEof,

    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A message or header could not be decoded.
    #[error("Decoding error: {0}")]
    Decode(String),

    /// The character encoding is not supported.
    #[error("Unsupported charset: {0}")]
    UnsupportedCharset(String),

    /// One or more required configuration keys are absent.
    #[error("Missing required configuration keys: {}", .0.join(", "))]
    MissingConfigKeys(Vec<String>),

    /// A configuration value is present but unusable.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Convenience alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a `Protocol` variant from the command sent and the status line received.
    pub fn protocol(command: impl Into<String>, response: impl Into<String>) -> Self {
        Self::Protocol {
            command: command.into(),
            response: response.into(),
        }
    }
}
