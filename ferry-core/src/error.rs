//! Error taxonomy for Ferry
//!
//! Every client-visible failure renders as a single `ERROR: ...` line; the
//! `Display` strings below are the exact text sent over the wire. Socket
//! faults are handled at the event loop and are fatal to one connection only.

use thiserror::Error;

/// Authentication and authorization failures.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    #[error("ERROR: Username cannot be empty")]
    EmptyUsername,

    #[error("ERROR: Username too long (max 50 characters)")]
    UsernameTooLong,

    #[error("ERROR: Username can only contain letters, numbers, underscores, hyphens, and dots")]
    InvalidUsernameChars,

    #[error("ERROR: Already authenticated. Use /logout to end the current session first")]
    AlreadyAuthenticated,

    #[error("ERROR: Invalid admin password")]
    InvalidCredentials,
}

/// File storage failures.
#[derive(Debug, Error)]
pub enum FileError {
    #[error("ERROR: Invalid filename: {0}")]
    InvalidFilename(&'static str),

    #[error("ERROR: File not found: {0}")]
    NotFound(String),

    #[error("ERROR: File operation failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Byte-stream transfer failures.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TransferError {
    #[error("ERROR: Upload timed out before all bytes were received")]
    Timeout,
}

/// Line-protocol violations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("ERROR: Line too long (max {0} bytes)")]
    LineTooLong(usize),
}
