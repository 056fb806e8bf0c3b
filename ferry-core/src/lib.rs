//! Ferry Core - building blocks for the Ferry line-protocol server
//!
//! This crate provides the foundational components for Ferry:
//! - Typed TOML configuration with validation
//! - Authentication policy and the per-connection session store
//! - Line-command parsing and dispatch
//! - Sandboxed file storage and the upload/download transfer state

pub mod auth;
pub mod config;
pub mod connection;
pub mod error;
pub mod files;
pub mod router;
pub mod session;
pub mod transfer;

pub use auth::AuthPolicy;
pub use config::ServerConfig;
pub use connection::{ConnMode, Connection};
pub use error::{AuthError, FileError, ProtocolError, TransferError};
pub use files::{FileInfo, FileStore};
pub use router::{Action, CommandRouter};
pub use session::{ConnId, Role, Session, SessionCounts, SessionStore};
pub use transfer::PendingTransfer;
