//! Ferry server - the event loop behind the ferry-server binary.
//!
//! Exposed as a library so integration tests can bind a real listener.

pub mod server;

pub use server::Server;
