//! IPC module for daemon-client communication
//!
//! Unix socket JSON-RPC between the long-running daemon and the CLI.

mod client;
mod protocol;
mod server;

pub use client::{is_daemon_running, DaemonClient};
pub use protocol::*;
pub use server::DaemonServer;
