pub mod admin;
pub mod auth;
pub mod config;
pub mod content;
pub mod error;
pub mod ipc;
pub mod jobs;
pub mod policy;
pub mod queue;
pub mod runtime;
pub mod scheduler;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;

pub use admin::{AdminService, PolicyStatus};
pub use auth::{Authorizer, Caller};
pub use config::AppConfig;
pub use error::{Error, Result};
pub use ipc::{DaemonClient, DaemonServer};
pub use runtime::Runtime;
