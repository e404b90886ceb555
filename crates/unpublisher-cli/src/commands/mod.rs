use std::collections::BTreeSet;

use anyhow::Result;

use unpublisher_core::ipc::{is_daemon_running, DaemonClient};
use unpublisher_core::policy::{ConfigureRequest, ContentId, Policy};
use unpublisher_core::scheduler::FiringOutcome;
use unpublisher_core::{AppConfig, Authorizer, Caller, PolicyStatus, Runtime};

pub mod clear_log;
pub mod configure;
pub mod daemon;
pub mod exclude;
pub mod import;
pub mod list;
pub mod run;
pub mod status;

/// Admin operations, through the daemon when it runs or against the database
/// directly otherwise. Both paths authenticate the token.
pub enum Admin {
    Daemon(DaemonClient),
    Local { runtime: Runtime, caller: Caller },
}

impl Admin {
    pub async fn connect(config: &AppConfig, token: Option<String>) -> Result<Self> {
        let socket_path = config.socket_path();
        if is_daemon_running(&socket_path).await {
            return Ok(Self::Daemon(DaemonClient::new(socket_path).with_token(token)));
        }

        // Opening the runtime creates the database and syncs definitions
        let caller = Authorizer::new(config.admin.clone()).authenticate(token.as_deref())?;
        let runtime = Runtime::open(config).await?;
        Ok(Self::Local { runtime, caller })
    }

    pub async fn list(&self) -> Result<Vec<Policy>> {
        Ok(match self {
            Self::Daemon(client) => client.list_policies().await?,
            Self::Local { runtime, caller } => runtime.admin.list(caller).await?,
        })
    }

    pub async fn status(&self, policy_id: &str) -> Result<PolicyStatus> {
        Ok(match self {
            Self::Daemon(client) => client.policy_status(policy_id).await?,
            Self::Local { runtime, caller } => runtime.admin.status(caller, policy_id).await?,
        })
    }

    pub async fn configure(&self, policy_id: &str, request: &ConfigureRequest) -> Result<Policy> {
        Ok(match self {
            Self::Daemon(client) => client.configure(policy_id, request).await?,
            Self::Local { runtime, caller } => {
                runtime.admin.configure(caller, policy_id, request).await?
            }
        })
    }

    pub async fn clear_log(&self, policy_id: &str) -> Result<u64> {
        Ok(match self {
            Self::Daemon(client) => client.clear_log(policy_id).await?,
            Self::Local { runtime, caller } => runtime.admin.clear_log(caller, policy_id).await?,
        })
    }

    pub async fn update_exclusions(
        &self,
        policy_id: &str,
        exclusions: &BTreeSet<ContentId>,
    ) -> Result<Policy> {
        Ok(match self {
            Self::Daemon(client) => client.update_exclusions(policy_id, exclusions).await?,
            Self::Local { runtime, caller } => {
                runtime
                    .admin
                    .update_exclusion_list(caller, policy_id, exclusions)
                    .await?
            }
        })
    }

    pub async fn run(&self, policy_id: &str) -> Result<FiringOutcome> {
        Ok(match self {
            Self::Daemon(client) => client.run(policy_id).await?,
            Self::Local { runtime, caller } => runtime.admin.run_now(caller, policy_id).await?,
        })
    }
}

/// `2025-06-01 12:00` or a dash
pub fn format_time(at: Option<chrono::DateTime<chrono::Utc>>) -> String {
    at.map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}
