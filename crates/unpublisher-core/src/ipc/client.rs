//! Typed client for the admin socket

use std::collections::BTreeSet;
use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use super::protocol::*;
use crate::admin::PolicyStatus;
use crate::policy::{ConfigureRequest, ContentId, Policy};
use crate::scheduler::FiringOutcome;
use crate::{Error, Result};

/// Client for communicating with the daemon
#[derive(Clone)]
pub struct DaemonClient {
    socket_path: PathBuf,
    token: Option<String>,
}

impl DaemonClient {
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            token: None,
        }
    }

    /// Token sent with every request
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    /// Liveness probe; any failure reads as "not running"
    pub async fn ping(&self) -> Result<bool> {
        Ok(self.call(methods::PING, serde_json::Value::Null).await.is_ok())
    }

    pub async fn status(&self) -> Result<StatusResponse> {
        let result = self.call(methods::STATUS, serde_json::Value::Null).await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn list_policies(&self) -> Result<Vec<Policy>> {
        let result = self.call(methods::POLICY_LIST, serde_json::Value::Null).await?;
        let response: PolicyListResponse = serde_json::from_value(result)?;
        Ok(response.policies)
    }

    pub async fn policy_status(&self, policy_id: &str) -> Result<PolicyStatus> {
        let params = serde_json::to_value(PolicyIdParams {
            policy_id: policy_id.to_string(),
        })?;
        let result = self.call(methods::POLICY_STATUS, params).await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn configure(&self, policy_id: &str, request: &ConfigureRequest) -> Result<Policy> {
        let params = serde_json::to_value(ConfigureParams {
            policy_id: policy_id.to_string(),
            request: request.clone(),
        })?;
        let result = self.call(methods::POLICY_CONFIGURE, params).await?;
        let response: PolicyResponse = serde_json::from_value(result)?;
        Ok(response.policy)
    }

    /// Clear the job log; returns how many entries were removed
    pub async fn clear_log(&self, policy_id: &str) -> Result<u64> {
        let params = serde_json::to_value(PolicyIdParams {
            policy_id: policy_id.to_string(),
        })?;
        let result = self.call(methods::POLICY_CLEAR_LOG, params).await?;
        let response: ClearLogResponse = serde_json::from_value(result)?;
        Ok(response.cleared)
    }

    pub async fn update_exclusions(
        &self,
        policy_id: &str,
        exclusions: &BTreeSet<ContentId>,
    ) -> Result<Policy> {
        let params = serde_json::to_value(ExclusionParams {
            policy_id: policy_id.to_string(),
            exclusions: exclusions.clone(),
        })?;
        let result = self.call(methods::POLICY_UPDATE_EXCLUSIONS, params).await?;
        let response: PolicyResponse = serde_json::from_value(result)?;
        Ok(response.policy)
    }

    /// Fire a policy now
    pub async fn run(&self, policy_id: &str) -> Result<FiringOutcome> {
        let params = serde_json::to_value(PolicyIdParams {
            policy_id: policy_id.to_string(),
        })?;
        let result = self.call(methods::POLICY_RUN, params).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// One request per connection; the daemon answers with a single line
    async fn call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            Error::Other(format!(
                "Cannot reach daemon at {} ({}). Start it with 'unpublisher daemon start'.",
                self.socket_path.display(),
                e
            ))
        })?;
        let (read_half, mut write_half) = stream.into_split();

        let request = Request::new(method)
            .with_params(params)
            .with_token(self.token.clone());
        let mut line = serde_json::to_vec(&request)?;
        line.push(b'\n');
        write_half.write_all(&line).await?;
        write_half.flush().await?;

        let mut reply = String::new();
        BufReader::new(read_half).read_line(&mut reply).await?;
        serde_json::from_str::<Response>(&reply)?.into_result()
    }
}

/// Whether a daemon answers ping on `socket_path`
pub async fn is_daemon_running(socket_path: &std::path::Path) -> bool {
    DaemonClient::new(socket_path.to_path_buf())
        .ping()
        .await
        .unwrap_or(false)
}
