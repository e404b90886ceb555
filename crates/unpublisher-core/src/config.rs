use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::policy::{AttributeFilter, PolicyDefinition, Recurrence, RetentionWindow};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default = "default_policies")]
    pub policies: Vec<PolicyDefinition>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            scheduler: SchedulerConfig::default(),
            pipeline: PipelineConfig::default(),
            worker: WorkerConfig::default(),
            admin: AdminConfig::default(),
            policies: default_policies(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Data directory path
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Log level used when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How often every policy is checked for being due (0 = disabled)
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum work items committed to the queue in one transaction
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Candidate ids fetched from the content repository per query
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Timeout for a single content repository query
    #[serde(default = "default_timeout")]
    pub repository_timeout_secs: u64,
    /// Timeout for committing one chunk to the queue
    #[serde(default = "default_timeout")]
    pub queue_commit_timeout_secs: u64,
    /// Drop queued work items of a policy when it gets disabled
    #[serde(default = "default_true")]
    pub purge_queue_on_disable: bool,
    /// Keep at most this many job log entries per policy (0 = unbounded)
    #[serde(default)]
    pub max_log_entries: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            page_size: default_page_size(),
            repository_timeout_secs: default_timeout(),
            queue_commit_timeout_secs: default_timeout(),
            purge_queue_on_disable: default_true(),
            max_log_entries: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// How often the queue is polled for work (0 = worker disabled)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Work items claimed per poll
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Concurrent unpublish operations
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Attempts before a work item is dropped as permanently failed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Seconds before a claimed but unfinished item becomes claimable again
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            visibility_timeout_secs: default_visibility_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Roles allowed to use the admin surface
    #[serde(default = "default_allowed_roles")]
    pub allowed_roles: Vec<String>,
    /// Known admin users and their bearer tokens
    #[serde(default)]
    pub users: Vec<AdminUser>,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            allowed_roles: default_allowed_roles(),
            users: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminUser {
    pub name: String,
    pub role: String,
    pub token: String,
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("unpublisher")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_check_interval() -> u64 {
    300 // 5 minutes
}

fn default_chunk_size() -> usize {
    5000
}

fn default_page_size() -> u32 {
    1000
}

fn default_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    5
}

fn default_batch_size() -> u32 {
    50
}

fn default_concurrency() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    3
}

fn default_visibility_timeout() -> u64 {
    300
}

fn default_allowed_roles() -> Vec<String> {
    vec![
        "administrator".to_string(),
        "unpublish_admin".to_string(),
        "unpublish_editor".to_string(),
    ]
}

fn default_policies() -> Vec<PolicyDefinition> {
    vec![
        PolicyDefinition {
            id: "five-years".to_string(),
            content_type: "media".to_string(),
            recurrence: Recurrence::Yearly,
            retention: RetentionWindow::Years(5),
            filter: None,
        },
        PolicyDefinition {
            id: "two-years".to_string(),
            content_type: "media".to_string(),
            recurrence: Recurrence::Daily,
            retention: RetentionWindow::Years(2),
            filter: Some(AttributeFilter {
                key: "gated_content_disclaimer".to_string(),
                value: "1".to_string(),
            }),
        },
    ]
}

/// Expand tilde (~) in path to user's home directory
fn expand_tilde(path: &std::path::Path) -> PathBuf {
    if let Some(path_str) = path.to_str() {
        if let Some(stripped) = path_str.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(stripped);
            }
        } else if path_str == "~" {
            if let Some(home) = dirs::home_dir() {
                return home;
            }
        }
    }
    path.to_path_buf()
}

impl AppConfig {
    /// Load configuration from file or return defaults
    pub fn load() -> crate::Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::from_toml(&content)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse and validate configuration text
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| crate::Error::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> crate::Result<()> {
        let mut seen = std::collections::HashSet::new();
        for def in &self.policies {
            if def.id.trim().is_empty() {
                return Err(crate::Error::Configuration(
                    "policy id must not be empty".to_string(),
                ));
            }
            if !seen.insert(def.id.as_str()) {
                return Err(crate::Error::Configuration(format!(
                    "duplicate policy id '{}'",
                    def.id
                )));
            }
        }
        if self.worker.max_attempts == 0 {
            return Err(crate::Error::Configuration(
                "worker.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the configuration file path
    /// Always uses ~/.config/unpublisher/config.toml on all platforms
    pub fn config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("unpublisher")
            .join("config.toml")
    }

    /// Get the database file path
    pub fn database_path(&self) -> PathBuf {
        self.data_dir().join("unpublisher.db")
    }

    /// Get the Unix socket path for IPC
    pub fn socket_path(&self) -> PathBuf {
        self.data_dir().join("unpublisher.sock")
    }

    /// Get the data directory (with tilde expansion)
    pub fn data_dir(&self) -> PathBuf {
        expand_tilde(&self.general.data_dir)
    }
}
