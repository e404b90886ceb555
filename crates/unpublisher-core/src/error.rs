use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Content repository unavailable: {0}")]
    RepositoryUnavailable(String),

    #[error("Queue commit failed: {0}")]
    QueueCommit(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Policy not found: {0}")]
    PolicyNotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether a later attempt of the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RepositoryUnavailable(_) | Self::QueueCommit(_) => true,
            Self::Database(err) => crate::storage::is_transient_error(err),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(Error::RepositoryUnavailable("timeout".into()).is_retryable());
        assert!(Error::QueueCommit("disk full".into()).is_retryable());
        assert!(!Error::Configuration("bad date".into()).is_retryable());
        assert!(!Error::Unauthorized("anonymous".into()).is_retryable());
        assert!(!Error::Database(sqlx::Error::RowNotFound).is_retryable());
    }
}
