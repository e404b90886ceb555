use serde::{Deserialize, Serialize};

use crate::config::AdminConfig;
use crate::{Error, Result};

/// An authenticated user of the admin surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub name: String,
    pub role: String,
}

/// Maps bearer tokens to callers and admits trusted roles only
#[derive(Debug, Clone)]
pub struct Authorizer {
    config: AdminConfig,
}

impl Authorizer {
    pub fn new(config: AdminConfig) -> Self {
        Self { config }
    }

    /// Resolve a token to a caller with an allowed role
    pub fn authenticate(&self, token: Option<&str>) -> Result<Caller> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Unauthorized("missing token".to_string()))?;

        let user = self
            .config
            .users
            .iter()
            .find(|u| u.token == token)
            .ok_or_else(|| Error::Unauthorized("unknown token".to_string()))?;

        let caller = Caller {
            name: user.name.clone(),
            role: user.role.clone(),
        };
        self.authorize(&caller)?;
        Ok(caller)
    }

    pub fn authorize(&self, caller: &Caller) -> Result<()> {
        if self.config.allowed_roles.iter().any(|r| r == &caller.role) {
            Ok(())
        } else {
            Err(Error::Unauthorized(format!(
                "role '{}' may not manage unpublish policies",
                caller.role
            )))
        }
    }
}
