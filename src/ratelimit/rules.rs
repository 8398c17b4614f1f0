//! Bootstrap rate limit rules.
//!
//! Operators can seed limits from a YAML file at startup instead of calling
//! `configure` for each one. Rules are applied through the regular
//! configuration path, so restarting the service never clears a live counter.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use super::clock::Clock;
use super::key::LimitKey;
use super::limiter::RateLimiter;
use super::window::LimitType;
use crate::error::{Result, TollboothError};
use crate::store::{Configured, LimitStore};

/// A set of limits to configure at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitRules {
    #[serde(default)]
    pub limits: Vec<LimitRule>,
}

/// One limit to configure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitRule {
    pub organization_id: String,
    pub user_id: String,
    pub endpoint: String,
    #[serde(default)]
    pub limit_type: LimitType,
    pub max_requests: u64,
}

impl LimitRule {
    /// The key this rule configures.
    pub fn key(&self) -> LimitKey {
        LimitKey::new(
            self.organization_id.clone(),
            self.user_id.clone(),
            self.endpoint.clone(),
            self.limit_type,
        )
    }
}

impl LimitRules {
    /// Load rules from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate rules from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let rules: LimitRules = serde_yaml::from_str(yaml)
            .map_err(|e| TollboothError::Config(format!("Failed to parse rate limit rules: {}", e)))?;
        rules.validate()?;
        Ok(rules)
    }

    fn validate(&self) -> Result<()> {
        for rule in &self.limits {
            if rule.max_requests == 0 {
                return Err(TollboothError::Config(format!(
                    "rule for {} has max_requests 0; ceilings must be positive",
                    rule.key()
                )));
            }
            if rule.organization_id.is_empty() || rule.user_id.is_empty() || rule.endpoint.is_empty() {
                return Err(TollboothError::Config(
                    "rules need a non-empty organization_id, user_id and endpoint".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Configure every rule on the limiter, returning how many limits were newly created.
    pub async fn apply<S: LimitStore, C: Clock>(&self, limiter: &RateLimiter<S, C>) -> Result<usize> {
        let mut created = 0;
        for rule in &self.limits {
            if let Configured::Created(_) = limiter.configure(rule.key(), rule.max_requests).await? {
                created += 1;
            }
        }

        info!(
            rules = self.limits.len(),
            created = created,
            "Applied rate limit rules"
        );
        Ok(created)
    }
}
