//! Limit key generation and handling.

use serde::{Deserialize, Serialize};

use super::window::LimitType;

/// A key that uniquely identifies a rate limit record.
///
/// A tenant may hold several limits for the same endpoint, one per
/// granularity, so the limit type is part of the identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LimitKey {
    /// The organization (tenant) this limit belongs to
    pub organization_id: String,
    /// The authenticated user the limit applies to
    pub user_id: String,
    /// The API endpoint being limited
    pub endpoint: String,
    /// Window granularity
    pub limit_type: LimitType,
}

impl LimitKey {
    /// Create a new limit key.
    pub fn new(
        organization_id: impl Into<String>,
        user_id: impl Into<String>,
        endpoint: impl Into<String>,
        limit_type: LimitType,
    ) -> Self {
        Self {
            organization_id: organization_id.into(),
            user_id: user_id.into(),
            endpoint: endpoint.into(),
            limit_type,
        }
    }

    /// Whether this key targets the given (organization, user, endpoint) triple.
    pub fn matches_endpoint(&self, organization_id: &str, user_id: &str, endpoint: &str) -> bool {
        self.organization_id == organization_id && self.user_id == user_id && self.endpoint == endpoint
    }
}

impl std::fmt::Display for LimitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}:{}@{}",
            self.organization_id, self.user_id, self.endpoint, self.limit_type
        )
    }
}
