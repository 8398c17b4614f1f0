//! Persisted rate limit state and audit entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::key::LimitKey;

/// The mutable state of one configured limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimit {
    pub id: Uuid,
    #[serde(flatten)]
    pub key: LimitKey,
    /// Ceiling for the current window
    pub max_requests: u64,
    /// Requests accounted since the last rollover or manual reset
    pub current_requests: u64,
    /// End of the current window (exclusive)
    pub reset_at: DateTime<Utc>,
    /// Requests that pushed the counter past `max_requests`
    pub exceeded_count: u64,
    pub is_active: bool,
    pub last_request_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RateLimit {
    /// A fresh, active limit with an empty window ending at `reset_at`.
    pub fn new(key: LimitKey, max_requests: u64, reset_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            key,
            max_requests,
            current_requests: 0,
            reset_at,
            exceeded_count: 0,
            is_active: true,
            last_request_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the window has ended as of `now`.
    pub fn window_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.reset_at
    }

    /// Requests left in the current window.
    pub fn remaining(&self) -> u64 {
        self.max_requests.saturating_sub(self.current_requests)
    }
}

/// One accounted request. Entries are never modified once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitLog {
    pub id: Uuid,
    #[serde(flatten)]
    pub key: LimitKey,
    /// Counter value after this request was added
    pub request_count: u64,
    pub max_allowed: u64,
    pub exceeded: bool,
    pub excess_requests: u64,
    pub ip_address: Option<String>,
    pub request_method: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl RateLimitLog {
    /// Build the audit entry for a request that brought the counter to `request_count`.
    pub fn accounted(
        key: LimitKey,
        request_count: u64,
        max_allowed: u64,
        ip_address: Option<String>,
        request_method: Option<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            key,
            request_count,
            max_allowed,
            exceeded: request_count > max_allowed,
            excess_requests: request_count.saturating_sub(max_allowed),
            ip_address,
            request_method,
            timestamp,
        }
    }
}
