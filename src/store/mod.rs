//! Storage contract for rate limit records and the audit log.
//!
//! The limiter holds no state of its own between calls; everything lives
//! behind [`LimitStore`]. Implementations must apply [`LimitStore::update`]
//! atomically per key so concurrent increments never lose counts.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;

use crate::error::Result;
use crate::ratelimit::{LimitKey, RateLimit, RateLimitLog};

/// Outcome of a create-or-update of a limit's configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum Configured {
    /// No record existed; this one was inserted.
    Created(RateLimit),
    /// A record existed; only its ceiling changed.
    Updated(RateLimit),
}

impl Configured {
    /// The record as stored after the operation.
    pub fn record(&self) -> &RateLimit {
        match self {
            Configured::Created(record) | Configured::Updated(record) => record,
        }
    }

    /// Wire label for the outcome.
    pub fn status(&self) -> &'static str {
        match self {
            Configured::Created(_) => "created",
            Configured::Updated(_) => "updated",
        }
    }
}

/// Trait for rate limit stores.
///
/// This trait abstracts the durable record store so the limiter can run
/// against the bundled in-memory store or an external database.
#[async_trait]
pub trait LimitStore: Send + Sync {
    /// Fetch the record for a key.
    async fn get(&self, key: &LimitKey) -> Result<Option<RateLimit>>;

    /// Run `f` against the record for `key` as one atomic read-modify-write.
    ///
    /// No other mutation of the same key may interleave with `f`. Returns
    /// `None` without calling `f` when the key has no record.
    async fn update<F, T>(&self, key: &LimitKey, f: F) -> Result<Option<T>>
    where
        F: FnOnce(&mut RateLimit) -> T + Send,
        T: Send;

    /// Insert `record` if its key is free, otherwise copy only its
    /// `max_requests` onto the existing record.
    async fn configure(&self, record: RateLimit) -> Result<Configured>;

    /// Keys of every record for an (organization, user, endpoint) triple.
    async fn keys_for_endpoint(
        &self,
        organization_id: &str,
        user_id: &str,
        endpoint: &str,
    ) -> Result<Vec<LimitKey>>;

    /// All active records of an organization, ordered by key.
    async fn list_active(&self, organization_id: &str) -> Result<Vec<RateLimit>>;

    /// Run `f` against the record for `key` and, when it returns an audit
    /// entry, append that entry and keep the mutation as one atomic step.
    ///
    /// The record is left untouched when `f` returns `None` or when the entry
    /// cannot be written, so a counted request always has exactly one log row.
    /// Returns `None` when the key has no record or `f` declined.
    async fn account<F, T>(&self, key: &LimitKey, f: F) -> Result<Option<T>>
    where
        F: FnOnce(&mut RateLimit) -> Option<(T, RateLimitLog)> + Send,
        T: Send;

    /// Audit entries of an organization in the order they were written.
    async fn logs(&self, organization_id: &str) -> Result<Vec<RateLimitLog>>;
}
