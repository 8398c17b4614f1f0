//! In-process limit store.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::trace;

use super::{Configured, LimitStore};
use crate::error::{Result, TollboothError};
use crate::ratelimit::{LimitKey, RateLimit, RateLimitLog};

/// A [`LimitStore`] kept entirely in memory.
///
/// Records live in a `DashMap`; `update` holds the shard write lock for the
/// duration of the closure, which serializes mutations per key. The audit
/// log is an append-only vector, optionally bounded.
#[derive(Debug, Default)]
pub struct MemoryStore {
    limits: DashMap<LimitKey, RateLimit>,
    log: RwLock<Vec<RateLimitLog>>,
    /// Maximum number of audit entries; accounting fails once it is reached
    log_capacity: Option<usize>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store whose audit log holds at most `capacity` entries.
    pub fn with_log_capacity(capacity: usize) -> Self {
        Self {
            log_capacity: Some(capacity),
            ..Self::default()
        }
    }

    fn push_log(&self, entry: RateLimitLog) -> Result<()> {
        let mut log = self.log.write();
        if let Some(capacity) = self.log_capacity {
            if log.len() >= capacity {
                return Err(TollboothError::Storage(format!(
                    "audit log is full ({} entries)",
                    capacity
                )));
            }
        }
        log.push(entry);
        Ok(())
    }

    /// Number of records, active or not.
    pub fn len(&self) -> usize {
        self.limits.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.limits.is_empty()
    }

    /// Total number of audit entries across all organizations.
    pub fn log_len(&self) -> usize {
        self.log.read().len()
    }
}

#[async_trait]
impl LimitStore for MemoryStore {
    async fn get(&self, key: &LimitKey) -> Result<Option<RateLimit>> {
        Ok(self.limits.get(key).map(|record| record.value().clone()))
    }

    async fn update<F, T>(&self, key: &LimitKey, f: F) -> Result<Option<T>>
    where
        F: FnOnce(&mut RateLimit) -> T + Send,
        T: Send,
    {
        let result = self.limits.get_mut(key).map(|mut record| f(record.value_mut()));
        trace!(key = %key, found = result.is_some(), "Applied record update");
        Ok(result)
    }

    async fn configure(&self, record: RateLimit) -> Result<Configured> {
        let outcome = match self.limits.entry(record.key.clone()) {
            Entry::Occupied(mut existing) => {
                let stored = existing.get_mut();
                stored.max_requests = record.max_requests;
                stored.updated_at = record.updated_at;
                Configured::Updated(stored.clone())
            }
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Configured::Created(record)
            }
        };
        Ok(outcome)
    }

    async fn keys_for_endpoint(
        &self,
        organization_id: &str,
        user_id: &str,
        endpoint: &str,
    ) -> Result<Vec<LimitKey>> {
        let mut keys: Vec<LimitKey> = self
            .limits
            .iter()
            .filter(|entry| entry.key().matches_endpoint(organization_id, user_id, endpoint))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn list_active(&self, organization_id: &str) -> Result<Vec<RateLimit>> {
        let mut records: Vec<RateLimit> = self
            .limits
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|record| record.is_active && record.key.organization_id == organization_id)
            .collect();
        records.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(records)
    }

    async fn account<F, T>(&self, key: &LimitKey, f: F) -> Result<Option<T>>
    where
        F: FnOnce(&mut RateLimit) -> Option<(T, RateLimitLog)> + Send,
        T: Send,
    {
        let Some(mut record) = self.limits.get_mut(key) else {
            return Ok(None);
        };

        // Mutate a copy so a failed log write leaves the stored record as it was.
        let mut draft = record.value().clone();
        let Some((result, entry)) = f(&mut draft) else {
            return Ok(None);
        };

        self.push_log(entry)?;
        *record.value_mut() = draft;
        trace!(key = %key, "Accounted request");
        Ok(Some(result))
    }

    async fn logs(&self, organization_id: &str) -> Result<Vec<RateLimitLog>> {
        Ok(self
            .log
            .read()
            .iter()
            .filter(|entry| entry.key.organization_id == organization_id)
            .cloned()
            .collect())
    }
}
