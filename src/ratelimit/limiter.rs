//! Core rate limiter implementation.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::Serialize;
use tracing::{debug, trace, warn};

use super::clock::{Clock, SystemClock};
use super::key::LimitKey;
use super::record::{RateLimit, RateLimitLog};
use super::window::{seconds_until, LimitType};
use crate::error::{Result, TollboothError};
use crate::store::{Configured, LimitStore};

/// Counters of a limit's current window, as seen by one call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowStatus {
    pub current_requests: u64,
    pub max_requests: u64,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
    pub seconds_until_reset: u64,
}

impl WindowStatus {
    fn of(record: &RateLimit, now: DateTime<Utc>) -> Self {
        Self {
            current_requests: record.current_requests,
            max_requests: record.max_requests,
            remaining: record.remaining(),
            reset_at: record.reset_at,
            seconds_until_reset: seconds_until(record.reset_at, now),
        }
    }
}

/// Decision returned by [`RateLimiter::check`].
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    /// No active limit exists for the key; the request is let through.
    NotConfigured,
    /// The limit has room for another request.
    Allowed(WindowStatus),
    /// The window is full.
    Denied(WindowStatus),
}

impl CheckOutcome {
    /// Whether the caller may proceed.
    pub fn is_allowed(&self) -> bool {
        !matches!(self, CheckOutcome::Denied(_))
    }
}

/// Result of accounting one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Accounted {
    /// Counter value after this request
    pub current_requests: u64,
    pub max_requests: u64,
    /// Whether this request pushed the counter past the ceiling
    pub exceeded: bool,
    pub reset_at: DateTime<Utc>,
}

/// Result returned by [`RateLimiter::increment`].
#[derive(Debug, Clone, PartialEq)]
pub enum IncrementOutcome {
    /// No active limit exists for the key; nothing was counted or logged.
    NotConfigured,
    /// The request was counted and logged.
    Accounted(Accounted),
}

/// Request details copied into the audit log.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestMeta {
    pub ip_address: Option<String>,
    pub request_method: Option<String>,
}

/// The rate limiter that evaluates and accounts requests against stored limits.
///
/// The limiter itself is stateless; every decision is derived from the
/// record in the store, and every mutation goes through a single atomic
/// [`LimitStore::update`] or [`LimitStore::account`] so concurrent callers
/// never lose counts.
pub struct RateLimiter<S: LimitStore, C: Clock = SystemClock> {
    store: Arc<S>,
    clock: C,
    /// Zone in which windows are aligned
    offset: FixedOffset,
}

impl<S: LimitStore> RateLimiter<S, SystemClock> {
    /// Create a rate limiter on the system clock, aligning windows in UTC.
    pub fn new(store: Arc<S>) -> Self {
        Self::with_clock(store, SystemClock::new())
    }
}

impl<S: LimitStore, C: Clock> RateLimiter<S, C> {
    /// Create a rate limiter with an explicit time source.
    pub fn with_clock(store: Arc<S>, clock: C) -> Self {
        Self {
            store,
            clock,
            offset: Utc.fix(),
        }
    }

    /// Align windows to the given UTC offset instead of UTC.
    pub fn with_utc_offset(mut self, offset: FixedOffset) -> Self {
        self.offset = offset;
        self
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    fn next_reset(&self, limit_type: LimitType, now: DateTime<Utc>) -> DateTime<Utc> {
        limit_type.next_reset_with_offset(now, self.offset)
    }

    /// Decide whether a request for `key` may proceed.
    ///
    /// An expired window is rolled over and persisted even though nothing is
    /// counted. Within a live window this is a pure read.
    pub async fn check(&self, key: &LimitKey) -> Result<CheckOutcome> {
        let now = self.clock.now();
        let next_reset = self.next_reset(key.limit_type, now);

        trace!(key = %key, "Checking rate limit");

        let outcome = self
            .store
            .update(key, |record| {
                if !record.is_active {
                    return CheckOutcome::NotConfigured;
                }

                if record.window_expired(now) {
                    record.current_requests = 0;
                    record.reset_at = next_reset;
                    record.updated_at = now;
                    return CheckOutcome::Allowed(WindowStatus::of(record, now));
                }

                let status = WindowStatus::of(record, now);
                if record.current_requests >= record.max_requests {
                    CheckOutcome::Denied(status)
                } else {
                    CheckOutcome::Allowed(status)
                }
            })
            .await?
            .unwrap_or(CheckOutcome::NotConfigured);

        match &outcome {
            CheckOutcome::NotConfigured => debug!(key = %key, "No limit configured"),
            CheckOutcome::Denied(status) => debug!(
                key = %key,
                current = status.current_requests,
                max = status.max_requests,
                "Rate limit exceeded"
            ),
            CheckOutcome::Allowed(_) => {}
        }

        Ok(outcome)
    }

    /// Count one completed request against `key` and record it in the audit log.
    ///
    /// The counter and its log entry are written together; if the entry cannot
    /// be stored the counter is not advanced.
    pub async fn increment(&self, key: &LimitKey, meta: RequestMeta) -> Result<IncrementOutcome> {
        let now = self.clock.now();
        let next_reset = self.next_reset(key.limit_type, now);

        let RequestMeta {
            ip_address,
            request_method,
        } = meta;

        let accounted = self
            .store
            .account(key, |record| {
                if !record.is_active {
                    return None;
                }

                if record.window_expired(now) {
                    record.current_requests = 0;
                    record.reset_at = next_reset;
                }

                let count = record.current_requests + 1;
                let exceeded = count > record.max_requests;

                record.current_requests = count;
                record.last_request_at = Some(now);
                record.updated_at = now;
                if exceeded {
                    record.exceeded_count += 1;
                }

                let entry = RateLimitLog::accounted(
                    record.key.clone(),
                    count,
                    record.max_requests,
                    ip_address,
                    request_method,
                    now,
                );
                let accounted = Accounted {
                    current_requests: count,
                    max_requests: record.max_requests,
                    exceeded,
                    reset_at: record.reset_at,
                };
                Some((accounted, entry))
            })
            .await?;

        let Some(accounted) = accounted else {
            debug!(key = %key, "No limit configured, request not counted");
            return Ok(IncrementOutcome::NotConfigured);
        };

        if accounted.exceeded {
            warn!(
                key = %key,
                current = accounted.current_requests,
                max = accounted.max_requests,
                "Request accounted over limit"
            );
        } else {
            trace!(key = %key, current = accounted.current_requests, "Request accounted");
        }

        Ok(IncrementOutcome::Accounted(accounted))
    }

    /// Clear the counters of a limit.
    ///
    /// Without a limit type, every limit on the (organization, user, endpoint)
    /// triple is cleared. Returns how many records were reset; zero is not an
    /// error.
    pub async fn reset(
        &self,
        organization_id: &str,
        user_id: &str,
        endpoint: &str,
        limit_type: Option<LimitType>,
    ) -> Result<usize> {
        let now = self.clock.now();
        let keys = match limit_type {
            Some(limit_type) => vec![LimitKey::new(organization_id, user_id, endpoint, limit_type)],
            None => {
                self.store
                    .keys_for_endpoint(organization_id, user_id, endpoint)
                    .await?
            }
        };

        let mut reset = 0;
        for key in keys {
            let next_reset = self.next_reset(key.limit_type, now);
            let cleared = self
                .store
                .update(&key, |record| {
                    record.current_requests = 0;
                    record.exceeded_count = 0;
                    record.reset_at = next_reset;
                    record.updated_at = now;
                })
                .await?;

            if cleared.is_some() {
                debug!(key = %key, "Rate limit reset");
                reset += 1;
            }
        }

        Ok(reset)
    }

    /// All active limits of an organization, exactly as last persisted.
    pub async fn get_status(&self, organization_id: &str) -> Result<Vec<RateLimit>> {
        self.store.list_active(organization_id).await
    }

    /// Create a limit, or change the ceiling of an existing one.
    ///
    /// Updating never touches the counter or the window of an existing limit.
    pub async fn configure(&self, key: LimitKey, max_requests: u64) -> Result<Configured> {
        if max_requests == 0 {
            return Err(TollboothError::validation("max_requests must be a positive integer"));
        }

        let now = self.clock.now();
        let reset_at = self.next_reset(key.limit_type, now);
        let configured = self
            .store
            .configure(RateLimit::new(key, max_requests, reset_at, now))
            .await?;

        debug!(
            key = %configured.record().key,
            max = max_requests,
            status = configured.status(),
            "Rate limit configured"
        );

        Ok(configured)
    }

    /// Audit entries of an organization in write order.
    pub async fn audit_log(&self, organization_id: &str) -> Result<Vec<RateLimitLog>> {
        self.store.logs(organization_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::ManualClock;
    use crate::store::MemoryStore;
    use chrono::{Duration, TimeZone};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 12, 34, 56).unwrap()
    }

    fn limiter() -> (RateLimiter<MemoryStore, ManualClock>, ManualClock) {
        let clock = ManualClock::new(start());
        let limiter = RateLimiter::with_clock(Arc::new(MemoryStore::new()), clock.clone());
        (limiter, clock)
    }

    fn key(limit_type: LimitType) -> LimitKey {
        LimitKey::new("acme", "alice", "/x", limit_type)
    }

    fn accounted(outcome: IncrementOutcome) -> Accounted {
        match outcome {
            IncrementOutcome::Accounted(accounted) => accounted,
            IncrementOutcome::NotConfigured => panic!("expected the request to be accounted"),
        }
    }

    #[tokio::test]
    async fn test_unconfigured_key_fails_open() {
        let (limiter, _) = limiter();
        let key = key(LimitType::PerMinute);

        assert_eq!(limiter.check(&key).await.unwrap(), CheckOutcome::NotConfigured);
        assert!(limiter.check(&key).await.unwrap().is_allowed());
        assert_eq!(
            limiter.increment(&key, RequestMeta::default()).await.unwrap(),
            IncrementOutcome::NotConfigured
        );
        assert!(limiter.audit_log("acme").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_inactive_limit_counts_as_unconfigured() {
        let (limiter, _) = limiter();
        let key = key(LimitType::PerMinute);
        limiter.configure(key.clone(), 1).await.unwrap();
        limiter.store().update(&key, |r| r.is_active = false).await.unwrap();

        assert_eq!(limiter.check(&key).await.unwrap(), CheckOutcome::NotConfigured);
        assert_eq!(
            limiter.increment(&key, RequestMeta::default()).await.unwrap(),
            IncrementOutcome::NotConfigured
        );
        assert!(limiter.audit_log("acme").await.unwrap().is_empty());
        assert!(limiter.get_status("acme").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_configure_then_exceed() {
        let (limiter, _) = limiter();
        let key = key(LimitType::PerMinute);
        let configured = limiter.configure(key.clone(), 3).await.unwrap();
        assert_eq!(configured.status(), "created");

        for expected in 1..=3 {
            let result = accounted(limiter.increment(&key, RequestMeta::default()).await.unwrap());
            assert_eq!(result.current_requests, expected);
            assert!(!result.exceeded);
        }

        let fourth = accounted(
            limiter
                .increment(
                    &key,
                    RequestMeta {
                        ip_address: Some("203.0.113.7".into()),
                        request_method: Some("POST".into()),
                    },
                )
                .await
                .unwrap(),
        );
        assert!(fourth.exceeded);
        assert_eq!(fourth.current_requests, 4);

        let log = limiter.audit_log("acme").await.unwrap();
        assert_eq!(log.len(), 4);
        let last = log.last().unwrap();
        assert!(last.exceeded);
        assert_eq!(last.excess_requests, 1);
        assert_eq!(last.max_allowed, 3);
        assert_eq!(last.ip_address.as_deref(), Some("203.0.113.7"));
        assert_eq!(last.request_method.as_deref(), Some("POST"));
        assert!(log[..3].iter().all(|entry| !entry.exceeded && entry.excess_requests == 0));

        let record = limiter.store().get(&key).await.unwrap().unwrap();
        assert_eq!(record.exceeded_count, 1);
        assert_eq!(record.last_request_at, Some(start()));
    }

    #[tokio::test]
    async fn test_failed_log_write_leaves_counter_untouched() {
        let clock = ManualClock::new(start());
        let limiter = RateLimiter::with_clock(Arc::new(MemoryStore::with_log_capacity(1)), clock);
        let key = key(LimitType::PerMinute);
        limiter.configure(key.clone(), 3).await.unwrap();

        accounted(limiter.increment(&key, RequestMeta::default()).await.unwrap());
        let err = limiter.increment(&key, RequestMeta::default()).await.unwrap_err();
        assert!(matches!(err, TollboothError::Storage(_)));

        let record = limiter.store().get(&key).await.unwrap().unwrap();
        assert_eq!(record.current_requests, 1);
        assert_eq!(limiter.audit_log("acme").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_check_reports_remaining_and_denies_when_full() {
        let (limiter, clock) = limiter();
        let key = key(LimitType::PerMinute);
        limiter.configure(key.clone(), 2).await.unwrap();
        limiter.increment(&key, RequestMeta::default()).await.unwrap();

        match limiter.check(&key).await.unwrap() {
            CheckOutcome::Allowed(status) => {
                assert_eq!(status.current_requests, 1);
                assert_eq!(status.remaining, 1);
                assert_eq!(status.reset_at, Utc.with_ymd_and_hms(2024, 3, 10, 12, 35, 0).unwrap());
                assert_eq!(status.seconds_until_reset, 4);
            }
            other => panic!("expected allowed, got {:?}", other),
        }

        limiter.increment(&key, RequestMeta::default()).await.unwrap();
        clock.advance(Duration::milliseconds(1500));

        match limiter.check(&key).await.unwrap() {
            CheckOutcome::Denied(status) => {
                assert_eq!(status.current_requests, 2);
                assert_eq!(status.max_requests, 2);
                assert_eq!(status.remaining, 0);
                assert_eq!(status.seconds_until_reset, 3);
            }
            other => panic!("expected denied, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_check_rolls_over_expired_window() {
        let (limiter, clock) = limiter();
        let key = key(LimitType::PerMinute);
        limiter.configure(key.clone(), 1).await.unwrap();
        limiter.increment(&key, RequestMeta::default()).await.unwrap();
        limiter.increment(&key, RequestMeta::default()).await.unwrap();

        clock.set(Utc.with_ymd_and_hms(2024, 3, 10, 12, 40, 12).unwrap());

        match limiter.check(&key).await.unwrap() {
            CheckOutcome::Allowed(status) => {
                assert_eq!(status.current_requests, 0);
                assert_eq!(status.remaining, 1);
            }
            other => panic!("expected allowed after rollover, got {:?}", other),
        }

        let record = limiter.store().get(&key).await.unwrap().unwrap();
        assert_eq!(record.current_requests, 0);
        assert_eq!(record.reset_at, Utc.with_ymd_and_hms(2024, 3, 10, 12, 41, 0).unwrap());
        // rollover does not forgive past overages
        assert_eq!(record.exceeded_count, 1);
    }

    #[tokio::test]
    async fn test_rollover_alignment_for_hour_and_day() {
        let (limiter, clock) = limiter();
        let hourly = key(LimitType::PerHour);
        let daily = key(LimitType::PerDay);
        limiter.configure(hourly.clone(), 5).await.unwrap();
        limiter.configure(daily.clone(), 5).await.unwrap();

        clock.set(Utc.with_ymd_and_hms(2024, 3, 12, 7, 8, 9).unwrap());
        limiter.check(&hourly).await.unwrap();
        limiter.check(&daily).await.unwrap();

        let hour_record = limiter.store().get(&hourly).await.unwrap().unwrap();
        let day_record = limiter.store().get(&daily).await.unwrap().unwrap();
        assert_eq!(hour_record.reset_at, Utc.with_ymd_and_hms(2024, 3, 12, 8, 0, 0).unwrap());
        assert_eq!(day_record.reset_at, Utc.with_ymd_and_hms(2024, 3, 13, 0, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn test_increment_after_expiry_starts_new_window() {
        let (limiter, clock) = limiter();
        let key = key(LimitType::PerMinute);
        limiter.configure(key.clone(), 1).await.unwrap();
        limiter.increment(&key, RequestMeta::default()).await.unwrap();

        clock.advance(Duration::minutes(3));
        let result = accounted(limiter.increment(&key, RequestMeta::default()).await.unwrap());
        assert_eq!(result.current_requests, 1);
        assert!(!result.exceeded);
        assert_eq!(result.reset_at, Utc.with_ymd_and_hms(2024, 3, 10, 12, 38, 0).unwrap());
    }

    #[tokio::test]
    async fn test_utc_offset_aligns_daily_window() {
        let clock = ManualClock::new(start());
        let limiter = RateLimiter::with_clock(Arc::new(MemoryStore::new()), clock)
            .with_utc_offset(FixedOffset::west_opt(5 * 3600).unwrap());
        let key = key(LimitType::PerDay);

        let configured = limiter.configure(key, 10).await.unwrap();
        assert_eq!(
            configured.record().reset_at,
            Utc.with_ymd_and_hms(2024, 3, 11, 5, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_reset_clears_counters() {
        let (limiter, clock) = limiter();
        let key = key(LimitType::PerMinute);
        limiter.configure(key.clone(), 1).await.unwrap();
        for _ in 0..3 {
            limiter.increment(&key, RequestMeta::default()).await.unwrap();
        }
        clock.advance(Duration::seconds(2));

        let count = limiter
            .reset("acme", "alice", "/x", Some(LimitType::PerMinute))
            .await
            .unwrap();
        assert_eq!(count, 1);

        let record = limiter.store().get(&key).await.unwrap().unwrap();
        assert_eq!(record.current_requests, 0);
        assert_eq!(record.exceeded_count, 0);
        assert!(record.reset_at > clock.now());
        // the audit trail survives a reset
        assert_eq!(limiter.audit_log("acme").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_reset_without_type_clears_every_granularity() {
        let (limiter, _) = limiter();
        let minute = key(LimitType::PerMinute);
        let day = key(LimitType::PerDay);
        limiter.configure(minute.clone(), 10).await.unwrap();
        limiter.configure(day.clone(), 10).await.unwrap();
        limiter.increment(&minute, RequestMeta::default()).await.unwrap();
        limiter.increment(&day, RequestMeta::default()).await.unwrap();

        assert_eq!(limiter.reset("acme", "alice", "/x", None).await.unwrap(), 2);
        for key in [minute, day] {
            assert_eq!(limiter.store().get(&key).await.unwrap().unwrap().current_requests, 0);
        }
    }

    #[tokio::test]
    async fn test_reset_missing_limit_is_noop() {
        let (limiter, _) = limiter();
        assert_eq!(limiter.reset("acme", "alice", "/x", None).await.unwrap(), 0);
        assert_eq!(
            limiter
                .reset("acme", "alice", "/x", Some(LimitType::PerHour))
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_configure_updates_only_ceiling() {
        let (limiter, clock) = limiter();
        let key = key(LimitType::PerMinute);
        limiter.configure(key.clone(), 5).await.unwrap();
        limiter.increment(&key, RequestMeta::default()).await.unwrap();
        limiter.increment(&key, RequestMeta::default()).await.unwrap();
        let before = limiter.store().get(&key).await.unwrap().unwrap();

        clock.advance(Duration::seconds(1));
        let updated = limiter.configure(key.clone(), 50).await.unwrap();
        assert_eq!(updated.status(), "updated");
        assert_eq!(updated.record().max_requests, 50);
        assert_eq!(updated.record().current_requests, 2);
        assert_eq!(updated.record().reset_at, before.reset_at);
        assert_eq!(updated.record().id, before.id);
    }

    #[tokio::test]
    async fn test_configure_rejects_zero_before_touching_store() {
        let (limiter, _) = limiter();
        let err = limiter.configure(key(LimitType::PerMinute), 0).await.unwrap_err();
        assert!(matches!(err, TollboothError::Validation(_)));
        assert!(limiter.store().is_empty());
    }

    #[tokio::test]
    async fn test_get_status_is_read_only() {
        let (limiter, clock) = limiter();
        let key = key(LimitType::PerMinute);
        limiter.configure(key.clone(), 2).await.unwrap();
        limiter.increment(&key, RequestMeta::default()).await.unwrap();

        clock.advance(Duration::minutes(5));
        let first = limiter.get_status("acme").await.unwrap();
        let second = limiter.get_status("acme").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.len(), 1);
        // stale count is reported as persisted, no rollover
        assert_eq!(first[0].current_requests, 1);
        assert!(limiter.get_status("other").await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_increments_lose_nothing() {
        const N: u64 = 50;
        let (limiter, _) = limiter();
        let limiter = Arc::new(limiter);
        let key = key(LimitType::PerMinute);
        limiter.configure(key.clone(), N).await.unwrap();

        let tasks: Vec<_> = (0..N)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                let key = key.clone();
                tokio::spawn(async move { limiter.increment(&key, RequestMeta::default()).await })
            })
            .collect();
        for task in futures::future::join_all(tasks).await {
            task.unwrap().unwrap();
        }

        let record = limiter.store().get(&key).await.unwrap().unwrap();
        assert_eq!(record.current_requests, N);
        assert_eq!(record.exceeded_count, 0);

        let log = limiter.audit_log("acme").await.unwrap();
        assert_eq!(log.len() as u64, N);
        assert!(log.iter().all(|entry| !entry.exceeded));

        let mut counts: Vec<u64> = log.iter().map(|entry| entry.request_count).collect();
        counts.sort_unstable();
        assert_eq!(counts, (1..=N).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_increments_flag_exactly_one_overage() {
        const N: u64 = 40;
        let (limiter, _) = limiter();
        let limiter = Arc::new(limiter);
        let key = key(LimitType::PerHour);
        limiter.configure(key.clone(), N - 1).await.unwrap();

        let tasks: Vec<_> = (0..N)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                let key = key.clone();
                tokio::spawn(async move { limiter.increment(&key, RequestMeta::default()).await })
            })
            .collect();
        for task in futures::future::join_all(tasks).await {
            task.unwrap().unwrap();
        }

        let log = limiter.audit_log("acme").await.unwrap();
        assert_eq!(log.len() as u64, N);
        let exceeded: Vec<_> = log.iter().filter(|entry| entry.exceeded).collect();
        assert_eq!(exceeded.len(), 1);
        assert_eq!(exceeded[0].request_count, N);
        assert_eq!(exceeded[0].excess_requests, 1);

        let record = limiter.store().get(&key).await.unwrap().unwrap();
        assert_eq!(record.current_requests, N);
        assert_eq!(record.exceeded_count, 1);
    }
}
