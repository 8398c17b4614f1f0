//! Action dispatch for the rate limit service.

use std::sync::Arc;
use tracing::{debug, instrument, warn};

use super::action::{Action, ActionRequest, ActionResponse, ResetResponse};
use crate::error::{Result, TollboothError};
use crate::ratelimit::{Clock, LimitKey, LimitType, RateLimiter, RequestMeta, SystemClock};
use crate::store::LimitStore;

/// Validates action requests and routes them to the rate limiter.
pub struct ActionService<S: LimitStore, C: Clock = SystemClock> {
    /// The rate limiter instance
    limiter: Arc<RateLimiter<S, C>>,
}

impl<S: LimitStore, C: Clock> ActionService<S, C> {
    /// Create a new ActionService with the given rate limiter.
    pub fn new(limiter: Arc<RateLimiter<S, C>>) -> Self {
        Self { limiter }
    }

    /// The limiter behind this service.
    pub fn limiter(&self) -> &Arc<RateLimiter<S, C>> {
        &self.limiter
    }

    /// Run one action on behalf of an authenticated caller.
    ///
    /// Identity is checked first and every parameter is validated before the
    /// store is touched, so a rejected request never mutates state.
    #[instrument(
        skip(self, caller, request),
        fields(
            action = request.action.as_deref().unwrap_or(""),
            organization_id = request.organization_id.as_deref().unwrap_or("")
        )
    )]
    pub async fn handle(&self, caller: Option<&str>, request: ActionRequest) -> Result<ActionResponse> {
        let user_id = match caller.map(str::trim) {
            Some(user_id) if !user_id.is_empty() => user_id,
            _ => {
                warn!("Rejected action without caller identity");
                return Err(TollboothError::Unauthorized);
            }
        };

        let action: Action = required(&request.action, "action")?.parse()?;
        let organization_id = required(&request.organization_id, "organization_id")?;
        let endpoint = required(&request.endpoint, "endpoint")?;

        match action {
            Action::GetStatus => {
                let limits = self.limiter.get_status(organization_id).await?;
                debug!(total = limits.len(), "Reporting limit status");
                Ok(ActionResponse::Status(limits.into()))
            }
            Action::Check => {
                let key = limit_key(&request, organization_id, user_id, endpoint)?;
                let outcome = self.limiter.check(&key).await?;
                Ok(ActionResponse::Check(outcome.into()))
            }
            Action::Increment => {
                let key = limit_key(&request, organization_id, user_id, endpoint)?;
                let meta = RequestMeta {
                    ip_address: request.ip_address.clone(),
                    request_method: request.request_method.clone(),
                };
                let outcome = self.limiter.increment(&key, meta).await?;
                Ok(ActionResponse::Increment(outcome.into()))
            }
            Action::Reset => {
                let limit_type = optional_limit_type(&request)?;
                let records_reset = self
                    .limiter
                    .reset(organization_id, user_id, endpoint, limit_type)
                    .await?;
                Ok(ActionResponse::Reset(ResetResponse {
                    reset: true,
                    records_reset,
                }))
            }
            Action::Configure => {
                let max_requests = positive_max_requests(request.max_requests)?;
                let key = limit_key(&request, organization_id, user_id, endpoint)?;
                let configured = self.limiter.configure(key, max_requests).await?;
                Ok(ActionResponse::Configure(configured.into()))
            }
        }
    }
}

/// Key for a single-limit action; the limit type defaults to per-minute.
fn limit_key(
    request: &ActionRequest,
    organization_id: &str,
    user_id: &str,
    endpoint: &str,
) -> Result<LimitKey> {
    let limit_type = optional_limit_type(request)?.unwrap_or_default();
    Ok(LimitKey::new(organization_id, user_id, endpoint, limit_type))
}

fn optional_limit_type(request: &ActionRequest) -> Result<Option<LimitType>> {
    request
        .limit_type
        .as_deref()
        .map(str::parse::<LimitType>)
        .transpose()
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str> {
    match value.as_deref().map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(TollboothError::validation(format!("{} is required", name))),
    }
}

fn positive_max_requests(value: Option<i64>) -> Result<u64> {
    match value {
        None => Err(TollboothError::validation("max_requests is required for configure")),
        Some(max) if max <= 0 => Err(TollboothError::validation(
            "max_requests must be a positive integer",
        )),
        Some(max) => Ok(max as u64),
    }
}
