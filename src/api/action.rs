//! Wire types for the action interface.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TollboothError;
use crate::ratelimit::{Accounted, CheckOutcome, IncrementOutcome, RateLimit, WindowStatus};
use crate::store::Configured;

/// Reason reported when a key has no active limit.
pub const NO_LIMIT_CONFIGURED: &str = "no_limit_configured";

/// The operations a caller can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Check,
    Increment,
    Reset,
    GetStatus,
    Configure,
}

impl FromStr for Action {
    type Err = TollboothError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "check" => Ok(Action::Check),
            "increment" => Ok(Action::Increment),
            "reset" => Ok(Action::Reset),
            "get_status" => Ok(Action::GetStatus),
            "configure" => Ok(Action::Configure),
            other => Err(TollboothError::validation(format!("unrecognized action '{}'", other))),
        }
    }
}

/// Body of an action call. Which fields are required depends on the action.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionRequest {
    pub action: Option<String>,
    pub organization_id: Option<String>,
    pub endpoint: Option<String>,
    pub limit_type: Option<String>,
    pub max_requests: Option<i64>,
    pub ip_address: Option<String>,
    pub request_method: Option<String>,
}

/// Response to `check`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckResponse {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    #[serde(flatten)]
    pub status: Option<WindowStatus>,
}

impl From<CheckOutcome> for CheckResponse {
    fn from(outcome: CheckOutcome) -> Self {
        match outcome {
            CheckOutcome::NotConfigured => Self {
                allowed: true,
                reason: Some(NO_LIMIT_CONFIGURED),
                status: None,
            },
            CheckOutcome::Allowed(status) => Self {
                allowed: true,
                reason: None,
                status: Some(status),
            },
            CheckOutcome::Denied(status) => Self {
                allowed: false,
                reason: None,
                status: Some(status),
            },
        }
    }
}

/// Response to `increment`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IncrementResponse {
    pub incremented: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    #[serde(flatten)]
    pub accounted: Option<Accounted>,
}

impl From<IncrementOutcome> for IncrementResponse {
    fn from(outcome: IncrementOutcome) -> Self {
        match outcome {
            IncrementOutcome::NotConfigured => Self {
                incremented: false,
                reason: Some(NO_LIMIT_CONFIGURED),
                accounted: None,
            },
            IncrementOutcome::Accounted(accounted) => Self {
                incremented: true,
                reason: None,
                accounted: Some(accounted),
            },
        }
    }
}

/// Response to `reset`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResetResponse {
    pub reset: bool,
    pub records_reset: usize,
}

/// Response to `get_status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusResponse {
    pub limits: Vec<RateLimit>,
    pub total: usize,
}

impl From<Vec<RateLimit>> for StatusResponse {
    fn from(limits: Vec<RateLimit>) -> Self {
        let total = limits.len();
        Self { limits, total }
    }
}

/// Response to `configure`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigureResponse {
    /// `created` or `updated`
    pub status: &'static str,
    pub limit: RateLimit,
}

impl From<Configured> for ConfigureResponse {
    fn from(configured: Configured) -> Self {
        let status = configured.status();
        let limit = match configured {
            Configured::Created(record) | Configured::Updated(record) => record,
        };
        Self { status, limit }
    }
}

/// Any successful action response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ActionResponse {
    Check(CheckResponse),
    Increment(IncrementResponse),
    Reset(ResetResponse),
    Status(StatusResponse),
    Configure(ConfigureResponse),
}

/// Body of every failed call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
