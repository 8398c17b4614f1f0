//! Rate limiting logic and state management.

mod clock;
mod key;
mod limiter;
mod record;
mod rules;
mod window;

pub use clock::{Clock, ManualClock, SystemClock};
pub use key::LimitKey;
pub use limiter::{Accounted, CheckOutcome, IncrementOutcome, RateLimiter, RequestMeta, WindowStatus};
pub use record::{RateLimit, RateLimitLog};
pub use rules::{LimitRule, LimitRules};
pub use window::{seconds_until, LimitType};
