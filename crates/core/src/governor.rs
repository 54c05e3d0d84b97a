//! Upstream rate limit governance.
//!
//! Reads the upstream rate limit headers after every call and either lets
//! extraction continue, slows it down, or opens a rejection window during
//! which no new upstream calls are made.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use survey_proxy_common::config::{PolicyThresholds, ThresholdsConfig};
use survey_proxy_common::{AppError, AppResult};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Rate limit window reported by upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatePeriod {
    /// Per-minute quota.
    Minute,
    /// Per-day quota.
    Day,
}

impl RatePeriod {
    /// Periods in the order they are inspected.
    pub const ALL: [Self; 2] = [Self::Minute, Self::Day];

    const fn header_label(self) -> &'static str {
        match self {
            Self::Minute => "Minute",
            Self::Day => "Day",
        }
    }

    fn header(self, field: &str) -> String {
        format!("X-Ratelimit-App-Global-{}-{field}", self.header_label())
    }
}

/// What a policy does once its threshold is crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitPolicy {
    /// Refuse upstream calls until the window resets.
    RequestRejection,
    /// Slow the current caller down.
    DelayedResponse,
}

impl RateLimitPolicy {
    /// Name used in logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::RequestRejection => "REQUEST_REJECTION",
            Self::DelayedResponse => "DELAYED_RESPONSE",
        }
    }
}

/// A policy and its per-period trigger ratios.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolicyThreshold {
    /// Policy applied once a ratio is crossed.
    pub policy: RateLimitPolicy,
    /// Remaining/limit ratio for the minute window.
    pub minute: f64,
    /// Remaining/limit ratio for the day window.
    pub day: f64,
}

impl PolicyThreshold {
    /// Create a threshold from configured ratios.
    #[must_use]
    pub const fn new(policy: RateLimitPolicy, ratios: PolicyThresholds) -> Self {
        Self {
            policy,
            minute: ratios.minute,
            day: ratios.day,
        }
    }

    const fn ratio(&self, period: RatePeriod) -> f64 {
        match period {
            RatePeriod::Minute => self.minute,
            RatePeriod::Day => self.day,
        }
    }
}

/// Rate limit values reported for one period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateReading {
    /// Calls allowed in the window.
    pub limit: u64,
    /// Calls left in the window.
    pub remaining: u64,
    /// Seconds until the window resets.
    pub seconds_to_reset: u64,
}

impl RateReading {
    /// Read one period from the response headers. `None` when any value is
    /// missing or not a number.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap, period: RatePeriod) -> Option<Self> {
        let read = |field: &str| {
            headers
                .get(period.header(field))
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
        };

        Some(Self {
            limit: read("Limit")?,
            remaining: read("Remaining")?,
            seconds_to_reset: read("Reset")?,
        })
    }

    /// Throttle applied by [`RateLimitPolicy::DelayedResponse`].
    #[must_use]
    pub fn throttle_delay(&self) -> Duration {
        Duration::from_secs(
            self.seconds_to_reset
                .checked_div(self.remaining)
                .unwrap_or(self.seconds_to_reset),
        )
    }
}

/// Process-wide rejection window, shared by every request.
#[derive(Debug, Clone, Default)]
pub struct RejectionState {
    expires_at: Arc<RwLock<Option<DateTime<Utc>>>>,
}

impl RejectionState {
    /// Create an inactive state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored expiry, whether or not it has passed.
    pub async fn expires_at(&self) -> Option<DateTime<Utc>> {
        *self.expires_at.read().await
    }

    /// Open (or move) the rejection window.
    pub async fn activate(&self, expires_at: DateTime<Utc>) {
        *self.expires_at.write().await = Some(expires_at);
    }

    /// Close the window if it ended at or before `now`, under one lock.
    pub async fn expire(&self, now: DateTime<Utc>) -> Expiry {
        let mut guard = self.expires_at.write().await;
        match *guard {
            Some(expires_at) if expires_at > now => Expiry::Active(expires_at),
            Some(expires_at) => {
                *guard = None;
                Expiry::Closed(expires_at)
            }
            None => Expiry::Inactive,
        }
    }
}

/// Outcome of [`RejectionState::expire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// No window was open.
    Inactive,
    /// The window is still open until the given instant.
    Active(DateTime<Utc>),
    /// The window had elapsed and is now closed.
    Closed(DateTime<Utc>),
}

/// Whether the Governor is refusing upstream calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GovernorState {
    /// Upstream calls are allowed.
    Normal,
    /// Upstream calls are refused.
    Rejecting {
        /// When the window ends.
        expires_at: DateTime<Utc>,
    },
}

/// Outcome of inspecting an upstream response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GovernorSignal {
    /// Keep fetching.
    Continue,
    /// Upstream is exhausted; the current fetch loop must end now.
    Stop,
}

/// Rate limit governor shared across requests.
#[derive(Debug, Clone)]
pub struct Governor {
    state: RejectionState,
    policies: Arc<Vec<PolicyThreshold>>,
}

impl Governor {
    /// Create a governor over a shared rejection state.
    #[must_use]
    pub fn new(state: RejectionState, policies: Vec<PolicyThreshold>) -> Self {
        Self {
            state,
            policies: Arc::new(policies),
        }
    }

    /// Create a governor from configured thresholds. Rejection is evaluated
    /// before delay.
    #[must_use]
    pub fn from_thresholds(state: RejectionState, thresholds: &ThresholdsConfig) -> Self {
        Self::new(
            state,
            vec![
                PolicyThreshold::new(RateLimitPolicy::RequestRejection, thresholds.request_rejection),
                PolicyThreshold::new(RateLimitPolicy::DelayedResponse, thresholds.delayed_response),
            ],
        )
    }

    /// Current state. An elapsed window still counts as rejecting until the
    /// next [`Governor::pre_check`] clears it.
    pub async fn state(&self) -> GovernorState {
        match self.state.expires_at().await {
            Some(expires_at) => GovernorState::Rejecting { expires_at },
            None => GovernorState::Normal,
        }
    }

    /// Whether in-flight pagination must stop.
    pub async fn is_rejecting(&self) -> bool {
        matches!(self.state().await, GovernorState::Rejecting { .. })
    }

    /// Gate a new request. An elapsed window is closed here.
    pub async fn pre_check(&self) -> AppResult<()> {
        match self.state.expire(Utc::now()).await {
            Expiry::Active(expires_at) => Err(AppError::RejectionActive { expires_at }),
            Expiry::Closed(expires_at) => {
                warn!(%expires_at, "REQUEST_REJECTION policy is deactivated");
                Ok(())
            }
            Expiry::Inactive => Ok(()),
        }
    }

    /// Inspect an upstream response. May open the rejection window or sleep
    /// before returning.
    pub async fn post_check(&self, headers: &HeaderMap, status: StatusCode) -> GovernorSignal {
        for period in RatePeriod::ALL {
            let Some(reading) = RateReading::from_headers(headers, period) else {
                continue;
            };

            if status == StatusCode::TOO_MANY_REQUESTS && reading.remaining == 0 {
                warn!(
                    period = ?period,
                    seconds = reading.seconds_to_reset,
                    "Upstream rate limit exhausted"
                );
                self.reject_for(reading.seconds_to_reset).await;
                return GovernorSignal::Stop;
            }

            if reading.limit == 0 {
                continue;
            }
            let ratio = reading.remaining as f64 / reading.limit as f64;

            for threshold in self.policies.iter() {
                let trigger = threshold.ratio(period);
                if ratio > trigger {
                    continue;
                }

                warn!(
                    policy = threshold.policy.name(),
                    period = ?period,
                    ratio,
                    threshold = trigger,
                    seconds = reading.seconds_to_reset,
                    remaining = reading.remaining,
                    "Rate limit policy activation conditions met"
                );

                match threshold.policy {
                    RateLimitPolicy::RequestRejection => {
                        self.reject_for(reading.seconds_to_reset).await;
                    }
                    // Nothing left: rejection already decided, the next page check stops.
                    RateLimitPolicy::DelayedResponse if reading.remaining == 0 => {
                        debug!(period = ?period, "Quota exhausted; skipping delay");
                    }
                    RateLimitPolicy::DelayedResponse => {
                        let delay = reading.throttle_delay();
                        info!(delay_secs = delay.as_secs(), "Delaying upstream response");
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        GovernorSignal::Continue
    }

    async fn reject_for(&self, seconds_to_reset: u64) {
        let now = Utc::now();
        let expires_at = i64::try_from(seconds_to_reset)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .and_then(|delta| now.checked_add_signed(delta))
            .unwrap_or(now);

        self.state.activate(expires_at).await;
        warn!(%expires_at, "REQUEST_REJECTION policy is activated");
    }
}
