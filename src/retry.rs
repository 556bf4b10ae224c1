//! Retry policy engine.
//!
//! Jitter is dropped from the delay formula: an orchestration's retry
//! loop runs through `create_timer`, so its delay is part of replayed
//! history and must come out identical every time. Jitter survives only on
//! the queue-polling backoff (`queue::AdaptiveBackoff`), where determinism
//! doesn't apply.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::FailureDetails;
use crate::orchestration::{OrchestrationContext, OrchestrationError};

/// Declarative retry policy for `schedule_activity_with_retry` /
/// `schedule_sub_orchestration_with_retry`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,

    #[serde(with = "duration_millis")]
    pub first_interval: Duration,

    #[serde(with = "duration_millis")]
    pub max_interval: Duration,

    pub backoff_coefficient: f64,

    /// Total elapsed time (measured against the orchestrator's deterministic
    /// clock, never wall time) after which no further retry is attempted,
    /// regardless of `max_attempts`.
    #[serde(with = "option_duration_millis")]
    pub retry_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl RetryPolicy {
    pub fn exponential() -> Self {
        Self {
            max_attempts: 5,
            first_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(60),
            backoff_coefficient: 2.0,
            retry_timeout: None,
        }
    }

    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            first_interval: Duration::ZERO,
            max_interval: Duration::ZERO,
            backoff_coefficient: 1.0,
            retry_timeout: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_first_interval(mut self, interval: Duration) -> Self {
        self.first_interval = interval;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    pub fn with_backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = coefficient;
        self
    }

    pub fn with_retry_timeout(mut self, timeout: Duration) -> Self {
        self.retry_timeout = Some(timeout);
        self
    }

    /// `delay(k) = min(first_interval * backoff_coefficient^(k-1),
    /// max_interval)` for the delay preceding attempt `attempt` (1-based;
    /// the delay preceding the first retry, i.e. `attempt == 2`, is just
    /// `first_interval`).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exponent = attempt - 2;
        let base = self.first_interval.as_secs_f64() * self.backoff_coefficient.powi(exponent as i32);
        let capped = base.min(self.max_interval.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Whether `attempt` (the attempt that just failed) should be retried,
    /// given `elapsed` since the first attempt. `TaskMissing` is always
    /// fatal regardless of `max_attempts` — there is no worker that
    /// will ever pick this name up.
    pub fn should_retry(&self, attempt: u32, failure: &FailureDetails, elapsed: Duration) -> bool {
        if failure.is_task_missing() {
            return false;
        }
        if attempt >= self.max_attempts {
            return false;
        }
        if let Some(timeout) = self.retry_timeout {
            if elapsed >= timeout {
                return false;
            }
        }
        true
    }
}

/// Run `name` as a retrying activity: retries through `policy`'s backoff
/// via `ctx.create_timer`, so the whole loop replays deterministically.
pub async fn schedule_activity_with_retry<T: serde::de::DeserializeOwned + 'static>(
    ctx: &OrchestrationContext,
    name: impl Into<String>,
    input: serde_json::Value,
    policy: &RetryPolicy,
) -> Result<T, OrchestrationError> {
    let name = name.into();
    let start = ctx.current_utc_datetime();
    let mut attempt = 1;
    loop {
        match ctx.schedule_activity::<T>(&name, input.clone()).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let failure: FailureDetails = err.into();
                let elapsed = (ctx.current_utc_datetime() - start).to_std().unwrap_or(Duration::ZERO);
                if !policy.should_retry(attempt, &failure, elapsed) {
                    return Err(OrchestrationError::Failed(failure));
                }
                let delay = policy.delay_for_attempt(attempt + 1);
                let fire_at = ctx.current_utc_datetime() + chrono::Duration::from_std(delay).unwrap_or_default();
                ctx.create_timer(fire_at).await?;
                attempt += 1;
            }
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

mod option_duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        duration.map(|d| d.as_millis()).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_exponentially_and_caps() {
        let policy = RetryPolicy::exponential();
        assert_eq!(policy.delay_for_attempt(1), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(4));

        let capped = RetryPolicy::exponential().with_max_interval(Duration::from_secs(3));
        assert_eq!(capped.delay_for_attempt(4), Duration::from_secs(3));
    }

    #[test]
    fn task_missing_is_never_retried() {
        let policy = RetryPolicy::exponential().with_max_attempts(10);
        let failure = FailureDetails::task_missing("ship_order");
        assert!(!policy.should_retry(1, &failure, Duration::ZERO));
    }

    #[test]
    fn exhausts_after_max_attempts() {
        let policy = RetryPolicy::exponential().with_max_attempts(3);
        let failure = FailureDetails::new("Boom", "transient");
        assert!(policy.should_retry(2, &failure, Duration::ZERO));
        assert!(!policy.should_retry(3, &failure, Duration::ZERO));
    }

    #[test]
    fn exhausts_after_retry_timeout() {
        let policy = RetryPolicy::exponential()
            .with_max_attempts(100)
            .with_retry_timeout(Duration::from_secs(30));
        let failure = FailureDetails::new("Boom", "transient");
        assert!(!policy.should_retry(2, &failure, Duration::from_secs(31)));
    }
}
