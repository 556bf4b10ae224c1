//! Adaptive poll-interval backoff, generalized from a single-store task
//! poller into a transport-agnostic helper any [`super::WorkItemSource`]
//! consumer can drive.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Polling backoff configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollerConfig {
    #[serde(with = "duration_millis")]
    pub min_interval: Duration,

    #[serde(with = "duration_millis")]
    pub max_interval: Duration,

    pub backoff_multiplier: f64,

    pub batch_size: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(5),
            backoff_multiplier: 1.5,
            batch_size: 32,
        }
    }
}

impl PollerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier.max(1.0);
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }
}

/// Tracks the current poll interval, widening on empty polls and resetting
/// to the minimum as soon as work is found.
pub struct AdaptiveBackoff {
    config: PollerConfig,
    current_interval: Duration,
}

impl AdaptiveBackoff {
    pub fn new(config: PollerConfig) -> Self {
        let current_interval = config.min_interval;
        Self { config, current_interval }
    }

    pub fn current_interval(&self) -> Duration {
        self.current_interval
    }

    pub fn record(&mut self, items_found: usize) {
        if items_found == 0 {
            let widened = Duration::from_secs_f64(self.current_interval.as_secs_f64() * self.config.backoff_multiplier);
            self.current_interval = widened.min(self.config.max_interval);
        } else {
            self.current_interval = self.config.min_interval;
        }
    }

    pub async fn wait(&self) {
        tokio::time::sleep(self.current_interval).await;
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
