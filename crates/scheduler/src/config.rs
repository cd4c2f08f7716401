// Scheduler configuration
// Decision: 24 second debounce window by default, overridable per deployment

use std::time::Duration;

use crate::reliability::RetryPolicy;

/// Default quiescence window after the last click before a fire
pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_secs(24);

/// Shortest idle period before an actor may stop
const MIN_IDLE_TIMEOUT: Duration = Duration::from_secs(1);

/// Configuration for the scheduler host
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time after the most recent click at which the link's timer fires
    pub debounce_window: Duration,
    /// Bounded mailbox size of each per-link actor
    pub inbox_capacity: usize,
    /// Redelivery of fires whose dispatch failed
    pub redelivery: RetryPolicy,
    /// How long an actor with no pending timer waits for a command before stopping
    pub idle_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            debounce_window: DEFAULT_DEBOUNCE_WINDOW,
            inbox_capacity: 64,
            redelivery: RetryPolicy::exponential(),
            idle_timeout: Duration::from_secs(60),
        }
    }
}

impl SchedulerConfig {
    /// Create configuration from environment variables
    ///
    /// - `DEBOUNCE_WINDOW_SECS` (default 24)
    /// - `SCHEDULER_INBOX_CAPACITY` (default 64)
    /// - `FIRE_MAX_ATTEMPTS` (default 3, 1 disables redelivery)
    /// - `FIRE_RETRY_INITIAL_MS` (default 1000)
    /// - `SCHEDULER_IDLE_TIMEOUT_SECS` (default 60)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let debounce_window = env_parse::<u64>("DEBOUNCE_WINDOW_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.debounce_window);

        let inbox_capacity = env_parse::<usize>("SCHEDULER_INBOX_CAPACITY")
            .unwrap_or(defaults.inbox_capacity)
            .max(1);

        let mut redelivery = defaults.redelivery;
        if let Some(attempts) = env_parse::<u32>("FIRE_MAX_ATTEMPTS") {
            redelivery = redelivery.with_max_attempts(attempts);
        }
        if let Some(millis) = env_parse::<u64>("FIRE_RETRY_INITIAL_MS") {
            redelivery = redelivery.with_initial_interval(Duration::from_millis(millis));
        }

        let idle_timeout = env_parse::<u64>("SCHEDULER_IDLE_TIMEOUT_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.idle_timeout)
            .max(MIN_IDLE_TIMEOUT);

        Self {
            debounce_window,
            inbox_capacity,
            redelivery,
            idle_timeout,
        }
    }

    pub fn with_debounce_window(mut self, window: Duration) -> Self {
        self.debounce_window = window;
        self
    }

    pub fn with_inbox_capacity(mut self, capacity: usize) -> Self {
        self.inbox_capacity = capacity.max(1);
        self
    }

    pub fn with_redelivery(mut self, policy: RetryPolicy) -> Self {
        self.redelivery = policy;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout.max(MIN_IDLE_TIMEOUT);
        self
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}
