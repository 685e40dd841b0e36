//! Error backoff handling for retrying transient token endpoint failures

use std::time::Duration;

use serde::Deserialize;

/// Configuration for how to manage backoff when a transient error is encountered
#[derive(Clone, Debug, Deserialize)]
#[serde(from = "BackoffSettings")]
pub struct ErrorBackoffConfig {
    initial_error_delay: Duration,
    max_error_delay: Duration,
    multiplier: u64,
    max_retries: u32,
}

impl Default for ErrorBackoffConfig {
    /// Default backoff configuration
    ///
    /// Uses an initial error delay of 100 ms with a multiplier of 2. Maximum delay is
    /// capped at 15 seconds, and a request is retried at most 3 times.
    fn default() -> Self {
        Self {
            initial_error_delay: Duration::from_millis(100),
            max_error_delay: Duration::from_secs(15),
            multiplier: 2,
            max_retries: 3,
        }
    }
}

impl ErrorBackoffConfig {
    /// Constructs a new backoff configuration
    ///
    /// When encountering an error for the first time, the backoff will be `initial_error_delay`.
    /// On subsequent errors, the backoff should be multiplied by `multiplier`, with a cap of
    /// `max_error_delay`. After `max_retries` retries the error is surfaced.
    pub fn new(
        initial_error_delay: Duration,
        max_error_delay: Duration,
        multiplier: u64,
        max_retries: u32,
    ) -> Self {
        Self {
            initial_error_delay,
            max_error_delay,
            multiplier,
            max_retries,
        }
    }

    /// A configuration that never retries
    pub fn no_retries() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// The maximum number of retries after the first attempt
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

#[derive(Deserialize)]
#[serde(default)]
struct BackoffSettings {
    initial_delay_ms: u64,
    max_delay_ms: u64,
    multiplier: u64,
    max_retries: u32,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        let defaults = ErrorBackoffConfig::default();
        Self {
            initial_delay_ms: defaults.initial_error_delay.as_millis() as u64,
            max_delay_ms: defaults.max_error_delay.as_millis() as u64,
            multiplier: defaults.multiplier,
            max_retries: defaults.max_retries,
        }
    }
}

impl From<BackoffSettings> for ErrorBackoffConfig {
    fn from(s: BackoffSettings) -> Self {
        Self::new(
            Duration::from_millis(s.initial_delay_ms),
            Duration::from_millis(s.max_delay_ms),
            s.multiplier,
            s.max_retries,
        )
    }
}

/// Utility trait for extending types with a backoff handler
pub trait WithBackoff {
    /// The output of providing backoff
    type Output;

    /// Applies backoff to the current value
    fn with_backoff(self, handler: &mut ErrorBackoffHandler) -> Self::Output;
}

impl<T, E> WithBackoff for Result<T, E> {
    type Output = Result<T, (E, Option<Duration>)>;
    fn with_backoff(self, handler: &mut ErrorBackoffHandler) -> Self::Output {
        match self {
            Ok(ok) => {
                handler.success();
                Ok(ok)
            }
            Err(err) => Err((err, handler.error())),
        }
    }
}

/// A stateful handler that manages error backoff state
#[derive(Debug)]
pub struct ErrorBackoffHandler {
    config: ErrorBackoffConfig,
    last_delay: Option<Duration>,
    retries: u32,
}

impl ErrorBackoffHandler {
    /// Constructs a new handler from an [`ErrorBackoffConfig`].
    pub fn new(config: ErrorBackoffConfig) -> Self {
        Self {
            config,
            last_delay: None,
            retries: 0,
        }
    }

    /// Reports a success
    ///
    /// This resets the internal delay state.
    pub fn success(&mut self) {
        self.last_delay = None;
        self.retries = 0;
    }

    /// Reports a failure and returns the delay before the next retry
    ///
    /// Returns `None` once the retry budget is exhausted.
    pub fn error(&mut self) -> Option<Duration> {
        if self.retries >= self.config.max_retries {
            return None;
        }

        let new_delay = self
            .last_delay
            .map(|s: Duration| {
                let millis = u64::try_from(s.as_millis()).unwrap_or(u64::MAX);
                Duration::from_millis(millis.saturating_mul(self.config.multiplier))
            })
            .unwrap_or(self.config.initial_error_delay)
            .min(self.config.max_error_delay);
        self.last_delay = Some(new_delay);
        self.retries += 1;
        Some(new_delay)
    }
}
