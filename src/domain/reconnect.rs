//! Reconnect Supervisor
//!
//! Exponential backoff bookkeeping for the worker's outer retry loop. The
//! sleeping itself happens in the worker so it can be interrupted.

use std::time::Duration;

/// Retry policy for one connection. Immutable once the worker starts.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Retry after drops and failed attempts.
    pub enabled: bool,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap for the doubling delay.
    pub max_delay: Duration,
    /// Give up after this many consecutive attempts (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            max_attempts: 0,
        }
    }
}

impl ReconnectConfig {
    /// No retries at all.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

/// Deliberate teardown-and-reconnect, issued by the session layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectRequest {
    /// Close code sent before dropping the socket.
    pub close_code: u16,
    pub reason: String,
    /// Overrides the supervisor's backoff delay.
    pub delay: Option<Duration>,
    /// Connect here instead of the original URL from now on.
    pub url: Option<String>,
}

/// Why the worker wants another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectTrigger {
    /// Drop or failed attempt; subject to `enabled`.
    Failure,
    /// Explicit request from the session layer; honored even when disabled.
    Requested,
}

/// Outcome of asking the supervisor for another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Sleep `delay`, then run attempt number `attempt`.
    Retry { attempt: u32, delay: Duration },
    /// `max_attempts` exceeded.
    GiveUp { attempts: u32 },
    /// Reconnect is turned off.
    Disabled,
}

/// Mutable backoff state. Reset on every successful upgrade.
#[derive(Debug, Clone)]
pub struct ReconnectSupervisor {
    config: ReconnectConfig,
    current_delay: Duration,
    attempt: u32,
}

impl ReconnectSupervisor {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            current_delay: config.initial_delay,
            attempt: 0,
            config,
        }
    }

    /// Attempts made since the last successful upgrade.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay the next retry will use.
    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }

    /// Count another attempt and compute its delay. The delay doubles afterwards, up to the cap.
    pub fn next_attempt(&mut self, trigger: ReconnectTrigger) -> ReconnectDecision {
        if trigger == ReconnectTrigger::Failure && !self.config.enabled {
            return ReconnectDecision::Disabled;
        }

        self.attempt += 1;
        if self.config.max_attempts > 0 && self.attempt > self.config.max_attempts {
            return ReconnectDecision::GiveUp {
                attempts: self.attempt - 1,
            };
        }

        let delay = self.current_delay;
        self.current_delay = self
            .current_delay
            .checked_mul(2)
            .unwrap_or(self.config.max_delay)
            .min(self.config.max_delay);

        ReconnectDecision::Retry {
            attempt: self.attempt,
            delay,
        }
    }

    /// Successful upgrade: back to the initial delay and attempt zero.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.current_delay = self.config.initial_delay;
    }
}
