//! Exponential reconnect delay

use std::time::Duration;

/// Delay that doubles every time it is used, up to a cap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExponentialDelay {
    current: Duration,
    max: Duration,
    last: Option<Duration>,
}

impl ExponentialDelay {
    /// Create a delay starting at `initial` (clamped to `max`)
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            current: initial.min(max),
            max,
            last: None,
        }
    }

    /// Delay the next attempt will use
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Return the delay for this attempt and double it for the next one
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        self.last = Some(delay);
        delay
    }

    /// Delay handed out by the last [`next_delay`](Self::next_delay)
    pub fn last(&self) -> Option<Duration> {
        self.last
    }

    /// Check if the cap has been reached
    pub fn is_capped(&self) -> bool {
        self.current >= self.max
    }
}
