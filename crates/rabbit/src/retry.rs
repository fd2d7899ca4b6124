// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Backoff between reconnection attempts.
//!
//! Retries never give up: the delay grows from `min_delay` by `factor` and
//! then stays at `max_delay` for as long as the broker is unavailable.

use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub min_delay: Duration,
    pub factor: f32,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(1),
            factor: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Small delays for tests and local brokers
    pub fn fast() -> Self {
        Self {
            min_delay: Duration::from_millis(5),
            factor: 2.0,
            max_delay: Duration::from_millis(40),
        }
    }

    /// Delays to wait before each successive retry
    pub fn delays(&self) -> Delays {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_factor(self.factor)
            .with_max_delay(self.max_delay)
            .without_max_times()
            .build();
        Delays {
            backoff,
            max_delay: self.max_delay,
        }
    }
}

/// Unbounded iterator of retry delays
pub struct Delays {
    backoff: ExponentialBackoff,
    max_delay: Duration,
}

impl Iterator for Delays {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        Some(self.backoff.next().unwrap_or(self.max_delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sequence_is_capped() {
        let delays: Vec<u64> = RetryPolicy::default()
            .delays()
            .take(9)
            .map(|d| d.as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60, 60]);
    }

    #[test]
    fn test_delays_never_run_out() {
        let policy = RetryPolicy::fast();
        let delays: Vec<Duration> = policy.delays().take(1000).collect();
        assert_eq!(delays.len(), 1000);
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert!(delays.iter().all(|d| *d <= policy.max_delay));
        assert_eq!(delays.last(), Some(&policy.max_delay));
    }
}
