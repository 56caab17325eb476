//! Delayer that increases delay time by a provided multiplier on each
//! call, backed by an [`ExponentialBackoff`].

use std::time::Duration;

use backoff::{backoff::Backoff as _, ExponentialBackoff};

/// [`ExponentialBackoff`] without randomization, yielding the exact
/// reconnect delay sequence of the bridge channel.
pub struct BackoffDelayer(ExponentialBackoff);

impl BackoffDelayer {
    /// Creates a new [`BackoffDelayer`] out of the provided options.
    #[must_use]
    pub fn new(
        initial_interval: Duration,
        multiplier: f64,
        max_interval: Duration,
    ) -> Self {
        Self(ExponentialBackoff {
            current_interval: initial_interval,
            initial_interval,
            randomization_factor: 0.0,
            multiplier,
            max_interval,
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        })
    }

    /// Returns the next delay of the sequence, doubling up to the cap.
    pub fn next_delay(&mut self) -> Duration {
        let max = self.0.max_interval;
        self.0.next_backoff().unwrap_or(max)
    }

    /// Restarts the sequence from its initial interval.
    #[inline]
    pub fn reset(&mut self) {
        self.0.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_up_to_the_cap() {
        let mut delayer = BackoffDelayer::new(
            Duration::from_secs(1),
            2.0,
            Duration::from_secs(60),
        );
        let delays: Vec<u64> =
            (0..8).map(|_| delayer.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60]);
    }

    #[test]
    fn reset_restarts_from_the_initial_interval() {
        let mut delayer = BackoffDelayer::new(
            Duration::from_secs(1),
            2.0,
            Duration::from_secs(60),
        );
        drop(delayer.next_delay());
        drop(delayer.next_delay());
        delayer.reset();
        assert_eq!(delayer.next_delay(), Duration::from_secs(1));
    }
}
