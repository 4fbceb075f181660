use rand::{rng, Rng};
use tokio::time::Duration;

pub trait ExponentialBackoff: Sized {
    /// Picks a random duration between `floor` and `self`.
    fn with_jitter(&self, floor: Duration) -> Self;
    fn exponential_backoff(&self, max: Duration) -> Self;
}

impl ExponentialBackoff for Duration {
    fn with_jitter(&self, floor: Duration) -> Self {
        if *self <= floor {
            return *self;
        }
        let mut rng = rng();
        let spread = rng.random_range(0..=(*self - floor).as_nanos());
        floor.saturating_add(Duration::from_nanos(
            u64::try_from(spread).unwrap_or(u64::MAX),
        ))
    }

    fn exponential_backoff(&self, max: Duration) -> Self {
        std::cmp::min(self.saturating_mul(2), max)
    }
}

/// Tracks the delay between consecutive failed attempts.
///
/// Delays double after each failure, are jittered between the minimum and
/// the current delay, and never exceed the maximum.
#[derive(Clone, Debug)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    /// Creates a backoff whose delays stay within `[min, max]`.
    ///
    /// If `min` exceeds `max`, every delay is `max`.
    pub fn new(min: Duration, max: Duration) -> Self {
        let min = std::cmp::min(min, max);
        Self {
            min,
            max,
            current: min,
        }
    }

    /// Returns how long to wait before the next attempt, and grows the delay
    /// for the attempt after that.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current.with_jitter(self.min);
        self.current = self.current.exponential_backoff(self.max);
        delay
    }

    /// Forgets all previous failures.
    pub fn reset(&mut self) {
        self.current = self.min;
    }
}
