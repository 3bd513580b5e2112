//! Token bucket pacing for uploads.

use std::time::{Duration, Instant};

/// Holds up to `capacity` bytes of budget, replenished at `rate` bytes per second.
#[derive(Clone, Debug)]
pub struct TokenBucket {
    capacity: f64,
    available: f64,
    rate: f64,
    updated: Instant,
}

impl TokenBucket {
    /// Starts full.
    pub fn new(capacity: f64, rate: f64) -> Self {
        Self {
            capacity,
            available: capacity,
            rate,
            updated: Instant::now(),
        }
    }

    /// Takes `amount` from the budget if it is there.
    ///
    /// Requests above the capacity cost the whole capacity, so they can still go
    /// through once the bucket is full.
    pub fn consume(&mut self, amount: f64) -> bool {
        self.replenish();
        let cost = amount.min(self.capacity);
        if self.available < cost {
            return false;
        }
        self.available -= cost;
        true
    }

    /// Time until `consume(amount)` can succeed; zero if it already can.
    pub fn delay_for(&mut self, amount: f64) -> Duration {
        self.replenish();
        let missing = amount.min(self.capacity) - self.available;
        if missing <= 0.0 || self.rate <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(missing / self.rate)
    }

    fn replenish(&mut self) {
        let now = Instant::now();
        let gained = now.duration_since(self.updated).as_secs_f64() * self.rate;
        if gained > 0.0 {
            self.available = (self.available + gained).min(self.capacity);
            self.updated = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_consume_refills_over_time() {
        let mut bucket = TokenBucket::new(10.0, 1.0);

        assert!(bucket.consume(10.0));
        assert!(!bucket.consume(1.0));

        thread::sleep(Duration::from_millis(1100));
        assert!(bucket.consume(1.0));
    }

    #[test]
    fn test_oversized_request_costs_capacity() {
        let mut bucket = TokenBucket::new(10.0, 1.0);
        assert!(bucket.consume(50.0));
        assert!(!bucket.consume(1.0));
    }

    #[test]
    fn test_delay_for() {
        let mut bucket = TokenBucket::new(100.0, 50.0);
        assert_eq!(bucket.delay_for(100.0), Duration::ZERO);
        assert!(bucket.consume(100.0));

        let delay = bucket.delay_for(50.0);
        assert!(delay > Duration::from_millis(900) && delay <= Duration::from_secs(1));

        assert!(bucket.delay_for(1_000.0) <= Duration::from_secs(2));
    }
}
