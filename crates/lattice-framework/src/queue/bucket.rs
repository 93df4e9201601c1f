//! Token-bucket rate limiter for outbound sends.

use std::time::Duration;

use tokio::time::Instant;

/// Allows `rate` sends per `per` window, with up to `burst` sends back to back.
///
/// Tokens refill continuously. Reserving when the bucket is empty books the
/// next token in advance and returns how long to wait for it, so consecutive
/// reservations are spaced exactly `per / rate` apart.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    /// Tokens added per second.
    refill_per_sec: f64,
    burst: f64,
    available: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Creates a full bucket. A zero `rate` or `per` disables limiting.
    pub fn new(rate: u32, per: Duration, burst: u32) -> Self {
        let refill_per_sec = if rate == 0 || per.is_zero() {
            0.0
        } else {
            f64::from(rate) / per.as_secs_f64()
        };
        let burst = f64::from(burst.max(1));
        Self {
            refill_per_sec,
            burst,
            available: burst,
            last_refill: Instant::now(),
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.refill_per_sec == 0.0
    }

    /// Takes one token at `now`, returning how long the caller must wait
    /// before using it.
    pub fn reserve_at(&mut self, now: Instant) -> Duration {
        if self.is_unlimited() {
            return Duration::ZERO;
        }

        if now > self.last_refill {
            let elapsed = now.duration_since(self.last_refill).as_secs_f64();
            self.available = (self.available + elapsed * self.refill_per_sec).min(self.burst);
            self.last_refill = now;
        }

        if self.available >= 1.0 {
            self.available -= 1.0;
            return Duration::ZERO;
        }

        // `last_refill` may already lie in the future when tokens are booked ahead.
        let deficit = 1.0 - self.available;
        let ready_at = self.last_refill + Duration::from_secs_f64(deficit / self.refill_per_sec);
        self.available = 0.0;
        self.last_refill = ready_at;
        ready_at.saturating_duration_since(now)
    }

    /// Takes one token, sleeping until it is available.
    pub async fn acquire(&mut self) {
        let wait = self.reserve_at(Instant::now());
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_steady_rate() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(2, Duration::from_secs(1), 2);

        assert_eq!(bucket.reserve_at(start), Duration::ZERO);
        assert_eq!(bucket.reserve_at(start), Duration::ZERO);
        assert_eq!(bucket.reserve_at(start), Duration::from_millis(500));
        // Booked in advance: the next one queues behind it.
        assert_eq!(bucket.reserve_at(start), Duration::from_millis(1000));

        let later = start + Duration::from_secs(10);
        assert_eq!(bucket.reserve_at(later), Duration::ZERO);
        assert_eq!(bucket.reserve_at(later), Duration::ZERO);
        assert!(bucket.reserve_at(later) > Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_spaces_sends() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(4, Duration::from_secs(1), 1);
        for _ in 0..5 {
            bucket.acquire().await;
        }
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(1), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(1100), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_rate_is_unlimited() {
        let mut bucket = TokenBucket::new(0, Duration::from_secs(1), 1);
        assert!(bucket.is_unlimited());
        for _ in 0..1000 {
            assert_eq!(bucket.reserve_at(Instant::now()), Duration::ZERO);
        }
    }
}
