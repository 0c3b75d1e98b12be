//! Request pacing shared by the workers of one job

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

/// Token pacer capping outgoing requests per second across all workers of a
/// job. Acquire reserves the next free slot under a short lock, then sleeps
/// outside it, so a caller dropped mid-wait (cancellation) never wedges the
/// limiter.
pub struct RateLimiter {
    interval: Option<Duration>,
    next_slot: Mutex<Instant>,
}

impl RateLimiter {
    /// `per_second == 0` disables limiting.
    pub fn new(per_second: u32) -> Self {
        let interval = if per_second == 0 {
            None
        } else {
            Some(Duration::from_secs(1) / per_second)
        };
        Self {
            interval,
            next_slot: Mutex::new(Instant::now()),
        }
    }

    /// Waits until a request slot is available.
    pub async fn acquire(&self) {
        let Some(interval) = self.interval else {
            return;
        };

        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = if *next > now { *next } else { now };
            *next = slot + interval;
            slot
        };

        sleep_until(slot).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unlimited_acquire_returns_immediately() {
        let limiter = RateLimiter::new(0);
        let start = Instant::now();
        for _ in 0..100 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn paced_acquires_are_spaced_out() {
        let limiter = RateLimiter::new(100); // 10ms apart
        let start = Instant::now();
        for _ in 0..4 {
            limiter.acquire().await;
        }
        // First slot is immediate; the next three are paced.
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
