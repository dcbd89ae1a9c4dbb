// limiter.rs — Sliding-window cap on snapshot publications.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// Allows at most `max` publications in any `window`.
#[derive(Debug)]
pub struct PublicationLimiter {
    max: usize,
    window: Duration,
    recent: VecDeque<Instant>,
}

impl PublicationLimiter {
    pub fn new(max: usize, window: Duration) -> Self {
        Self {
            max,
            window,
            recent: VecDeque::new(),
        }
    }

    /// Record a publication if the window has room.
    pub fn try_acquire(&mut self) -> bool {
        let now = Instant::now();
        self.expire(now);
        if self.recent.len() >= self.max {
            return false;
        }
        self.recent.push_back(now);
        true
    }

    /// Publications still allowed in the current window.
    pub fn remaining(&mut self) -> usize {
        self.expire(Instant::now());
        self.max.saturating_sub(self.recent.len())
    }

    fn expire(&mut self, now: Instant) {
        while let Some(oldest) = self.recent.front() {
            if now.duration_since(*oldest) >= self.window {
                self.recent.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn window_slides() {
        let mut limiter = PublicationLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.try_acquire());
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        assert_eq!(limiter.remaining(), 0);

        // First publication leaves the window.
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(limiter.remaining(), 1);
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_max_blocks_everything() {
        let mut limiter = PublicationLimiter::new(0, Duration::from_secs(1));
        assert!(!limiter.try_acquire());
    }
}
