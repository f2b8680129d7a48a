//! Global politeness gate for outbound crawl traffic.
//!
//! One gate is shared by every crawl operation in the process. Acquiring it
//! serializes callers and spaces consecutive requests by at least the
//! configured delay, so two concurrent crawls of different galleries still
//! interleave their requests at the shared minimum interval.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep_until};

#[derive(Clone)]
pub struct RequestGate {
    inner: Arc<Mutex<Option<Instant>>>,
    delay: Duration,
    /// Upper bound of the random extra spacing added per request.
    jitter: Duration,
}

impl RequestGate {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(None)),
            delay,
            jitter: Duration::from_millis(300),
        }
    }

    /// Gate without jitter, for deterministic tests.
    pub fn without_jitter(delay: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(None)),
            delay,
            jitter: Duration::ZERO,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Waits until at least `delay` has passed since the previous acquisition
    /// anywhere in the process, then stamps the current instant.
    ///
    /// The lock is held across the sleep on purpose: that is what makes the
    /// gate serializing rather than per-caller throttling.
    pub async fn acquire(&self) {
        let mut last = self.inner.lock().await;
        if let Some(previous) = *last {
            let jitter = if self.jitter.is_zero() {
                Duration::ZERO
            } else {
                let max_ms = self.jitter.as_millis() as u64;
                Duration::from_millis(rand::rng().random_range(0..=max_ms))
            };
            sleep_until(previous + self.delay + jitter).await;
        }
        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn sequential_acquisitions_are_spaced() {
        let gate = RequestGate::without_jitter(Duration::from_secs(1));
        let started = Instant::now();
        gate.acquire().await;
        gate.acquire().await;
        gate.acquire().await;
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_the_interval() {
        let gate = RequestGate::without_jitter(Duration::from_millis(500));
        let started = Instant::now();

        let a = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.acquire().await })
        };
        let b = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.acquire().await })
        };
        let c = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.acquire().await })
        };

        let (ra, rb, rc) = tokio::join!(a, b, c);
        ra.unwrap();
        rb.unwrap();
        rc.unwrap();
        // Three acquisitions across tasks still span two full intervals.
        assert!(started.elapsed() >= Duration::from_millis(1000));
    }
}
