use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Enforces a minimum spacing between admitted calls across every caller that shares it.
///
/// The lock is held across the wait, so the read of the last admission and the write of
/// the new one form a single critical section. Waiters queue in FIFO order on the mutex.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_admission: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_admission: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Waits until the caller may issue a request, then records the admission.
    pub async fn acquire(&self) {
        let mut last = self.last_admission.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + self.min_interval;
            if ready_at > Instant::now() {
                log::trace!(
                    "[RateLimiter] Waiting {:?} for next slot",
                    ready_at - Instant::now()
                );
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Process-wide limiter shared by every tenant. The first caller fixes the interval.
pub fn shared(min_interval: Duration) -> Arc<RateLimiter> {
    static LIMITER: OnceLock<Arc<RateLimiter>> = OnceLock::new();

    let limiter = LIMITER.get_or_init(|| {
        log::info!(
            "[RateLimiter] Shared limiter initialised at {:?} between calls",
            min_interval
        );
        Arc::new(RateLimiter::new(min_interval))
    });
    if limiter.min_interval() != min_interval {
        log::warn!(
            "[RateLimiter] Requested interval {:?} ignored, shared limiter already runs at {:?}",
            min_interval,
            limiter.min_interval()
        );
    }
    limiter.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn first_acquire_is_immediate() {
        let limiter = RateLimiter::new(Duration::from_millis(250));
        let start = Instant::now();
        limiter.acquire().await;
        assert_eq!(Instant::now(), start);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_admissions_are_spaced() {
        let interval = Duration::from_millis(250);
        let limiter = Arc::new(RateLimiter::new(interval));
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                Instant::now()
            }));
        }

        let mut admissions = Vec::new();
        for handle in handles {
            admissions.push(handle.await.unwrap());
        }
        admissions.sort();

        for pair in admissions.windows(2) {
            assert!(pair[1] - pair[0] >= interval, "gap {:?}", pair[1] - pair[0]);
        }
        assert!(admissions[7] - start >= interval * 7);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_gap_longer_than_interval_does_not_wait() {
        let limiter = RateLimiter::new(Duration::from_millis(100));
        limiter.acquire().await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        let before = Instant::now();
        limiter.acquire().await;
        assert_eq!(Instant::now(), before);
    }

    #[test]
    fn shared_limiter_is_a_singleton() {
        let a = shared(Duration::from_millis(250));
        let b = shared(Duration::from_millis(10));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.min_interval(), a.min_interval());
    }
}
