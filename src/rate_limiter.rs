use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};

#[derive(Clone, Debug, Default)]
pub struct Limits {
    pub requests_per_min: Option<u64>,
    pub concurrency: Option<u32>,
}

/// Shared pacing for fan-out fetches: a concurrency cap plus a
/// requests-per-minute token bucket. Cloning shares the same buckets.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    limits: Limits,
    // (tokens, time of last refill)
    rpm_tokens: Mutex<(f64, Instant)>,
    sem: Option<Arc<Semaphore>>,
}

/// Held for the duration of one request; dropping it frees the concurrency slot.
#[derive(Debug)]
pub struct Permit {
    _permit: Option<OwnedSemaphorePermit>,
}

impl RateLimiter {
    pub fn new(limits: Limits) -> Self {
        let rpm_capacity = limits.requests_per_min.unwrap_or(0) as f64;
        let sem = limits
            .concurrency
            .map(|c| Arc::new(Semaphore::new(c.max(1) as usize)));
        Self {
            inner: Arc::new(Inner {
                limits,
                rpm_tokens: Mutex::new((rpm_capacity, Instant::now())),
                sem,
            }),
        }
    }

    /// Wait for a concurrency slot and a request token.
    pub async fn acquire(&self) -> Permit {
        let permit = match &self.inner.sem {
            // The semaphore is never closed, so acquire only fails if it were
            Some(sem) => sem.clone().acquire_owned().await.ok(),
            None => None,
        };

        if let Some(rpm) = self.inner.limits.requests_per_min {
            if rpm > 0 {
                self.consume_token(rpm as f64, 60.0).await;
            }
        }

        Permit { _permit: permit }
    }

    pub fn available_slots(&self) -> Option<usize> {
        self.inner.sem.as_ref().map(|s| s.available_permits())
    }

    async fn consume_token(&self, capacity: f64, period_secs: f64) {
        // Basic token bucket: refill continuously, wait until a token accumulates
        loop {
            let mut guard = self.inner.rpm_tokens.lock().await;
            let (ref mut tokens, ref mut last) = *guard;
            let now = Instant::now();
            let elapsed = now.duration_since(*last).as_secs_f64();
            let refill_rate = capacity / period_secs;
            *tokens = (*tokens + elapsed * refill_rate).min(capacity);
            *last = now;
            if *tokens >= 1.0 {
                *tokens -= 1.0;
                break;
            }
            let secs = (1.0 - *tokens) / refill_rate;
            drop(guard);
            tokio::time::sleep(Duration::from_secs_f64(secs.max(0.001))).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn permits_bound_concurrency() {
        let rl = RateLimiter::new(Limits {
            requests_per_min: None,
            concurrency: Some(2),
        });
        let a = rl.acquire().await;
        let _b = rl.acquire().await;
        assert_eq!(rl.available_slots(), Some(0));
        drop(a);
        assert_eq!(rl.available_slots(), Some(1));
    }

    #[tokio::test]
    async fn unlimited_limiter_does_not_block() {
        let rl = RateLimiter::new(Limits::default());
        for _ in 0..100 {
            let _p = rl.acquire().await;
        }
        assert_eq!(rl.available_slots(), None);
    }

    #[tokio::test]
    async fn zero_concurrency_is_clamped_to_one() {
        let rl = RateLimiter::new(Limits {
            requests_per_min: None,
            concurrency: Some(0),
        });
        let _p = rl.acquire().await;
        assert_eq!(rl.available_slots(), Some(0));
    }
}
