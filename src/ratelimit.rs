//! Token bucket guarding outbound writes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::HueError;

const NANOS_PER_SECOND: f64 = 1_000_000_000.0;

/// Time source of a [`RateLimiter`].
#[async_trait]
pub trait Clock: Send + Sync {
    /// Monotonic nanoseconds since an arbitrary origin.
    fn now_nanos(&self) -> u64;

    async fn sleep(&self, duration: Duration);
}

/// Clock backed by the tokio timer.
#[derive(Debug, Clone)]
pub struct TokioClock {
    origin: tokio::time::Instant,
}

impl Default for TokioClock {
    fn default() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

#[async_trait]
impl Clock for TokioClock {
    fn now_nanos(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug)]
struct Bucket {
    /// Earliest instant at which fresh permits can be handed out.
    next_free_nanos: u64,
    stored_permits: f64,
    max_permits: f64,
    interval_nanos: f64,
}

impl Bucket {
    /// Banks the permits accumulated while idle.
    fn resync(&mut self, now: u64) {
        if now > self.next_free_nanos {
            let idle = (now - self.next_free_nanos) as f64;
            self.stored_permits =
                (self.stored_permits + idle / self.interval_nanos).min(self.max_permits);
            self.next_free_nanos = now;
        }
    }

    /// Reserves `permits` and returns the instant at which they are available.
    fn reserve(&mut self, permits: u32, now: u64) -> u64 {
        self.resync(now);
        let requested = f64::from(permits);
        let from_storage = requested.min(self.stored_permits);
        let fresh = requested - from_storage;
        self.stored_permits -= from_storage;

        let wait = (fresh * self.interval_nanos).min(u64::MAX as f64) as u64;
        self.next_free_nanos = self.next_free_nanos.saturating_add(wait);
        self.next_free_nanos
    }
}

/// Issues permits at a steady rate, allowing bursts of up to
/// `max_burst_seconds` worth of permits after idle periods.
///
/// A new limiter starts with a full bucket.
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter").finish_non_exhaustive()
    }
}

impl RateLimiter {
    pub fn new(permits_per_second: f64, max_burst_seconds: f64) -> Self {
        Self::with_clock(
            permits_per_second,
            max_burst_seconds,
            Arc::new(TokioClock::default()),
        )
    }

    pub fn with_clock(
        permits_per_second: f64,
        max_burst_seconds: f64,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let permits_per_second = permits_per_second.max(f64::MIN_POSITIVE);
        let max_permits = permits_per_second * max_burst_seconds.max(0.0);
        let now = clock.now_nanos();
        Self {
            bucket: Mutex::new(Bucket {
                next_free_nanos: now,
                stored_permits: max_permits,
                max_permits,
                interval_nanos: NANOS_PER_SECOND / permits_per_second,
            }),
            clock,
        }
    }

    async fn reserve(&self, permits: u32) -> Duration {
        let mut bucket = self.bucket.lock().await;
        let now = self.clock.now_nanos();
        let available_at = bucket.reserve(permits, now);
        Duration::from_nanos(available_at.saturating_sub(now))
    }

    /// Waits until `permits` are available and returns the time spent waiting.
    pub async fn acquire(&self, permits: u32) -> Duration {
        let wait = self.reserve(permits).await;
        if !wait.is_zero() {
            log::trace!("rate limited, waiting {wait:?} for {permits} permit(s)");
            self.clock.sleep(wait).await;
        }
        wait
    }

    /// Like [`acquire`](Self::acquire), but returns early with
    /// [`HueError::Cancelled`] once `cancel` fires. The reservation is kept.
    pub async fn acquire_cancellable(
        &self,
        permits: u32,
        cancel: &CancellationToken,
    ) -> crate::Result<Duration> {
        let wait = self.reserve(permits).await;
        if wait.is_zero() {
            return Ok(wait);
        }
        tokio::select! {
            () = self.clock.sleep(wait) => Ok(wait),
            () = cancel.cancelled() => Err(HueError::Cancelled),
        }
    }
}
