//! Per-source request rate limiting.
//!
//! Each source owns a GCRA limiter sized to `max_requests` per `window` with a
//! burst of `max_requests`. Waiting for capacity suspends only the calling task.

use governor::{
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use parking_lot::{Mutex, RwLock};
use portfolio_core::{RateLimitConfig, SourceId};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

type GovernorLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

struct SourceLimiter {
    limiter: GovernorLimiter,
    window: Duration,
    recent: Mutex<VecDeque<Instant>>,
    total: AtomicU32,
}

impl SourceLimiter {
    fn new(config: RateLimitConfig) -> Self {
        Self {
            limiter: RateLimiter::direct(quota_for(config)),
            window: config.window(),
            recent: Mutex::new(VecDeque::new()),
            total: AtomicU32::new(0),
        }
    }

    fn record(&self, now: Instant) {
        self.total.fetch_add(1, Ordering::Relaxed);
        let mut recent = self.recent.lock();
        recent.push_back(now);
        prune(&mut recent, now, self.window);
    }

    fn recent_count(&self, now: Instant) -> usize {
        let mut recent = self.recent.lock();
        prune(&mut recent, now, self.window);
        recent.len()
    }
}

fn prune(recent: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(front) = recent.front() {
        if now.duration_since(*front) >= window {
            recent.pop_front();
        } else {
            break;
        }
    }
}

/// Builds a quota replenishing one cell every `window / max_requests`.
fn quota_for(config: RateLimitConfig) -> Quota {
    let period = config.window() / config.max_requests.get();
    Quota::with_period(period)
        .map(|q| q.allow_burst(config.max_requests))
        .unwrap_or_else(|| Quota::per_second(config.max_requests))
}

/// One limiter per source; unknown sources get the default quota on first use.
pub struct RateLimiterRegistry {
    default: RateLimitConfig,
    limiters: RwLock<HashMap<SourceId, Arc<SourceLimiter>>>,
}

impl RateLimiterRegistry {
    #[must_use]
    pub fn new(default: RateLimitConfig) -> Self {
        Self {
            default,
            limiters: RwLock::new(HashMap::new()),
        }
    }

    /// Installs a dedicated quota for a source, replacing any existing one.
    pub fn configure(&self, source: &SourceId, config: RateLimitConfig) {
        debug!(
            source = %source,
            max_requests = config.max_requests.get(),
            window_ms = config.window_ms,
            "Configured source rate limit"
        );
        self.limiters
            .write()
            .insert(source.clone(), Arc::new(SourceLimiter::new(config)));
    }

    fn limiter(&self, source: &SourceId) -> Arc<SourceLimiter> {
        if let Some(limiter) = self.limiters.read().get(source) {
            return Arc::clone(limiter);
        }
        let mut limiters = self.limiters.write();
        Arc::clone(
            limiters
                .entry(source.clone())
                .or_insert_with(|| Arc::new(SourceLimiter::new(self.default))),
        )
    }

    /// Waits until the source has capacity for one more request.
    pub async fn acquire(&self, source: &SourceId) {
        let limiter = self.limiter(source);
        limiter.limiter.until_ready().await;
        limiter.record(Instant::now());
    }

    /// Number of acquisitions within the source's last window.
    #[must_use]
    pub fn recent_requests(&self, source: &SourceId) -> usize {
        self.limiters
            .read()
            .get(source)
            .map_or(0, |l| l.recent_count(Instant::now()))
    }

    /// Number of acquisitions since the registry was created.
    #[must_use]
    pub fn total_requests(&self, source: &SourceId) -> u32 {
        self.limiters
            .read()
            .get(source)
            .map_or(0, |l| l.total.load(Ordering::Relaxed))
    }
}

impl Default for RateLimiterRegistry {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
