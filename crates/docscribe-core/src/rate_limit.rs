//! Adaptive rate limiting and retry for LLM calls.
//!
//! Every call waits for a governor permit via `until_ready()`, which spaces
//! requests at the configured rate. On 429 the governor is slowed; retryable
//! failures are retried with backoff, honouring Retry-After when present.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use tokio_util::sync::CancellationToken;

use crate::CoreError;
use crate::llm::{ChatRequest, Completion, LlmBackend, LlmError};

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Longest backoff used when the server gives no Retry-After.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Rate limiter with adaptive slowdown via ArcSwap.
///
/// When a 429 is received, the governor is atomically swapped to a slower rate.
/// After a cooldown period (60s) with no 429s, the original rate is restored.
pub struct AdaptiveLimiter {
    limiter: ArcSwap<DirectLimiter>,
    base_period: Duration,
    /// Current slowdown factor (1 = normal, 2 = half rate, etc.).
    current_factor: AtomicU32,
    last_429: std::sync::Mutex<Option<Instant>>,
}

fn quota_for(period: Duration) -> Quota {
    Quota::with_period(period).unwrap_or_else(|| Quota::per_second(NonZeroU32::MAX))
}

impl AdaptiveLimiter {
    /// Create a limiter allowing one request per `period`.
    /// A zero period disables throttling.
    pub fn new(period: Duration) -> Self {
        let limiter = Arc::new(DirectLimiter::direct(quota_for(period)));
        Self {
            limiter: ArcSwap::from(limiter),
            base_period: period,
            current_factor: AtomicU32::new(1),
            last_429: std::sync::Mutex::new(None),
        }
    }

    /// Create a limiter allowing `n` requests per second.
    pub fn per_second(n: u32) -> Self {
        Self::new(Duration::from_secs(1) / n.max(1))
    }

    /// Create a limiter allowing `n` requests per minute (0 = unthrottled).
    pub fn per_minute(n: u32) -> Self {
        if n == 0 {
            return Self::new(Duration::ZERO);
        }
        Self::new(Duration::from_secs(60) / n)
    }

    /// Wait until the rate limiter allows a request.
    pub async fn acquire(&self) {
        self.try_decay();
        let limiter = self.limiter.load();
        limiter.until_ready().await;
    }

    /// Called when a 429 is received. Doubles the slowdown factor and swaps the governor.
    pub fn on_rate_limited(&self) {
        if let Ok(mut last) = self.last_429.lock() {
            *last = Some(Instant::now());
        }

        // Double factor, cap at 16x slowdown
        let _ = self
            .current_factor
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |f| {
                Some((f * 2).min(16))
            });

        let factor = self.current_factor.load(Ordering::SeqCst);
        if let Some(scaled) = self.base_period.checked_mul(factor)
            && let Some(quota) = Quota::with_period(scaled)
        {
            self.limiter.store(Arc::new(DirectLimiter::direct(quota)));
        }
    }

    pub fn current_factor(&self) -> u32 {
        self.current_factor.load(Ordering::SeqCst)
    }

    /// If 60s have passed since the last 429, restore the original rate.
    fn try_decay(&self) {
        let should_restore = self
            .last_429
            .lock()
            .ok()
            .and_then(|last| last.map(|t| t.elapsed().as_secs() >= 60))
            .unwrap_or(false);

        if should_restore && self.current_factor.load(Ordering::SeqCst) > 1 {
            self.current_factor.store(1, Ordering::SeqCst);
            self.limiter
                .store(Arc::new(DirectLimiter::direct(quota_for(self.base_period))));
        }
    }
}

/// Parse a Retry-After header value (seconds or HTTP-date).
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    if let Ok(secs) = value.trim().parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    // HTTP-date (e.g. "Wed, 21 Oct 2015 07:28:00 GMT"): use a conservative fixed wait
    if value.contains(',') || value.contains("GMT") {
        return Some(Duration::from_secs(5));
    }
    None
}

/// How long to wait before retry number `attempt` (1-based).
fn backoff(err: &LlmError, attempt: u32, timeout: Duration) -> Duration {
    let wait = match err {
        LlmError::RateLimited {
            retry_after: Some(d),
        } => *d,
        _ => {
            let exp = Duration::from_secs(1u64 << (attempt.saturating_sub(1)).min(5));
            exp.min(MAX_BACKOFF) + Duration::from_millis(fastrand::u64(0..250))
        }
    };
    // Sleeping longer than the request timeout makes no sense.
    wait.min(timeout)
}

/// Send `request` through `backend` with rate limiting and retries.
///
/// 1. Waits for a governor permit
/// 2. Calls the backend
/// 3. On 429 slows the governor; on any retryable error sleeps
///    (Retry-After or exponential backoff) and tries again, up to
///    `max_retries` extra attempts
/// 4. Non-retryable errors are returned immediately
///
/// `on_retry` is told about every retry before the sleep starts.
/// Cancellation is checked while waiting, calling and sleeping.
#[allow(clippy::too_many_arguments)]
pub async fn complete_with_retry(
    backend: &dyn LlmBackend,
    request: &ChatRequest,
    client: &reqwest::Client,
    timeout: Duration,
    limiter: &AdaptiveLimiter,
    max_retries: u32,
    on_retry: &(dyn Fn(u32, Duration, &LlmError) + Send + Sync),
    cancel: &CancellationToken,
) -> Result<Completion, CoreError> {
    let mut attempt = 0u32;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CoreError::Cancelled),
            _ = limiter.acquire() => {}
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CoreError::Cancelled),
            r = backend.complete(request, client, timeout) => r,
        };

        let err = match result {
            Ok(completion) => return Ok(completion),
            Err(e) => e,
        };

        if matches!(err, LlmError::RateLimited { .. }) {
            limiter.on_rate_limited();
        }
        if !err.is_retryable() || attempt >= max_retries {
            return Err(err.into());
        }

        attempt += 1;
        let wait = backoff(&err, attempt, timeout);
        tracing::info!(
            backend = backend.name(),
            attempt,
            wait_secs = wait.as_secs_f64(),
            error = %err,
            "LLM call failed, retrying"
        );
        on_retry(attempt, wait, &err);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CoreError::Cancelled),
            _ = tokio::time::sleep(wait) => {}
        }
    }
}
