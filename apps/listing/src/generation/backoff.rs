//! Backoff engine: bounded retry with exponential delay, jitter, and a
//! rate-limit override.
//!
//! The engine is stateless between invocations: everything an attempt needs to
//! carry across retries (conversation history, last issues) lives in the
//! `Attempt` implementor owned by the caller.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(8);
pub const DEFAULT_JITTER: f64 = 0.25;

const RATE_LIMIT_JITTER: f64 = 0.35;
const RATE_LIMIT_CAP: Duration = Duration::from_secs(60);

/// Observer fired before each sleep: (failed attempt, wait, error text).
pub type RetryHook = Arc<dyn Fn(u32, Duration, &str) + Send + Sync>;

#[derive(Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction in [0, 1]; the delay is scaled by a factor drawn from [1-j, 1+j].
    pub jitter: f64,
    pub on_retry: Option<RetryHook>,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: DEFAULT_JITTER,
            on_retry: None,
        }
    }

    pub fn with_hook(mut self, hook: RetryHook) -> Self {
        self.on_retry = Some(hook);
        self
    }

    /// Total number of attempts, never less than one.
    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1).max(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("jitter", &self.jitter)
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Attempt trait
// ────────────────────────────────────────────────────────────────────────────

/// One retryable unit of work. `attempt(n)` is called with a 1-based attempt
/// number; implementors keep whatever must survive between attempts in `self`.
#[async_trait]
pub trait Attempt: Send {
    type Output: Send;
    type Error: Display + Send;

    async fn attempt(&mut self, n: u32) -> Result<Self::Output, Self::Error>;
}

// ────────────────────────────────────────────────────────────────────────────
// Driver
// ────────────────────────────────────────────────────────────────────────────

/// Runs `op` until it succeeds or `policy.total_attempts()` is exhausted,
/// returning the last error in the latter case.
pub async fn run_with_backoff<A>(policy: &RetryPolicy, op: &mut A) -> Result<A::Output, A::Error>
where
    A: Attempt + ?Sized,
{
    let total = policy.total_attempts();
    let mut n = 1;
    loop {
        match op.attempt(n).await {
            Ok(out) => return Ok(out),
            Err(err) if n >= total => return Err(err),
            Err(err) => pause(policy, n, &err.to_string()).await,
        }
        n += 1;
    }
}

async fn pause(policy: &RetryPolicy, n: u32, message: &str) {
    let wait = retry_wait(policy, n, message);
    if let Some(hook) = &policy.on_retry {
        hook(n, wait, message);
    }
    tokio::time::sleep(wait).await;
}

/// Wait after failed attempt `n`, including the rate-limit override.
pub fn retry_wait(policy: &RetryPolicy, n: u32, error_text: &str) -> Duration {
    let wait = apply_jitter(backoff_delay(policy, n), policy.jitter);
    if !is_rate_limit_error(error_text) {
        return wait;
    }

    let floor = Duration::from_secs(u64::from(n).saturating_mul(u64::from(n))).min(RATE_LIMIT_CAP);
    let widened = apply_jitter(wait.max(floor), RATE_LIMIT_JITTER);
    widened.clamp(floor, RATE_LIMIT_CAP)
}

/// `base * 2^(n-1)`, capped at `max_delay`. No jitter.
pub fn backoff_delay(policy: &RetryPolicy, n: u32) -> Duration {
    let exp = n.saturating_sub(1).min(31);
    let delay = policy.base_delay.saturating_mul(1u32 << exp);
    if policy.max_delay > Duration::ZERO {
        delay.min(policy.max_delay)
    } else {
        delay
    }
}

fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 || delay.is_zero() {
        return delay;
    }
    let jitter = jitter.min(1.0);
    let factor = rand::thread_rng().gen_range((1.0 - jitter)..=(1.0 + jitter));
    delay.mul_f64(factor)
}

/// Case-insensitive "429" / "rate limit" match on an error's text.
pub fn is_rate_limit_error(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("429") || lower.contains("rate limit")
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Attempt driven by a plain closure over the attempt number.
    struct Scripted<F>(F);

    #[async_trait]
    impl<F, T, E> Attempt for Scripted<F>
    where
        F: FnMut(u32) -> Result<T, E> + Send,
        T: Send,
        E: Display + Send,
    {
        type Output = T;
        type Error = E;

        async fn attempt(&mut self, n: u32) -> Result<T, E> {
            (self.0)(n)
        }
    }

    fn no_jitter(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::new(max_retries)
        }
    }

    #[test]
    fn test_delay_is_non_decreasing_up_to_cap() {
        let policy = no_jitter(10);
        let mut prev = Duration::ZERO;
        for n in 1..=12 {
            let d = backoff_delay(&policy, n);
            assert!(d >= prev, "attempt {n}: {d:?} < {prev:?}");
            assert!(d <= policy.max_delay);
            prev = d;
        }
        assert_eq!(backoff_delay(&policy, 1), Duration::from_millis(500));
        assert_eq!(backoff_delay(&policy, 2), Duration::from_millis(1000));
        assert_eq!(backoff_delay(&policy, 5), Duration::from_secs(8));
        assert_eq!(backoff_delay(&policy, 40), Duration::from_secs(8));
    }

    #[test]
    fn test_jitter_stays_within_band() {
        let policy = RetryPolicy::new(3);
        for _ in 0..200 {
            let d = retry_wait(&policy, 2, "timeout");
            assert!(d >= Duration::from_millis(750) && d <= Duration::from_millis(1250));
        }
    }

    #[test]
    fn test_rate_limit_detection_is_case_insensitive() {
        assert!(is_rate_limit_error("API error (status 429): slow down"));
        assert!(is_rate_limit_error("Rate Limit exceeded"));
        assert!(!is_rate_limit_error("API error (status 500): boom"));
    }

    #[test]
    fn test_rate_limit_forces_quadratic_floor_and_cap() {
        let policy = RetryPolicy::new(20);
        for n in 1..=10u32 {
            for _ in 0..50 {
                let d = retry_wait(&policy, n, "HTTP 429 Too Many Requests");
                let floor = Duration::from_secs(u64::from(n * n)).min(Duration::from_secs(60));
                assert!(d >= floor, "attempt {n}: {d:?} below {floor:?}");
                assert!(d <= Duration::from_secs(60));
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_first_success_without_sleeping() {
        let start = tokio::time::Instant::now();
        let calls = AtomicU32::new(0);
        let mut op = Scripted(|_n: u32| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(7)
        });
        let out = run_with_backoff(&RetryPolicy::new(3), &mut op).await;
        assert_eq!(out, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_budget_and_returns_last_error() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let hook_seen = seen.clone();
        let policy = no_jitter(2).with_hook(Arc::new(move |n: u32, wait: Duration, msg: &str| {
            hook_seen.lock().push((n, wait, msg.to_string()));
        }));

        let mut op = Scripted(|n: u32| Err::<(), _>(format!("fail {n}")));
        let out = run_with_backoff(&policy, &mut op).await;

        assert_eq!(out, Err("fail 3".to_string()));
        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], (1, Duration::from_millis(500), "fail 1".to_string()));
        assert_eq!(seen[1], (2, Duration::from_millis(1000), "fail 2".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_still_attempts_once() {
        let calls = AtomicU32::new(0);
        let mut op = Scripted(|_n: u32| {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>("nope")
        });
        let _ = run_with_backoff(&RetryPolicy::new(0), &mut op).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_attempt_sleeps_at_least_n_squared() {
        let start = tokio::time::Instant::now();
        let mut op = Scripted(|n: u32| {
            if n < 3 {
                Err("API error (status 429): rate limit".to_string())
            } else {
                Ok(n)
            }
        });
        let out = run_with_backoff(&RetryPolicy::new(5), &mut op).await;
        assert_eq!(out, Ok(3));
        // 1s after attempt 1, 4s after attempt 2
        assert!(start.elapsed() >= Duration::from_secs(5));
    }
}
